use blockdev::BlockDevice;

use super::types::EXFAT_EOC;
use super::ExFatPartition;
use crate::cache::CacheOption;
use crate::common::{get_le32, put_le32};
use crate::error::FsError;

impl<D: BlockDevice> ExFatPartition<D> {
    /// Reads the FAT entry for `cluster`; `None` marks end of chain.
    pub fn fat_get(&mut self, cluster: u32) -> Result<Option<u32>, FsError> {
        if cluster < 2 || cluster > self.last_cluster() {
            return Err(FsError::BadCluster(cluster));
        }
        let sector = self.fat_start_sector() + (cluster >> 7);
        let buf = self.cache_fetch(sector, CacheOption::FOR_READ)?;
        let next = get_le32(buf, ((cluster & 0x7F) << 2) as usize);
        Ok((next != EXFAT_EOC).then_some(next))
    }

    pub fn fat_put(&mut self, cluster: u32, value: u32) -> Result<(), FsError> {
        if cluster < 2 || cluster > self.last_cluster() {
            return Err(FsError::BadCluster(cluster));
        }
        let sector = self.fat_start_sector() + (cluster >> 7);
        let buf = self.cache_fetch(sector, CacheOption::FOR_WRITE)?;
        put_le32(buf, ((cluster & 0x7F) << 2) as usize, value);
        Ok(())
    }

    pub(crate) fn next_cluster(&mut self, cluster: u32) -> Result<Option<u32>, FsError> {
        match self.fat_get(cluster)? {
            Some(next) if next < 2 || next > self.last_cluster() => {
                log::warn!("sdfs: exfat_chain_broken cluster={} next={:#x}", cluster, next);
                Err(FsError::BadCluster(next))
            }
            other => Ok(other),
        }
    }

    /// Frees a FAT-linked chain, clearing bitmap bits one physical run at a
    /// time.
    pub fn free_chain(&mut self, cluster: u32) -> Result<(), FsError> {
        let mut cluster = cluster;
        let mut start = cluster;
        let mut visited = 0u32;
        loop {
            if visited > self.cluster_count() {
                log::warn!("sdfs: exfat_chain_loop start={}", start);
                return Err(FsError::ChainTooLong);
            }
            visited += 1;
            let next = self.next_cluster(cluster)?;
            self.fat_put(cluster, 0)?;
            match next {
                Some(next) if next == cluster + 1 => {}
                _ => {
                    self.bitmap_modify(start, cluster - start + 1, false)?;
                    if let Some(next) = next {
                        start = next;
                    }
                }
            }
            match next {
                Some(next) => cluster = next,
                None => return Ok(()),
            }
        }
    }

    /// Number of clusters in the chain starting at `cluster`.
    pub fn chain_size(&mut self, cluster: u32) -> Result<u32, FsError> {
        let mut cluster = cluster;
        let mut count = 0u32;
        loop {
            if count > self.cluster_count() {
                return Err(FsError::ChainTooLong);
            }
            count += 1;
            match self.next_cluster(cluster)? {
                Some(next) => cluster = next,
                None => return Ok(count),
            }
        }
    }

    /// Byte length of the root directory chain.
    pub fn root_length(&mut self) -> Result<u64, FsError> {
        let clusters = self.chain_size(self.root_cluster())?;
        Ok((clusters as u64) << self.bytes_per_cluster_shift())
    }
}
