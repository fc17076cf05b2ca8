use blockdev::BlockDevice;

use super::types::*;
use super::FatPartition;
use crate::cache::CacheOption;
use crate::common::{get_le16, get_le32, put_le16, put_le32};
use crate::error::FsError;

impl<D: BlockDevice> FatPartition<D> {
    /// Reads the table entry for `cluster`. `None` marks end of chain and
    /// `Some(0)` a free cluster.
    pub fn fat_get(&mut self, cluster: u32) -> Result<Option<u32>, FsError> {
        if cluster < 2 || cluster > self.last_cluster() {
            return Err(FsError::BadCluster(cluster));
        }
        let value = match self.fat_type() {
            FatType::Fat32 => {
                let sector = self.fat_start_sector() + (cluster >> 7);
                let buf = self.cache_fetch_fat(sector, CacheOption::FOR_READ)?;
                get_le32(buf, ((cluster & 0x7F) << 2) as usize) & FAT32_MASK
            }
            FatType::Fat16 => {
                let sector = self.fat_start_sector() + (cluster >> 8);
                let buf = self.cache_fetch_fat(sector, CacheOption::FOR_READ)?;
                get_le16(buf, ((cluster & 0xFF) << 1) as usize) as u32
            }
            FatType::Fat12 => self.fat12_get(cluster)?,
        };
        if value > self.last_cluster() {
            Ok(None)
        } else {
            Ok(Some(value))
        }
    }

    pub fn fat_put(&mut self, cluster: u32, value: u32) -> Result<(), FsError> {
        if cluster < 2 || cluster > self.last_cluster() {
            return Err(FsError::BadCluster(cluster));
        }
        match self.fat_type() {
            FatType::Fat32 => {
                let sector = self.fat_start_sector() + (cluster >> 7);
                let offset = ((cluster & 0x7F) << 2) as usize;
                let buf = self.cache_fetch_fat(sector, CacheOption::FOR_WRITE)?;
                let old = get_le32(buf, offset);
                put_le32(buf, offset, (old & !FAT32_MASK) | (value & FAT32_MASK));
            }
            FatType::Fat16 => {
                let sector = self.fat_start_sector() + (cluster >> 8);
                let buf = self.cache_fetch_fat(sector, CacheOption::FOR_WRITE)?;
                put_le16(buf, ((cluster & 0xFF) << 1) as usize, value as u16);
            }
            FatType::Fat12 => self.fat12_put(cluster, value)?,
        }
        Ok(())
    }

    pub fn fat_put_eoc(&mut self, cluster: u32) -> Result<(), FsError> {
        self.fat_put(cluster, FAT_EOC_WRITE)
    }

    /// Follows one link of a chain, rejecting links to reserved clusters.
    pub(crate) fn next_cluster(&mut self, cluster: u32) -> Result<Option<u32>, FsError> {
        match self.fat_get(cluster)? {
            Some(next) if next < 2 => {
                log::warn!("sdfs: fat_chain_broken cluster={} next={}", cluster, next);
                Err(FsError::BadCluster(next))
            }
            other => Ok(other),
        }
    }

    #[cfg(feature = "fat12")]
    fn fat12_get(&mut self, cluster: u32) -> Result<u32, FsError> {
        let index = cluster + (cluster >> 1);
        let sector = self.fat_start_sector() + (index >> 9);
        let offset = (index & 0x1FF) as usize;
        let buf = self.cache_fetch_fat(sector, CacheOption::FOR_READ)?;
        let lo = buf[offset];
        let hi = if offset == 0x1FF {
            self.cache_fetch_fat(sector + 1, CacheOption::FOR_READ)?[0]
        } else {
            buf[offset + 1]
        };
        let raw = u16::from_le_bytes([lo, hi]);
        let value = if cluster & 1 == 1 { raw >> 4 } else { raw & 0x0FFF };
        Ok(value as u32)
    }

    #[cfg(not(feature = "fat12"))]
    fn fat12_get(&mut self, _cluster: u32) -> Result<u32, FsError> {
        Err(FsError::UnsupportedFatType)
    }

    #[cfg(feature = "fat12")]
    fn fat12_put(&mut self, cluster: u32, value: u32) -> Result<(), FsError> {
        let value = (value & 0x0FFF) as u16;
        let index = cluster + (cluster >> 1);
        let mut sector = self.fat_start_sector() + (index >> 9);
        let mut offset = (index & 0x1FF) as usize;
        let odd = cluster & 1 == 1;

        let mut buf = self.cache_fetch_fat(sector, CacheOption::FOR_WRITE)?;
        buf[offset] = if odd {
            (buf[offset] & 0x0F) | ((value << 4) as u8)
        } else {
            value as u8
        };
        offset += 1;
        if offset == 0x200 {
            sector += 1;
            offset = 0;
            buf = self.cache_fetch_fat(sector, CacheOption::FOR_WRITE)?;
        }
        buf[offset] = if odd {
            (value >> 4) as u8
        } else {
            (buf[offset] & 0xF0) | ((value >> 8) as u8 & 0x0F)
        };
        Ok(())
    }

    #[cfg(not(feature = "fat12"))]
    fn fat12_put(&mut self, _cluster: u32, _value: u32) -> Result<(), FsError> {
        Err(FsError::UnsupportedFatType)
    }

    /// Allocates one cluster, linking it after `current` when `current` is
    /// non-zero.
    pub fn allocate_cluster(&mut self, current: u32) -> Result<u32, FsError> {
        let last = self.last_cluster();
        let (mut find, set_start) = if self.alloc_search_start < current {
            (current, false)
        } else {
            (self.alloc_search_start, true)
        };
        let mut scanned = 0u32;
        loop {
            if scanned >= last - 1 {
                log::warn!("sdfs: fat_alloc_failed reason=no_free_cluster");
                return Err(FsError::NoFreeCluster);
            }
            scanned += 1;
            find += 1;
            if find > last {
                find = 2;
            }
            if self.fat_get(find)? == Some(0) {
                break;
            }
        }
        if set_start {
            self.alloc_search_start = find;
        }
        self.fat_put_eoc(find)?;
        if current != 0 {
            self.fat_put(current, find)?;
        }
        self.update_free_cluster_count(-1);
        Ok(find)
    }

    /// Allocates `count` physically contiguous clusters as one chain and
    /// returns the first.
    pub fn alloc_contiguous(&mut self, count: u32) -> Result<u32, FsError> {
        let last = self.last_cluster();
        if count == 0 {
            return Err(FsError::InvalidArgument);
        }
        if count > last - 1 {
            return Err(FsError::NoContiguousRun);
        }
        let mut set_start = true;
        let mut bgn = self.alloc_search_start + 1;
        let mut end = bgn;
        let mut scanned = 0u32;
        loop {
            if end > last {
                bgn = 2;
                end = 2;
            }
            if scanned >= last - 1 {
                log::warn!("sdfs: fat_alloc_failed reason=no_contiguous_run count={}", count);
                return Err(FsError::NoContiguousRun);
            }
            scanned += 1;
            if self.fat_get(end)? != Some(0) {
                // A free gap too short for the request stays reachable from the hint.
                if bgn != end {
                    set_start = false;
                }
                bgn = end + 1;
            } else if end - bgn + 1 == count {
                break;
            }
            end += 1;
        }
        if set_start {
            self.alloc_search_start = end;
        }
        self.fat_put_eoc(end)?;
        let mut cluster = end;
        while cluster > bgn {
            self.fat_put(cluster - 1, cluster)?;
            cluster -= 1;
        }
        self.update_free_cluster_count(-(count as i32));
        Ok(bgn)
    }

    pub fn free_chain(&mut self, cluster: u32) -> Result<(), FsError> {
        let mut cluster = cluster;
        let mut visited = 0u32;
        loop {
            if visited > self.last_cluster() {
                log::warn!("sdfs: fat_chain_loop start={}", cluster);
                return Err(FsError::ChainTooLong);
            }
            visited += 1;
            let next = self.fat_get(cluster)?;
            self.fat_put(cluster, 0)?;
            self.update_free_cluster_count(1);
            if cluster <= self.alloc_search_start {
                self.alloc_search_start = cluster - 1;
            }
            match next {
                None => return Ok(()),
                Some(next) if next < 2 => return Err(FsError::BadCluster(next)),
                Some(next) => cluster = next,
            }
        }
    }

    pub fn free_cluster_count(&mut self) -> Result<u32, FsError> {
        if let Some(count) = self.free_cluster_count {
            return Ok(count);
        }
        let last = self.last_cluster();
        let mut free = 0u32;
        match self.fat_type() {
            FatType::Fat12 => {
                for cluster in 2..=last {
                    if self.fat_get(cluster)? == Some(0) {
                        free += 1;
                    }
                }
            }
            FatType::Fat16 | FatType::Fat32 => {
                let fat32 = self.fat_type() == FatType::Fat32;
                let per_sector: u32 = if fat32 { 128 } else { 256 };
                let mut sector = self.fat_start_sector();
                let mut index = 0u32;
                while index <= last {
                    let buf = self.cache_fetch_fat(sector, CacheOption::FOR_READ)?;
                    let n = per_sector.min(last + 1 - index);
                    for slot in 0..n {
                        if index + slot < 2 {
                            continue;
                        }
                        let value = if fat32 {
                            get_le32(buf, slot as usize * 4) & FAT32_MASK
                        } else {
                            get_le16(buf, slot as usize * 2) as u32
                        };
                        if value == 0 {
                            free += 1;
                        }
                    }
                    index += n;
                    sector += 1;
                }
            }
        }
        self.free_cluster_count = Some(free);
        Ok(free)
    }

    pub(crate) fn update_free_cluster_count(&mut self, change: i32) {
        if let Some(count) = self.free_cluster_count.as_mut() {
            *count = count.saturating_add_signed(change);
        }
    }
}
