use blockdev::BlockDevice;

use super::ExFatPartition;
use crate::cache::CacheOption;
use crate::error::FsError;

/// Bits of allocation bitmap held by one sector.
const BITS_PER_SECTOR: u32 = 4096;

impl<D: BlockDevice> ExFatPartition<D> {
    fn bitmap_sector(&self, bit: u32) -> u32 {
        self.bitmap_start_sector + bit / BITS_PER_SECTOR
    }

    /// Finds `count` free clusters in a row, scanning from `cluster` and
    /// wrapping once. Runs never span the wrap. `Ok(None)` means no run.
    pub fn bitmap_find(&mut self, cluster: u32, count: u32) -> Result<Option<u32>, FsError> {
        if count == 0 {
            return Err(FsError::InvalidArgument);
        }
        let total = self.cluster_count();
        let start = match cluster.checked_sub(2) {
            Some(bit) if bit < total => bit,
            _ => 0,
        };
        let mut end = start;
        let mut bgn = start;
        loop {
            let sector = self.bitmap_sector(end);
            let buf = self.cache_fetch(sector, CacheOption::FOR_READ)?;
            loop {
                let offset = (end % BITS_PER_SECTOR) as usize;
                let used = buf[offset >> 3] & (1 << (offset & 7)) != 0;
                end += 1;
                if used {
                    bgn = end;
                } else if end - bgn == count {
                    return Ok(Some(bgn + 2));
                }
                if end == start {
                    return Ok(None);
                }
                if end >= total {
                    if start == 0 {
                        return Ok(None);
                    }
                    end = 0;
                    bgn = 0;
                    break;
                }
                if end % BITS_PER_SECTOR == 0 {
                    break;
                }
            }
        }
    }

    /// Sets (`value == true`) or clears `count` bits from `cluster` on.
    /// Nothing changes when any bit in the range already holds `value`.
    pub fn bitmap_modify(&mut self, cluster: u32, count: u32, value: bool) -> Result<(), FsError> {
        let first = cluster.checked_sub(2).ok_or(FsError::BadCluster(cluster))?;
        if count == 0 {
            return Ok(());
        }
        if first as u64 + count as u64 > self.cluster_count() as u64 {
            return Err(FsError::BadCluster(cluster));
        }
        let end = first + count;
        for pass_apply in [false, true] {
            let mut bit = first;
            while bit < end {
                let sector = self.bitmap_sector(bit);
                let option = if pass_apply {
                    CacheOption::FOR_WRITE
                } else {
                    CacheOption::FOR_READ
                };
                let buf = self.cache_fetch(sector, option)?;
                let sector_end = (bit - bit % BITS_PER_SECTOR + BITS_PER_SECTOR).min(end);
                while bit < sector_end {
                    let offset = (bit % BITS_PER_SECTOR) as usize;
                    let mask = 1u8 << (offset & 7);
                    if pass_apply {
                        buf[offset >> 3] ^= mask;
                    } else if (buf[offset >> 3] & mask != 0) == value {
                        log::warn!(
                            "sdfs: bitmap_conflict cluster={} value={}",
                            bit + 2,
                            value as u8
                        );
                        return Err(FsError::BitmapConflict(bit + 2));
                    }
                    bit += 1;
                }
            }
        }
        Ok(())
    }

    pub fn free_cluster_count(&mut self) -> Result<u32, FsError> {
        let total = self.cluster_count();
        let mut used = 0u32;
        let mut bit = 0u32;
        while bit < total {
            let sector = self.bitmap_sector(bit);
            let buf = self.cache_fetch(sector, CacheOption::FOR_READ)?;
            let bits = (total - bit).min(BITS_PER_SECTOR);
            let whole = (bits / 8) as usize;
            used += buf[..whole].iter().map(|b| b.count_ones()).sum::<u32>();
            let tail = bits % 8;
            if tail != 0 {
                used += (buf[whole] & ((1u8 << tail) - 1)).count_ones();
            }
            bit += bits;
        }
        Ok(total - used)
    }
}
