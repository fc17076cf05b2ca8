use bitflags::bitflags;
use blockdev::{BlockDevice, SECTOR_SIZE};

use crate::error::FsError;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct CacheOption: u8 {
        const DIRTY = 0x01;
        /// Flush also writes the sector `mirror_offset` sectors further on.
        const MIRROR_FAT = 0x02;
        /// Skip the device read; the caller overwrites the whole sector.
        const NO_READ = 0x04;
    }
}

impl CacheOption {
    pub const FOR_READ: Self = Self::empty();
    pub const FOR_WRITE: Self = Self::DIRTY;
    pub const RESERVE_FOR_WRITE: Self = Self::DIRTY.union(Self::NO_READ);
    const STATUS_MASK: Self = Self::DIRTY.union(Self::MIRROR_FAT);
}

/// Single-sector write-back cache.
pub struct SectorCache {
    buffer: [u8; SECTOR_SIZE],
    sector: Option<u32>,
    status: CacheOption,
    mirror_offset: u32,
}

impl Default for SectorCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SectorCache {
    pub const fn new() -> Self {
        Self {
            buffer: [0; SECTOR_SIZE],
            sector: None,
            status: CacheOption::empty(),
            mirror_offset: 0,
        }
    }

    pub fn set_mirror_offset(&mut self, sectors: u32) {
        self.mirror_offset = sectors;
    }

    pub fn sector(&self) -> Option<u32> {
        self.sector
    }

    pub fn is_dirty(&self) -> bool {
        self.status.contains(CacheOption::DIRTY)
    }

    pub fn holds(&self, sector: u32) -> bool {
        self.sector == Some(sector)
    }

    /// True when the cached sector lies in `first..first + count`.
    pub fn holds_any(&self, first: u32, count: u32) -> bool {
        match self.sector {
            Some(sector) => sector >= first && sector - first < count,
            None => false,
        }
    }

    pub fn buffer(&self) -> &[u8; SECTOR_SIZE] {
        &self.buffer
    }

    pub fn mark_dirty(&mut self) {
        self.status |= CacheOption::DIRTY;
    }

    /// Drops the cached sector without writing it back.
    pub fn invalidate(&mut self) {
        self.status = CacheOption::empty();
        self.sector = None;
    }

    pub fn fill<D: BlockDevice>(
        &mut self,
        dev: &mut D,
        sector: u32,
        option: CacheOption,
    ) -> Result<&mut [u8; SECTOR_SIZE], FsError> {
        if self.sector != Some(sector) {
            self.sync(dev)?;
            if !option.contains(CacheOption::NO_READ) {
                if let Err(err) = dev.read_sector(sector, &mut self.buffer) {
                    log::error!("sdfs: cache_read_failed sector={} err={:?}", sector, err);
                    self.invalidate();
                    return Err(err.into());
                }
            }
            self.status = CacheOption::empty();
            self.sector = Some(sector);
        }
        self.status |= option & CacheOption::STATUS_MASK;
        Ok(&mut self.buffer)
    }

    pub fn sync<D: BlockDevice>(&mut self, dev: &mut D) -> Result<(), FsError> {
        if !self.status.contains(CacheOption::DIRTY) {
            return Ok(());
        }
        let Some(sector) = self.sector else {
            self.status = CacheOption::empty();
            return Ok(());
        };
        if let Err(err) = dev.write_sector(sector, &self.buffer) {
            log::error!("sdfs: cache_write_failed sector={} err={:?}", sector, err);
            return Err(err.into());
        }
        if self.status.contains(CacheOption::MIRROR_FAT) && self.mirror_offset != 0 {
            let mirror = sector.saturating_add(self.mirror_offset);
            if let Err(err) = dev.write_sector(mirror, &self.buffer) {
                log::error!("sdfs: cache_mirror_failed sector={} err={:?}", mirror, err);
                return Err(err.into());
            }
        }
        self.status.remove(CacheOption::DIRTY);
        Ok(())
    }

    /// Flushes and forgets the current sector, then lends the buffer out as
    /// scratch space. Its contents are unspecified.
    pub fn clear<D: BlockDevice>(&mut self, dev: &mut D) -> Result<&mut [u8; SECTOR_SIZE], FsError> {
        self.sync(dev)?;
        self.invalidate();
        Ok(&mut self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use blockdev::RamDisk;

    use super::*;

    #[test]
    fn fill_for_read_loads_sector_once() {
        let mut disk = RamDisk::new(4);
        disk.as_bytes_mut()[SECTOR_SIZE + 7] = 0x42;
        let mut cache = SectorCache::new();
        assert_eq!(cache.fill(&mut disk, 1, CacheOption::FOR_READ).unwrap()[7], 0x42);
        cache.fill(&mut disk, 1, CacheOption::FOR_READ).unwrap();
        assert_eq!(disk.read_count(), 1);
        assert!(!cache.is_dirty());
    }

    #[test]
    fn dirty_sector_is_flushed_before_switching() {
        let mut disk = RamDisk::new(4);
        let mut cache = SectorCache::new();
        cache.fill(&mut disk, 2, CacheOption::FOR_WRITE).unwrap()[0] = 0x99;
        assert_eq!(disk.sector(2)[0], 0);
        cache.fill(&mut disk, 3, CacheOption::FOR_READ).unwrap();
        assert_eq!(disk.sector(2)[0], 0x99);
        assert_eq!(cache.sector(), Some(3));
    }

    #[test]
    fn reserve_for_write_skips_device_read() {
        let mut disk = RamDisk::new(4);
        let mut cache = SectorCache::new();
        cache.fill(&mut disk, 0, CacheOption::RESERVE_FOR_WRITE).unwrap();
        assert_eq!(disk.read_count(), 0);
        assert!(cache.is_dirty());
    }

    #[test]
    fn mirror_flag_writes_second_copy() {
        let mut disk = RamDisk::new(8);
        let mut cache = SectorCache::new();
        cache.set_mirror_offset(3);
        cache
            .fill(&mut disk, 1, CacheOption::FOR_WRITE | CacheOption::MIRROR_FAT)
            .unwrap()[5] = 0x11;
        cache.sync(&mut disk).unwrap();
        assert_eq!(disk.sector(1)[5], 0x11);
        assert_eq!(disk.sector(4)[5], 0x11);
    }

    #[test]
    fn invalidate_discards_dirty_data() {
        let mut disk = RamDisk::new(2);
        let mut cache = SectorCache::new();
        cache.fill(&mut disk, 0, CacheOption::FOR_WRITE).unwrap()[0] = 1;
        cache.invalidate();
        cache.sync(&mut disk).unwrap();
        assert_eq!(disk.sector(0)[0], 0);
        assert_eq!(cache.sector(), None);
    }

    #[test]
    fn failed_flush_keeps_sector_dirty() {
        let mut disk = RamDisk::new(4);
        let mut cache = SectorCache::new();
        cache.fill(&mut disk, 0, CacheOption::FOR_WRITE).unwrap()[0] = 7;
        disk.fail_writes_after(Some(0));
        assert!(cache.fill(&mut disk, 1, CacheOption::FOR_READ).is_err());
        assert!(cache.is_dirty());
        assert_eq!(cache.sector(), Some(0));
        disk.fail_writes_after(None);
        cache.sync(&mut disk).unwrap();
        assert_eq!(disk.sector(0)[0], 7);
    }

    #[test]
    fn holds_any_checks_range() {
        let mut disk = RamDisk::new(16);
        let mut cache = SectorCache::new();
        cache.fill(&mut disk, 10, CacheOption::FOR_READ).unwrap();
        assert!(cache.holds_any(8, 3));
        assert!(!cache.holds_any(8, 2));
        assert!(!cache.holds_any(11, 4));
    }
}
