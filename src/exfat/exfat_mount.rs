use core::cmp;

use blockdev::{BlockDevice, SECTOR_SHIFT, SECTOR_SIZE};

use super::types::*;
use super::upcase::{UpcaseChecker, UpcaseReport};
use crate::cache::{CacheOption, SectorCache};
use crate::common::{get_le16, get_le32, get_le64, has_boot_signature, partition_start};
use crate::datetime::{DateTimeCallback, FsTimestamp};
use crate::error::FsError;

const EXFAT_OEM: &[u8; 5] = b"EXFAT";
const MAX_CLUSTER_SHIFT: u8 = 25;

/// exFAT volume geometry, allocation bitmap location and the sector cache.
pub struct ExFatPartition<D> {
    pub(crate) dev: D,
    pub(crate) cache: SectorCache,
    mounted: bool,
    fat_start_sector: u32,
    fat_length: u32,
    cluster_heap_start_sector: u32,
    cluster_count: u32,
    root_cluster: u32,
    sectors_per_cluster_shift: u8,
    cluster_mask: u32,
    pub(crate) bitmap_start_sector: u32,
    upcase_cluster: u32,
    upcase_length: u64,
    upcase_checksum: u32,
    label: [u16; LABEL_MAX_UNITS],
    label_length: u8,
    date_time: Option<DateTimeCallback>,
}

impl<D: BlockDevice> ExFatPartition<D> {
    pub fn new(dev: D) -> Self {
        Self {
            dev,
            cache: SectorCache::new(),
            mounted: false,
            fat_start_sector: 0,
            fat_length: 0,
            cluster_heap_start_sector: 0,
            cluster_count: 0,
            root_cluster: 0,
            sectors_per_cluster_shift: 0,
            cluster_mask: 0,
            bitmap_start_sector: 0,
            upcase_cluster: 0,
            upcase_length: 0,
            upcase_checksum: 0,
            label: [0; LABEL_MAX_UNITS],
            label_length: 0,
            date_time: None,
        }
    }

    /// Mounts the exFAT volume in MBR slot `part` (1..=4), or at sector 0
    /// when `part` is 0.
    pub fn init(&mut self, part: u8) -> Result<(), FsError> {
        self.mounted = false;
        self.cache.invalidate();
        self.label_length = 0;

        let sector0: [u8; SECTOR_SIZE] = *self.cache.fill(&mut self.dev, 0, CacheOption::FOR_READ)?;
        let volume_start = partition_start(&sector0, part).ok_or(FsError::NoPartition)?;
        let boot: [u8; SECTOR_SIZE] =
            *self.cache.fill(&mut self.dev, volume_start, CacheOption::FOR_READ)?;

        if &boot[BS_OEM_NAME..BS_OEM_NAME + 5] != EXFAT_OEM || !has_boot_signature(&boot) {
            return Err(FsError::InvalidBootSector);
        }
        let sector_shift = boot[BS_BYTES_PER_SECTOR_SHIFT];
        if sector_shift as u32 != SECTOR_SHIFT {
            return Err(FsError::UnsupportedSectorSize(1u16.checked_shl(sector_shift as u32).unwrap_or(0)));
        }
        let cluster_shift = boot[BS_SECTORS_PER_CLUSTER_SHIFT];
        if cluster_shift > MAX_CLUSTER_SHIFT {
            return Err(FsError::UnsupportedSectorsPerCluster(cluster_shift));
        }
        let fat_count = boot[BS_NUMBER_OF_FATS];
        if fat_count != 1 && fat_count != 2 {
            return Err(FsError::UnsupportedFatCount(fat_count));
        }
        let volume_length = get_le64(&boot, BS_VOLUME_LENGTH);
        let fat_offset = get_le32(&boot, BS_FAT_OFFSET);
        let fat_length = get_le32(&boot, BS_FAT_LENGTH);
        let heap_offset = get_le32(&boot, BS_CLUSTER_HEAP_OFFSET);
        let cluster_count = get_le32(&boot, BS_CLUSTER_COUNT);
        let root_cluster = get_le32(&boot, BS_ROOT_CLUSTER);
        let heap_sectors = (cluster_count as u64) << cluster_shift;
        if fat_offset == 0
            || heap_offset < fat_offset.saturating_add(fat_length)
            || heap_offset as u64 + heap_sectors > volume_length
            || (fat_length as u64) << (SECTOR_SHIFT - 2) < cluster_count as u64 + 2
            || root_cluster < 2
            || root_cluster > cluster_count + 1
        {
            return Err(FsError::InvalidBootSector);
        }

        self.fat_start_sector = volume_start + fat_offset;
        self.fat_length = fat_length;
        self.cluster_heap_start_sector = volume_start + heap_offset;
        self.cluster_count = cluster_count;
        self.root_cluster = root_cluster;
        self.sectors_per_cluster_shift = cluster_shift;
        self.cluster_mask = (1u32 << (cluster_shift as u32 + SECTOR_SHIFT)) - 1;
        self.load_system_entries()?;
        self.mounted = true;

        log::debug!(
            "sdfs: exfat_mounted part={} clusters={} cluster_bytes={} bitmap_sector={}",
            part,
            cluster_count,
            self.bytes_per_cluster(),
            self.bitmap_start_sector
        );
        Ok(())
    }

    /// Finds the BITMAP, UPCASE and LABEL entries in the root directory.
    fn load_system_entries(&mut self) -> Result<(), FsError> {
        let mut pos = DirPos {
            cluster: self.root_cluster,
            position: 0,
            is_contiguous: false,
        };
        let mut bitmap = None;
        let mut upcase = None;
        loop {
            let entry: [u8; 32] = {
                let slot = self.dir_cache(&pos, CacheOption::FOR_READ)?;
                let mut copy = [0u8; 32];
                copy.copy_from_slice(slot);
                copy
            };
            match entry[0] {
                0 => break,
                TYPE_BITMAP if bitmap.is_none() => {
                    bitmap = Some((
                        get_le32(&entry, SYSTEM_FIRST_CLUSTER),
                        get_le64(&entry, SYSTEM_DATA_LENGTH),
                    ));
                }
                TYPE_UPCASE => {
                    upcase = Some((
                        get_le32(&entry, SYSTEM_FIRST_CLUSTER),
                        get_le64(&entry, SYSTEM_DATA_LENGTH),
                        get_le32(&entry, UPCASE_CHECKSUM),
                    ));
                }
                TYPE_LABEL => {
                    let length = entry[LABEL_LENGTH].min(LABEL_MAX_UNITS as u8);
                    for (k, unit) in self.label.iter_mut().enumerate() {
                        *unit = get_le16(&entry, NAME_UNICODE + 2 * k);
                    }
                    self.label_length = length;
                }
                _ => {}
            }
            if pos.position as u64 >= EXFAT_MAX_DIR_BYTES || !self.dir_seek(&mut pos, 32)? {
                break;
            }
        }

        let (first, length) = bitmap.ok_or(FsError::InvalidBootSector)?;
        let needed = (self.cluster_count as u64).div_ceil(8);
        if first < 2 || first > self.cluster_count + 1 || length < needed {
            return Err(FsError::InvalidBootSector);
        }
        self.bitmap_start_sector = self.cluster_start_sector(first)?;
        if let Some((cluster, length, checksum)) = upcase {
            self.upcase_cluster = cluster;
            self.upcase_length = length;
            self.upcase_checksum = checksum;
        }
        Ok(())
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn cluster_count(&self) -> u32 {
        self.cluster_count
    }

    pub fn last_cluster(&self) -> u32 {
        self.cluster_count + 1
    }

    pub fn root_cluster(&self) -> u32 {
        self.root_cluster
    }

    pub fn fat_start_sector(&self) -> u32 {
        self.fat_start_sector
    }

    pub fn fat_length(&self) -> u32 {
        self.fat_length
    }

    pub fn cluster_heap_start_sector(&self) -> u32 {
        self.cluster_heap_start_sector
    }

    pub fn sectors_per_cluster(&self) -> u32 {
        1 << self.sectors_per_cluster_shift
    }

    pub fn bytes_per_cluster_shift(&self) -> u32 {
        self.sectors_per_cluster_shift as u32 + SECTOR_SHIFT
    }

    pub fn bytes_per_cluster(&self) -> u32 {
        1 << self.bytes_per_cluster_shift()
    }

    pub(crate) fn cluster_mask(&self) -> u32 {
        self.cluster_mask
    }

    pub(crate) fn upcase_location(&self) -> Option<(u32, u64, u32)> {
        (self.upcase_cluster != 0).then_some((
            self.upcase_cluster,
            self.upcase_length,
            self.upcase_checksum,
        ))
    }

    /// Volume label from the root LABEL entry, as UTF-16 units.
    pub fn volume_label(&self) -> &[u16] {
        &self.label[..self.label_length as usize]
    }

    pub(crate) fn cluster_start_sector(&self, cluster: u32) -> Result<u32, FsError> {
        if cluster < 2 || cluster > self.last_cluster() {
            return Err(FsError::BadCluster(cluster));
        }
        Ok(self.cluster_heap_start_sector + ((cluster - 2) << self.sectors_per_cluster_shift))
    }

    pub fn set_date_time_callback(&mut self, callback: Option<DateTimeCallback>) {
        self.date_time = callback;
    }

    pub(crate) fn has_date_time(&self) -> bool {
        self.date_time.is_some()
    }

    pub(crate) fn now(&self) -> FsTimestamp {
        self.date_time
            .map(|callback| callback())
            .unwrap_or(FsTimestamp::new(0, 0))
    }

    pub(crate) fn cache_fetch(
        &mut self,
        sector: u32,
        option: CacheOption,
    ) -> Result<&mut [u8; SECTOR_SIZE], FsError> {
        self.cache.fill(&mut self.dev, sector, option)
    }

    pub(crate) fn cache_sync_data(&mut self) -> Result<(), FsError> {
        self.cache.sync(&mut self.dev)
    }

    pub fn cache_sync(&mut self) -> Result<(), FsError> {
        self.cache.sync(&mut self.dev)?;
        self.dev.sync_device()?;
        Ok(())
    }

    pub fn cache_invalidate(&mut self) {
        self.cache.invalidate();
    }

    /// Borrows the cached 32-byte slot at `pos`.
    pub fn dir_cache(&mut self, pos: &DirPos, option: CacheOption) -> Result<&mut [u8], FsError> {
        let sector = self.cluster_start_sector(pos.cluster)?
            + ((pos.position & self.cluster_mask) >> SECTOR_SHIFT);
        let offset = (pos.position as usize) & (SECTOR_SIZE - 1);
        let buf = self.cache_fetch(sector, option)?;
        Ok(&mut buf[offset..offset + 32])
    }

    /// Advances `pos` by `offset` bytes. Returns `false` when the chain ends
    /// before the new position.
    pub fn dir_seek(&mut self, pos: &mut DirPos, offset: u32) -> Result<bool, FsError> {
        let steps = ((pos.position & self.cluster_mask) + offset) >> self.bytes_per_cluster_shift();
        pos.position += offset;
        for _ in 0..steps {
            if pos.is_contiguous {
                pos.cluster += 1;
            } else {
                match self.next_cluster(pos.cluster)? {
                    Some(next) => pos.cluster = next,
                    None => return Ok(false),
                }
            }
        }
        Ok(true)
    }

    /// Zero-fills every sector of `cluster`, bypassing the cache.
    pub(crate) fn zero_cluster(&mut self, cluster: u32) -> Result<(), FsError> {
        let sector = self.cluster_start_sector(cluster)?;
        let spc = self.sectors_per_cluster();
        let buf = self.cache.clear(&mut self.dev)?;
        buf.fill(0);
        for idx in 0..spc {
            self.dev.write_sector(sector + idx, buf)?;
        }
        Ok(())
    }

    /// Streams the on-disk upcase table through the checker. The table is
    /// stored without a FAT chain.
    pub fn check_upcase(&mut self) -> Result<UpcaseReport, FsError> {
        let (cluster, length, checksum) = self.upcase_location().ok_or(FsError::NotFound)?;
        let mut sector = self.cluster_start_sector(cluster)?;
        let units = length / 2;
        let mut checker = UpcaseChecker::new();
        let mut done = 0u64;
        while done < units {
            let buf = self.cache_fetch(sector, CacheOption::FOR_READ)?;
            let count = cmp::min(units - done, (SECTOR_SIZE / 2) as u64) as usize;
            for k in 0..count {
                checker.push(get_le16(buf, 2 * k));
            }
            done += count as u64;
            sector += 1;
        }
        Ok(checker.finish(checksum))
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.dev
    }

    pub fn into_device(self) -> D {
        self.dev
    }
}
