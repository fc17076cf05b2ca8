use blockdev::{BlockDevice, SECTOR_SIZE};

use super::types::*;
use crate::cache::{CacheOption, SectorCache};
use crate::common::{get_le16, get_le32, has_boot_signature, partition_start};
use crate::datetime::{DateTimeCallback, FsTimestamp};
use crate::error::FsError;

/// FAT12/16/32 volume geometry plus the data and FAT sector caches.
pub struct FatPartition<D> {
    pub(crate) dev: D,
    pub(crate) cache: SectorCache,
    pub(crate) fat_cache: SectorCache,
    mounted: bool,
    fat_type: FatType,
    sectors_per_cluster: u8,
    sectors_per_cluster_shift: u8,
    cluster_sector_mask: u8,
    fat_start_sector: u32,
    sectors_per_fat: u32,
    root_dir_start: u32,
    root_dir_entry_count: u16,
    data_start_sector: u32,
    last_cluster: u32,
    pub(crate) alloc_search_start: u32,
    pub(crate) free_cluster_count: Option<u32>,
    date_time: Option<DateTimeCallback>,
}

impl<D: BlockDevice> FatPartition<D> {
    pub fn new(dev: D) -> Self {
        Self {
            dev,
            cache: SectorCache::new(),
            fat_cache: SectorCache::new(),
            mounted: false,
            fat_type: FatType::Fat32,
            sectors_per_cluster: 0,
            sectors_per_cluster_shift: 0,
            cluster_sector_mask: 0,
            fat_start_sector: 0,
            sectors_per_fat: 0,
            root_dir_start: 0,
            root_dir_entry_count: 0,
            data_start_sector: 0,
            last_cluster: 0,
            alloc_search_start: 1,
            free_cluster_count: None,
            date_time: None,
        }
    }

    /// Mounts the FAT volume in MBR slot `part` (1..=4), or at sector 0
    /// when `part` is 0.
    pub fn init(&mut self, part: u8) -> Result<(), FsError> {
        self.mounted = false;
        self.cache.invalidate();
        self.fat_cache.invalidate();
        self.alloc_search_start = 1;
        self.free_cluster_count = None;

        let sector0: [u8; SECTOR_SIZE] = *self.cache.fill(&mut self.dev, 0, CacheOption::FOR_READ)?;
        let volume_start = partition_start(&sector0, part).ok_or(FsError::NoPartition)?;
        let bpb: [u8; SECTOR_SIZE] =
            *self.cache.fill(&mut self.dev, volume_start, CacheOption::FOR_READ)?;

        if !has_boot_signature(&bpb) {
            return Err(FsError::InvalidBootSector);
        }
        let bytes_per_sector = get_le16(&bpb, BPB_BYTES_PER_SECTOR);
        if bytes_per_sector as usize != SECTOR_SIZE {
            return Err(FsError::UnsupportedSectorSize(bytes_per_sector));
        }
        let fat_count = bpb[BPB_FAT_COUNT];
        if fat_count != 2 {
            return Err(FsError::UnsupportedFatCount(fat_count));
        }
        let sectors_per_cluster = bpb[BPB_SECTORS_PER_CLUSTER];
        if sectors_per_cluster == 0 || !sectors_per_cluster.is_power_of_two() {
            return Err(FsError::UnsupportedSectorsPerCluster(sectors_per_cluster));
        }
        let reserved = get_le16(&bpb, BPB_RESERVED_SECTORS) as u32;
        if reserved == 0 {
            return Err(FsError::InvalidBootSector);
        }

        let mut sectors_per_fat = get_le16(&bpb, BPB_SECTORS_PER_FAT16) as u32;
        if sectors_per_fat == 0 {
            sectors_per_fat = get_le32(&bpb, BPB_SECTORS_PER_FAT32);
        }
        let mut total_sectors = get_le16(&bpb, BPB_TOTAL_SECTORS16) as u32;
        if total_sectors == 0 {
            total_sectors = get_le32(&bpb, BPB_TOTAL_SECTORS32);
        }
        if sectors_per_fat == 0 || total_sectors == 0 {
            return Err(FsError::InvalidBootSector);
        }

        let root_dir_entry_count = get_le16(&bpb, BPB_ROOT_ENTRY_COUNT);
        let fat_start_sector = volume_start + reserved;
        let root_region_sectors = (32 * root_dir_entry_count as u32).div_ceil(SECTOR_SIZE as u32);
        let fixed_root_start = fat_start_sector + 2 * sectors_per_fat;
        let data_start_sector = fixed_root_start + root_region_sectors;

        let overhead = data_start_sector - volume_start;
        if overhead >= total_sectors {
            return Err(FsError::InvalidBootSector);
        }
        let shift = sectors_per_cluster.trailing_zeros() as u8;
        let cluster_count = (total_sectors - overhead) >> shift;
        let fat_type = FatType::from_cluster_count(cluster_count);
        let last_cluster = cluster_count + 1;

        let fat_entries = match fat_type {
            FatType::Fat12 => sectors_per_fat.saturating_mul(SECTOR_SIZE as u32 * 2) / 3,
            FatType::Fat16 => sectors_per_fat.saturating_mul(SECTOR_SIZE as u32 / 2),
            FatType::Fat32 => sectors_per_fat.saturating_mul(SECTOR_SIZE as u32 / 4),
        };
        if fat_entries < last_cluster + 1 {
            return Err(FsError::InvalidBootSector);
        }

        let root_dir_start = match fat_type {
            FatType::Fat32 => {
                let root_cluster = get_le32(&bpb, BPB_ROOT_CLUSTER);
                if root_cluster < 2 || root_cluster > last_cluster {
                    return Err(FsError::InvalidBootSector);
                }
                root_cluster
            }
            FatType::Fat12 | FatType::Fat16 => {
                if root_dir_entry_count == 0 {
                    return Err(FsError::InvalidBootSector);
                }
                fixed_root_start
            }
        };
        if fat_type == FatType::Fat12 && !cfg!(feature = "fat12") {
            return Err(FsError::UnsupportedFatType);
        }

        self.fat_type = fat_type;
        self.sectors_per_cluster = sectors_per_cluster;
        self.sectors_per_cluster_shift = shift;
        self.cluster_sector_mask = sectors_per_cluster - 1;
        self.fat_start_sector = fat_start_sector;
        self.sectors_per_fat = sectors_per_fat;
        self.root_dir_start = root_dir_start;
        self.root_dir_entry_count = root_dir_entry_count;
        self.data_start_sector = data_start_sector;
        self.last_cluster = last_cluster;
        self.fat_cache.set_mirror_offset(sectors_per_fat);
        self.mounted = true;

        log::debug!(
            "sdfs: fat_mounted part={} type=FAT{} clusters={} spc={}",
            part,
            fat_type.bits(),
            cluster_count,
            sectors_per_cluster
        );
        Ok(())
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn fat_type(&self) -> FatType {
        self.fat_type
    }

    pub fn cluster_count(&self) -> u32 {
        self.last_cluster.saturating_sub(1)
    }

    pub fn last_cluster(&self) -> u32 {
        self.last_cluster
    }

    pub fn sectors_per_cluster(&self) -> u8 {
        self.sectors_per_cluster
    }

    pub fn sectors_per_fat(&self) -> u32 {
        self.sectors_per_fat
    }

    pub fn fat_start_sector(&self) -> u32 {
        self.fat_start_sector
    }

    pub fn data_start_sector(&self) -> u32 {
        self.data_start_sector
    }

    /// First sector of the fixed root region (FAT12/16) or root cluster (FAT32).
    pub fn root_dir_start(&self) -> u32 {
        self.root_dir_start
    }

    pub fn root_dir_entry_count(&self) -> u16 {
        self.root_dir_entry_count
    }

    pub fn bytes_per_cluster_shift(&self) -> u32 {
        self.sectors_per_cluster_shift as u32 + 9
    }

    pub fn bytes_per_cluster(&self) -> u32 {
        (self.sectors_per_cluster as u32) << 9
    }

    pub(crate) fn sector_of_cluster(&self, position: u32) -> u32 {
        (position >> 9) & self.cluster_sector_mask as u32
    }

    pub(crate) fn cluster_start_sector(&self, cluster: u32) -> Result<u32, FsError> {
        if cluster < 2 || cluster > self.last_cluster {
            return Err(FsError::BadCluster(cluster));
        }
        Ok(self.data_start_sector + ((cluster - 2) << self.sectors_per_cluster_shift))
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

    pub(crate) fn cache_fetch_data(
        &mut self,
        sector: u32,
        option: CacheOption,
    ) -> Result<&mut [u8; SECTOR_SIZE], FsError> {
        self.cache.fill(&mut self.dev, sector, option)
    }

    pub(crate) fn cache_fetch_fat(
        &mut self,
        sector: u32,
        option: CacheOption,
    ) -> Result<&mut [u8; SECTOR_SIZE], FsError> {
        self.fat_cache
            .fill(&mut self.dev, sector, option | CacheOption::MIRROR_FAT)
    }

    pub(crate) fn cache_sync_data(&mut self) -> Result<(), FsError> {
        self.cache.sync(&mut self.dev)
    }

    pub fn cache_sync(&mut self) -> Result<(), FsError> {
        self.cache.sync(&mut self.dev)?;
        self.fat_cache.sync(&mut self.dev)?;
        self.dev.sync_device()?;
        Ok(())
    }

    pub fn cache_invalidate(&mut self) {
        self.cache.invalidate();
        self.fat_cache.invalidate();
    }

    /// Zero-fills every sector of `cluster`, bypassing the data cache.
    pub(crate) fn zero_cluster(&mut self, cluster: u32) -> Result<(), FsError> {
        let sector = self.cluster_start_sector(cluster)?;
        let buf = self.cache.clear(&mut self.dev)?;
        buf.fill(0);
        for idx in 0..self.sectors_per_cluster as u32 {
            self.dev.write_sector(sector + idx, buf)?;
        }
        Ok(())
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.dev
    }

    pub fn into_device(self) -> D {
        self.dev
    }
}
