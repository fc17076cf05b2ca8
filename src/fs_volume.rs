use blockdev::BlockDevice;

use crate::common::{FsDirEntry, OpenFlags};
use crate::datetime::DateTimeCallback;
use crate::error::FsError;
use crate::exfat::ExFatVolume;
use crate::fat::FatVolume;
use crate::fs_file::FsFile;

/// Either kind of mounted volume behind one API.
pub enum FsVolume<D> {
    Fat(FatVolume<D>),
    ExFat(ExFatVolume<D>),
}

macro_rules! with_volume {
    ($self:expr, $vol:ident => $body:expr) => {
        match $self {
            FsVolume::Fat($vol) => $body,
            FsVolume::ExFat($vol) => $body,
        }
    };
}

impl<D: BlockDevice> FsVolume<D> {
    /// Mounts `dev` as exFAT, falling back to FAT12/16/32.
    pub fn begin(dev: D) -> Result<Self, FsError> {
        let mut exfat = ExFatVolume::new(dev);
        match exfat.begin() {
            Ok(()) => {
                log::info!("sdfs: mounted type=exfat clusters={}", exfat.cluster_count());
                return Ok(Self::ExFat(exfat));
            }
            Err(err) => log::debug!("sdfs: exfat_probe_failed err={:?}", err),
        }
        let mut fat = FatVolume::new(exfat.into_device());
        fat.begin()?;
        log::info!(
            "sdfs: mounted type=fat{} clusters={}",
            fat.fat_type().bits(),
            fat.cluster_count()
        );
        Ok(Self::Fat(fat))
    }

    /// Flushes pending writes and hands the device back.
    pub fn end(self) -> Result<D, FsError> {
        with_volume!(self, vol => vol.end())
    }

    pub fn into_device(self) -> D {
        with_volume!(self, vol => vol.into_device())
    }

    /// 12, 16 or 32 for FAT volumes, 64 for exFAT.
    pub fn fat_type(&self) -> u8 {
        match self {
            Self::Fat(vol) => vol.fat_type().bits(),
            Self::ExFat(_) => 64,
        }
    }

    pub fn cluster_count(&self) -> u32 {
        with_volume!(self, vol => vol.cluster_count())
    }

    pub fn sectors_per_cluster(&self) -> u32 {
        with_volume!(self, vol => vol.sectors_per_cluster())
    }

    pub fn bytes_per_cluster(&self) -> u32 {
        with_volume!(self, vol => vol.bytes_per_cluster())
    }

    pub fn free_cluster_count(&mut self) -> Result<u32, FsError> {
        with_volume!(self, vol => vol.free_cluster_count())
    }

    pub fn set_date_time_callback(&mut self, callback: Option<DateTimeCallback>) {
        with_volume!(self, vol => vol.set_date_time_callback(callback))
    }

    pub fn cache_sync(&mut self) -> Result<(), FsError> {
        with_volume!(self, vol => vol.cache_sync())
    }

    pub fn open_root(&self) -> Result<FsFile, FsError> {
        match self {
            Self::Fat(vol) => vol.open_root().map(FsFile::Fat),
            Self::ExFat(vol) => vol.open_root().map(FsFile::ExFat),
        }
    }

    pub fn open(&mut self, path: &str, oflag: OpenFlags) -> Result<FsFile, FsError> {
        match self {
            Self::Fat(vol) => vol.open(path, oflag).map(FsFile::Fat),
            Self::ExFat(vol) => vol.open(path, oflag).map(FsFile::ExFat),
        }
    }

    pub fn chdir(&mut self, path: &str) -> Result<(), FsError> {
        with_volume!(self, vol => vol.chdir(path))
    }

    pub fn exists(&mut self, path: &str) -> bool {
        with_volume!(self, vol => vol.exists(path))
    }

    pub fn mkdir(&mut self, path: &str, parents: bool) -> Result<(), FsError> {
        with_volume!(self, vol => vol.mkdir(path, parents))
    }

    pub fn remove(&mut self, path: &str) -> Result<(), FsError> {
        with_volume!(self, vol => vol.remove(path))
    }

    pub fn rename(&mut self, old_path: &str, new_path: &str) -> Result<(), FsError> {
        with_volume!(self, vol => vol.rename(old_path, new_path))
    }

    pub fn rmdir(&mut self, path: &str) -> Result<(), FsError> {
        with_volume!(self, vol => vol.rmdir(path))
    }

    pub fn truncate(&mut self, path: &str, length: u64) -> Result<(), FsError> {
        match self {
            Self::Fat(vol) => {
                let length = u32::try_from(length).map_err(|_| FsError::FileTooLarge)?;
                vol.truncate(path, length)
            }
            Self::ExFat(vol) => vol.truncate(path, length),
        }
    }

    pub fn stat(&mut self, path: &str) -> Result<FsDirEntry, FsError> {
        with_volume!(self, vol => vol.stat(path))
    }

    pub fn ls(&mut self, path: &str, out: &mut [FsDirEntry]) -> Result<usize, FsError> {
        with_volume!(self, vol => vol.ls(path, out))
    }
}
