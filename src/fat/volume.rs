use blockdev::BlockDevice;

use super::api_read_write::FatFile;
use super::{FatPartition, FatType};
use crate::common::{FsDirEntry, OpenFlags};
use crate::datetime::DateTimeCallback;
use crate::error::FsError;

/// Mounted FAT volume with its working directory.
pub struct FatVolume<D> {
    part: FatPartition<D>,
    vwd: FatFile,
}

impl<D: BlockDevice> FatVolume<D> {
    pub fn new(dev: D) -> Self {
        Self {
            part: FatPartition::new(dev),
            vwd: FatFile::default(),
        }
    }

    /// Mounts MBR slot 1, falling back to a volume at sector 0.
    pub fn begin(&mut self) -> Result<(), FsError> {
        match self.begin_part(1) {
            Ok(()) => Ok(()),
            Err(err) => {
                log::debug!("sdfs: fat_probe_failed part=1 err={:?}", err);
                self.begin_part(0)
            }
        }
    }

    pub fn begin_part(&mut self, part: u8) -> Result<(), FsError> {
        self.vwd = FatFile::default();
        self.part.init(part)?;
        self.vwd = FatFile::open_root(&self.part)?;
        Ok(())
    }

    /// Flushes the caches and hands the device back.
    pub fn end(mut self) -> Result<D, FsError> {
        self.part.cache_sync()?;
        Ok(self.part.into_device())
    }

    pub fn into_device(self) -> D {
        self.part.into_device()
    }

    pub fn partition(&self) -> &FatPartition<D> {
        &self.part
    }

    pub fn partition_mut(&mut self) -> &mut FatPartition<D> {
        &mut self.part
    }

    pub fn is_mounted(&self) -> bool {
        self.part.is_mounted()
    }

    pub fn fat_type(&self) -> FatType {
        self.part.fat_type()
    }

    pub fn cluster_count(&self) -> u32 {
        self.part.cluster_count()
    }

    pub fn sectors_per_cluster(&self) -> u32 {
        self.part.sectors_per_cluster() as u32
    }

    pub fn bytes_per_cluster(&self) -> u32 {
        self.part.bytes_per_cluster()
    }

    pub fn free_cluster_count(&mut self) -> Result<u32, FsError> {
        self.part.free_cluster_count()
    }

    pub fn set_date_time_callback(&mut self, callback: Option<DateTimeCallback>) {
        self.part.set_date_time_callback(callback);
    }

    pub fn cache_sync(&mut self) -> Result<(), FsError> {
        self.part.cache_sync()
    }

    /// Partition and working directory, borrowed together for path calls.
    pub(crate) fn split_mut(&mut self) -> (&mut FatPartition<D>, &mut FatFile) {
        (&mut self.part, &mut self.vwd)
    }

    pub fn vwd(&self) -> &FatFile {
        &self.vwd
    }

    pub fn open_root(&self) -> Result<FatFile, FsError> {
        FatFile::open_root(&self.part)
    }

    pub fn chdir(&mut self, path: &str) -> Result<(), FsError> {
        let dir = self.open(path, OpenFlags::READ)?;
        if !dir.is_dir() {
            return Err(FsError::NotDirectory);
        }
        self.vwd = dir;
        Ok(())
    }

    pub fn open(&mut self, path: &str, oflag: OpenFlags) -> Result<FatFile, FsError> {
        FatFile::open(&mut self.part, &mut self.vwd, path, oflag)
    }

    pub fn exists(&mut self, path: &str) -> bool {
        self.open(path, OpenFlags::READ).is_ok()
    }

    pub fn mkdir(&mut self, path: &str, parents: bool) -> Result<(), FsError> {
        let mut dir = FatFile::mkdir(&mut self.part, &mut self.vwd, path, parents)?;
        dir.close(&mut self.part)
    }

    pub fn remove(&mut self, path: &str) -> Result<(), FsError> {
        let mut file = self.open(path, OpenFlags::WRITE)?;
        file.remove(&mut self.part)
    }

    pub fn rename(&mut self, old_path: &str, new_path: &str) -> Result<(), FsError> {
        let mut file = self.open(old_path, OpenFlags::READ)?;
        file.rename(&mut self.part, &mut self.vwd, new_path)
    }

    pub fn rmdir(&mut self, path: &str) -> Result<(), FsError> {
        let mut dir = self.open(path, OpenFlags::READ)?;
        dir.rmdir(&mut self.part)
    }

    pub fn truncate(&mut self, path: &str, length: u32) -> Result<(), FsError> {
        let mut file = self.open(path, OpenFlags::WRITE)?;
        file.truncate_to(&mut self.part, length)?;
        file.close(&mut self.part)
    }

    pub fn stat(&mut self, path: &str) -> Result<FsDirEntry, FsError> {
        let file = self.open(path, OpenFlags::READ)?;
        self.describe(&file)
    }

    /// Lists the directory at `path` into `out` and returns the number of
    /// rows written. Stops early when `out` is full.
    pub fn ls(&mut self, path: &str, out: &mut [FsDirEntry]) -> Result<usize, FsError> {
        let mut dir = self.open(path, OpenFlags::READ)?;
        if !dir.is_dir() {
            return Err(FsError::NotDirectory);
        }
        let mut count = 0usize;
        while count < out.len() {
            let Some(file) = FatFile::open_next(&mut self.part, &mut dir, OpenFlags::READ)? else {
                break;
            };
            out[count] = self.describe(&file)?;
            count += 1;
        }
        Ok(count)
    }

    fn describe(&mut self, file: &FatFile) -> Result<FsDirEntry, FsError> {
        let mut entry = FsDirEntry {
            is_dir: file.is_dir(),
            size: file.file_size() as u64,
            ..FsDirEntry::default()
        };
        file.get_name(&mut self.part, &mut entry.name)?;
        Ok(entry)
    }
}
