use blockdev::BlockDevice;

use super::api_read_write::ExFatFile;
use super::upcase::UpcaseReport;
use super::ExFatPartition;
use crate::common::{FsDirEntry, OpenFlags};
use crate::datetime::DateTimeCallback;
use crate::error::FsError;

/// Mounted exFAT volume with its working directory.
pub struct ExFatVolume<D> {
    part: ExFatPartition<D>,
    vwd: ExFatFile,
}

impl<D: BlockDevice> ExFatVolume<D> {
    pub fn new(dev: D) -> Self {
        Self {
            part: ExFatPartition::new(dev),
            vwd: ExFatFile::default(),
        }
    }

    /// Mounts MBR slot 1, falling back to a volume at sector 0.
    pub fn begin(&mut self) -> Result<(), FsError> {
        match self.begin_part(1) {
            Ok(()) => Ok(()),
            Err(err) => {
                log::debug!("sdfs: exfat_probe_failed part=1 err={:?}", err);
                self.begin_part(0)
            }
        }
    }

    pub fn begin_part(&mut self, part: u8) -> Result<(), FsError> {
        self.vwd = ExFatFile::default();
        self.part.init(part)?;
        self.vwd = ExFatFile::open_root(&self.part)?;
        Ok(())
    }

    /// Flushes the cache and hands the device back.
    pub fn end(mut self) -> Result<D, FsError> {
        self.part.cache_sync()?;
        Ok(self.part.into_device())
    }

    pub fn into_device(self) -> D {
        self.part.into_device()
    }

    pub fn partition(&self) -> &ExFatPartition<D> {
        &self.part
    }

    pub fn partition_mut(&mut self) -> &mut ExFatPartition<D> {
        &mut self.part
    }

    pub fn is_mounted(&self) -> bool {
        self.part.is_mounted()
    }

    pub fn cluster_count(&self) -> u32 {
        self.part.cluster_count()
    }

    pub fn sectors_per_cluster(&self) -> u32 {
        self.part.sectors_per_cluster()
    }

    pub fn bytes_per_cluster(&self) -> u32 {
        self.part.bytes_per_cluster()
    }

    pub fn free_cluster_count(&mut self) -> Result<u32, FsError> {
        self.part.free_cluster_count()
    }

    pub fn root_length(&mut self) -> Result<u64, FsError> {
        self.part.root_length()
    }

    pub fn chain_size(&mut self, cluster: u32) -> Result<u32, FsError> {
        self.part.chain_size(cluster)
    }

    pub fn volume_label(&self) -> &[u16] {
        self.part.volume_label()
    }

    pub fn check_upcase(&mut self) -> Result<UpcaseReport, FsError> {
        self.part.check_upcase()
    }

    pub fn set_date_time_callback(&mut self, callback: Option<DateTimeCallback>) {
        self.part.set_date_time_callback(callback);
    }

    pub fn cache_sync(&mut self) -> Result<(), FsError> {
        self.part.cache_sync()
    }

    /// Partition and working directory, borrowed together for path calls.
    pub(crate) fn split_mut(&mut self) -> (&mut ExFatPartition<D>, &mut ExFatFile) {
        (&mut self.part, &mut self.vwd)
    }

    pub fn vwd(&self) -> &ExFatFile {
        &self.vwd
    }

    pub fn open_root(&self) -> Result<ExFatFile, FsError> {
        ExFatFile::open_root(&self.part)
    }

    pub fn chdir(&mut self, path: &str) -> Result<(), FsError> {
        let dir = self.open(path, OpenFlags::READ)?;
        if !dir.is_dir() {
            return Err(FsError::NotDirectory);
        }
        self.vwd = dir;
        Ok(())
    }

    pub fn open(&mut self, path: &str, oflag: OpenFlags) -> Result<ExFatFile, FsError> {
        ExFatFile::open(&mut self.part, &mut self.vwd, path, oflag)
    }

    pub fn exists(&mut self, path: &str) -> bool {
        self.open(path, OpenFlags::READ).is_ok()
    }

    pub fn mkdir(&mut self, path: &str, parents: bool) -> Result<(), FsError> {
        let mut dir = ExFatFile::mkdir(&mut self.part, &mut self.vwd, path, parents)?;
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

    pub fn truncate(&mut self, path: &str, length: u64) -> Result<(), FsError> {
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
            let Some(file) = ExFatFile::open_next(&mut self.part, &mut dir, OpenFlags::READ)?
            else {
                break;
            };
            out[count] = self.describe(&file)?;
            count += 1;
        }
        Ok(count)
    }

    fn describe(&mut self, file: &ExFatFile) -> Result<FsDirEntry, FsError> {
        let mut entry = FsDirEntry {
            is_dir: file.is_dir(),
            size: if file.is_dir() { 0 } else { file.file_size() },
            ..FsDirEntry::default()
        };
        file.get_name(&mut self.part, &mut entry.name)?;
        Ok(entry)
    }
}
