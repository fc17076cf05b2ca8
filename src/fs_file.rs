use blockdev::BlockDevice;
use heapless::String;

use crate::common::{FileAttr, FileError, OpenFlags};
use crate::error::FsError;
use crate::exfat::ExFatFile;
use crate::fat::FatFile;
use crate::fs_volume::FsVolume;

/// Handle opened on an [`FsVolume`]. Every call must be given the volume
/// it came from.
#[derive(Clone, Copy, Debug)]
pub enum FsFile {
    Fat(FatFile),
    ExFat(ExFatFile),
}

macro_rules! with_file {
    ($self:expr, $file:ident => $body:expr) => {
        match $self {
            FsFile::Fat($file) => $body,
            FsFile::ExFat($file) => $body,
        }
    };
}

/// Pairs a handle with the partition of the same kind.
macro_rules! with_part {
    ($self:expr, $vol:expr, ($file:ident, $part:ident) => $body:expr) => {
        match ($self, $vol) {
            (FsFile::Fat($file), FsVolume::Fat(vol)) => {
                let $part = vol.partition_mut();
                $body
            }
            (FsFile::ExFat($file), FsVolume::ExFat(vol)) => {
                let $part = vol.partition_mut();
                $body
            }
            _ => Err(FsError::WrongVolume),
        }
    };
}

fn fat_offset(value: u64) -> Result<u32, FsError> {
    u32::try_from(value).map_err(|_| FsError::SeekOutOfRange)
}

impl FsFile {
    pub fn is_open(&self) -> bool {
        with_file!(self, file => file.is_open())
    }

    pub fn is_file(&self) -> bool {
        with_file!(self, file => file.is_file())
    }

    pub fn is_dir(&self) -> bool {
        with_file!(self, file => file.is_dir())
    }

    pub fn is_root(&self) -> bool {
        with_file!(self, file => file.is_root())
    }

    pub fn attributes(&self) -> FileAttr {
        with_file!(self, file => file.attributes())
    }

    pub fn file_size(&self) -> u64 {
        with_file!(self, file => file.file_size() as u64)
    }

    pub fn cur_position(&self) -> u64 {
        with_file!(self, file => file.cur_position() as u64)
    }

    pub fn available(&self) -> u64 {
        with_file!(self, file => file.available() as u64)
    }

    pub fn error(&self) -> FileError {
        with_file!(self, file => file.error())
    }

    pub fn get_write_error(&self) -> bool {
        with_file!(self, file => file.get_write_error())
    }

    pub fn clear_error(&mut self) {
        with_file!(self, file => file.clear_error())
    }

    pub fn rewind(&mut self) {
        with_file!(self, file => file.rewind())
    }

    pub fn read<D: BlockDevice>(
        &mut self,
        vol: &mut FsVolume<D>,
        buf: &mut [u8],
    ) -> Result<usize, FsError> {
        with_part!(self, vol, (file, part) => file.read(part, buf))
    }

    pub fn write<D: BlockDevice>(&mut self, vol: &mut FsVolume<D>, src: &[u8]) -> Result<usize, FsError> {
        with_part!(self, vol, (file, part) => file.write(part, src))
    }

    pub fn seek_set<D: BlockDevice>(&mut self, vol: &mut FsVolume<D>, pos: u64) -> Result<(), FsError> {
        match (self, vol) {
            (Self::Fat(file), FsVolume::Fat(vol)) => {
                file.seek_set(vol.partition_mut(), fat_offset(pos)?)
            }
            (Self::ExFat(file), FsVolume::ExFat(vol)) => file.seek_set(vol.partition_mut(), pos),
            _ => Err(FsError::WrongVolume),
        }
    }

    pub fn seek_cur<D: BlockDevice>(&mut self, vol: &mut FsVolume<D>, offset: i64) -> Result<(), FsError> {
        with_part!(self, vol, (file, part) => file.seek_cur(part, offset))
    }

    pub fn seek_end<D: BlockDevice>(&mut self, vol: &mut FsVolume<D>, offset: i64) -> Result<(), FsError> {
        with_part!(self, vol, (file, part) => file.seek_end(part, offset))
    }

    pub fn sync<D: BlockDevice>(&mut self, vol: &mut FsVolume<D>) -> Result<(), FsError> {
        with_part!(self, vol, (file, part) => file.sync(part))
    }

    pub fn close<D: BlockDevice>(&mut self, vol: &mut FsVolume<D>) -> Result<(), FsError> {
        with_part!(self, vol, (file, part) => file.close(part))
    }

    pub fn truncate<D: BlockDevice>(&mut self, vol: &mut FsVolume<D>) -> Result<(), FsError> {
        with_part!(self, vol, (file, part) => file.truncate(part))
    }

    pub fn truncate_to<D: BlockDevice>(&mut self, vol: &mut FsVolume<D>, length: u64) -> Result<(), FsError> {
        match (self, vol) {
            (Self::Fat(file), FsVolume::Fat(vol)) => {
                file.truncate_to(vol.partition_mut(), fat_offset(length)?)
            }
            (Self::ExFat(file), FsVolume::ExFat(vol)) => {
                file.truncate_to(vol.partition_mut(), length)
            }
            _ => Err(FsError::WrongVolume),
        }
    }

    pub fn pre_allocate<D: BlockDevice>(&mut self, vol: &mut FsVolume<D>, length: u64) -> Result<(), FsError> {
        match (self, vol) {
            (Self::Fat(file), FsVolume::Fat(vol)) => {
                let length = u32::try_from(length).map_err(|_| FsError::FileTooLarge)?;
                file.pre_allocate(vol.partition_mut(), length)
            }
            (Self::ExFat(file), FsVolume::ExFat(vol)) => {
                file.pre_allocate(vol.partition_mut(), length)
            }
            _ => Err(FsError::WrongVolume),
        }
    }

    pub fn remove<D: BlockDevice>(&mut self, vol: &mut FsVolume<D>) -> Result<(), FsError> {
        with_part!(self, vol, (file, part) => file.remove(part))
    }

    pub fn rmdir<D: BlockDevice>(&mut self, vol: &mut FsVolume<D>) -> Result<(), FsError> {
        with_part!(self, vol, (file, part) => file.rmdir(part))
    }

    /// Moves the entry to `new_path`, resolved against the volume's working
    /// directory.
    pub fn rename<D: BlockDevice>(&mut self, vol: &mut FsVolume<D>, new_path: &str) -> Result<(), FsError> {
        match (self, vol) {
            (Self::Fat(file), FsVolume::Fat(vol)) => {
                let (part, vwd) = vol.split_mut();
                file.rename(part, vwd, new_path)
            }
            (Self::ExFat(file), FsVolume::ExFat(vol)) => {
                let (part, vwd) = vol.split_mut();
                file.rename(part, vwd, new_path)
            }
            _ => Err(FsError::WrongVolume),
        }
    }

    /// Opens `path` relative to this directory.
    pub fn open<D: BlockDevice>(
        &mut self,
        vol: &mut FsVolume<D>,
        path: &str,
        oflag: OpenFlags,
    ) -> Result<FsFile, FsError> {
        match (self, vol) {
            (Self::Fat(dir), FsVolume::Fat(vol)) => {
                FatFile::open(vol.partition_mut(), dir, path, oflag).map(Self::Fat)
            }
            (Self::ExFat(dir), FsVolume::ExFat(vol)) => {
                ExFatFile::open(vol.partition_mut(), dir, path, oflag).map(Self::ExFat)
            }
            _ => Err(FsError::WrongVolume),
        }
    }

    /// Opens the next entry of this directory, or `None` at its end.
    pub fn open_next<D: BlockDevice>(
        &mut self,
        vol: &mut FsVolume<D>,
        oflag: OpenFlags,
    ) -> Result<Option<FsFile>, FsError> {
        match (self, vol) {
            (Self::Fat(dir), FsVolume::Fat(vol)) => {
                Ok(FatFile::open_next(vol.partition_mut(), dir, oflag)?.map(Self::Fat))
            }
            (Self::ExFat(dir), FsVolume::ExFat(vol)) => {
                Ok(ExFatFile::open_next(vol.partition_mut(), dir, oflag)?.map(Self::ExFat))
            }
            _ => Err(FsError::WrongVolume),
        }
    }

    pub fn get_name<D: BlockDevice, const N: usize>(
        &self,
        vol: &mut FsVolume<D>,
        out: &mut String<N>,
    ) -> Result<(), FsError> {
        with_part!(self, vol, (file, part) => file.get_name(part, out))
    }
}
