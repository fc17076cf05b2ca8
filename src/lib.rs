//! FAT12/16/32 and exFAT filesystem engine for 512-byte sector devices.
//!
//! Each partition owns its block device and sector cache. File handles are
//! plain `Copy` values; every operation takes the partition (or the
//! [`FsVolume`] facade) it was opened on.
#![cfg_attr(not(test), no_std)]

pub mod cache;
pub mod common;
pub mod datetime;
pub mod error;
pub mod exfat;
pub mod fat;
pub mod fs_file;
pub mod fs_volume;

#[cfg(test)]
mod test_support;

pub use blockdev::{BlockDevice, DeviceError, SECTOR_SIZE};
pub use cache::{CacheOption, SectorCache};
pub use common::{FileAttr, FileError, FsDirEntry, MbrPartition, OpenFlags, FS_NAME_MAX};
pub use datetime::{DateTimeCallback, FsTimestamp};
pub use error::FsError;
pub use exfat::{ExFatFile, ExFatPartition, ExFatVolume};
pub use fat::{FatFile, FatPartition, FatType, FatVolume};
pub use fs_file::FsFile;
pub use fs_volume::FsVolume;
