pub(crate) const EXFAT_EOC: u32 = 0xFFFF_FFFF;
/// Directories are capped at 64 MiB.
pub(crate) const EXFAT_MAX_DIR_BYTES: u64 = 0x400_0000;

pub(crate) const TYPE_BITMAP: u8 = 0x81;
pub(crate) const TYPE_UPCASE: u8 = 0x82;
pub(crate) const TYPE_LABEL: u8 = 0x83;
pub(crate) const TYPE_FILE: u8 = 0x85;
pub(crate) const TYPE_STREAM: u8 = 0xC0;
pub(crate) const TYPE_NAME: u8 = 0xC1;
/// Clear in an unused or deleted slot.
pub(crate) const TYPE_IN_USE: u8 = 0x80;

pub(crate) const STREAM_FLAG_ALWAYS1: u8 = 0x01;
pub(crate) const STREAM_FLAG_CONTIGUOUS: u8 = 0x02;

pub(crate) const NAME_UNITS_PER_ENTRY: usize = 15;
pub(crate) const LABEL_MAX_UNITS: usize = 11;

// Boot sector layout.
pub(crate) const BS_OEM_NAME: usize = 3;
pub(crate) const BS_VOLUME_LENGTH: usize = 72;
pub(crate) const BS_FAT_OFFSET: usize = 80;
pub(crate) const BS_FAT_LENGTH: usize = 84;
pub(crate) const BS_CLUSTER_HEAP_OFFSET: usize = 88;
pub(crate) const BS_CLUSTER_COUNT: usize = 92;
pub(crate) const BS_ROOT_CLUSTER: usize = 96;
pub(crate) const BS_BYTES_PER_SECTOR_SHIFT: usize = 108;
pub(crate) const BS_SECTORS_PER_CLUSTER_SHIFT: usize = 109;
pub(crate) const BS_NUMBER_OF_FATS: usize = 110;

// FILE entry.
pub(crate) const FILE_SET_COUNT: usize = 1;
pub(crate) const FILE_SET_CHECKSUM: usize = 2;
pub(crate) const FILE_ATTRIBUTES: usize = 4;
pub(crate) const FILE_CREATE_TIME: usize = 8;
pub(crate) const FILE_MODIFY_TIME: usize = 12;
pub(crate) const FILE_ACCESS_TIME: usize = 16;
pub(crate) const FILE_CREATE_MS: usize = 20;
pub(crate) const FILE_MODIFY_MS: usize = 21;

// STREAM entry.
pub(crate) const STREAM_FLAGS: usize = 1;
pub(crate) const STREAM_NAME_LENGTH: usize = 3;
pub(crate) const STREAM_NAME_HASH: usize = 4;
pub(crate) const STREAM_VALID_LENGTH: usize = 8;
pub(crate) const STREAM_FIRST_CLUSTER: usize = 20;
pub(crate) const STREAM_DATA_LENGTH: usize = 24;

// NAME and LABEL entries.
pub(crate) const NAME_UNICODE: usize = 2;
pub(crate) const LABEL_LENGTH: usize = 1;

// BITMAP and UPCASE entries.
pub(crate) const UPCASE_CHECKSUM: usize = 4;
pub(crate) const SYSTEM_FIRST_CLUSTER: usize = 20;
pub(crate) const SYSTEM_DATA_LENGTH: usize = 24;

/// Position of a 32-byte slot inside a directory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DirPos {
    pub cluster: u32,
    /// Byte offset from the start of the directory.
    pub position: u32,
    pub is_contiguous: bool,
}
