pub(crate) const FAT32_MASK: u32 = 0x0FFF_FFFF;
pub(crate) const FAT_EOC_WRITE: u32 = 0x0FFF_FFFF;
pub(crate) const FAT12_MAX_CLUSTERS: u32 = 4084;
pub(crate) const FAT16_MAX_CLUSTERS: u32 = 65524;
/// 65536 entries of 32 bytes.
pub(crate) const FAT_MAX_DIR_BYTES: u32 = 0x20_0000;

pub(crate) const DIR_NAME_FREE: u8 = 0x00;
pub(crate) const DIR_NAME_DELETED: u8 = 0xE5;
pub(crate) const ATTR_LONG_NAME: u8 = 0x0F;
pub(crate) const ATTR_LONG_NAME_MASK: u8 = 0x3F;
pub(crate) const ATTR_VOLUME_ID: u8 = 0x08;
pub(crate) const ATTR_DIRECTORY: u8 = 0x10;
pub(crate) const CASE_LC_BASE: u8 = 0x08;
pub(crate) const CASE_LC_EXT: u8 = 0x10;
pub(crate) const LFN_ORDER_LAST: u8 = 0x40;
pub(crate) const LFN_ORDER_MASK: u8 = 0x1F;
pub(crate) const LFN_CHARS_PER_ENTRY: usize = 13;
pub(crate) const LFN_MAX_ENTRIES: usize = 20;

// Short-name entry layout.
pub(crate) const DIR_ATTR: usize = 11;
pub(crate) const DIR_CASE_FLAGS: usize = 12;
pub(crate) const DIR_CREATE_MS: usize = 13;
pub(crate) const DIR_CREATE_TIME: usize = 14;
pub(crate) const DIR_CREATE_DATE: usize = 16;
pub(crate) const DIR_ACCESS_DATE: usize = 18;
pub(crate) const DIR_CLUSTER_HIGH: usize = 20;
pub(crate) const DIR_MODIFY_TIME: usize = 22;
pub(crate) const DIR_MODIFY_DATE: usize = 24;
pub(crate) const DIR_CLUSTER_LOW: usize = 26;
pub(crate) const DIR_FILE_SIZE: usize = 28;

// Long-name entry layout.
pub(crate) const LFN_CHECKSUM: usize = 13;
pub(crate) const LFN_CHAR_OFFSETS: [usize; LFN_CHARS_PER_ENTRY] =
    [1, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 28, 30];

// Boot parameter block layout.
pub(crate) const BPB_BYTES_PER_SECTOR: usize = 11;
pub(crate) const BPB_SECTORS_PER_CLUSTER: usize = 13;
pub(crate) const BPB_RESERVED_SECTORS: usize = 14;
pub(crate) const BPB_FAT_COUNT: usize = 16;
pub(crate) const BPB_ROOT_ENTRY_COUNT: usize = 17;
pub(crate) const BPB_TOTAL_SECTORS16: usize = 19;
pub(crate) const BPB_SECTORS_PER_FAT16: usize = 22;
pub(crate) const BPB_TOTAL_SECTORS32: usize = 32;
pub(crate) const BPB_SECTORS_PER_FAT32: usize = 36;
pub(crate) const BPB_ROOT_CLUSTER: usize = 44;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FatType {
    Fat12,
    Fat16,
    Fat32,
}

impl FatType {
    pub fn from_cluster_count(count: u32) -> Self {
        if count <= FAT12_MAX_CLUSTERS {
            Self::Fat12
        } else if count <= FAT16_MAX_CLUSTERS {
            Self::Fat16
        } else {
            Self::Fat32
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Self::Fat12 => 12,
            Self::Fat16 => 16,
            Self::Fat32 => 32,
        }
    }
}

pub(crate) fn entry_first_cluster(entry: &[u8]) -> u32 {
    use crate::common::get_le16;
    ((get_le16(entry, DIR_CLUSTER_HIGH) as u32) << 16) | get_le16(entry, DIR_CLUSTER_LOW) as u32
}

pub(crate) fn set_entry_first_cluster(entry: &mut [u8], cluster: u32) {
    use crate::common::put_le16;
    put_le16(entry, DIR_CLUSTER_HIGH, (cluster >> 16) as u16);
    put_le16(entry, DIR_CLUSTER_LOW, cluster as u16);
}

pub(crate) fn is_long_name(entry: &[u8]) -> bool {
    entry[DIR_ATTR] & ATTR_LONG_NAME_MASK == ATTR_LONG_NAME
}

pub(crate) fn is_file_or_subdir(entry: &[u8]) -> bool {
    entry[DIR_ATTR] & ATTR_VOLUME_ID == 0
}
