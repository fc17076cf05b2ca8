use bitflags::bitflags;

use crate::error::FsError;

pub(crate) const DIR_ENTRY_SIZE: usize = 32;
pub(crate) const SECTOR_MASK: u32 = 0x1FF;

const MBR_TABLE_OFFSET: usize = 446;
const MBR_ENTRY_SIZE: usize = 16;
const BOOT_SIGNATURE_OFFSET: usize = 510;

#[inline]
pub(crate) fn get_le16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

#[inline]
pub(crate) fn get_le32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

#[inline]
pub(crate) fn get_le64(buf: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

#[inline]
pub(crate) fn put_le16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn put_le32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub(crate) fn put_le64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn has_boot_signature(sector: &[u8]) -> bool {
    sector[BOOT_SIGNATURE_OFFSET] == 0x55 && sector[BOOT_SIGNATURE_OFFSET + 1] == 0xAA
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MbrPartition {
    pub boot: u8,
    pub kind: u8,
    pub relative_sectors: u32,
    pub total_sectors: u32,
}

impl MbrPartition {
    /// Decodes slot `part` (1..=4) of the partition table in `mbr`.
    pub fn parse(mbr: &[u8], part: u8) -> Option<Self> {
        if !(1..=4).contains(&part) {
            return None;
        }
        let base = MBR_TABLE_OFFSET + MBR_ENTRY_SIZE * (part as usize - 1);
        Some(Self {
            boot: mbr[base],
            kind: mbr[base + 4],
            relative_sectors: get_le32(mbr, base + 8),
            total_sectors: get_le32(mbr, base + 12),
        })
    }

    pub fn is_usable(&self) -> bool {
        (self.boot == 0 || self.boot == 0x80) && self.kind != 0 && self.relative_sectors != 0
    }

    pub fn write(&self, mbr: &mut [u8], part: u8) {
        if !(1..=4).contains(&part) {
            return;
        }
        let base = MBR_TABLE_OFFSET + MBR_ENTRY_SIZE * (part as usize - 1);
        mbr[base] = self.boot;
        // CHS fields are legacy; LBA-only tools fill them with the 1023/254/63 marker.
        mbr[base + 1..base + 4].copy_from_slice(&[0xFE, 0xFF, 0xFF]);
        mbr[base + 4] = self.kind;
        mbr[base + 5..base + 8].copy_from_slice(&[0xFE, 0xFF, 0xFF]);
        put_le32(mbr, base + 8, self.relative_sectors);
        put_le32(mbr, base + 12, self.total_sectors);
        mbr[BOOT_SIGNATURE_OFFSET] = 0x55;
        mbr[BOOT_SIGNATURE_OFFSET + 1] = 0xAA;
    }
}

/// Selects the volume start sector for partition slot `part`.
///
/// Slot 0 means the volume boot record sits at sector 0 with no MBR.
pub(crate) fn partition_start(sector0: &[u8], part: u8) -> Option<u32> {
    if part == 0 {
        return Some(0);
    }
    let entry = MbrPartition::parse(sector0, part)?;
    if entry.is_usable() {
        Some(entry.relative_sectors)
    } else {
        None
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct OpenFlags: u16 {
        const READ = 0x0001;
        const WRITE = 0x0002;
        const RDWR = Self::READ.bits() | Self::WRITE.bits();
        const APPEND = 0x0004;
        const SYNC = 0x0008;
        const AT_END = 0x0010;
        const CREAT = 0x0020;
        const EXCL = 0x0040;
        const TRUNC = 0x0080;
    }
}

bitflags! {
    /// Handle state kept between calls.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub(crate) struct FileFlags: u8 {
        const READ = 0x01;
        const WRITE = 0x02;
        const APPEND = 0x04;
        const SYNC = 0x08;
        const CONTIGUOUS = 0x40;
        const DIR_DIRTY = 0x80;
    }
}

impl FileFlags {
    pub(crate) fn from_open(oflag: OpenFlags) -> Self {
        let mut flags = Self::empty();
        flags.set(Self::READ, oflag.contains(OpenFlags::READ));
        flags.set(Self::WRITE, oflag.contains(OpenFlags::WRITE));
        flags.set(Self::APPEND, oflag.contains(OpenFlags::APPEND));
        flags.set(Self::SYNC, oflag.contains(OpenFlags::SYNC));
        flags
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct FileError: u8 {
        const WRITE_ERROR = 0x01;
        const READ_ERROR = 0x02;
    }
}

bitflags! {
    /// On-disk attribute bits shared by FAT and exFAT entries.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct FileAttr: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
    }
}

impl FileAttr {
    pub(crate) const COPY: Self = Self::READ_ONLY
        .union(Self::HIDDEN)
        .union(Self::SYSTEM)
        .union(Self::DIRECTORY)
        .union(Self::ARCHIVE);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub(crate) enum FileKind {
    #[default]
    Closed,
    File,
    SubDir,
    /// FAT12/16 root region outside the cluster heap.
    RootFixed,
    /// Cluster-chained root (FAT32 and exFAT).
    Root,
}

impl FileKind {
    pub(crate) fn is_open(self) -> bool {
        self != Self::Closed
    }

    pub(crate) fn is_dir(self) -> bool {
        matches!(self, Self::SubDir | Self::RootFixed | Self::Root)
    }

    pub(crate) fn is_root(self) -> bool {
        matches!(self, Self::RootFixed | Self::Root)
    }
}

pub(crate) const NAME_MAX_UNITS: usize = 255;

fn legal_name_char(c: char) -> bool {
    c >= ' ' && !matches!(c, '\\' | '"' | '*' | ':' | '<' | '>' | '?' | '|' | '/')
}

/// Splits the leading component off `path` and returns it with the
/// remainder, leading separators removed.
pub(crate) fn split_component(path: &str) -> Result<(&str, &str), FsError> {
    let path = path.trim_start_matches(' ');
    let end = path.find('/').unwrap_or(path.len());
    let component = &path[..end];
    let rest = path[end..].trim_start_matches(['/', ' ']);
    if component.is_empty() {
        return Err(FsError::InvalidPath);
    }
    let long = if component == "." || component == ".." {
        component
    } else {
        component.trim_end_matches(['.', ' '])
    };
    if long.is_empty() || !long.chars().all(legal_name_char) {
        return Err(FsError::InvalidName);
    }
    if long.encode_utf16().count() > NAME_MAX_UNITS {
        return Err(FsError::NameTooLong);
    }
    Ok((long, rest))
}

/// Longest name in UTF-8 bytes: 255 UTF-16 units of up to three bytes each.
pub const FS_NAME_MAX: usize = 765;

/// One listing row produced by `ls` and `stat`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FsDirEntry {
    pub name: heapless::String<FS_NAME_MAX>,
    pub is_dir: bool,
    pub size: u64,
}

pub(crate) fn clusters_for_size(size: u64, cluster_shift: u32) -> u64 {
    if size == 0 {
        0
    } else {
        ((size - 1) >> cluster_shift) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn le_helpers_use_fixed_offsets() {
        let mut buf = [0u8; 16];
        put_le16(&mut buf, 1, 0xBEEF);
        put_le32(&mut buf, 3, 0x1234_5678);
        put_le64(&mut buf, 8, 0x0102_0304_0506_0708);
        assert_eq!(buf[1], 0xEF);
        assert_eq!(buf[2], 0xBE);
        assert_eq!(buf[3], 0x78);
        assert_eq!(get_le16(&buf, 1), 0xBEEF);
        assert_eq!(get_le32(&buf, 3), 0x1234_5678);
        assert_eq!(get_le64(&buf, 8), 0x0102_0304_0506_0708);
    }

    #[test]
    fn mbr_slot_round_trips_and_selects_start() {
        let mut mbr = [0u8; 512];
        let entry = MbrPartition {
            boot: 0,
            kind: 0x07,
            relative_sectors: 2048,
            total_sectors: 100_000,
        };
        entry.write(&mut mbr, 1);
        assert!(has_boot_signature(&mbr));
        assert_eq!(MbrPartition::parse(&mbr, 1), Some(entry));
        assert_eq!(partition_start(&mbr, 1), Some(2048));
        assert_eq!(partition_start(&mbr, 2), None);
        assert_eq!(partition_start(&mbr, 0), Some(0));
        assert_eq!(partition_start(&mbr, 5), None);
    }

    #[test]
    fn bad_boot_flag_makes_slot_unusable() {
        let mut mbr = [0u8; 512];
        MbrPartition {
            boot: 0x12,
            kind: 0x0C,
            relative_sectors: 63,
            total_sectors: 1000,
        }
        .write(&mut mbr, 1);
        assert_eq!(partition_start(&mbr, 1), None);
    }

    #[test]
    fn cluster_rounding() {
        assert_eq!(clusters_for_size(0, 12), 0);
        assert_eq!(clusters_for_size(1, 12), 1);
        assert_eq!(clusters_for_size(4096, 12), 1);
        assert_eq!(clusters_for_size(4097, 12), 2);
    }

    #[test]
    fn open_flags_map_to_handle_flags() {
        let flags = FileFlags::from_open(OpenFlags::RDWR | OpenFlags::CREAT | OpenFlags::APPEND);
        assert!(flags.contains(FileFlags::READ | FileFlags::WRITE | FileFlags::APPEND));
        assert!(!flags.contains(FileFlags::SYNC));
    }
}
