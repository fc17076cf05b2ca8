use blockdev::BlockDevice;
use heapless::String;

use super::api_read_write::FatFile;
use super::names_sfn::{format_sfn, parse_path_name, FatName};
use super::types::*;
use super::{FatPartition, LfnState};
use crate::cache::CacheOption;
use crate::common::{get_le32, put_le16, FileAttr, FileFlags, FileKind, OpenFlags, DIR_ENTRY_SIZE};
use crate::error::FsError;

const DIR_ENTRIES_PER_SECTOR: u16 = 16;

/// Copy of one directory slot with the location it was read from.
#[derive(Clone, Copy)]
pub(crate) struct DirSlot {
    pub entry: [u8; DIR_ENTRY_SIZE],
    pub sector: u32,
    pub index: u16,
}

/// Borrows the cached copy of slot `index` stored in `sector`.
pub(crate) fn cached_slot<D: BlockDevice>(
    part: &mut FatPartition<D>,
    sector: u32,
    index: u16,
    option: CacheOption,
) -> Result<&mut [u8], FsError> {
    let offset = (index % DIR_ENTRIES_PER_SECTOR) as usize * DIR_ENTRY_SIZE;
    let buf = part.cache_fetch_data(sector, option)?;
    Ok(&mut buf[offset..offset + DIR_ENTRY_SIZE])
}

impl FatFile {
    pub fn open_root<D: BlockDevice>(part: &FatPartition<D>) -> Result<Self, FsError> {
        if !part.is_mounted() {
            return Err(FsError::NotOpen);
        }
        let mut root = Self {
            attributes: FileAttr::DIRECTORY,
            flags: FileFlags::READ,
            ..Self::default()
        };
        if part.fat_type() == FatType::Fat32 {
            root.kind = FileKind::Root;
            root.first_cluster = part.root_dir_start();
        } else {
            root.kind = FileKind::RootFixed;
        }
        Ok(root)
    }

    /// Opens the directory whose chain starts at `cluster`; 0 is the root.
    pub(crate) fn open_cluster<D: BlockDevice>(
        part: &FatPartition<D>,
        cluster: u32,
    ) -> Result<Self, FsError> {
        if cluster == 0 || (part.fat_type() == FatType::Fat32 && cluster == part.root_dir_start()) {
            return Self::open_root(part);
        }
        Ok(Self {
            kind: FileKind::SubDir,
            attributes: FileAttr::DIRECTORY,
            flags: FileFlags::READ,
            first_cluster: cluster,
            ..Self::default()
        })
    }

    /// Reads the slot at the current position and steps past it.
    pub(crate) fn read_dir_entry<D: BlockDevice>(
        &mut self,
        part: &mut FatPartition<D>,
    ) -> Result<Option<DirSlot>, FsError> {
        if self.cur_position & 0x1F != 0 {
            return Err(FsError::CorruptEntry);
        }
        let index = u16::try_from(self.cur_position / DIR_ENTRY_SIZE as u32)
            .map_err(|_| FsError::DirectoryFull)?;
        let mut probe = [0u8; 1];
        if self.read(part, &mut probe)? == 0 {
            return Ok(None);
        }
        let sector = part.cache.sector().ok_or(FsError::CorruptEntry)?;
        let offset = (index % DIR_ENTRIES_PER_SECTOR) as usize * DIR_ENTRY_SIZE;
        let mut entry = [0u8; DIR_ENTRY_SIZE];
        entry.copy_from_slice(&part.cache.buffer()[offset..offset + DIR_ENTRY_SIZE]);
        self.cur_position += DIR_ENTRY_SIZE as u32 - 1;
        Ok(Some(DirSlot {
            entry,
            sector,
            index,
        }))
    }

    /// Opens `path` relative to `dir`, or to the root when it starts with `/`.
    pub fn open<D: BlockDevice>(
        part: &mut FatPartition<D>,
        dir: &mut FatFile,
        path: &str,
        oflag: OpenFlags,
    ) -> Result<Self, FsError> {
        let mut cwd = if path.starts_with('/') {
            Self::open_root(part)?
        } else {
            *dir
        };
        let rest = path.trim_start_matches(['/', ' ']);
        if rest.is_empty() {
            if path.is_empty() {
                return Err(FsError::InvalidPath);
            }
            return cwd.reopen_dir(oflag);
        }
        let mut rest = rest;
        loop {
            let (name, next) = parse_path_name(rest)?;
            if next.is_empty() {
                return Self::open_in(part, &mut cwd, &name, oflag);
            }
            let sub = Self::open_in(part, &mut cwd, &name, OpenFlags::READ)?;
            if !sub.is_dir() {
                return Err(FsError::NotDirectory);
            }
            cwd = sub;
            rest = next;
        }
    }

    fn reopen_dir(&self, oflag: OpenFlags) -> Result<Self, FsError> {
        if !self.is_dir() {
            return Err(FsError::NotDirectory);
        }
        if oflag.intersects(OpenFlags::WRITE | OpenFlags::TRUNC) {
            return Err(FsError::IsDirectory);
        }
        let mut dir = *self;
        dir.rewind();
        dir.flags = FileFlags::READ;
        Ok(dir)
    }

    /// Looks `name` up in `dir` and opens it, creating an 8.3 entry when
    /// `CREAT` is set and nothing matches.
    pub(crate) fn open_in<D: BlockDevice>(
        part: &mut FatPartition<D>,
        dir: &mut FatFile,
        name: &FatName<'_>,
        oflag: OpenFlags,
    ) -> Result<Self, FsError> {
        if !dir.is_dir() {
            return Err(FsError::NotDirectory);
        }
        if name.long == "." {
            return dir.reopen_dir(oflag);
        }
        dir.rewind();
        let mut lfn = LfnState::new();
        let mut free_index: Option<u16> = None;
        while let Some(slot) = dir.read_dir_entry(part)? {
            let first = slot.entry[0];
            if first == DIR_NAME_FREE || first == DIR_NAME_DELETED {
                if free_index.is_none() {
                    free_index = Some(slot.index);
                }
                if first == DIR_NAME_FREE {
                    break;
                }
                lfn.reset();
                continue;
            }
            if is_long_name(&slot.entry) {
                lfn.push(&slot.entry);
                continue;
            }
            if !is_file_or_subdir(&slot.entry) {
                lfn.reset();
                continue;
            }
            let lfn_ord = lfn.ord_for(&slot.entry[..11]);
            let sfn_match = name.sfn.is_some_and(|sfn| slot.entry[..11] == sfn);
            let lfn_match = lfn_ord.is_some() && lfn.eq_ignore_case(name.long);
            if sfn_match || lfn_match {
                if oflag.contains(OpenFlags::CREAT | OpenFlags::EXCL) {
                    return Err(FsError::AlreadyExists);
                }
                return Self::open_cached_entry(part, dir, &slot, lfn_ord.unwrap_or(0), oflag);
            }
            lfn.reset();
        }

        if !oflag.contains(OpenFlags::CREAT) {
            return Err(FsError::NotFound);
        }
        if !oflag.contains(OpenFlags::WRITE) {
            return Err(FsError::NotWritable);
        }
        let sfn = match name.sfn {
            Some(sfn) if name.long != ".." => sfn,
            _ => return Err(FsError::InvalidName),
        };
        let index = match free_index {
            Some(index) => index,
            None => {
                let index = u16::try_from(dir.cur_position / DIR_ENTRY_SIZE as u32)
                    .map_err(|_| FsError::DirectoryFull)?;
                dir.add_dir_cluster(part)?;
                index
            }
        };
        dir.seek_set(part, index as u32 * DIR_ENTRY_SIZE as u32)?;
        let slot = dir.read_dir_entry(part)?.ok_or(FsError::CorruptEntry)?;

        let stamp = part.has_date_time().then(|| part.now());
        let entry = cached_slot(part, slot.sector, slot.index, CacheOption::FOR_WRITE)?;
        entry.fill(0);
        entry[..11].copy_from_slice(&sfn);
        entry[DIR_CASE_FLAGS] = name.case_flags;
        if let Some(stamp) = stamp {
            entry[DIR_CREATE_MS] = stamp.ms10;
            put_le16(entry, DIR_CREATE_TIME, stamp.time);
            put_le16(entry, DIR_CREATE_DATE, stamp.date);
            put_le16(entry, DIR_ACCESS_DATE, stamp.date);
            put_le16(entry, DIR_MODIFY_TIME, stamp.time);
            put_le16(entry, DIR_MODIFY_DATE, stamp.date);
        }
        let mut created = slot;
        created.entry.copy_from_slice(entry);
        Self::open_cached_entry(part, dir, &created, 0, oflag)
    }

    fn open_cached_entry<D: BlockDevice>(
        part: &mut FatPartition<D>,
        dir: &FatFile,
        slot: &DirSlot,
        lfn_ord: u8,
        oflag: OpenFlags,
    ) -> Result<Self, FsError> {
        let entry = &slot.entry;
        let attributes = FileAttr::from_bits_truncate(entry[DIR_ATTR]) & FileAttr::COPY;
        let is_dir = attributes.contains(FileAttr::DIRECTORY);
        if oflag.intersects(OpenFlags::WRITE | OpenFlags::TRUNC) {
            if is_dir {
                return Err(FsError::IsDirectory);
            }
            if attributes.contains(FileAttr::READ_ONLY) {
                return Err(FsError::ReadOnly);
            }
        }
        let first_cluster = entry_first_cluster(entry);
        if is_dir && first_cluster == 0 {
            return Self::open_root(part);
        }
        let mut file = Self {
            kind: if is_dir { FileKind::SubDir } else { FileKind::File },
            attributes,
            flags: FileFlags::from_open(oflag),
            lfn_ord,
            dir_index: slot.index,
            dir_cluster: dir.first_cluster,
            dir_sector: slot.sector,
            first_cluster,
            file_size: if is_dir { 0 } else { get_le32(entry, DIR_FILE_SIZE) },
            ..Self::default()
        };
        if oflag.contains(OpenFlags::TRUNC) && file.first_cluster != 0 {
            part.free_chain(file.first_cluster)?;
            file.first_cluster = 0;
            file.file_size = 0;
            file.flags |= FileFlags::DIR_DIRTY;
            file.sync(part)?;
        }
        if oflag.contains(OpenFlags::AT_END) {
            file.seek_set(part, file.file_size)?;
        }
        Ok(file)
    }

    /// Opens the next file or subdirectory of `dir`, or `None` at its end.
    pub fn open_next<D: BlockDevice>(
        part: &mut FatPartition<D>,
        dir: &mut FatFile,
        oflag: OpenFlags,
    ) -> Result<Option<Self>, FsError> {
        if !dir.is_dir() {
            return Err(FsError::NotDirectory);
        }
        let mut lfn = LfnState::new();
        while let Some(slot) = dir.read_dir_entry(part)? {
            let first = slot.entry[0];
            if first == DIR_NAME_FREE {
                return Ok(None);
            }
            if is_long_name(&slot.entry) {
                lfn.push(&slot.entry);
                continue;
            }
            if first == DIR_NAME_DELETED || first == b'.' || !is_file_or_subdir(&slot.entry) {
                lfn.reset();
                continue;
            }
            let lfn_ord = lfn.ord_for(&slot.entry[..11]).unwrap_or(0);
            return Self::open_cached_entry(part, dir, &slot, lfn_ord, oflag).map(Some);
        }
        Ok(None)
    }

    /// Writes the long name when one is attached, else the 8.3 name.
    pub fn get_name<D: BlockDevice, const N: usize>(
        &self,
        part: &mut FatPartition<D>,
        out: &mut String<N>,
    ) -> Result<(), FsError> {
        out.clear();
        if !self.is_open() {
            return Err(FsError::NotOpen);
        }
        if self.is_root() {
            return out.push('/').map_err(|_| FsError::NameTooLong);
        }
        if self.lfn_ord > 0 {
            let mut parent = Self::open_cluster(part, self.dir_cluster)?;
            let first = self
                .dir_index
                .checked_sub(self.lfn_ord as u16)
                .ok_or(FsError::CorruptEntry)?;
            parent.seek_set(part, first as u32 * DIR_ENTRY_SIZE as u32)?;
            let mut lfn = LfnState::new();
            for _ in 0..self.lfn_ord {
                let slot = parent.read_dir_entry(part)?.ok_or(FsError::CorruptEntry)?;
                if !is_long_name(&slot.entry) {
                    return Err(FsError::CorruptEntry);
                }
                lfn.push(&slot.entry);
            }
            let short = parent.read_dir_entry(part)?.ok_or(FsError::CorruptEntry)?;
            if lfn.ord_for(&short.entry[..11]) == Some(self.lfn_ord) {
                return lfn.write_name(out);
            }
            log::warn!("sdfs: fat_lfn_mismatch index={}", self.dir_index);
        }
        let entry = cached_slot(part, self.dir_sector, self.dir_index, CacheOption::FOR_READ)?;
        let short = format_sfn(entry);
        out.push_str(&short).map_err(|_| FsError::NameTooLong)
    }
}
