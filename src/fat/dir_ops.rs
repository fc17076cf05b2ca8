use blockdev::BlockDevice;

use super::api_read_write::FatFile;
use super::dir_scan::cached_slot;
use super::names_sfn::{lfn_checksum, parse_path_name, FatName};
use super::types::*;
use super::FatPartition;
use crate::cache::CacheOption;
use crate::common::{FileAttr, FileFlags, FileKind, OpenFlags, DIR_ENTRY_SIZE};
use crate::error::FsError;

const DOT_NAME: [u8; 11] = *b".          ";
const DOTDOT_NAME: [u8; 11] = *b"..         ";

impl FatFile {
    /// Creates the directory `path` below `parent`. With `parents` set,
    /// missing intermediate directories are created too.
    pub fn mkdir<D: BlockDevice>(
        part: &mut FatPartition<D>,
        parent: &mut FatFile,
        path: &str,
        parents: bool,
    ) -> Result<Self, FsError> {
        let mut dir = if path.starts_with('/') {
            Self::open_root(part)?
        } else {
            *parent
        };
        let mut rest = path.trim_start_matches(['/', ' ']);
        loop {
            let (name, next) = parse_path_name(rest)?;
            if next.is_empty() {
                return Self::mkdir_in(part, &mut dir, &name);
            }
            dir = match Self::open_in(part, &mut dir, &name, OpenFlags::READ) {
                Ok(sub) => sub,
                Err(FsError::NotFound) if parents => Self::mkdir_in(part, &mut dir, &name)?,
                Err(err) => return Err(err),
            };
            if !dir.is_dir() {
                return Err(FsError::NotDirectory);
            }
            rest = next;
        }
    }

    fn mkdir_in<D: BlockDevice>(
        part: &mut FatPartition<D>,
        parent: &mut FatFile,
        name: &FatName<'_>,
    ) -> Result<Self, FsError> {
        if !parent.is_dir() {
            return Err(FsError::NotDirectory);
        }
        let flags = OpenFlags::CREAT | OpenFlags::EXCL | OpenFlags::RDWR;
        let mut sub = Self::open_in(part, parent, name, flags)?;
        sub.kind = FileKind::SubDir;
        sub.add_dir_cluster(part)?;
        sub.first_cluster = sub.cur_cluster;
        sub.rewind();
        sub.flags |= FileFlags::DIR_DIRTY;
        sub.sync(part)?;

        let entry = sub.cache_dir_entry(part, CacheOption::FOR_WRITE)?;
        entry[DIR_ATTR] = ATTR_DIRECTORY;
        let mut dot = [0u8; DIR_ENTRY_SIZE];
        dot.copy_from_slice(entry);
        sub.attributes = FileAttr::DIRECTORY;

        dot[..11].copy_from_slice(&DOT_NAME);
        dot[DIR_CASE_FLAGS] = 0;
        let mut dotdot = dot;
        dotdot[..11].copy_from_slice(&DOTDOT_NAME);
        let parent_cluster = if parent.is_root() { 0 } else { parent.first_cluster };
        set_entry_first_cluster(&mut dotdot, parent_cluster);

        let sector = part.cluster_start_sector(sub.first_cluster)?;
        let buf = part.cache_fetch_data(sector, CacheOption::FOR_WRITE)?;
        buf[..DIR_ENTRY_SIZE].copy_from_slice(&dot);
        buf[DIR_ENTRY_SIZE..2 * DIR_ENTRY_SIZE].copy_from_slice(&dotdot);
        part.cache_sync()?;
        Ok(sub)
    }

    /// Deletes the file: frees its chain and marks its short entry and any
    /// long-name entries deleted.
    pub fn remove<D: BlockDevice>(&mut self, part: &mut FatPartition<D>) -> Result<(), FsError> {
        match self.kind {
            FileKind::File => {}
            FileKind::Closed => return Err(FsError::NotOpen),
            _ => return Err(FsError::IsDirectory),
        }
        if !self.is_writable() {
            return Err(FsError::NotWritable);
        }
        if self.first_cluster != 0 {
            part.free_chain(self.first_cluster)?;
            self.first_cluster = 0;
        }
        let entry = self.cache_dir_entry(part, CacheOption::FOR_WRITE)?;
        let checksum = lfn_checksum(entry);
        entry[0] = DIR_NAME_DELETED;
        self.kind = FileKind::Closed;
        self.flags = FileFlags::empty();

        if self.lfn_ord > 0 {
            let mut parent = Self::open_cluster(part, self.dir_cluster)?;
            for ord in 1..=self.lfn_ord {
                let index = self
                    .dir_index
                    .checked_sub(ord as u16)
                    .ok_or(FsError::CorruptEntry)?;
                parent.seek_set(part, index as u32 * DIR_ENTRY_SIZE as u32)?;
                let slot = parent.read_dir_entry(part)?.ok_or(FsError::CorruptEntry)?;
                let entry = cached_slot(part, slot.sector, slot.index, CacheOption::FOR_WRITE)?;
                let order = entry[0] & LFN_ORDER_MASK;
                if !is_long_name(entry) || order != ord || entry[LFN_CHECKSUM] != checksum {
                    log::warn!("sdfs: fat_lfn_mismatch index={} ord={}", index, ord);
                    return Err(FsError::CorruptEntry);
                }
                entry[0] = DIR_NAME_DELETED;
            }
        }
        part.cache_sync()
    }

    /// Removes an empty subdirectory.
    pub fn rmdir<D: BlockDevice>(&mut self, part: &mut FatPartition<D>) -> Result<(), FsError> {
        if !self.is_subdir() {
            return Err(FsError::NotDirectory);
        }
        self.rewind();
        while let Some(slot) = self.read_dir_entry(part)? {
            let first = slot.entry[0];
            if first == DIR_NAME_FREE {
                break;
            }
            if first == DIR_NAME_DELETED || first == b'.' || is_long_name(&slot.entry) {
                continue;
            }
            if is_file_or_subdir(&slot.entry) {
                return Err(FsError::NotEmpty);
            }
        }
        self.kind = FileKind::File;
        self.flags |= FileFlags::WRITE;
        self.remove(part)
    }

    /// Moves this file or directory to `new_path`, resolved against `dir`.
    /// The new entry keeps the cluster chain, size, attributes and stamps.
    pub fn rename<D: BlockDevice>(
        &mut self,
        part: &mut FatPartition<D>,
        dir: &mut FatFile,
        new_path: &str,
    ) -> Result<(), FsError> {
        if !(self.is_file() || self.is_subdir()) {
            return Err(FsError::NotOpen);
        }
        self.sync(part)?;
        let mut saved = [0u8; DIR_ENTRY_SIZE];
        saved.copy_from_slice(self.cache_dir_entry(part, CacheOption::FOR_READ)?);

        let moved = if self.is_subdir() {
            Self::mkdir(part, dir, new_path, false)?
        } else {
            let flags = OpenFlags::CREAT | OpenFlags::EXCL | OpenFlags::WRITE;
            Self::open(part, dir, new_path, flags)?
        };
        let scratch_cluster = moved.first_cluster;

        let entry = moved.cache_dir_entry(part, CacheOption::FOR_WRITE)?;
        entry[DIR_CREATE_MS..].copy_from_slice(&saved[DIR_CREATE_MS..]);
        entry[DIR_ATTR] = saved[DIR_ATTR];

        if self.is_subdir() {
            let parent_cluster = match Self::open_cluster(part, moved.dir_cluster)? {
                parent if parent.is_root() => 0,
                parent => parent.first_cluster,
            };
            let sector = part.cluster_start_sector(self.first_cluster)?;
            let buf = part.cache_fetch_data(sector, CacheOption::FOR_WRITE)?;
            let dotdot = &mut buf[DIR_ENTRY_SIZE..2 * DIR_ENTRY_SIZE];
            if dotdot[..11] == DOTDOT_NAME {
                set_entry_first_cluster(dotdot, parent_cluster);
            }
            if scratch_cluster != 0 {
                part.free_chain(scratch_cluster)?;
            }
        }

        let mut old = *self;
        old.kind = FileKind::File;
        old.first_cluster = 0;
        old.flags = FileFlags::WRITE;
        old.remove(part)?;

        self.dir_cluster = moved.dir_cluster;
        self.dir_index = moved.dir_index;
        self.dir_sector = moved.dir_sector;
        self.lfn_ord = 0;
        part.cache_sync()
    }
}
