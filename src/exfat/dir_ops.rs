use blockdev::BlockDevice;

use super::api_read_write::ExFatFile;
use super::entry_set::{parse_path_name, ExFatName};
use super::types::*;
use super::ExFatPartition;
use crate::cache::CacheOption;
use crate::common::{clusters_for_size, FileAttr, FileFlags, FileKind, OpenFlags, DIR_ENTRY_SIZE};
use crate::error::FsError;

impl ExFatFile {
    /// Creates the directory `path` below `parent`. With `parents` set,
    /// missing intermediate directories are created too.
    pub fn mkdir<D: BlockDevice>(
        part: &mut ExFatPartition<D>,
        parent: &mut ExFatFile,
        path: &str,
        parents: bool,
    ) -> Result<Self, FsError> {
        // `None` while the walk is still in `parent`.
        let mut walked = if path.starts_with('/') {
            Some(Self::open_root(part)?)
        } else {
            None
        };
        let mut rest = path.trim_start_matches(['/', ' ']);
        loop {
            let (name, next) = parse_path_name(rest)?;
            let dir = match walked.as_mut() {
                Some(dir) => dir,
                None => &mut *parent,
            };
            if next.is_empty() {
                return Self::mkdir_in(part, dir, &name);
            }
            let sub = match Self::open_in(part, dir, &name, OpenFlags::READ) {
                Ok(sub) => sub,
                Err(FsError::NotFound) if parents => Self::mkdir_in(part, dir, &name)?,
                Err(err) => return Err(err),
            };
            if !sub.is_dir() {
                return Err(FsError::NotDirectory);
            }
            walked = Some(sub);
            rest = next;
        }
    }

    fn mkdir_in<D: BlockDevice>(
        part: &mut ExFatPartition<D>,
        parent: &mut ExFatFile,
        name: &ExFatName<'_>,
    ) -> Result<Self, FsError> {
        if !parent.is_dir() {
            return Err(FsError::NotDirectory);
        }
        let flags = OpenFlags::CREAT | OpenFlags::EXCL | OpenFlags::RDWR;
        let mut sub = Self::open_in(part, parent, name, flags)?;
        sub.kind = FileKind::SubDir;
        sub.attributes = FileAttr::DIRECTORY;
        sub.add_dir_cluster(part)?;
        sub.first_cluster = sub.cur_cluster;
        sub.rewind();
        sub.flags = (sub.flags & FileFlags::CONTIGUOUS) | FileFlags::READ | FileFlags::DIR_DIRTY;
        sub.sync(part)?;
        Ok(sub)
    }

    /// Deletes the file: releases its clusters and clears the in-use bit of
    /// every entry in its set.
    pub fn remove<D: BlockDevice>(&mut self, part: &mut ExFatPartition<D>) -> Result<(), FsError> {
        match self.kind {
            FileKind::File => {}
            FileKind::Closed => return Err(FsError::NotOpen),
            _ => return Err(FsError::IsDirectory),
        }
        if !self.is_writable() {
            return Err(FsError::NotWritable);
        }
        if self.first_cluster != 0 {
            if self.is_contiguous() {
                let count = clusters_for_size(self.data_length, part.bytes_per_cluster_shift());
                if count > 0 {
                    part.bitmap_modify(self.first_cluster, count as u32, false)?;
                }
            } else {
                part.free_chain(self.first_cluster)?;
            }
            self.first_cluster = 0;
        }
        let mut pos = self.dir_pos;
        for idx in 0..=self.set_count {
            if idx > 0 && !part.dir_seek(&mut pos, DIR_ENTRY_SIZE as u32)? {
                return Err(FsError::CorruptEntry);
            }
            let entry = part.dir_cache(&pos, CacheOption::FOR_WRITE)?;
            entry[0] &= !TYPE_IN_USE;
        }
        self.kind = FileKind::Closed;
        self.flags = FileFlags::empty();
        part.cache_sync()
    }

    /// Removes an empty subdirectory.
    pub fn rmdir<D: BlockDevice>(&mut self, part: &mut ExFatPartition<D>) -> Result<(), FsError> {
        if !self.is_subdir() {
            return Err(FsError::NotDirectory);
        }
        self.rewind();
        loop {
            let mut entry = [0u8; DIR_ENTRY_SIZE];
            match self.read(part, &mut entry)? {
                0 => break,
                DIR_ENTRY_SIZE => {}
                _ => return Err(FsError::CorruptEntry),
            }
            if entry[0] == 0 {
                break;
            }
            if entry[0] & TYPE_IN_USE != 0 {
                return Err(FsError::NotEmpty);
            }
        }
        self.kind = FileKind::File;
        self.flags |= FileFlags::WRITE;
        self.remove(part)
    }

    /// Moves this file or directory to `new_path`, resolved against `dir`.
    /// The data, lengths and attributes move with it.
    pub fn rename<D: BlockDevice>(
        &mut self,
        part: &mut ExFatPartition<D>,
        dir: &mut ExFatFile,
        new_path: &str,
    ) -> Result<(), FsError> {
        if !(self.is_file() || self.is_subdir()) {
            return Err(FsError::NotOpen);
        }
        let flags = OpenFlags::CREAT | OpenFlags::EXCL | OpenFlags::WRITE;
        let moved = Self::open(part, dir, new_path, flags)?;

        let mut old = *self;
        self.dir_pos = moved.dir_pos;
        self.set_count = moved.set_count;
        self.flags |= FileFlags::DIR_DIRTY;
        self.sync(part)?;

        old.kind = FileKind::File;
        old.first_cluster = 0;
        old.flags = FileFlags::WRITE;
        old.remove(part)
    }
}
