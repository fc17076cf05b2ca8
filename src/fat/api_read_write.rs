use core::cmp;

use blockdev::{BlockDevice, SECTOR_SIZE};

use super::dir_scan::cached_slot;
use super::types::*;
use super::FatPartition;
use crate::cache::CacheOption;
use crate::common::{
    clusters_for_size, put_le16, put_le32, FileAttr, FileError, FileFlags, FileKind, SECTOR_MASK,
};
use crate::error::FsError;

/// Open FAT file or directory. The handle holds no borrow of the volume;
/// every call takes the partition it was opened on.
#[derive(Clone, Copy, Debug, Default)]
pub struct FatFile {
    pub(crate) kind: FileKind,
    pub(crate) attributes: FileAttr,
    pub(crate) flags: FileFlags,
    pub(crate) error: FileError,
    pub(crate) lfn_ord: u8,
    pub(crate) dir_index: u16,
    pub(crate) dir_cluster: u32,
    pub(crate) dir_sector: u32,
    pub(crate) cur_cluster: u32,
    pub(crate) cur_position: u32,
    pub(crate) file_size: u32,
    pub(crate) first_cluster: u32,
}

impl FatFile {
    pub fn is_open(&self) -> bool {
        self.kind.is_open()
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    pub fn is_subdir(&self) -> bool {
        self.kind == FileKind::SubDir
    }

    pub fn is_root(&self) -> bool {
        self.kind.is_root()
    }

    pub fn is_readable(&self) -> bool {
        self.flags.contains(FileFlags::READ)
    }

    pub fn is_writable(&self) -> bool {
        self.flags.contains(FileFlags::WRITE)
    }

    pub fn attributes(&self) -> FileAttr {
        self.attributes
    }

    pub fn file_size(&self) -> u32 {
        self.file_size
    }

    pub fn cur_position(&self) -> u32 {
        self.cur_position
    }

    pub fn first_cluster(&self) -> u32 {
        self.first_cluster
    }

    pub fn dir_index(&self) -> u16 {
        self.dir_index
    }

    pub fn available(&self) -> u32 {
        if self.is_file() {
            self.file_size.saturating_sub(self.cur_position)
        } else {
            0
        }
    }

    pub fn error(&self) -> FileError {
        self.error
    }

    pub fn get_write_error(&self) -> bool {
        self.error.contains(FileError::WRITE_ERROR)
    }

    pub fn clear_write_error(&mut self) {
        self.error.remove(FileError::WRITE_ERROR);
    }

    pub fn clear_error(&mut self) {
        self.error = FileError::empty();
    }

    pub fn rewind(&mut self) {
        self.cur_position = 0;
        self.cur_cluster = 0;
    }

    pub fn read<D: BlockDevice>(
        &mut self,
        part: &mut FatPartition<D>,
        buf: &mut [u8],
    ) -> Result<usize, FsError> {
        let result = self.read_inner(part, buf);
        if result.is_err() {
            self.error |= FileError::READ_ERROR;
        }
        result
    }

    fn read_inner<D: BlockDevice>(
        &mut self,
        part: &mut FatPartition<D>,
        buf: &mut [u8],
    ) -> Result<usize, FsError> {
        if !self.is_open() {
            return Err(FsError::NotOpen);
        }
        if !self.is_readable() {
            return Err(FsError::NotReadable);
        }
        let to_read = match self.kind {
            FileKind::File => cmp::min(buf.len(), self.available() as usize),
            FileKind::RootFixed => {
                let limit = 32 * part.root_dir_entry_count() as u32;
                cmp::min(buf.len(), limit.saturating_sub(self.cur_position) as usize)
            }
            _ => buf.len(),
        };

        let mut done = 0usize;
        while done < to_read {
            let remaining = to_read - done;
            let offset = (self.cur_position & SECTOR_MASK) as usize;
            let mut sector_in_cluster = 0u32;
            let sector = if self.kind == FileKind::RootFixed {
                part.root_dir_start() + (self.cur_position >> 9)
            } else {
                sector_in_cluster = part.sector_of_cluster(self.cur_position);
                if offset == 0 && sector_in_cluster == 0 {
                    if self.cur_position == 0 {
                        self.cur_cluster = self.first_cluster;
                    } else {
                        match part.next_cluster(self.cur_cluster)? {
                            Some(next) => self.cur_cluster = next,
                            None if self.is_dir() => break,
                            None => return Err(FsError::BadCluster(self.cur_cluster)),
                        }
                    }
                }
                part.cluster_start_sector(self.cur_cluster)? + sector_in_cluster
            };

            let n = if offset != 0 || remaining < SECTOR_SIZE || part.cache.holds(sector) {
                let n = cmp::min(SECTOR_SIZE - offset, remaining);
                let cache = part.cache_fetch_data(sector, CacheOption::FOR_READ)?;
                buf[done..done + n].copy_from_slice(&cache[offset..offset + n]);
                n
            } else if remaining >= 2 * SECTOR_SIZE {
                let mut ns = (remaining / SECTOR_SIZE) as u32;
                if self.kind != FileKind::RootFixed {
                    ns = cmp::min(ns, part.sectors_per_cluster() as u32 - sector_in_cluster);
                }
                let n = ns as usize * SECTOR_SIZE;
                if part.cache.holds_any(sector, ns) {
                    part.cache_sync_data()?;
                }
                part.dev.read_sectors(sector, &mut buf[done..done + n])?;
                n
            } else {
                part.dev.read_sectors(sector, &mut buf[done..done + SECTOR_SIZE])?;
                SECTOR_SIZE
            };
            done += n;
            self.cur_position += n as u32;
        }
        Ok(done)
    }

    pub fn write<D: BlockDevice>(
        &mut self,
        part: &mut FatPartition<D>,
        src: &[u8],
    ) -> Result<usize, FsError> {
        let result = self.write_inner(part, src);
        if result.is_err() {
            self.error |= FileError::WRITE_ERROR;
        }
        result
    }

    fn write_inner<D: BlockDevice>(
        &mut self,
        part: &mut FatPartition<D>,
        src: &[u8],
    ) -> Result<usize, FsError> {
        match self.kind {
            FileKind::File => {}
            FileKind::Closed => return Err(FsError::NotOpen),
            _ => return Err(FsError::IsDirectory),
        }
        if !self.is_writable() {
            return Err(FsError::NotWritable);
        }
        if self.flags.contains(FileFlags::APPEND) && self.cur_position != self.file_size {
            self.seek_set(part, self.file_size)?;
        }
        if self.cur_position as u64 + src.len() as u64 > u32::MAX as u64 {
            return Err(FsError::FileTooLarge);
        }

        let mut done = 0usize;
        while done < src.len() {
            let remaining = src.len() - done;
            let sector_in_cluster = part.sector_of_cluster(self.cur_position);
            let offset = (self.cur_position & SECTOR_MASK) as usize;
            if sector_in_cluster == 0 && offset == 0 {
                if self.cur_cluster != 0 {
                    match part.next_cluster(self.cur_cluster)? {
                        Some(next) => self.cur_cluster = next,
                        None => self.add_cluster(part)?,
                    }
                } else if self.first_cluster == 0 {
                    self.add_cluster(part)?;
                    self.first_cluster = self.cur_cluster;
                } else {
                    self.cur_cluster = self.first_cluster;
                }
            }
            let sector = part.cluster_start_sector(self.cur_cluster)? + sector_in_cluster;

            let n = if offset != 0 || remaining < SECTOR_SIZE {
                let n = cmp::min(SECTOR_SIZE - offset, remaining);
                let reserve = offset == 0 && self.cur_position >= self.file_size;
                let option = if reserve {
                    CacheOption::RESERVE_FOR_WRITE
                } else {
                    CacheOption::FOR_WRITE
                };
                let cache = part.cache_fetch_data(sector, option)?;
                cache[offset..offset + n].copy_from_slice(&src[done..done + n]);
                if reserve {
                    cache[offset + n..].fill(0);
                }
                if offset + n == SECTOR_SIZE {
                    part.cache_sync_data()?;
                }
                n
            } else if remaining >= 2 * SECTOR_SIZE {
                let max = part.sectors_per_cluster() as u32 - sector_in_cluster;
                let ns = cmp::min((remaining / SECTOR_SIZE) as u32, max);
                let n = ns as usize * SECTOR_SIZE;
                if part.cache.holds_any(sector, ns) {
                    part.cache.invalidate();
                }
                part.dev.write_sectors(sector, &src[done..done + n])?;
                n
            } else {
                if part.cache.holds(sector) {
                    part.cache.invalidate();
                }
                part.dev.write_sectors(sector, &src[done..done + SECTOR_SIZE])?;
                SECTOR_SIZE
            };
            done += n;
            self.cur_position += n as u32;
        }

        if self.cur_position > self.file_size {
            self.file_size = self.cur_position;
            self.flags |= FileFlags::DIR_DIRTY;
        } else if part.has_date_time() {
            self.flags |= FileFlags::DIR_DIRTY;
        }
        if self.flags.contains(FileFlags::SYNC) {
            self.sync(part)?;
        }
        Ok(done)
    }

    pub(crate) fn add_cluster<D: BlockDevice>(&mut self, part: &mut FatPartition<D>) -> Result<(), FsError> {
        self.cur_cluster = part.allocate_cluster(self.cur_cluster)?;
        self.flags |= FileFlags::DIR_DIRTY;
        Ok(())
    }

    /// Grows a directory by one zeroed cluster and leaves the position at
    /// the new end.
    pub(crate) fn add_dir_cluster<D: BlockDevice>(
        &mut self,
        part: &mut FatPartition<D>,
    ) -> Result<(), FsError> {
        if self.kind == FileKind::RootFixed {
            return Err(FsError::DirectoryFull);
        }
        if self.cur_position >= FAT_MAX_DIR_BYTES {
            return Err(FsError::DirectoryFull);
        }
        self.add_cluster(part)?;
        part.zero_cluster(self.cur_cluster)?;
        self.cur_position += part.bytes_per_cluster();
        Ok(())
    }

    pub fn seek_set<D: BlockDevice>(&mut self, part: &mut FatPartition<D>, pos: u32) -> Result<(), FsError> {
        if !self.is_open() {
            return Err(FsError::NotOpen);
        }
        if pos == self.cur_position {
            return Ok(());
        }
        match self.kind {
            FileKind::File if pos > self.file_size => return Err(FsError::SeekOutOfRange),
            FileKind::RootFixed => {
                if pos > 32 * part.root_dir_entry_count() as u32 {
                    return Err(FsError::SeekOutOfRange);
                }
                self.cur_position = pos;
                return Ok(());
            }
            _ => {}
        }
        if pos == 0 {
            self.rewind();
            return Ok(());
        }

        let shift = part.bytes_per_cluster_shift();
        let mut n_new = (pos - 1) >> shift;
        let saved = self.cur_cluster;
        if self.cur_position == 0 || n_new < (self.cur_position - 1) >> shift {
            self.cur_cluster = self.first_cluster;
        } else {
            n_new -= (self.cur_position - 1) >> shift;
        }
        for _ in 0..n_new {
            match part.next_cluster(self.cur_cluster) {
                Ok(Some(next)) => self.cur_cluster = next,
                Ok(None) => {
                    self.cur_cluster = saved;
                    return Err(FsError::SeekOutOfRange);
                }
                Err(err) => {
                    self.cur_cluster = saved;
                    return Err(err);
                }
            }
        }
        self.cur_position = pos;
        Ok(())
    }

    pub fn seek_cur<D: BlockDevice>(&mut self, part: &mut FatPartition<D>, offset: i64) -> Result<(), FsError> {
        let pos = self.cur_position as i64 + offset;
        let pos = u32::try_from(pos).map_err(|_| FsError::SeekOutOfRange)?;
        self.seek_set(part, pos)
    }

    pub fn seek_end<D: BlockDevice>(&mut self, part: &mut FatPartition<D>, offset: i64) -> Result<(), FsError> {
        if !self.is_file() {
            return Err(FsError::NotOpen);
        }
        let pos = self.file_size as i64 + offset;
        let pos = u32::try_from(pos).map_err(|_| FsError::SeekOutOfRange)?;
        self.seek_set(part, pos)
    }

    /// Returns the cached 32-byte slot of this handle's directory entry.
    pub(crate) fn cache_dir_entry<'a, D: BlockDevice>(
        &self,
        part: &'a mut FatPartition<D>,
        option: CacheOption,
    ) -> Result<&'a mut [u8], FsError> {
        cached_slot(part, self.dir_sector, self.dir_index, option)
    }

    pub fn sync<D: BlockDevice>(&mut self, part: &mut FatPartition<D>) -> Result<(), FsError> {
        if !self.is_open() {
            return Ok(());
        }
        let result = self.sync_inner(part);
        if result.is_err() {
            self.error |= FileError::WRITE_ERROR;
        }
        result
    }

    fn sync_inner<D: BlockDevice>(&mut self, part: &mut FatPartition<D>) -> Result<(), FsError> {
        if self.flags.contains(FileFlags::DIR_DIRTY) && !self.is_root() {
            let stamp = part.has_date_time().then(|| part.now());
            let is_file = self.is_file();
            let (file_size, first_cluster) = (self.file_size, self.first_cluster);
            let entry = self.cache_dir_entry(part, CacheOption::FOR_WRITE)?;
            if entry[0] == DIR_NAME_DELETED || entry[0] == DIR_NAME_FREE {
                return Err(FsError::CorruptEntry);
            }
            if is_file {
                put_le32(entry, DIR_FILE_SIZE, file_size);
            }
            set_entry_first_cluster(entry, first_cluster);
            if let Some(stamp) = stamp {
                put_le16(entry, DIR_MODIFY_TIME, stamp.time);
                put_le16(entry, DIR_MODIFY_DATE, stamp.date);
                put_le16(entry, DIR_ACCESS_DATE, stamp.date);
            }
            self.flags.remove(FileFlags::DIR_DIRTY);
        }
        part.cache_sync()
    }

    pub fn close<D: BlockDevice>(&mut self, part: &mut FatPartition<D>) -> Result<(), FsError> {
        let result = self.sync(part);
        self.kind = FileKind::Closed;
        self.flags = FileFlags::empty();
        result
    }

    /// Frees every cluster past the current position and makes it the new
    /// end of file.
    pub fn truncate<D: BlockDevice>(&mut self, part: &mut FatPartition<D>) -> Result<(), FsError> {
        match self.kind {
            FileKind::File => {}
            FileKind::Closed => return Err(FsError::NotOpen),
            _ => return Err(FsError::IsDirectory),
        }
        if !self.is_writable() {
            return Err(FsError::NotWritable);
        }
        if self.first_cluster == 0 {
            return Ok(());
        }
        let result = self.truncate_chain(part);
        if result.is_err() {
            self.error |= FileError::WRITE_ERROR;
            return result;
        }
        self.file_size = self.cur_position;
        self.flags |= FileFlags::DIR_DIRTY;
        self.sync(part)
    }

    fn truncate_chain<D: BlockDevice>(&mut self, part: &mut FatPartition<D>) -> Result<(), FsError> {
        if self.cur_cluster == 0 {
            part.free_chain(self.first_cluster)?;
            self.first_cluster = 0;
            return Ok(());
        }
        if let Some(next) = part.next_cluster(self.cur_cluster)? {
            part.fat_put_eoc(self.cur_cluster)?;
            part.free_chain(next)?;
        }
        Ok(())
    }

    pub fn truncate_to<D: BlockDevice>(
        &mut self,
        part: &mut FatPartition<D>,
        length: u32,
    ) -> Result<(), FsError> {
        if length > self.file_size {
            return Err(FsError::SeekOutOfRange);
        }
        self.seek_set(part, length)?;
        self.truncate(part)
    }

    /// Reserves `length` bytes as one contiguous run for an empty file.
    pub fn pre_allocate<D: BlockDevice>(
        &mut self,
        part: &mut FatPartition<D>,
        length: u32,
    ) -> Result<(), FsError> {
        if !self.is_file() {
            return Err(FsError::NotOpen);
        }
        if !self.is_writable() {
            return Err(FsError::NotWritable);
        }
        if length == 0 || self.first_cluster != 0 {
            return Err(FsError::InvalidArgument);
        }
        let need = clusters_for_size(length as u64, part.bytes_per_cluster_shift()) as u32;
        self.first_cluster = part.alloc_contiguous(need)?;
        self.file_size = length;
        self.flags |= FileFlags::DIR_DIRTY;
        self.sync(part)
    }
}
