use core::cmp;

use blockdev::{BlockDevice, SECTOR_SIZE};

use super::entry_set::dir_set_checksum;
use super::types::*;
use super::ExFatPartition;
use crate::cache::CacheOption;
use crate::common::{
    clusters_for_size, put_le16, put_le32, put_le64, FileAttr, FileError, FileFlags, FileKind,
};
use crate::error::FsError;

/// Open exFAT file or directory. Like the FAT handle it borrows nothing;
/// each call takes the partition it was opened on.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExFatFile {
    pub(crate) kind: FileKind,
    pub(crate) attributes: FileAttr,
    pub(crate) flags: FileFlags,
    pub(crate) error: FileError,
    pub(crate) set_count: u8,
    pub(crate) dir_pos: DirPos,
    pub(crate) cur_cluster: u32,
    pub(crate) cur_position: u64,
    pub(crate) first_cluster: u32,
    pub(crate) data_length: u64,
    pub(crate) valid_length: u64,
}

impl ExFatFile {
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

    pub fn is_contiguous(&self) -> bool {
        self.flags.contains(FileFlags::CONTIGUOUS)
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

    /// Bytes written so far; reads stop here.
    pub fn file_size(&self) -> u64 {
        self.valid_length
    }

    pub fn valid_length(&self) -> u64 {
        self.valid_length
    }

    /// Bytes reserved for the file, at least `valid_length`.
    pub fn data_length(&self) -> u64 {
        self.data_length
    }

    pub fn cur_position(&self) -> u64 {
        self.cur_position
    }

    pub fn first_cluster(&self) -> u32 {
        self.first_cluster
    }

    pub fn dir_pos(&self) -> DirPos {
        self.dir_pos
    }

    pub fn available(&self) -> u64 {
        if self.is_file() {
            self.valid_length.saturating_sub(self.cur_position)
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

    fn cluster_offset<D: BlockDevice>(&self, part: &ExFatPartition<D>) -> u32 {
        (self.cur_position & part.cluster_mask() as u64) as u32
    }

    pub fn read<D: BlockDevice>(
        &mut self,
        part: &mut ExFatPartition<D>,
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
        part: &mut ExFatPartition<D>,
        buf: &mut [u8],
    ) -> Result<usize, FsError> {
        if !self.is_open() {
            return Err(FsError::NotOpen);
        }
        if !self.is_readable() {
            return Err(FsError::NotReadable);
        }
        let to_read = if self.is_contiguous() || self.is_file() {
            let left = self.valid_length.saturating_sub(self.cur_position);
            cmp::min(buf.len() as u64, left) as usize
        } else {
            buf.len()
        };

        let mut done = 0usize;
        while done < to_read {
            let remaining = to_read - done;
            let cluster_offset = self.cluster_offset(part);
            let offset = (cluster_offset as usize) & (SECTOR_SIZE - 1);
            if cluster_offset == 0 {
                if self.cur_position == 0 {
                    self.cur_cluster = self.first_cluster;
                } else if self.is_contiguous() {
                    self.cur_cluster += 1;
                } else {
                    match part.next_cluster(self.cur_cluster)? {
                        Some(next) => self.cur_cluster = next,
                        None if self.is_dir() => break,
                        None => return Err(FsError::BadCluster(self.cur_cluster)),
                    }
                }
            }
            let sector_in_cluster = cluster_offset >> 9;
            let sector = part.cluster_start_sector(self.cur_cluster)? + sector_in_cluster;

            let n = if offset != 0 || remaining < SECTOR_SIZE || part.cache.holds(sector) {
                let n = cmp::min(SECTOR_SIZE - offset, remaining);
                let cache = part.cache_fetch(sector, CacheOption::FOR_READ)?;
                buf[done..done + n].copy_from_slice(&cache[offset..offset + n]);
                n
            } else if remaining >= 2 * SECTOR_SIZE {
                let max = part.sectors_per_cluster() - sector_in_cluster;
                let ns = cmp::min((remaining / SECTOR_SIZE) as u32, max);
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
            self.cur_position += n as u64;
        }
        Ok(done)
    }

    pub fn write<D: BlockDevice>(
        &mut self,
        part: &mut ExFatPartition<D>,
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
        part: &mut ExFatPartition<D>,
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
        if self.flags.contains(FileFlags::APPEND) && self.cur_position != self.valid_length {
            self.seek_set(part, self.valid_length)?;
        }
        if self.cur_position.checked_add(src.len() as u64).is_none() {
            return Err(FsError::FileTooLarge);
        }

        let shift = part.bytes_per_cluster_shift();
        let mut done = 0usize;
        while done < src.len() {
            let remaining = src.len() - done;
            let cluster_offset = self.cluster_offset(part);
            let offset = (cluster_offset as usize) & (SECTOR_SIZE - 1);
            if cluster_offset == 0 {
                if self.cur_cluster != 0 {
                    let advanced = if self.is_contiguous() {
                        let last = self.first_cluster as u64
                            + (self.data_length.saturating_sub(1) >> shift);
                        if (self.cur_cluster as u64) < last {
                            self.cur_cluster += 1;
                            true
                        } else {
                            false
                        }
                    } else {
                        match part.next_cluster(self.cur_cluster)? {
                            Some(next) => {
                                self.cur_cluster = next;
                                true
                            }
                            None => false,
                        }
                    };
                    if !advanced {
                        self.add_cluster(part)?;
                    }
                } else if self.first_cluster == 0 {
                    self.add_cluster(part)?;
                    self.first_cluster = self.cur_cluster;
                } else {
                    self.cur_cluster = self.first_cluster;
                }
            }
            let sector_in_cluster = cluster_offset >> 9;
            let sector = part.cluster_start_sector(self.cur_cluster)? + sector_in_cluster;

            let n = if offset != 0 || remaining < SECTOR_SIZE {
                let n = cmp::min(SECTOR_SIZE - offset, remaining);
                let reserve = offset == 0 && self.cur_position >= self.valid_length;
                let option = if reserve {
                    CacheOption::RESERVE_FOR_WRITE
                } else {
                    CacheOption::FOR_WRITE
                };
                let cache = part.cache_fetch(sector, option)?;
                cache[offset..offset + n].copy_from_slice(&src[done..done + n]);
                if reserve {
                    cache[offset + n..].fill(0);
                }
                if offset + n == SECTOR_SIZE {
                    part.cache_sync_data()?;
                }
                n
            } else if remaining >= 2 * SECTOR_SIZE {
                let max = part.sectors_per_cluster() - sector_in_cluster;
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
            self.cur_position += n as u64;
            if self.cur_position > self.valid_length {
                self.valid_length = self.cur_position;
                self.flags |= FileFlags::DIR_DIRTY;
            }
            if self.cur_position > self.data_length {
                self.data_length = self.cur_position;
                self.flags |= FileFlags::DIR_DIRTY;
            }
        }

        if part.has_date_time() {
            self.flags |= FileFlags::DIR_DIRTY;
        }
        if self.flags.contains(FileFlags::SYNC) {
            self.sync(part)?;
        }
        Ok(done)
    }

    /// Allocates one cluster after `cur_cluster`, keeping the file
    /// contiguous while the next physical cluster is free.
    pub(crate) fn add_cluster<D: BlockDevice>(
        &mut self,
        part: &mut ExFatPartition<D>,
    ) -> Result<(), FsError> {
        let find = match part.bitmap_find(self.cur_cluster + 1, 1)? {
            Some(find) => find,
            None => {
                log::warn!("sdfs: exfat_alloc_failed reason=no_free_cluster");
                return Err(FsError::NoFreeCluster);
            }
        };
        part.bitmap_modify(find, 1, true)?;
        if self.cur_cluster == 0 {
            self.flags |= FileFlags::CONTIGUOUS;
        } else if !(self.is_contiguous() && find == self.cur_cluster + 1) {
            if self.is_contiguous() {
                self.flags.remove(FileFlags::CONTIGUOUS);
                for cluster in self.first_cluster..self.cur_cluster {
                    part.fat_put(cluster, cluster + 1)?;
                }
            }
            part.fat_put(find, EXFAT_EOC)?;
            part.fat_put(self.cur_cluster, find)?;
        }
        self.cur_cluster = find;
        if !self.is_root() {
            self.flags |= FileFlags::DIR_DIRTY;
        }
        Ok(())
    }

    /// Grows a directory by one zeroed cluster. The position is unchanged.
    pub(crate) fn add_dir_cluster<D: BlockDevice>(
        &mut self,
        part: &mut ExFatPartition<D>,
    ) -> Result<(), FsError> {
        let length = if self.is_root() {
            part.root_length()?
        } else {
            self.data_length
        };
        if length + part.bytes_per_cluster() as u64 >= EXFAT_MAX_DIR_BYTES {
            return Err(FsError::DirectoryFull);
        }
        self.add_cluster(part)?;
        part.zero_cluster(self.cur_cluster)?;
        if !self.is_root() {
            self.data_length += part.bytes_per_cluster() as u64;
            self.valid_length += part.bytes_per_cluster() as u64;
        }
        self.sync(part)
    }

    pub fn seek_set<D: BlockDevice>(&mut self, part: &mut ExFatPartition<D>, pos: u64) -> Result<(), FsError> {
        if !self.is_open() {
            return Err(FsError::NotOpen);
        }
        if pos == self.cur_position {
            return Ok(());
        }
        if self.is_file() && pos > self.valid_length {
            return Err(FsError::SeekOutOfRange);
        }
        if pos == 0 {
            self.rewind();
            return Ok(());
        }
        let shift = part.bytes_per_cluster_shift();
        if self.is_contiguous() {
            self.cur_cluster = self.first_cluster + ((pos - 1) >> shift) as u32;
            self.cur_position = pos;
            return Ok(());
        }
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

    pub fn seek_cur<D: BlockDevice>(&mut self, part: &mut ExFatPartition<D>, offset: i64) -> Result<(), FsError> {
        let pos = self
            .cur_position
            .checked_add_signed(offset)
            .ok_or(FsError::SeekOutOfRange)?;
        self.seek_set(part, pos)
    }

    pub fn seek_end<D: BlockDevice>(&mut self, part: &mut ExFatPartition<D>, offset: i64) -> Result<(), FsError> {
        if !self.is_file() {
            return Err(FsError::NotOpen);
        }
        let pos = self
            .valid_length
            .checked_add_signed(offset)
            .ok_or(FsError::SeekOutOfRange)?;
        self.seek_set(part, pos)
    }

    pub fn sync<D: BlockDevice>(&mut self, part: &mut ExFatPartition<D>) -> Result<(), FsError> {
        if !self.is_open() {
            return Ok(());
        }
        let result = if self.flags.contains(FileFlags::DIR_DIRTY) && !self.is_root() {
            self.sync_dir(part)
        } else {
            part.cache_sync()
        };
        if result.is_err() {
            self.error |= FileError::WRITE_ERROR;
        }
        result
    }

    /// Rewrites the FILE and STREAM entries of the set and its checksum.
    fn sync_dir<D: BlockDevice>(&mut self, part: &mut ExFatPartition<D>) -> Result<(), FsError> {
        let stamp = part.has_date_time().then(|| part.now());
        let mut pos = self.dir_pos;
        let mut checksum = 0u16;
        let mut set_count = 0u8;
        let mut idx = 0u8;
        loop {
            let entry = part.dir_cache(&pos, CacheOption::FOR_READ)?;
            let modified = match entry[0] {
                TYPE_FILE => {
                    set_count = entry[FILE_SET_COUNT];
                    let attributes = (self.attributes & FileAttr::COPY).bits() as u16;
                    put_le16(entry, FILE_ATTRIBUTES, attributes);
                    if let Some(stamp) = stamp {
                        put_le32(entry, FILE_MODIFY_TIME, stamp.exfat_stamp());
                        put_le32(entry, FILE_ACCESS_TIME, stamp.exfat_stamp());
                        entry[FILE_MODIFY_MS] = stamp.ms10;
                    }
                    true
                }
                TYPE_STREAM => {
                    if self.is_contiguous() {
                        entry[STREAM_FLAGS] |= STREAM_FLAG_CONTIGUOUS;
                    } else {
                        entry[STREAM_FLAGS] &= !STREAM_FLAG_CONTIGUOUS;
                    }
                    put_le64(entry, STREAM_VALID_LENGTH, self.valid_length);
                    put_le32(entry, STREAM_FIRST_CLUSTER, self.first_cluster);
                    put_le64(entry, STREAM_DATA_LENGTH, self.data_length);
                    true
                }
                TYPE_NAME => false,
                other => {
                    log::warn!("sdfs: exfat_set_corrupt type={:#x} index={}", other, idx);
                    return Err(FsError::CorruptEntry);
                }
            };
            checksum = dir_set_checksum(entry, checksum);
            if modified {
                part.cache.mark_dirty();
            }
            if idx == set_count {
                break;
            }
            idx += 1;
            if !part.dir_seek(&mut pos, 32)? {
                return Err(FsError::CorruptEntry);
            }
        }
        let entry = part.dir_cache(&self.dir_pos, CacheOption::FOR_WRITE)?;
        put_le16(entry, FILE_SET_CHECKSUM, checksum);
        self.flags.remove(FileFlags::DIR_DIRTY);
        part.cache_sync()
    }

    pub fn close<D: BlockDevice>(&mut self, part: &mut ExFatPartition<D>) -> Result<(), FsError> {
        let result = self.sync(part);
        self.kind = FileKind::Closed;
        self.flags = FileFlags::empty();
        result
    }

    /// Frees every cluster past the current position and makes it the new
    /// end of file.
    pub fn truncate<D: BlockDevice>(&mut self, part: &mut ExFatPartition<D>) -> Result<(), FsError> {
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
        let result = self.truncate_clusters(part);
        if result.is_err() {
            self.error |= FileError::WRITE_ERROR;
            return result;
        }
        self.data_length = self.cur_position;
        self.valid_length = self.cur_position;
        self.flags |= FileFlags::DIR_DIRTY;
        self.sync(part)
    }

    fn truncate_clusters<D: BlockDevice>(&mut self, part: &mut ExFatPartition<D>) -> Result<(), FsError> {
        if self.is_contiguous() {
            let total = clusters_for_size(self.data_length, part.bytes_per_cluster_shift()) as u32;
            let (to_free, count) = if self.cur_cluster != 0 {
                let kept = self.cur_cluster - self.first_cluster + 1;
                (self.cur_cluster + 1, total.checked_sub(kept).ok_or(FsError::CorruptEntry)?)
            } else {
                let first = self.first_cluster;
                self.first_cluster = 0;
                (first, total)
            };
            if count > 0 {
                part.bitmap_modify(to_free, count, false)?;
            }
            return Ok(());
        }
        let to_free = if self.cur_cluster != 0 {
            let next = part.next_cluster(self.cur_cluster)?;
            if next.is_some() {
                part.fat_put(self.cur_cluster, EXFAT_EOC)?;
            }
            next
        } else {
            let first = self.first_cluster;
            self.first_cluster = 0;
            Some(first)
        };
        if let Some(cluster) = to_free {
            part.free_chain(cluster)?;
        }
        Ok(())
    }

    /// Truncates to `length` bytes and leaves the position at the new end.
    pub fn truncate_to<D: BlockDevice>(
        &mut self,
        part: &mut ExFatPartition<D>,
        length: u64,
    ) -> Result<(), FsError> {
        if length > self.valid_length {
            return Err(FsError::SeekOutOfRange);
        }
        self.seek_set(part, length)?;
        self.truncate(part)
    }

    /// Reserves `length` bytes as one contiguous run for an empty file.
    /// The reserved space reads as absent until written.
    pub fn pre_allocate<D: BlockDevice>(
        &mut self,
        part: &mut ExFatPartition<D>,
        length: u64,
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
        let need = clusters_for_size(length, part.bytes_per_cluster_shift());
        let need = u32::try_from(need).map_err(|_| FsError::NoContiguousRun)?;
        let Some(find) = part.bitmap_find(0, need)? else {
            log::warn!("sdfs: exfat_alloc_failed reason=no_contiguous_run count={}", need);
            return Err(FsError::NoContiguousRun);
        };
        part.bitmap_modify(find, need, true)?;
        self.data_length = length;
        self.first_cluster = find;
        self.flags |= FileFlags::DIR_DIRTY | FileFlags::CONTIGUOUS;
        self.sync(part)
    }
}
