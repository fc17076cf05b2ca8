use blockdev::BlockDevice;
use heapless::String;

use super::api_read_write::ExFatFile;
use super::entry_set::{dir_set_checksum, parse_path_name, ExFatName};
use super::types::*;
use super::upcase::hash_unit;
use super::ExFatPartition;
use crate::cache::CacheOption;
use crate::common::{
    get_le16, get_le32, get_le64, put_le16, put_le32, FileAttr, FileFlags, FileKind, OpenFlags,
    DIR_ENTRY_SIZE,
};
use crate::error::FsError;

impl ExFatFile {
    pub fn open_root<D: BlockDevice>(part: &ExFatPartition<D>) -> Result<Self, FsError> {
        if !part.is_mounted() {
            return Err(FsError::NotOpen);
        }
        Ok(Self {
            kind: FileKind::Root,
            attributes: FileAttr::DIRECTORY,
            flags: FileFlags::READ,
            first_cluster: part.root_cluster(),
            ..Self::default()
        })
    }

    /// Reads the next 32-byte entry. `None` once the directory chain ends.
    fn read_dir_entry<D: BlockDevice>(
        &mut self,
        part: &mut ExFatPartition<D>,
    ) -> Result<Option<[u8; DIR_ENTRY_SIZE]>, FsError> {
        let mut entry = [0u8; DIR_ENTRY_SIZE];
        match self.read(part, &mut entry)? {
            0 => Ok(None),
            DIR_ENTRY_SIZE => Ok(Some(entry)),
            _ => Err(FsError::CorruptEntry),
        }
    }

    /// Location of the entry just returned by `read_dir_entry`.
    fn last_entry_pos(&self) -> DirPos {
        DirPos {
            cluster: self.cur_cluster,
            position: (self.cur_position - DIR_ENTRY_SIZE as u64) as u32,
            is_contiguous: self.is_contiguous(),
        }
    }

    /// Handle for the set whose FILE entry sits at `pos`. Length fields are
    /// filled in from the STREAM entry that follows.
    fn from_file_entry(entry: &[u8], pos: DirPos) -> Self {
        let attributes = FileAttr::from_bits_truncate(get_le16(entry, FILE_ATTRIBUTES) as u8)
            & FileAttr::COPY;
        let kind = if attributes.contains(FileAttr::DIRECTORY) {
            FileKind::SubDir
        } else {
            FileKind::File
        };
        Self {
            kind,
            attributes,
            set_count: entry[FILE_SET_COUNT],
            dir_pos: pos,
            ..Self::default()
        }
    }

    fn apply_stream_entry(&mut self, entry: &[u8], oflag: OpenFlags) {
        self.flags = FileFlags::from_open(oflag);
        if entry[STREAM_FLAGS] & STREAM_FLAG_CONTIGUOUS != 0 {
            self.flags |= FileFlags::CONTIGUOUS;
        }
        self.valid_length = get_le64(entry, STREAM_VALID_LENGTH);
        self.first_cluster = get_le32(entry, STREAM_FIRST_CLUSTER);
        self.data_length = get_le64(entry, STREAM_DATA_LENGTH);
    }

    /// Opens `path` relative to `dir`, or to the root when it starts with `/`.
    pub fn open<D: BlockDevice>(
        part: &mut ExFatPartition<D>,
        dir: &mut ExFatFile,
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
        // Entries created directly in `dir` grow the caller's handle.
        let mut in_place = !path.starts_with('/');
        loop {
            let (name, next) = parse_path_name(rest)?;
            if next.is_empty() {
                let target = if in_place { &mut *dir } else { &mut cwd };
                return Self::open_in(part, target, &name, oflag);
            }
            let sub = Self::open_in(part, &mut cwd, &name, OpenFlags::READ)?;
            if !sub.is_dir() {
                return Err(FsError::NotDirectory);
            }
            cwd = sub;
            in_place = false;
            rest = next;
        }
    }

    /// Reloads a subdirectory's lengths and layout from its STREAM entry,
    /// which may have been rewritten through another handle.
    pub(crate) fn reload_dir<D: BlockDevice>(
        &mut self,
        part: &mut ExFatPartition<D>,
    ) -> Result<(), FsError> {
        if !self.is_subdir() {
            return Ok(());
        }
        let mut pos = self.dir_pos;
        if !part.dir_seek(&mut pos, DIR_ENTRY_SIZE as u32)? {
            return Err(FsError::CorruptEntry);
        }
        let entry = part.dir_cache(&pos, CacheOption::FOR_READ)?;
        if entry[0] != TYPE_STREAM {
            return Err(FsError::CorruptEntry);
        }
        let contiguous = entry[STREAM_FLAGS] & STREAM_FLAG_CONTIGUOUS != 0;
        self.valid_length = get_le64(entry, STREAM_VALID_LENGTH);
        self.data_length = get_le64(entry, STREAM_DATA_LENGTH);
        self.flags.set(FileFlags::CONTIGUOUS, contiguous);
        Ok(())
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
        dir.flags = FileFlags::READ | (self.flags & FileFlags::CONTIGUOUS);
        Ok(dir)
    }

    /// Looks `name` up in `dir` and opens it, creating a new entry set when
    /// `CREAT` is set and nothing matches.
    pub(crate) fn open_in<D: BlockDevice>(
        part: &mut ExFatPartition<D>,
        dir: &mut ExFatFile,
        name: &ExFatName<'_>,
        oflag: OpenFlags,
    ) -> Result<Self, FsError> {
        if !dir.is_dir() {
            return Err(FsError::NotDirectory);
        }
        if name.long == "." {
            return dir.reopen_dir(oflag);
        }
        let free_need = name.set_len();
        let mut free_count = 0u8;
        let mut free_pos = DirPos::default();
        let mut in_set = false;
        let mut name_index = 0usize;
        let mut found = Self::default();

        dir.reload_dir(part)?;
        dir.rewind();
        while let Some(entry) = dir.read_dir_entry(part)? {
            if entry[0] & TYPE_IN_USE == 0 {
                if free_count == 0 {
                    free_pos = dir.last_entry_pos();
                }
                if free_count < free_need {
                    free_count += 1;
                }
                in_set = false;
                if entry[0] == 0 {
                    break;
                }
            } else if !in_set {
                if free_count < free_need {
                    free_count = 0;
                }
                if entry[0] == TYPE_FILE {
                    in_set = true;
                    found = Self::from_file_entry(&entry, dir.last_entry_pos());
                }
            } else if entry[0] == TYPE_STREAM {
                found.apply_stream_entry(&entry, oflag);
                name_index = 0;
                in_set = entry[STREAM_NAME_LENGTH] == name.length
                    && get_le16(&entry, STREAM_NAME_HASH) == name.hash;
            } else if entry[0] == TYPE_NAME {
                if !name.matches_fragment(&entry, name_index) {
                    in_set = false;
                    continue;
                }
                name_index += 1;
                if name_index * NAME_UNITS_PER_ENTRY >= name.length as usize {
                    return Self::finish_open(part, found, oflag);
                }
            } else {
                in_set = false;
            }
        }

        if !oflag.contains(OpenFlags::CREAT) {
            return Err(FsError::NotFound);
        }
        if !oflag.contains(OpenFlags::WRITE) {
            return Err(FsError::NotWritable);
        }
        if name.long == ".." {
            return Err(FsError::InvalidName);
        }
        while free_count < free_need {
            match dir.read_dir_entry(part)? {
                Some(_) => {
                    if free_count == 0 {
                        free_pos = dir.last_entry_pos();
                    }
                    free_count += 1;
                }
                None => {
                    let cur = dir.cur_cluster;
                    dir.add_dir_cluster(part)?;
                    dir.cur_cluster = cur;
                }
            }
        }
        free_pos.is_contiguous = dir.is_contiguous();
        Self::create_set(part, free_pos, name, oflag)
    }

    fn finish_open<D: BlockDevice>(
        part: &mut ExFatPartition<D>,
        mut file: Self,
        oflag: OpenFlags,
    ) -> Result<Self, FsError> {
        if oflag.contains(OpenFlags::CREAT | OpenFlags::EXCL) {
            return Err(FsError::AlreadyExists);
        }
        if oflag.intersects(OpenFlags::WRITE | OpenFlags::TRUNC) {
            if file.is_subdir() {
                return Err(FsError::IsDirectory);
            }
            if file.attributes.contains(FileAttr::READ_ONLY) {
                return Err(FsError::ReadOnly);
            }
        }
        if oflag.contains(OpenFlags::TRUNC) {
            if !file.is_writable() {
                return Err(FsError::NotWritable);
            }
            file.truncate_to(part, 0)?;
        }
        if oflag.contains(OpenFlags::AT_END) {
            file.seek_set(part, file.valid_length)?;
        }
        Ok(file)
    }

    /// Writes FILE, STREAM and NAME entries for `name` starting at `pos`.
    fn create_set<D: BlockDevice>(
        part: &mut ExFatPartition<D>,
        pos: DirPos,
        name: &ExFatName<'_>,
        oflag: OpenFlags,
    ) -> Result<Self, FsError> {
        let set_len = name.set_len();
        let stamp = part.has_date_time().then(|| part.now());
        let mut units = name.units();
        let mut cursor = pos;
        for idx in 0..set_len {
            if idx > 0 && !part.dir_seek(&mut cursor, DIR_ENTRY_SIZE as u32)? {
                return Err(FsError::CorruptEntry);
            }
            let entry = part.dir_cache(&cursor, CacheOption::FOR_WRITE)?;
            if entry[0] & TYPE_IN_USE != 0 {
                return Err(FsError::CorruptEntry);
            }
            entry.fill(0);
            match idx {
                0 => {
                    entry[0] = TYPE_FILE;
                    entry[FILE_SET_COUNT] = set_len - 1;
                    if let Some(stamp) = stamp {
                        put_le32(entry, FILE_CREATE_TIME, stamp.exfat_stamp());
                        put_le32(entry, FILE_MODIFY_TIME, stamp.exfat_stamp());
                        put_le32(entry, FILE_ACCESS_TIME, stamp.exfat_stamp());
                        entry[FILE_CREATE_MS] = stamp.ms10;
                        entry[FILE_MODIFY_MS] = stamp.ms10;
                    }
                }
                1 => {
                    entry[0] = TYPE_STREAM;
                    entry[STREAM_FLAGS] = STREAM_FLAG_ALWAYS1;
                    entry[STREAM_NAME_LENGTH] = name.length;
                    put_le16(entry, STREAM_NAME_HASH, name.hash);
                }
                _ => {
                    entry[0] = TYPE_NAME;
                    for (k, unit) in units.by_ref().take(NAME_UNITS_PER_ENTRY).enumerate() {
                        put_le16(entry, NAME_UNICODE + 2 * k, unit);
                    }
                }
            }
        }
        let mut file = Self {
            kind: FileKind::File,
            set_count: set_len - 1,
            dir_pos: pos,
            flags: FileFlags::from_open(oflag) | FileFlags::DIR_DIRTY,
            ..Self::default()
        };
        file.sync(part)?;
        Ok(file)
    }

    /// Opens the next file or subdirectory of `dir`, or `None` at its end.
    pub fn open_next<D: BlockDevice>(
        part: &mut ExFatPartition<D>,
        dir: &mut ExFatFile,
        oflag: OpenFlags,
    ) -> Result<Option<Self>, FsError> {
        if !dir.is_dir() {
            return Err(FsError::NotDirectory);
        }
        if dir.cur_position == 0 {
            dir.reload_dir(part)?;
        }
        let mut pending: Option<Self> = None;
        while let Some(entry) = dir.read_dir_entry(part)? {
            if entry[0] == 0 {
                return Ok(None);
            }
            match (entry[0], pending.as_mut()) {
                (TYPE_FILE, _) => {
                    pending = Some(Self::from_file_entry(&entry, dir.last_entry_pos()));
                }
                (TYPE_STREAM, Some(file)) => {
                    file.apply_stream_entry(&entry, oflag);
                    return Ok(pending);
                }
                _ => pending = None,
            }
        }
        Ok(None)
    }

    /// Copies the name stored in the NAME entries of this set into `out`.
    pub fn get_name<D: BlockDevice, const N: usize>(
        &self,
        part: &mut ExFatPartition<D>,
        out: &mut String<N>,
    ) -> Result<(), FsError> {
        out.clear();
        if !self.is_open() {
            return Err(FsError::NotOpen);
        }
        if self.is_root() {
            return out.push('/').map_err(|_| FsError::NameTooLong);
        }
        let mut pos = self.dir_pos;
        if !part.dir_seek(&mut pos, DIR_ENTRY_SIZE as u32)? {
            return Err(FsError::CorruptEntry);
        }
        let entry = part.dir_cache(&pos, CacheOption::FOR_READ)?;
        if entry[0] != TYPE_STREAM {
            return Err(FsError::CorruptEntry);
        }
        let mut remaining = entry[STREAM_NAME_LENGTH] as usize;
        let mut units: heapless::Vec<u16, { u8::MAX as usize }> = heapless::Vec::new();
        for _ in 1..self.set_count {
            if remaining == 0 {
                break;
            }
            if !part.dir_seek(&mut pos, DIR_ENTRY_SIZE as u32)? {
                return Err(FsError::CorruptEntry);
            }
            let entry = part.dir_cache(&pos, CacheOption::FOR_READ)?;
            if entry[0] != TYPE_NAME {
                return Err(FsError::CorruptEntry);
            }
            let count = remaining.min(NAME_UNITS_PER_ENTRY);
            for k in 0..count {
                units
                    .push(get_le16(entry, NAME_UNICODE + 2 * k))
                    .map_err(|_| FsError::NameTooLong)?;
            }
            remaining -= count;
        }
        for ch in char::decode_utf16(units.iter().copied()) {
            let ch = ch.unwrap_or(char::REPLACEMENT_CHARACTER);
            out.push(ch).map_err(|_| FsError::NameTooLong)?;
        }
        Ok(())
    }

    /// Checks the stored set checksum and name hash against the entries.
    pub fn verify_entry_set<D: BlockDevice>(
        &self,
        part: &mut ExFatPartition<D>,
    ) -> Result<(), FsError> {
        if !self.is_open() {
            return Err(FsError::NotOpen);
        }
        if self.is_root() {
            return Ok(());
        }
        let mut pos = self.dir_pos;
        let mut checksum = 0u16;
        let mut stored_checksum = 0u16;
        let mut stored_hash = 0u16;
        let mut hash = 0u16;
        let mut remaining = 0usize;
        for idx in 0..=self.set_count {
            if idx > 0 && !part.dir_seek(&mut pos, DIR_ENTRY_SIZE as u32)? {
                return Err(FsError::CorruptEntry);
            }
            let entry = part.dir_cache(&pos, CacheOption::FOR_READ)?;
            match (idx, entry[0]) {
                (0, TYPE_FILE) => stored_checksum = get_le16(entry, FILE_SET_CHECKSUM),
                (1, TYPE_STREAM) => {
                    remaining = entry[STREAM_NAME_LENGTH] as usize;
                    stored_hash = get_le16(entry, STREAM_NAME_HASH);
                }
                (2.., TYPE_NAME) => {
                    let count = remaining.min(NAME_UNITS_PER_ENTRY);
                    for k in 0..count {
                        hash = hash_unit(hash, get_le16(entry, NAME_UNICODE + 2 * k));
                    }
                    remaining -= count;
                }
                (_, other) => {
                    log::warn!("sdfs: exfat_set_corrupt type={:#x} index={}", other, idx);
                    return Err(FsError::CorruptEntry);
                }
            }
            checksum = dir_set_checksum(entry, checksum);
        }
        if checksum != stored_checksum {
            log::warn!(
                "sdfs: exfat_checksum_mismatch stored={:#06x} computed={:#06x}",
                stored_checksum,
                checksum
            );
            return Err(FsError::ChecksumMismatch);
        }
        if hash != stored_hash {
            log::warn!(
                "sdfs: exfat_name_hash_mismatch stored={:#06x} computed={:#06x}",
                stored_hash,
                hash
            );
            return Err(FsError::NameHashMismatch);
        }
        Ok(())
    }
}
