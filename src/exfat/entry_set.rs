use super::types::*;
use super::upcase::{hash_name, units_eq_ignore_case};
use crate::common::{get_le16, split_component};
use crate::error::FsError;

/// Folds one 32-byte entry into a running entry-set checksum. The checksum
/// field of a FILE entry is left out.
pub(crate) fn dir_set_checksum(entry: &[u8], checksum: u16) -> u16 {
    let skip = entry[0] == TYPE_FILE;
    entry[..32]
        .iter()
        .enumerate()
        .filter(|(idx, _)| !(skip && (*idx == 2 || *idx == 3)))
        .fold(checksum, |sum, (_, &byte)| sum.rotate_right(1).wrapping_add(byte as u16))
}

/// One path component prepared for an exFAT lookup.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ExFatName<'a> {
    pub long: &'a str,
    /// Length in UTF-16 units.
    pub length: u8,
    pub hash: u16,
}

impl<'a> ExFatName<'a> {
    pub(crate) fn new(long: &'a str) -> Result<Self, FsError> {
        let length = long.encode_utf16().count();
        if length == 0 {
            return Err(FsError::InvalidName);
        }
        let length = u8::try_from(length).map_err(|_| FsError::NameTooLong)?;
        Ok(Self {
            long,
            length,
            hash: hash_name(long.encode_utf16(), 0),
        })
    }

    /// FILE + STREAM + as many NAME entries as the name needs.
    pub(crate) fn set_len(&self) -> u8 {
        2 + (self.length as usize).div_ceil(NAME_UNITS_PER_ENTRY) as u8
    }

    pub(crate) fn units(&self) -> impl Iterator<Item = u16> + 'a {
        self.long.encode_utf16()
    }

    /// Compares the units stored in NAME entry number `index` (0-based)
    /// of a set with the matching slice of this name.
    pub(crate) fn matches_fragment(&self, entry: &[u8], index: usize) -> bool {
        let skip = index * NAME_UNITS_PER_ENTRY;
        let stored = (0..NAME_UNITS_PER_ENTRY).map(|k| get_le16(entry, NAME_UNICODE + 2 * k));
        let wanted = self.units().skip(skip).take(NAME_UNITS_PER_ENTRY);
        let expected = (self.length as usize).saturating_sub(skip).min(NAME_UNITS_PER_ENTRY);
        stored
            .take(expected)
            .zip(wanted)
            .all(|(a, b)| units_eq_ignore_case(a, b))
    }
}

pub(crate) fn parse_path_name(path: &str) -> Result<(ExFatName<'_>, &str), FsError> {
    let (long, rest) = split_component(path)?;
    Ok((ExFatName::new(long)?, rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::put_le16;

    #[test]
    fn file_checksum_skips_its_own_field() {
        let mut entry = [0u8; 32];
        entry[0] = TYPE_FILE;
        entry[1] = 2;
        let before = dir_set_checksum(&entry, 0);
        entry[2] = 0xAB;
        entry[3] = 0xCD;
        assert_eq!(dir_set_checksum(&entry, 0), before);
        entry[4] = 1;
        assert_ne!(dir_set_checksum(&entry, 0), before);
    }

    #[test]
    fn stream_checksum_covers_every_byte() {
        let mut entry = [0u8; 32];
        entry[0] = TYPE_STREAM;
        let before = dir_set_checksum(&entry, 0x1234);
        entry[2] = 1;
        assert_ne!(dir_set_checksum(&entry, 0x1234), before);
    }

    #[test]
    fn set_len_counts_name_entries() {
        assert_eq!(ExFatName::new("A.TXT").unwrap().set_len(), 3);
        let fifteen = "abcdefghijklmno";
        assert_eq!(ExFatName::new(fifteen).unwrap().set_len(), 3);
        let sixteen = "abcdefghijklmnop";
        assert_eq!(ExFatName::new(sixteen).unwrap().set_len(), 4);
    }

    #[test]
    fn fragment_compare_ignores_case_and_padding() {
        let name = ExFatName::new("Readme.md").unwrap();
        let mut entry = [0u8; 32];
        entry[0] = TYPE_NAME;
        for (k, unit) in "README.MD".encode_utf16().enumerate() {
            put_le16(&mut entry, NAME_UNICODE + 2 * k, unit);
        }
        assert!(name.matches_fragment(&entry, 0));
        put_le16(&mut entry, NAME_UNICODE, b'X' as u16);
        assert!(!name.matches_fragment(&entry, 0));
    }
}
