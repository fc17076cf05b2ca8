use heapless::String;

use super::types::*;
use crate::common::split_component;
use crate::error::FsError;

/// One path component prepared for directory lookup.
#[derive(Clone, Copy, Debug)]
pub(crate) struct FatName<'a> {
    /// Space-padded 8.3 form when the component has one.
    pub sfn: Option<[u8; 11]>,
    pub case_flags: u8,
    pub long: &'a str,
}

fn legal_83_char(c: u8) -> bool {
    if c == b'"' || c == b'|' {
        return false;
    }
    // *+,./
    if (0x2A..=0x2F).contains(&c) {
        return false;
    }
    // :;<=>?
    if (0x3A..=0x3F).contains(&c) {
        return false;
    }
    // [\]
    if (0x5B..=0x5D).contains(&c) {
        return false;
    }
    c > 0x20 && c < 0x7F
}

pub(crate) fn parse_path_name(path: &str) -> Result<(FatName<'_>, &str), FsError> {
    let (long, rest) = split_component(path)?;
    let (sfn, case_flags) = match long {
        "." => (Some(*b".          "), 0),
        ".." => (Some(*b"..         "), 0),
        _ => match short_name(long) {
            Some((sfn, flags)) => (Some(sfn), flags),
            None => (None, 0),
        },
    };
    Ok((
        FatName {
            sfn,
            case_flags,
            long,
        },
        rest,
    ))
}

/// Encodes `name` as a space-padded 8.3 field plus lowercase case bits.
pub(crate) fn short_name(name: &str) -> Option<([u8; 11], u8)> {
    let mut sfn = [b' '; 11];
    let mut lc = 0u8;
    let mut uc = 0u8;
    let mut bit = CASE_LC_BASE;
    let mut idx = 0usize;
    let mut max = 7usize;
    for &c in name.as_bytes() {
        if c == b'.' && max == 7 {
            max = 10;
            idx = 8;
            bit = CASE_LC_EXT;
            continue;
        }
        if !legal_83_char(c) || idx > max {
            return None;
        }
        let c = if c.is_ascii_lowercase() {
            lc |= bit;
            c.to_ascii_uppercase()
        } else {
            if c.is_ascii_uppercase() {
                uc |= bit;
            }
            c
        };
        sfn[idx] = c;
        idx += 1;
    }
    if sfn[0] == b' ' {
        return None;
    }
    Some((sfn, if lc & uc != 0 { 0 } else { lc }))
}

/// Renders the 8.3 name of a short entry, honoring its lowercase bits.
pub(crate) fn format_sfn(entry: &[u8]) -> String<12> {
    let mut out = String::new();
    let case_flags = entry[DIR_CASE_FLAGS];
    let mut lc_bit = CASE_LC_BASE;
    for (idx, &raw) in entry[..11].iter().enumerate() {
        if raw == b' ' {
            continue;
        }
        if idx == 8 {
            lc_bit = CASE_LC_EXT;
            let _ = out.push('.');
        }
        let c = if raw.is_ascii_uppercase() && case_flags & lc_bit != 0 {
            raw.to_ascii_lowercase()
        } else {
            raw
        };
        let _ = out.push(c as char);
    }
    out
}

pub(crate) fn lfn_checksum(sfn: &[u8]) -> u8 {
    let mut sum = 0u8;
    for &byte in &sfn[..11] {
        sum = ((sum & 1) << 7).wrapping_add(sum >> 1).wrapping_add(byte);
    }
    sum
}
