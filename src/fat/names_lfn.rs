use heapless::String;

use super::names_sfn::lfn_checksum;
use super::types::*;
use crate::error::FsError;
use crate::exfat::upcase::to_upcase;

/// Collects the long-name entries that precede a short entry.
pub(crate) struct LfnState {
    parts: [[u16; LFN_CHARS_PER_ENTRY]; LFN_MAX_ENTRIES],
    expected: u8,
    checksum: u8,
    seen_mask: u32,
}

impl LfnState {
    pub(crate) const fn new() -> Self {
        Self {
            parts: [[0; LFN_CHARS_PER_ENTRY]; LFN_MAX_ENTRIES],
            expected: 0,
            checksum: 0,
            seen_mask: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.expected = 0;
        self.checksum = 0;
        self.seen_mask = 0;
    }

    pub(crate) fn push(&mut self, entry: &[u8]) {
        let order = entry[0];
        if order & LFN_ORDER_LAST != 0 {
            self.reset();
            let slots = order & LFN_ORDER_MASK;
            if slots == 0 || slots as usize > LFN_MAX_ENTRIES {
                return;
            }
            self.expected = slots;
            self.checksum = entry[LFN_CHECKSUM];
        }
        if self.expected == 0 {
            return;
        }
        let seq = order & LFN_ORDER_MASK;
        if seq == 0 || seq > self.expected || entry[LFN_CHECKSUM] != self.checksum {
            self.reset();
            return;
        }
        let part = &mut self.parts[seq as usize - 1];
        for (slot, &offset) in part.iter_mut().zip(LFN_CHAR_OFFSETS.iter()) {
            *slot = u16::from_le_bytes([entry[offset], entry[offset + 1]]);
        }
        self.seen_mask |= 1 << (seq - 1);
    }

    /// Entry count of the collected set when it is complete and belongs to
    /// the short name `sfn`.
    pub(crate) fn ord_for(&self, sfn: &[u8]) -> Option<u8> {
        if self.expected == 0 {
            return None;
        }
        let full = (1u32 << self.expected) - 1;
        if self.seen_mask == full && self.checksum == lfn_checksum(sfn) {
            Some(self.expected)
        } else {
            None
        }
    }

    pub(crate) fn units(&self) -> impl Iterator<Item = u16> + '_ {
        self.parts[..self.expected as usize]
            .iter()
            .flatten()
            .copied()
            .take_while(|&unit| unit != 0)
    }

    pub(crate) fn eq_ignore_case(&self, name: &str) -> bool {
        let mut stored = self.units();
        let mut wanted = name.encode_utf16();
        loop {
            match (stored.next(), wanted.next()) {
                (None, None) => return true,
                (Some(a), Some(b)) if to_upcase(a) == to_upcase(b) => {}
                _ => return false,
            }
        }
    }

    pub(crate) fn write_name<const N: usize>(&self, out: &mut String<N>) -> Result<(), FsError> {
        out.clear();
        for ch in char::decode_utf16(self.units()) {
            out.push(ch.unwrap_or(char::REPLACEMENT_CHARACTER))
                .map_err(|_| FsError::NameTooLong)?;
        }
        Ok(())
    }
}
