//! Built-in exFAT case map, name hash and the upcase table codec.

struct CaseRange {
    base: u16,
    offset: i16,
    count: u16,
}

/// Ranges of alternating upper/lower pairs use this offset.
const PAIRED: i16 = 1;

const fn range(base: u16, offset: i16, count: u16) -> CaseRange {
    CaseRange {
        base,
        offset,
        count,
    }
}

const CASE_RANGES: &[CaseRange] = &[
    range(0x0061, -32, 26),
    range(0x00E0, -32, 23),
    range(0x00F8, -32, 7),
    range(0x0100, PAIRED, 48),
    range(0x0132, PAIRED, 6),
    range(0x0139, PAIRED, 16),
    range(0x014A, PAIRED, 46),
    range(0x0179, PAIRED, 6),
    range(0x03AD, -37, 3),
    range(0x03B1, -32, 17),
    range(0x03C3, -32, 9),
    range(0x03D8, PAIRED, 24),
    range(0x0430, -32, 32),
    range(0x0450, -80, 16),
    range(0x0460, PAIRED, 34),
    range(0x048A, PAIRED, 54),
    range(0x04D0, PAIRED, 68),
    range(0x0561, -48, 38),
    range(0x1E00, PAIRED, 150),
    range(0x1EA0, PAIRED, 96),
    range(0x2170, -16, 16),
    range(0x24D0, -26, 26),
    range(0xFF41, -32, 26),
];

const CASE_PAIRS: &[(u16, u16)] = &[
    (0x00FF, 0x0178),
    (0x0131, 0x0049),
    (0x017F, 0x0053),
    (0x03AC, 0x0386),
    (0x03C2, 0x03A3),
    (0x03CC, 0x038C),
    (0x03CD, 0x038E),
    (0x03CE, 0x038F),
];

/// Identity runs at least this long are stored as `0xFFFF, len`.
const MIN_IDENTITY_RUN: u32 = 512;
const RUN_MARK: u16 = 0xFFFF;

pub fn to_upcase(unit: u16) -> u16 {
    if unit < 0x61 {
        return unit;
    }
    if let Some(&(_, upper)) = CASE_PAIRS.iter().find(|(lower, _)| *lower == unit) {
        return upper;
    }
    for range in CASE_RANGES {
        let delta = unit.wrapping_sub(range.base);
        if delta < range.count {
            if range.offset == PAIRED {
                return unit - (delta & 1);
            }
            return unit.wrapping_add_signed(range.offset);
        }
    }
    unit
}

#[inline]
fn rotate_add(hash: u16, byte: u8) -> u16 {
    hash.rotate_right(1).wrapping_add(byte as u16)
}

/// Folds one name unit, upcased, into a running name hash.
pub fn hash_unit(hash: u16, unit: u16) -> u16 {
    let upper = to_upcase(unit);
    rotate_add(rotate_add(hash, upper as u8), (upper >> 8) as u8)
}

pub fn hash_name<I: IntoIterator<Item = u16>>(units: I, seed: u16) -> u16 {
    units.into_iter().fold(seed, hash_unit)
}

/// Folds one upcase table unit, low byte first, into the table checksum.
pub fn upcase_checksum(unit: u16, checksum: u32) -> u32 {
    let checksum = checksum.rotate_right(1).wrapping_add(unit as u8 as u32);
    checksum.rotate_right(1).wrapping_add((unit >> 8) as u32)
}

pub fn units_eq_ignore_case(a: u16, b: u16) -> bool {
    a == b || to_upcase(a) == to_upcase(b)
}

/// Compressed upcase table generated from [`to_upcase`], one unit at a time.
pub struct UpcaseTable {
    next: u32,
    pending: Option<u16>,
}

impl UpcaseTable {
    pub fn new() -> Self {
        Self {
            next: 0,
            pending: None,
        }
    }

    /// Byte length and checksum of the whole table.
    pub fn summary() -> (u32, u32) {
        Self::new().fold((0, 0), |(len, sum), unit| (len + 2, upcase_checksum(unit, sum)))
    }
}

impl Default for UpcaseTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for UpcaseTable {
    type Item = u16;

    fn next(&mut self) -> Option<u16> {
        if let Some(unit) = self.pending.take() {
            return Some(unit);
        }
        if self.next > 0xFFFF {
            return None;
        }
        let unit = self.next as u16;
        let upper = to_upcase(unit);
        if upper != unit {
            self.next += 1;
            return Some(upper);
        }
        let mut end = self.next + 1;
        while end <= 0xFFFF && to_upcase(end as u16) == end as u16 {
            end += 1;
        }
        let run = (end - self.next).min(0xFFFE);
        // A trailing 0xFFFF unit would read back as a run mark.
        if run >= MIN_IDENTITY_RUN || end > 0xFFFF {
            self.next += run;
            self.pending = Some(run as u16);
            Some(RUN_MARK)
        } else {
            self.next += 1;
            Some(unit)
        }
    }
}

/// Result of comparing an on-disk upcase table with [`to_upcase`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpcaseReport {
    /// Table entries decoded, counting each unit of an identity run.
    pub entries: u32,
    pub mismatches: u32,
    pub checksum_ok: bool,
}

/// Streaming decoder for a compressed upcase table.
pub(crate) struct UpcaseChecker {
    unit: u32,
    in_run: bool,
    checksum: u32,
    report: UpcaseReport,
}

impl UpcaseChecker {
    pub(crate) fn new() -> Self {
        Self {
            unit: 0,
            in_run: false,
            checksum: 0,
            report: UpcaseReport::default(),
        }
    }

    pub(crate) fn push(&mut self, value: u16) {
        self.checksum = upcase_checksum(value, self.checksum);
        if self.in_run {
            for k in 0..value as u32 {
                let unit = (self.unit + k) as u16;
                if to_upcase(unit) != unit {
                    self.report.mismatches += 1;
                }
            }
            self.unit += value as u32;
            self.report.entries += value as u32;
            self.in_run = false;
        } else if value == RUN_MARK {
            self.in_run = true;
        } else {
            if to_upcase(self.unit as u16) != value {
                self.report.mismatches += 1;
            }
            self.unit += 1;
            self.report.entries += 1;
        }
    }

    pub(crate) fn finish(mut self, stored_checksum: u32) -> UpcaseReport {
        self.report.checksum_ok = self.checksum == stored_checksum;
        self.report
    }
}
