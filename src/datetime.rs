#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FsTimestamp {
    pub date: u16,
    pub time: u16,
    /// Hundredths of a second past `time`, 0..=199.
    pub ms10: u8,
}

impl FsTimestamp {
    pub const fn new(date: u16, time: u16) -> Self {
        Self { date, time, ms10: 0 }
    }

    /// exFAT packs date in the high half and time in the low half.
    pub const fn exfat_stamp(&self) -> u32 {
        ((self.date as u32) << 16) | self.time as u32
    }
}

pub type DateTimeCallback = fn() -> FsTimestamp;

pub const fn fs_date(year: u16, month: u8, day: u8) -> u16 {
    if year < 1980 {
        return 0;
    }
    let year = year - 1980;
    if year > 127 || month < 1 || month > 12 || day < 1 || day > 31 {
        return 0;
    }
    (year << 9) | ((month as u16) << 5) | day as u16
}

pub const fn fs_time(hour: u8, minute: u8, second: u8) -> u16 {
    if hour > 23 || minute > 59 || second > 59 {
        return 0;
    }
    ((hour as u16) << 11) | ((minute as u16) << 5) | (second as u16 >> 1)
}

pub const fn fs_year(date: u16) -> u16 {
    1980 + (date >> 9)
}

pub const fn fs_month(date: u16) -> u8 {
    ((date >> 5) & 0x0F) as u8
}

pub const fn fs_day(date: u16) -> u8 {
    (date & 0x1F) as u8
}

pub const fn fs_hour(time: u16) -> u8 {
    (time >> 11) as u8
}

pub const fn fs_minute(time: u16) -> u8 {
    ((time >> 5) & 0x3F) as u8
}

pub const fn fs_second(time: u16) -> u8 {
    (2 * (time & 0x1F)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_packs_year_month_day() {
        let date = fs_date(2024, 2, 29);
        assert_eq!(date, (44 << 9) | (2 << 5) | 29);
        assert_eq!(fs_year(date), 2024);
        assert_eq!(fs_month(date), 2);
        assert_eq!(fs_day(date), 29);
    }

    #[test]
    fn time_stores_two_second_resolution() {
        let time = fs_time(23, 59, 59);
        assert_eq!(fs_hour(time), 23);
        assert_eq!(fs_minute(time), 59);
        assert_eq!(fs_second(time), 58);
    }

    #[test]
    fn out_of_range_fields_encode_as_zero() {
        assert_eq!(fs_date(1979, 1, 1), 0);
        assert_eq!(fs_date(2020, 13, 1), 0);
        assert_eq!(fs_date(2108, 1, 1), 0);
        assert_eq!(fs_time(24, 0, 0), 0);
    }

    #[test]
    fn exfat_stamp_puts_date_high() {
        let stamp = FsTimestamp::new(fs_date(2021, 6, 1), fs_time(12, 30, 0));
        assert_eq!(stamp.exfat_stamp() >> 16, stamp.date as u32);
        assert_eq!(stamp.exfat_stamp() & 0xFFFF, stamp.time as u32);
    }
}
