//! Timestamp codec for the fixed-width log format.
//!
//! Log timestamps look like `2013-10-23T10:13:04.978Z` and are decoded to
//! milliseconds since the Unix epoch (UTC) without allocating. Rendered
//! dates look like `2013-10-23 10:13:04.978` and are written straight into
//! a caller-provided slice.
//!
//! A [`Calendar`] caches, for a bounded window of years, the epoch offset of
//! every year start and the `(year, month, day)` of every day. Reading falls
//! back to plain arithmetic outside that window; writing does not and
//! renders [`OUT_OF_RANGE_DATE`] instead.

use std::ops::Range;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::TimestampError;

/// Width of an input timestamp, `YYYY-MM-DDTHH:MM:SS.mmmZ`.
pub const TIMESTAMP_LEN: usize = 24;

/// Width of a rendered date, `YYYY-MM-DD HH:MM:SS.mmm`.
pub const DATE_LEN: usize = 23;

pub const MS_PER_DAY: u64 = 86_400_000;
const MS_PER_HOUR: u64 = 3_600_000;
const MS_PER_MINUTE: u64 = 60_000;
const MS_PER_SECOND: u64 = 1_000;

/// Placeholder written for dates outside the calendar window.
pub const OUT_OF_RANGE_DATE: &[u8; DATE_LEN] = b"0000-00-00 00:00:00.000";

const EPOCH_YEAR: u32 = 1970;

const DAYS_BEFORE_MONTH: [u32; 12] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];

pub fn is_leap_year(year: u32) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

pub fn days_in_month(year: u32, month: u32) -> u32 {
    match month {
        2 if is_leap_year(year) => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

fn leap_years_through(year: u64) -> u64 {
    year / 4 - year / 100 + year / 400
}

/// Days from 1970-01-01 to January 1st of `year` (`year >= 1970`).
pub fn days_before_year(year: u32) -> u64 {
    let year = u64::from(year);
    let epoch = u64::from(EPOCH_YEAR);
    (year - epoch) * 365 + leap_years_through(year - 1) - leap_years_through(epoch - 1)
}

/// Days from January 1st to the first day of `month` (1-based).
pub fn days_before_month(year: u32, month: u32) -> u32 {
    let leap_shift = u32::from(month > 2 && is_leap_year(year));
    DAYS_BEFORE_MONTH[(month - 1) as usize] + leap_shift
}

/// Epoch milliseconds of a UTC civil date-time, by direct arithmetic.
pub fn epoch_millis(
    year: u32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
    millis: u32,
) -> u64 {
    let days = days_before_year(year) + u64::from(days_before_month(year, month) + day - 1);
    days * MS_PER_DAY + clock_millis(hour, minute, second, millis)
}

fn clock_millis(hour: u32, minute: u32, second: u32, millis: u32) -> u64 {
    u64::from(hour) * MS_PER_HOUR
        + u64::from(minute) * MS_PER_MINUTE
        + u64::from(second) * MS_PER_SECOND
        + u64::from(millis)
}

/// Decodes `width` ASCII digits packed little-endian in `word`, so the
/// first character read sits in the lowest byte.
#[inline]
fn packed_digits(word: u32, width: u32, offset: usize) -> Result<u32, TimestampError> {
    let mut value = 0;
    for i in 0..width {
        let byte = (word >> (8 * i)) as u8;
        if !byte.is_ascii_digit() {
            return Err(TimestampError::Malformed {
                offset: offset + i as usize,
                found: byte,
            });
        }
        value = value * 10 + u32::from(byte - b'0');
    }
    Ok(value)
}

#[inline]
fn word4(ts: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([ts[at], ts[at + 1], ts[at + 2], ts[at + 3]])
}

#[inline]
fn word2(ts: &[u8], at: usize) -> u32 {
    u32::from(u16::from_le_bytes([ts[at], ts[at + 1]]))
}

#[inline]
fn expect_byte(ts: &[u8], offset: usize, expected: u8) -> Result<(), TimestampError> {
    match ts[offset] {
        b if b == expected => Ok(()),
        found => Err(TimestampError::Malformed { offset, found }),
    }
}

fn check_range(field: &'static str, value: u32, range: Range<u32>) -> Result<u32, TimestampError> {
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(TimestampError::FieldOutOfRange { field, value })
    }
}

/// Right-aligned, zero-padded decimal rendering into `dst`.
#[inline]
pub fn write_padded(dst: &mut [u8], mut n: u32) {
    for slot in dst.iter_mut().rev() {
        *slot = b'0' + (n % 10) as u8;
        n /= 10;
    }
}

/// Cached calendar for a bounded window of years.
#[derive(Clone, Debug)]
pub struct Calendar {
    years: Range<u32>,
    /// Epoch milliseconds of January 1st of every year in the window.
    year_starts: Vec<u64>,
    /// Day number (since 1970-01-01) of the first cached day.
    base_day: u64,
    /// `year << 9 | day << 4 | month` for every cached day.
    days: Vec<u32>,
}

impl Calendar {
    /// Build the tables for years `first..end`.
    pub fn with_years(first: u32, end: u32) -> Result<Self, TimestampError> {
        if first < EPOCH_YEAR || end <= first {
            return Err(TimestampError::InvalidYearWindow { first, end });
        }
        let mut year_starts = Vec::with_capacity((end - first) as usize);
        let mut days = Vec::with_capacity((end - first) as usize * 366);
        for year in first..end {
            year_starts.push(days_before_year(year) * MS_PER_DAY);
            for month in 1..=12 {
                for day in 1..=days_in_month(year, month) {
                    days.push(year << 9 | day << 4 | month);
                }
            }
        }
        Ok(Self {
            years: first..end,
            year_starts,
            base_day: days_before_year(first),
            days,
        })
    }

    /// Window of `years_back` years before the current year through
    /// `years_ahead` years after it.
    pub fn around_now(years_back: u32, years_ahead: u32) -> Result<Self, TimestampError> {
        let current = current_year();
        let first = current.saturating_sub(years_back).max(EPOCH_YEAR);
        Self::with_years(first, current + years_ahead + 1)
    }

    pub fn years(&self) -> Range<u32> {
        self.years.clone()
    }

    fn year_start_ms(&self, year: u32) -> u64 {
        if self.years.contains(&year) {
            self.year_starts[(year - self.years.start) as usize]
        } else {
            days_before_year(year) * MS_PER_DAY
        }
    }

    /// Decode a `YYYY-MM-DDTHH:MM:SS.mmmZ` timestamp at the start of `ts`.
    ///
    /// Succeeds for any year from 1970 on, cached or not.
    pub fn read_timestamp(&self, ts: &[u8]) -> Result<u64, TimestampError> {
        if ts.len() < TIMESTAMP_LEN {
            return Err(TimestampError::Truncated {
                available: ts.len(),
            });
        }
        expect_byte(ts, 4, b'-')?;
        expect_byte(ts, 7, b'-')?;
        expect_byte(ts, 10, b'T')?;
        expect_byte(ts, 13, b':')?;
        expect_byte(ts, 16, b':')?;
        expect_byte(ts, 19, b'.')?;
        expect_byte(ts, 23, b'Z')?;

        let year = packed_digits(word4(ts, 0), 4, 0)?;
        let month = packed_digits(word2(ts, 5), 2, 5)?;
        let day = packed_digits(word2(ts, 8), 2, 8)?;
        let hour = packed_digits(word2(ts, 11), 2, 11)?;
        let minute = packed_digits(word2(ts, 14), 2, 14)?;
        let second = packed_digits(word2(ts, 17), 2, 17)?;
        // The 'Z' rides along in the top byte and is shifted out.
        let millis = packed_digits(word4(ts, 20), 3, 20)?;

        let year = check_range("year", year, EPOCH_YEAR..10_000)?;
        let month = check_range("month", month, 1..13)?;
        let day = check_range("day", day, 1..days_in_month(year, month) + 1)?;
        let hour = check_range("hour", hour, 0..24)?;
        let minute = check_range("minute", minute, 0..60)?;
        let second = check_range("second", second, 0..60)?;

        let days_in_year = u64::from(days_before_month(year, month) + day - 1);
        Ok(self.year_start_ms(year)
            + days_in_year * MS_PER_DAY
            + clock_millis(hour, minute, second, millis))
    }

    /// Render `millis` as `YYYY-MM-DD HH:MM:SS.mmm` into `dst`.
    ///
    /// Returns `false` and writes [`OUT_OF_RANGE_DATE`] when the day falls
    /// outside the cached window.
    pub fn write_date(&self, dst: &mut [u8; DATE_LEN], millis: u64) -> bool {
        let day_no = millis / MS_PER_DAY;
        let packed = day_no
            .checked_sub(self.base_day)
            .and_then(|index| self.days.get(index as usize));
        let Some(&packed) = packed else {
            tracing::error!(millis, years = ?self.years, "timestamp is out of the calendar window");
            dst.copy_from_slice(OUT_OF_RANGE_DATE);
            return false;
        };

        write_padded(&mut dst[0..4], packed >> 9);
        dst[4] = b'-';
        write_padded(&mut dst[5..7], packed & 0xf);
        dst[7] = b'-';
        write_padded(&mut dst[8..10], (packed >> 4) & 0x1f);
        dst[10] = b' ';

        let clock = (millis % MS_PER_DAY) as u32;
        let seconds = clock / 1000;
        write_padded(&mut dst[11..13], seconds / 3600);
        dst[13] = b':';
        write_padded(&mut dst[14..16], seconds % 3600 / 60);
        dst[16] = b':';
        write_padded(&mut dst[17..19], seconds % 60);
        dst[19] = b'.';
        write_padded(&mut dst[20..23], clock % 1000);
        true
    }
}

fn current_year() -> u32 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let day = millis / MS_PER_DAY;
    let mut year = EPOCH_YEAR;
    while days_before_year(year + 1) <= day {
        year += 1;
    }
    year
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calendar() -> Calendar {
        Calendar::with_years(1970, 2030).unwrap()
    }

    fn render(calendar: &Calendar, millis: u64) -> String {
        let mut out = [0u8; DATE_LEN];
        calendar.write_date(&mut out, millis);
        String::from_utf8(out.to_vec()).unwrap()
    }

    #[test]
    fn parse_zero_date() {
        assert_eq!(calendar().read_timestamp(b"1970-01-01T00:00:00.000Z"), Ok(0));
    }

    #[test]
    fn parse_clock_fields() {
        let cal = calendar();
        assert_eq!(cal.read_timestamp(b"1970-01-01T00:00:01.000Z"), Ok(1_000));
        assert_eq!(cal.read_timestamp(b"1970-01-01T00:01:00.000Z"), Ok(60_000));
        assert_eq!(cal.read_timestamp(b"1970-01-01T01:00:00.000Z"), Ok(3_600_000));
        assert_eq!(cal.read_timestamp(b"1970-01-01T00:00:00.003Z"), Ok(3));
        assert_eq!(cal.read_timestamp(b"1970-01-02T00:00:00.000Z"), Ok(MS_PER_DAY));
    }

    #[test]
    fn parse_known_dates() {
        let cal = calendar();
        assert_eq!(
            cal.read_timestamp(b"2013-10-23T10:15:34.906Z"),
            Ok(1_382_523_334_906)
        );
        assert_eq!(
            cal.read_timestamp(b"2016-02-29T23:59:59.999Z"),
            Ok(1_456_790_399_999)
        );
    }

    #[test]
    fn parse_outside_window_uses_arithmetic() {
        let narrow = Calendar::with_years(2020, 2022).unwrap();
        assert_eq!(
            narrow.read_timestamp(b"2024-12-31T00:00:00.000Z"),
            Ok(1_735_603_200_000)
        );
        assert_eq!(narrow.read_timestamp(b"1970-01-01T00:00:00.003Z"), Ok(3));
    }

    #[test]
    fn parse_ignores_trailing_bytes() {
        assert_eq!(calendar().read_timestamp(b"1970-01-01T00:00:01.000Z rest"), Ok(1_000));
    }

    #[test]
    fn parse_rejects_truncated() {
        assert_eq!(
            calendar().read_timestamp(b"1970-01-01T00:00"),
            Err(TimestampError::Truncated { available: 16 })
        );
    }

    #[test]
    fn parse_rejects_bad_separator() {
        assert_eq!(
            calendar().read_timestamp(b"1970-01-01 00:00:00.000Z"),
            Err(TimestampError::Malformed { offset: 10, found: b' ' })
        );
    }

    #[test]
    fn parse_rejects_non_digit() {
        assert_eq!(
            calendar().read_timestamp(b"19x0-01-01T00:00:00.000Z"),
            Err(TimestampError::Malformed { offset: 2, found: b'x' })
        );
    }

    #[test]
    fn parse_rejects_impossible_day() {
        assert_eq!(
            calendar().read_timestamp(b"2015-02-29T00:00:00.000Z"),
            Err(TimestampError::FieldOutOfRange { field: "day", value: 29 })
        );
    }

    #[test]
    fn format_epoch_and_clock() {
        let cal = calendar();
        assert_eq!(render(&cal, 0), "1970-01-01 00:00:00.000");
        assert_eq!(render(&cal, 1_000), "1970-01-01 00:00:01.000");
        assert_eq!(render(&cal, 10_000_000), "1970-01-01 02:46:40.000");
        assert_eq!(render(&cal, MS_PER_DAY), "1970-01-02 00:00:00.000");
    }

    #[test]
    fn format_month_and_leap_boundaries() {
        let cal = calendar();
        let at = |s: &[u8]| cal.read_timestamp(s).unwrap();
        assert_eq!(render(&cal, at(b"1973-02-28T00:00:00.000Z")), "1973-02-28 00:00:00.000");
        assert_eq!(render(&cal, at(b"1973-03-01T23:59:59.000Z")), "1973-03-01 23:59:59.000");
        assert_eq!(render(&cal, at(b"1976-02-29T23:00:00.000Z")), "1976-02-29 23:00:00.000");
        assert_eq!(render(&cal, at(b"2015-12-31T23:59:59.999Z")), "2015-12-31 23:59:59.999");
    }

    #[test]
    fn format_outside_window_writes_placeholder() {
        let narrow = Calendar::with_years(2020, 2022).unwrap();
        let mut out = [0u8; DATE_LEN];
        assert!(!narrow.write_date(&mut out, 0));
        assert_eq!(&out, OUT_OF_RANGE_DATE);
        assert!(!narrow.write_date(&mut out, 1_735_603_200_000));
        assert_eq!(&out, OUT_OF_RANGE_DATE);
    }

    #[test]
    fn padded_digits() {
        let mut two = [0u8; 2];
        write_padded(&mut two, 0);
        assert_eq!(&two, b"00");
        write_padded(&mut two, 9);
        assert_eq!(&two, b"09");
        write_padded(&mut two, 99);
        assert_eq!(&two, b"99");
        let mut three = [0u8; 3];
        write_padded(&mut three, 1);
        assert_eq!(&three, b"001");
        let mut four = [0u8; 4];
        write_padded(&mut four, 2017);
        assert_eq!(&four, b"2017");
    }

    #[test]
    fn year_window_validation() {
        assert!(Calendar::with_years(1969, 1980).is_err());
        assert!(Calendar::with_years(2000, 2000).is_err());
        let around = Calendar::around_now(3, 2).unwrap();
        assert_eq!(around.years().len(), 6);
    }

    #[test]
    fn days_before_year_counts_leap_days() {
        assert_eq!(days_before_year(1970), 0);
        assert_eq!(days_before_year(1971), 365);
        assert_eq!(days_before_year(1973), 365 * 3 + 1);
        assert_eq!(days_before_year(2001), 11_323);
    }
}
