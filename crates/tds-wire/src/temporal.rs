//! Temporal value encodings.
//!
//! SQL Server temporal types travel as compact little-endian integers:
//!
//! - `DATE` and the date part of `DATETIME2`/`DATETIMEOFFSET` are a 3-byte
//!   count of days since 0001-01-01 (proleptic Gregorian).
//! - `TIME(s)` and the time parts are a variable-width count of
//!   `10^-s`-second units since midnight; the byte width depends on the
//!   scale.
//! - `DATETIME` is 4 bytes of days since 1900-01-01 plus 4 bytes of
//!   1/300-second ticks since midnight.
//! - `SMALLDATETIME` is a u16 day count plus a u16 minute count.
//! - `DATETIMEOFFSET` appends a signed 2-byte minutes offset; the day and
//!   time parts are UTC.
//!
//! The server's calendar is purely Gregorian over its whole range. Hosts
//! whose calendar switches from Julian to Gregorian in October 1582 read
//! pre-modern dates two days apart; [`cutover_extra_days`] probes the host
//! convention once and yields the correction to apply to days at or past
//! the cutover.

use std::sync::OnceLock;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::error::WireError;

/// Highest fractional-seconds scale any temporal type accepts.
pub const MAX_FRACTIONAL_SECONDS_SCALE: u8 = 7;

/// Byte width of the days-into-Common-Era field.
pub const DAYS_INTO_CE_LENGTH: usize = 3;

/// Days since 0001-01-01 of the last representable date, 9999-12-31.
pub const MAX_DAYS_INTO_CE: u32 = 3_652_058;

/// Days since 0001-01-01 of the Gregorian cutover date, 1582-10-15,
/// counted in the proleptic Gregorian calendar.
pub const GREGORIAN_CUTOVER_DAYS: u32 = 577_735;

/// Day count a hybrid Julian/Gregorian host assigns to 1582-10-15.
const HYBRID_CUTOVER_DAYS: i64 = 577_737;

/// Nanoseconds in a day.
const NANOS_PER_DAY: u64 = 24 * 3600 * 1_000_000_000;

/// Multipliers converting a scaled time value to 100ns units, by scale.
const SCALE_MULTIPLIERS: [u64; 8] = [10_000_000, 1_000_000, 100_000, 10_000, 1_000, 100, 10, 1];

/// Byte widths of the time field, by scale.
const TIME_LENGTHS: [usize; 8] = [3, 3, 3, 4, 4, 5, 5, 5];

/// Byte width of a `TIME(scale)` value.
#[must_use]
pub fn time_value_length(scale: u8) -> usize {
    TIME_LENGTHS[scale.min(MAX_FRACTIONAL_SECONDS_SCALE) as usize]
}

/// Byte width of a `DATETIME2(scale)` value.
#[must_use]
pub fn datetime2_value_length(scale: u8) -> usize {
    time_value_length(scale) + DAYS_INTO_CE_LENGTH
}

/// Byte width of a `DATETIMEOFFSET(scale)` value.
#[must_use]
pub fn datetimeoffset_value_length(scale: u8) -> usize {
    datetime2_value_length(scale) + 2
}

/// Decode a 3-byte little-endian days-into-CE field.
pub fn decode_days_into_ce(bytes: &[u8]) -> Result<u32, WireError> {
    if bytes.len() != DAYS_INTO_CE_LENGTH {
        return Err(WireError::Incomplete {
            expected: DAYS_INTO_CE_LENGTH,
            actual: bytes.len(),
        });
    }

    let days = u32::from(bytes[0]) | (u32::from(bytes[1]) << 8) | (u32::from(bytes[2]) << 16);
    if days > MAX_DAYS_INTO_CE {
        return Err(WireError::TemporalOutOfRange("days into Common Era"));
    }
    Ok(days)
}

/// Encode a days-into-CE count as 3 little-endian bytes.
#[must_use]
pub fn encode_days_into_ce(days: u32) -> [u8; DAYS_INTO_CE_LENGTH] {
    [days as u8, (days >> 8) as u8, (days >> 16) as u8]
}

/// Decode a scaled time field into nanoseconds since midnight.
///
/// The wire value counts `10^-scale` second units; it is widened to 100ns
/// units with the scale multiplier, range-checked against one day, and
/// finally expressed in nanoseconds.
pub fn decode_nanos_since_midnight(bytes: &[u8], scale: u8) -> Result<u64, WireError> {
    if scale > MAX_FRACTIONAL_SECONDS_SCALE {
        return Err(WireError::InvalidField {
            field: "time scale",
            value: u64::from(scale),
        });
    }
    let expected = time_value_length(scale);
    if bytes.len() != expected {
        return Err(WireError::Incomplete {
            expected,
            actual: bytes.len(),
        });
    }

    let mut hundred_nanos: u64 = 0;
    for (i, &b) in bytes.iter().enumerate() {
        hundred_nanos |= u64::from(b) << (8 * i);
    }
    hundred_nanos *= SCALE_MULTIPLIERS[scale as usize];

    if hundred_nanos >= NANOS_PER_DAY / 100 {
        return Err(WireError::TemporalOutOfRange("time since midnight"));
    }
    Ok(hundred_nanos * 100)
}

/// Encode nanoseconds since midnight at the given scale.
///
/// Sub-scale precision is truncated, matching the server's storage.
pub fn encode_nanos_since_midnight(nanos: u64, scale: u8) -> Result<Vec<u8>, WireError> {
    if scale > MAX_FRACTIONAL_SECONDS_SCALE {
        return Err(WireError::InvalidField {
            field: "time scale",
            value: u64::from(scale),
        });
    }
    if nanos >= NANOS_PER_DAY {
        return Err(WireError::TemporalOutOfRange("time since midnight"));
    }

    let scaled = (nanos / 100) / SCALE_MULTIPLIERS[scale as usize];
    let len = time_value_length(scale);
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        out.push((scaled >> (8 * i)) as u8);
    }
    Ok(out)
}

/// Extra days to add to server day counts at or past the Gregorian
/// cutover so they agree with the host calendar.
///
/// Probed once: if the host maps day 577737 (the hybrid-calendar count
/// for 1582-10-15) onto October 15th it follows the hybrid convention and
/// the correction is two days; a proleptic-Gregorian host needs none.
pub fn cutover_extra_days() -> u32 {
    static EXTRA: OnceLock<u32> = OnceLock::new();
    *EXTRA.get_or_init(|| {
        let base = NaiveDate::from_ymd_opt(1, 1, 1).unwrap_or(NaiveDate::MIN);
        let probed = base + chrono::Duration::days(HYBRID_CUTOVER_DAYS);
        if probed.year() == 1582 && probed.month() == 10 && probed.day() == 15 {
            2
        } else {
            0
        }
    })
}

/// Apply the cutover correction to a server day count.
#[must_use]
pub fn apply_cutover_adjustment(days: u32, extra_days: u32) -> u32 {
    if days >= GREGORIAN_CUTOVER_DAYS {
        days + extra_days
    } else {
        days
    }
}

/// Turn a server days-into-CE count into a calendar date.
pub fn date_from_days(days: u32) -> Result<NaiveDate, WireError> {
    let adjusted = apply_cutover_adjustment(days, cutover_extra_days());
    let base = NaiveDate::from_ymd_opt(1, 1, 1)
        .ok_or(WireError::TemporalOutOfRange("calendar base date"))?;
    base.checked_add_days(chrono::Days::new(u64::from(adjusted)))
        .ok_or(WireError::TemporalOutOfRange("days into Common Era"))
}

/// Turn a calendar date into the server days-into-CE count.
pub fn days_from_date(date: NaiveDate) -> Result<u32, WireError> {
    let base = NaiveDate::from_ymd_opt(1, 1, 1)
        .ok_or(WireError::TemporalOutOfRange("calendar base date"))?;
    let days = (date - base).num_days();
    let extra = i64::from(cutover_extra_days());
    let days = if days - extra >= i64::from(GREGORIAN_CUTOVER_DAYS) {
        days - extra
    } else {
        days
    };
    u32::try_from(days)
        .ok()
        .filter(|d| *d <= MAX_DAYS_INTO_CE)
        .ok_or(WireError::TemporalOutOfRange("days into Common Era"))
}

/// Time-of-day from nanoseconds since midnight.
pub fn time_from_nanos(nanos: u64) -> Result<NaiveTime, WireError> {
    let secs = (nanos / 1_000_000_000) as u32;
    let frac = (nanos % 1_000_000_000) as u32;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, frac)
        .ok_or(WireError::TemporalOutOfRange("time since midnight"))
}

/// Nanoseconds since midnight for a time-of-day.
#[must_use]
pub fn nanos_from_time(time: NaiveTime) -> u64 {
    u64::from(time.num_seconds_from_midnight()) * 1_000_000_000 + u64::from(time.nanosecond())
}

/// Decode the classic 8-byte `DATETIME`: days since 1900-01-01 plus
/// 1/300-second ticks since midnight.
///
/// Milliseconds are recovered as `(ticks * 10 + 1) / 3`, the rounding the
/// server itself applies.
pub fn datetime_from_parts(
    days_since_1900: i32,
    ticks_since_midnight: i32,
) -> Result<NaiveDateTime, WireError> {
    let base = NaiveDate::from_ymd_opt(1900, 1, 1)
        .ok_or(WireError::TemporalOutOfRange("datetime base date"))?;
    let date = base
        .checked_add_signed(chrono::Duration::days(i64::from(days_since_1900)))
        .ok_or(WireError::TemporalOutOfRange("datetime days"))?;

    let millis = (i64::from(ticks_since_midnight) * 10 + 1) / 3;
    if !(0..86_400_000).contains(&millis) {
        return Err(WireError::TemporalOutOfRange("datetime ticks"));
    }
    let time = NaiveTime::from_num_seconds_from_midnight_opt(
        (millis / 1000) as u32,
        ((millis % 1000) * 1_000_000) as u32,
    )
    .ok_or(WireError::TemporalOutOfRange("datetime ticks"))?;

    Ok(date.and_time(time))
}

/// Encode a datetime as the classic 8-byte parts, rounding the time of
/// day to the nearest 1/300 second.
pub fn datetime_to_parts(value: NaiveDateTime) -> Result<(i32, i32), WireError> {
    let base = NaiveDate::from_ymd_opt(1900, 1, 1)
        .ok_or(WireError::TemporalOutOfRange("datetime base date"))?;
    let days = i32::try_from((value.date() - base).num_days())
        .map_err(|_| WireError::TemporalOutOfRange("datetime days"))?;

    let nanos = nanos_from_time(value.time());
    // Round to the nearest tick (1 tick = 10^9/300 ns).
    let ticks = (u128::from(nanos) * 300 + 500_000_000) / 1_000_000_000;
    if ticks >= 300 * 86_400 {
        // Rounded past midnight; carry into the next day.
        return Ok((days + 1, 0));
    }
    Ok((days, ticks as i32))
}

/// Decode the 4-byte `SMALLDATETIME`: u16 days since 1900-01-01 plus u16
/// minutes since midnight.
pub fn smalldatetime_from_parts(days: u16, minutes: u16) -> Result<NaiveDateTime, WireError> {
    if minutes >= 1440 {
        return Err(WireError::TemporalOutOfRange("smalldatetime minutes"));
    }
    let base = NaiveDate::from_ymd_opt(1900, 1, 1)
        .ok_or(WireError::TemporalOutOfRange("datetime base date"))?;
    let date = base
        .checked_add_days(chrono::Days::new(u64::from(days)))
        .ok_or(WireError::TemporalOutOfRange("smalldatetime days"))?;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(u32::from(minutes) * 60, 0)
        .ok_or(WireError::TemporalOutOfRange("smalldatetime minutes"))?;
    Ok(date.and_time(time))
}

/// Encode a datetime as `SMALLDATETIME` parts, rounding to the nearest
/// minute.
pub fn smalldatetime_to_parts(value: NaiveDateTime) -> Result<(u16, u16), WireError> {
    let base = NaiveDate::from_ymd_opt(1900, 1, 1)
        .ok_or(WireError::TemporalOutOfRange("datetime base date"))?;
    let mut days = (value.date() - base).num_days();

    let secs = value.time().num_seconds_from_midnight();
    let mut minutes = (secs + 30) / 60;
    if minutes >= 1440 {
        minutes = 0;
        days += 1;
    }

    let days =
        u16::try_from(days).map_err(|_| WireError::TemporalOutOfRange("smalldatetime days"))?;
    Ok((days, minutes as u16))
}

/// Combine UTC day/time parts and a minutes offset into a fixed-offset
/// datetime, as carried by `DATETIMEOFFSET`.
pub fn datetimeoffset_from_parts(
    utc_days: u32,
    utc_nanos: u64,
    offset_minutes: i16,
) -> Result<DateTime<FixedOffset>, WireError> {
    let date = date_from_days(utc_days)?;
    let time = time_from_nanos(utc_nanos)?;
    let offset = FixedOffset::east_opt(i32::from(offset_minutes) * 60)
        .ok_or(WireError::TemporalOutOfRange("datetimeoffset offset"))?;

    let utc = date.and_time(time).and_utc();
    Ok(utc.with_timezone(&offset))
}

/// Split a fixed-offset datetime into UTC day/time parts and the minutes
/// offset.
pub fn datetimeoffset_to_parts(
    value: DateTime<FixedOffset>,
) -> Result<(u32, u64, i16), WireError> {
    let offset_minutes = i16::try_from(value.offset().local_minus_utc() / 60)
        .map_err(|_| WireError::TemporalOutOfRange("datetimeoffset offset"))?;
    let utc = value.naive_utc();
    Ok((
        days_from_date(utc.date())?,
        nanos_from_time(utc.time()),
        offset_minutes,
    ))
}
