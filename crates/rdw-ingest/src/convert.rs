//! Field conversion from raw CSV text to typed values
//!
//! Empty text always converts to the kind's default. Beyond that, the policy
//! depends on the kind:
//!
//! | Kind | Empty | Malformed |
//! |------|-------|-----------|
//! | compact date `YYYYMMDD` | 1970-01-01 | fatal error |
//! | timestamp `YYYY-MM-DDTHH:MM:SS.mmm` | 1970-01-01T00:00:00 | fatal error |
//! | decimal | 0.0 | logged, 0.0 |
//! | integer | 0 | logged, 0 |
//! | decimal integer (`"1250.0"`) | 0 | logged, 0 |
//!
//! A date that does not parse usually means the columns of the row have
//! shifted, so nothing after it can be trusted. Numeric columns are optional
//! vehicle attributes; a default keeps the load going.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use thiserror::Error;
use tracing::warn;

/// Date used for empty date and timestamp fields
pub fn epoch_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

/// Timestamp used for empty timestamp fields
pub fn epoch_timestamp() -> NaiveDateTime {
    epoch_date().and_time(NaiveTime::MIN)
}

/// A date or timestamp that does not match its fixed layout
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("malformed date '{0}'")]
    Date(String),

    #[error("malformed timestamp '{0}'")]
    Timestamp(String),
}

/// Where a value came from, for log lines
#[derive(Debug, Clone, Copy)]
pub(crate) struct FieldAt<'a> {
    pub record: u64,
    pub column: &'a str,
}

/// Parse an RDW compact date (`20240315`).
pub fn parse_compact_date(s: &str) -> Result<NaiveDate, ConversionError> {
    if s.is_empty() {
        return Ok(epoch_date());
    }

    let malformed = || ConversionError::Date(s.to_string());
    if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }

    let year = digits(&s[0..4]).ok_or_else(malformed)?;
    let month = digits(&s[4..6]).ok_or_else(malformed)?;
    let day = digits(&s[6..8]).ok_or_else(malformed)?;

    NaiveDate::from_ymd_opt(year as i32, month, day).ok_or_else(malformed)
}

/// Parse an ISO-8601 timestamp with millisecond precision
/// (`2024-03-15T00:00:00.000`), as used by the `*_dt` export columns.
pub fn parse_timestamp(s: &str) -> Result<NaiveDateTime, ConversionError> {
    if s.is_empty() {
        return Ok(epoch_timestamp());
    }

    let malformed = || ConversionError::Timestamp(s.to_string());
    let bytes = s.as_bytes();
    if bytes.len() != 23 {
        return Err(malformed());
    }

    let layout_ok = bytes.iter().enumerate().all(|(i, &b)| match i {
        4 | 7 => b == b'-',
        10 => b == b'T',
        13 | 16 => b == b':',
        19 => b == b'.',
        _ => b.is_ascii_digit(),
    });
    if !layout_ok {
        return Err(malformed());
    }

    let field = |range: std::ops::Range<usize>| digits(&s[range]).ok_or_else(malformed);
    let date = NaiveDate::from_ymd_opt(field(0..4)? as i32, field(5..7)?, field(8..10)?)
        .ok_or_else(malformed)?;
    let time = NaiveTime::from_hms_milli_opt(
        field(11..13)?,
        field(14..16)?,
        field(17..19)?,
        field(20..23)?,
    )
    .ok_or_else(malformed)?;

    Ok(date.and_time(time))
}

/// Parse a floating-point value; unparsable text is logged and becomes 0.0.
pub fn parse_decimal(s: &str) -> f64 {
    decimal(s, None)
}

/// Parse an integer; unparsable text is logged and becomes 0.
pub fn parse_integer(s: &str) -> i64 {
    integer(s, None)
}

/// Parse a decimal and truncate it toward zero (`"1250.75"` -> 1250).
/// Unparsable or non-finite text is logged and becomes 0.
pub fn parse_decimal_integer(s: &str) -> i64 {
    decimal_integer(s, None)
}

pub(crate) fn decimal(s: &str, at: Option<FieldAt<'_>>) -> f64 {
    if s.is_empty() {
        return 0.0;
    }
    match s.parse::<f64>() {
        Ok(value) => value,
        Err(err) => {
            log_fallback(s, at, "decimal", &err);
            0.0
        }
    }
}

pub(crate) fn integer(s: &str, at: Option<FieldAt<'_>>) -> i64 {
    if s.is_empty() {
        return 0;
    }
    match s.parse::<i64>() {
        Ok(value) => value,
        Err(err) => {
            log_fallback(s, at, "integer", &err);
            0
        }
    }
}

pub(crate) fn decimal_integer(s: &str, at: Option<FieldAt<'_>>) -> i64 {
    if s.is_empty() {
        return 0;
    }
    match s.parse::<f64>() {
        Ok(value) if value.is_finite() => value.trunc() as i64,
        Ok(_) => {
            log_fallback(s, at, "decimal integer", &"value is not finite");
            0
        }
        Err(err) => {
            log_fallback(s, at, "decimal integer", &err);
            0
        }
    }
}

fn log_fallback(value: &str, at: Option<FieldAt<'_>>, kind: &str, err: &dyn std::fmt::Display) {
    warn!(
        record = at.map(|a| a.record),
        column = at.map(|a| a.column),
        value,
        kind,
        error = %err,
        "Unparsable numeric field, using 0"
    );
}

fn digits(s: &str) -> Option<u32> {
    s.parse().ok()
}
