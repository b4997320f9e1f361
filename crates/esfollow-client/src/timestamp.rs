//! Parsing of document timestamps as they appear on the wire.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use std::fmt;

/// Naive layouts accepted after RFC 3339 has been ruled out
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Layouts carrying a numeric offset, with or without a colon
const ZONED_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"];

/// Trailing zone designators that mean UTC
const UTC_SUFFIXES: &[&str] = &["UTC", "GMT", "Z"];

/// A timestamp as found in a document, with or without zone information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawTimestamp {
    Zoned(DateTime<FixedOffset>),
    Naive(NaiveDateTime),
}

impl RawTimestamp {
    /// Parse a timestamp string.
    ///
    /// Accepts RFC 3339, datetimes with a `+hhmm` offset, naive ISO-like
    /// datetimes (optionally followed by a `Z`, `UTC` or `GMT` designator)
    /// down to hour precision, and bare dates.
    pub fn parse(input: &str) -> Result<Self, TimestampError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(TimestampError::new(input, "empty timestamp"));
        }

        if let Ok(zoned) = DateTime::parse_from_rfc3339(input) {
            return Ok(RawTimestamp::Zoned(zoned));
        }

        if let Some(zoned) = ZONED_FORMATS
            .iter()
            .find_map(|fmt| DateTime::parse_from_str(input, fmt).ok())
        {
            return Ok(RawTimestamp::Zoned(zoned));
        }

        for suffix in UTC_SUFFIXES {
            if let Some(stripped) = input.strip_suffix(suffix) {
                if let Some(naive) = parse_naive(stripped.trim_end()) {
                    return Ok(RawTimestamp::Zoned(Utc.from_utc_datetime(&naive).fixed_offset()));
                }
            }
        }

        parse_naive(input)
            .map(RawTimestamp::Naive)
            .ok_or_else(|| TimestampError::new(input, "unrecognized format"))
    }

    /// Parse a JSON value: a timestamp string or integer epoch milliseconds
    pub fn from_value(value: &Value) -> Result<Self, TimestampError> {
        match value {
            Value::String(s) => Self::parse(s),
            Value::Number(n) => n
                .as_i64()
                .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
                .map(|dt| RawTimestamp::Zoned(dt.fixed_offset()))
                .ok_or_else(|| TimestampError::new(n.to_string(), "epoch millis out of range")),
            other => Err(TimestampError::new(other.to_string(), "not a string or number")),
        }
    }

    /// True when the source carried zone information
    pub fn has_zone(&self) -> bool {
        matches!(self, RawTimestamp::Zoned(_))
    }

    /// Attach UTC to naive values, leaving the wall-clock fields unchanged
    pub fn normalize(self) -> DateTime<FixedOffset> {
        match self {
            RawTimestamp::Zoned(zoned) => zoned,
            RawTimestamp::Naive(naive) => Utc.from_utc_datetime(&naive).fixed_offset(),
        }
    }

    /// Milliseconds since the epoch, naive values taken as UTC
    pub fn timestamp_millis(self) -> i64 {
        self.normalize().timestamp_millis()
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for RawTimestamp {
    fn from(dt: DateTime<Tz>) -> Self {
        RawTimestamp::Zoned(dt.fixed_offset())
    }
}

impl From<NaiveDateTime> for RawTimestamp {
    fn from(naive: NaiveDateTime) -> Self {
        RawTimestamp::Naive(naive)
    }
}

fn parse_naive(input: &str) -> Option<NaiveDateTime> {
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
        .or_else(|| parse_hour(input))
        .or_else(|| {
            NaiveDate::parse_from_str(input, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

/// `2019-01-01T10`; chrono's datetime parser wants at least a minute
fn parse_hour(input: &str) -> Option<NaiveDateTime> {
    let (date, hour) = input.split_once(['T', ' '])?;
    if hour.len() != 2 || !hour.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    date.and_hms_opt(hour.parse().ok()?, 0, 0)
}

/// A timestamp that could not be parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampError {
    pub input: String,
    pub reason: &'static str,
}

impl TimestampError {
    fn new(input: impl Into<String>, reason: &'static str) -> Self {
        Self {
            input: input.into(),
            reason,
        }
    }
}

impl fmt::Display for TimestampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot parse '{}': {}", self.input, self.reason)
    }
}

impl std::error::Error for TimestampError {}
