//! Chrono timestamps as `timestamptz` parameters.

use chrono::{DateTime, NaiveDateTime, TimeZone};

use crate::value::ParameterValue;

const NAIVE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

impl<Tz: TimeZone> From<DateTime<Tz>> for ParameterValue
where
    Tz::Offset: std::fmt::Display,
{
    fn from(value: DateTime<Tz>) -> Self {
        Self::TimestampZ(value.to_rfc3339())
    }
}

/// Sent without an offset; the server applies the session `TimeZone`.
impl From<NaiveDateTime> for ParameterValue {
    fn from(value: NaiveDateTime) -> Self {
        Self::TimestampZ(value.format(NAIVE_FORMAT).to_string())
    }
}
