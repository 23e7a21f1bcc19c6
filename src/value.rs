//! Bind parameter values.

use std::borrow::Cow;

use crate::protocol::codec::{write_bytes, write_i32};
use crate::protocol::types::{Oid, oid};

/// A value bound to a `$n` placeholder.
///
/// Every variant is sent in text format. The variant decides how the text is
/// produced and which type OID [`ParameterValue::oid`] suggests for `Parse`.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    Text(String),
    Integer(i32),
    SmallInt(i16),
    VarChar(String),
    /// Timestamp with time zone, in any form the server's `timestamptz` input accepts
    TimestampZ(String),
    /// Decimal literal text (`"12.50"`, `"NaN"`, ...)
    Numeric(String),
    Boolean(bool),
    /// Hyphenated UUID text
    Uuid(String),
    /// SQL NULL, sent with length -1
    Null,
}

impl ParameterValue {
    /// Type OID matching the variant; 0 lets the server infer it.
    pub fn oid(&self) -> Oid {
        match self {
            Self::Text(_) => oid::TEXT,
            Self::Integer(_) => oid::INT4,
            Self::SmallInt(_) => oid::INT2,
            Self::VarChar(_) => oid::VARCHAR,
            Self::TimestampZ(_) => oid::TIMESTAMPTZ,
            Self::Numeric(_) => oid::NUMERIC,
            Self::Boolean(_) => oid::BOOL,
            Self::Uuid(_) => oid::UUID,
            Self::Null => 0,
        }
    }

    /// Text form sent on the wire, `None` for NULL.
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Self::Text(s)
            | Self::VarChar(s)
            | Self::TimestampZ(s)
            | Self::Numeric(s)
            | Self::Uuid(s) => Some(Cow::Borrowed(s)),
            Self::Integer(v) => Some(Cow::Owned(v.to_string())),
            Self::SmallInt(v) => Some(Cow::Owned(v.to_string())),
            Self::Boolean(true) => Some(Cow::Borrowed("t")),
            Self::Boolean(false) => Some(Cow::Borrowed("f")),
            Self::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Append the Bind encoding: int32 length then the bytes, or -1 for NULL.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self.as_text() {
            Some(text) => {
                write_i32(buf, text.len() as i32);
                write_bytes(buf, text.as_bytes());
            }
            None => write_i32(buf, -1),
        }
    }
}

impl From<&str> for ParameterValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i32> for ParameterValue {
    fn from(value: i32) -> Self {
        Self::Integer(value)
    }
}

impl From<i16> for ParameterValue {
    fn from(value: i16) -> Self {
        Self::SmallInt(value)
    }
}

impl From<bool> for ParameterValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<f64> for ParameterValue {
    fn from(value: f64) -> Self {
        let text = if value.is_nan() {
            "NaN".to_string()
        } else if value.is_infinite() {
            if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
        } else {
            value.to_string()
        };
        Self::Numeric(text)
    }
}

impl<T: Into<ParameterValue>> From<Option<T>> for ParameterValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}
