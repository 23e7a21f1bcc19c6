//! Conversions from third-party types into [`ParameterValue`](crate::ParameterValue).
//!
//! Each module is behind its own cargo feature. All of them produce text,
//! since parameters are always bound in text format.

#[cfg(feature = "with-chrono")]
mod chrono;
#[cfg(feature = "with-rust-decimal")]
mod decimal;
#[cfg(feature = "with-time")]
mod time;
#[cfg(feature = "with-uuid")]
mod uuid;
