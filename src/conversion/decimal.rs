//! `rust_decimal::Decimal` as a `numeric` parameter.

use rust_decimal::Decimal;

use crate::value::ParameterValue;

impl From<Decimal> for ParameterValue {
    fn from(value: Decimal) -> Self {
        Self::Numeric(value.to_string())
    }
}
