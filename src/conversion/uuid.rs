//! `uuid::Uuid` parameters.

use crate::value::ParameterValue;

impl From<uuid::Uuid> for ParameterValue {
    fn from(value: uuid::Uuid) -> Self {
        Self::Uuid(value.hyphenated().to_string())
    }
}
