//! `time::OffsetDateTime` as a `timestamptz` parameter.

use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

use crate::error::Error;
use crate::value::ParameterValue;

const TIMESTAMPTZ: &[BorrowedFormatItem<'static>] = format_description!(
    "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:6][offset_hour sign:mandatory]:[offset_minute]"
);

impl TryFrom<OffsetDateTime> for ParameterValue {
    type Error = Error;

    fn try_from(value: OffsetDateTime) -> Result<Self, Self::Error> {
        value
            .format(TIMESTAMPTZ)
            .map(Self::TimestampZ)
            .map_err(|e| Error::InvalidUsage(format!("cannot format timestamp: {e}")))
    }
}
