//! CopyInResponse / CopyOutResponse headers.
//!
//! COPY is not driven by this client. The header is parsed only so the
//! event can be logged before the message is skipped.

use crate::error::Result;
use crate::protocol::codec::{read_i16, read_u8};
use crate::protocol::types::FormatCode;

/// Header shared by CopyInResponse ('G') and CopyOutResponse ('H').
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyResponse {
    pub format: FormatCode,
    pub columns: usize,
}

impl CopyResponse {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (format, rest) = read_u8(payload)?;
        let (columns, _) = read_i16(rest)?;
        Ok(Self {
            format: FormatCode::from_u16(format as u16),
            columns: columns.max(0) as usize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_response_header() {
        let payload = [0u8, 0, 2, 0, 0, 0, 0];
        let header = CopyResponse::parse(&payload).unwrap();
        assert_eq!(header.format, FormatCode::Text);
        assert_eq!(header.columns, 2);
    }
}
