//! Extended-query backend messages.
//!
//! ParseComplete, BindComplete, CloseComplete, NoData and PortalSuspended
//! carry no payload and are recognized by type byte alone.

use crate::error::{Error, Result};
use crate::protocol::codec::{read_i16, read_u32};
use crate::protocol::types::Oid;

/// ParameterDescription ('t'): parameter type OIDs of a prepared statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDescription {
    pub oids: Vec<Oid>,
}

impl ParameterDescription {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (count, mut data) = read_i16(payload)?;
        if count < 0 {
            return Err(Error::Protocol(format!(
                "ParameterDescription: negative parameter count {count}"
            )));
        }
        let mut oids = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (oid, rest) = read_u32(data)?;
            oids.push(oid);
            data = rest;
        }
        Ok(Self { oids })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::oid;

    #[test]
    fn test_parameter_description() {
        let mut payload = 2i16.to_be_bytes().to_vec();
        payload.extend_from_slice(&oid::VARCHAR.to_be_bytes());
        payload.extend_from_slice(&oid::INT8.to_be_bytes());

        let desc = ParameterDescription::parse(&payload).unwrap();
        assert_eq!(desc.oids, vec![oid::VARCHAR, oid::INT8]);

        assert!(ParameterDescription::parse(&payload[..6]).is_err());
    }
}
