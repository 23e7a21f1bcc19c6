//! Extended query protocol messages.

use crate::error::{Error, Result};
use crate::protocol::codec::MessageBuilder;
use crate::protocol::types::{FormatCode, Oid};
use crate::value::ParameterValue;

use super::target;

/// Largest parameter count a Parse or Bind message can carry.
pub const MAX_PARAMETERS: usize = u16::MAX as usize;

/// Counts are Int16 on the wire and the server reads them unsigned.
fn parameter_count(len: usize, what: &str) -> Result<i16> {
    u16::try_from(len)
        .map(|count| count as i16)
        .map_err(|_| {
            Error::InvalidUsage(format!(
                "{what}: {len} parameters exceed the limit of {MAX_PARAMETERS}"
            ))
        })
}

/// Write a Parse message.
///
/// An empty `name` is the unnamed statement. An OID of 0 leaves the
/// parameter type to the server. Nothing is written if there are more
/// than [`MAX_PARAMETERS`] OIDs.
pub fn write_parse(buf: &mut Vec<u8>, name: &str, query: &str, param_oids: &[Oid]) -> Result<()> {
    let count = parameter_count(param_oids.len(), "Parse")?;
    let mut msg = MessageBuilder::new(buf, super::msg_type::PARSE);
    msg.write_cstr(name);
    msg.write_cstr(query);
    msg.write_i16(count);
    for &oid in param_oids {
        msg.write_u32(oid);
    }
    msg.finish();
    Ok(())
}

/// Write a Bind message.
///
/// Every parameter is declared text format. The result-format count is 0,
/// so all result columns come back as text.
pub fn write_bind(
    buf: &mut Vec<u8>,
    portal: &str,
    statement: &str,
    params: &[ParameterValue],
) -> Result<()> {
    let count = parameter_count(params.len(), "Bind")?;
    let mut msg = MessageBuilder::new(buf, super::msg_type::BIND);
    msg.write_cstr(portal);
    msg.write_cstr(statement);

    msg.write_i16(count);
    for _ in params {
        msg.write_i16(FormatCode::Text as i16);
    }

    msg.write_i16(count);
    for param in params {
        param.encode(msg.buf());
    }

    msg.write_i16(0);
    msg.finish();
    Ok(())
}

/// Write an Execute message. `max_rows == 0` means no limit.
pub fn write_execute(buf: &mut Vec<u8>, portal: &str, max_rows: u32) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::EXECUTE);
    msg.write_cstr(portal);
    msg.write_u32(max_rows);
    msg.finish();
}

fn write_targeted(buf: &mut Vec<u8>, type_byte: u8, kind: u8, name: &str) {
    let mut msg = MessageBuilder::new(buf, type_byte);
    msg.write_u8(kind);
    msg.write_cstr(name);
    msg.finish();
}

pub fn write_describe_statement(buf: &mut Vec<u8>, name: &str) {
    write_targeted(buf, super::msg_type::DESCRIBE, target::STATEMENT, name);
}

pub fn write_describe_portal(buf: &mut Vec<u8>, name: &str) {
    write_targeted(buf, super::msg_type::DESCRIBE, target::PORTAL, name);
}

pub fn write_close_statement(buf: &mut Vec<u8>, name: &str) {
    write_targeted(buf, super::msg_type::CLOSE, target::STATEMENT, name);
}

pub fn write_close_portal(buf: &mut Vec<u8>, name: &str) {
    write_targeted(buf, super::msg_type::CLOSE, target::PORTAL, name);
}

/// Write a Sync message. The server answers with ReadyForQuery.
pub fn write_sync(buf: &mut Vec<u8>) {
    MessageBuilder::new(buf, super::msg_type::SYNC).finish();
}

/// Write a Flush message: deliver pending output without ending the sequence.
pub fn write_flush(buf: &mut Vec<u8>) {
    MessageBuilder::new(buf, super::msg_type::FLUSH).finish();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::oid;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    #[test]
    fn test_parse_fixture() {
        let mut buf = Vec::new();
        write_parse(
            &mut buf,
            "",
            "select table_name, table_type from information_schema.tables where table_name = $1 and table_type = $2",
            &[oid::VARCHAR, oid::VARCHAR],
        )
        .unwrap();
        assert_eq!(
            STANDARD.encode(&buf),
            "UAAAAHYAc2VsZWN0IHRhYmxlX25hbWUsIHRhYmxlX3R5cGUgZnJvbSBpbmZvcm1hdGlvbl9zY2hlbWEudGFibGVzIHdoZXJlIHRhYmxlX25hbWUgPSAkMSBhbmQgdGFibGVfdHlwZSA9ICQyAAACAAAEEwAABBM="
        );
    }

    #[test]
    fn test_bind_fixture() {
        let mut buf = Vec::new();
        write_bind(
            &mut buf,
            "",
            "",
            &[
                ParameterValue::VarChar("pg_class".into()),
                ParameterValue::VarChar("hello".into()),
            ],
        )
        .unwrap();
        assert_eq!(
            STANDARD.encode(&buf),
            "QgAAACUAAAACAAAAAAACAAAACHBnX2NsYXNzAAAABWhlbGxvAAA="
        );
    }

    #[test]
    fn test_bind_null_parameter() {
        let mut buf = Vec::new();
        write_bind(&mut buf, "p1", "s1", &[ParameterValue::Null]).unwrap();
        assert_eq!(
            buf,
            b"B\0\0\0\x16p1\0s1\0\0\x01\0\0\0\x01\xff\xff\xff\xff\0\0"
        );
    }

    #[test]
    fn test_parameter_count_limit() {
        let mut buf = Vec::new();
        let params = vec![ParameterValue::Null; MAX_PARAMETERS];
        write_bind(&mut buf, "", "", &params).unwrap();
        // Both counts read back as 65535 when taken unsigned
        assert_eq!(&buf[7..9], &[0xff, 0xff]);

        buf.clear();
        let params = vec![ParameterValue::Null; 70_000];
        assert!(matches!(
            write_bind(&mut buf, "", "", &params),
            Err(Error::InvalidUsage(_))
        ));
        let oids = vec![oid::INT4; 70_000];
        assert!(matches!(
            write_parse(&mut buf, "", "select 1", &oids),
            Err(Error::InvalidUsage(_))
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_execute_describe_close() {
        let mut buf = Vec::new();
        write_execute(&mut buf, "", 0);
        assert_eq!(buf, b"E\0\0\0\x09\0\0\0\0\0");

        buf.clear();
        write_describe_statement(&mut buf, "s1");
        assert_eq!(buf, b"D\0\0\0\x08Ss1\0");

        buf.clear();
        write_close_portal(&mut buf, "");
        assert_eq!(buf, b"C\0\0\0\x06P\0");
    }

    #[test]
    fn test_sync_and_flush() {
        let mut buf = Vec::new();
        write_sync(&mut buf);
        write_flush(&mut buf);
        assert_eq!(buf, [b'S', 0, 0, 0, 4, b'H', 0, 0, 0, 4]);
    }
}
