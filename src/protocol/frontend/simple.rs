//! Simple query protocol.

use crate::protocol::codec::MessageBuilder;

/// Write a Query message. `query` may hold several `;`-separated statements.
pub fn write_query(buf: &mut Vec<u8>, query: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::QUERY);
    msg.write_cstr(query);
    msg.finish();
}

/// Write a CopyFail message, aborting a `COPY ... FROM STDIN` the server started.
pub fn write_copy_fail(buf: &mut Vec<u8>, reason: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::COPY_FAIL);
    msg.write_cstr(reason);
    msg.finish();
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    #[test]
    fn test_query_fixture() {
        let mut buf = Vec::new();
        write_query(&mut buf, "select * from links;");
        assert_eq!(STANDARD.encode(&buf), "UQAAABlzZWxlY3QgKiBmcm9tIGxpbmtzOwA=");
    }

    #[test]
    fn test_copy_fail() {
        let mut buf = Vec::new();
        write_copy_fail(&mut buf, "no");
        assert_eq!(buf, b"f\0\0\0\x07no\0");
    }
}
