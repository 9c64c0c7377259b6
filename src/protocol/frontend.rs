//! Frontend (client → server) messages.

use super::codec::MessageBuilder;
use super::Oid;

/// Protocol version 3.0 (0x00030000)
pub const PROTOCOL_VERSION_3_0: i32 = 196608;

/// Frontend message type bytes.
pub mod msg_type {
    pub const PARSE: u8 = b'P';
    pub const BIND: u8 = b'B';
    pub const DESCRIBE: u8 = b'D';
    pub const EXECUTE: u8 = b'E';
    pub const CLOSE: u8 = b'C';
    pub const SYNC: u8 = b'S';
    pub const TERMINATE: u8 = b'X';
    pub const PASSWORD: u8 = b'p';
    pub const SASL_INITIAL_RESPONSE: u8 = b'p';
    pub const SASL_RESPONSE: u8 = b'p';
}

/// Write a StartupMessage.
///
/// Parameters is a list of (name, value) pairs.
/// Required: "user" - database username
/// Optional: "database", "application_name", "client_encoding", etc.
pub fn write_startup(buf: &mut Vec<u8>, params: &[(&str, &str)]) {
    let mut msg = MessageBuilder::new_startup(buf);
    msg.write_i32(PROTOCOL_VERSION_3_0);
    for (name, value) in params {
        msg.write_cstr(name);
        msg.write_cstr(value);
    }
    // Terminator
    msg.write_u8(0);
    msg.finish();
}

/// Write a PasswordMessage (cleartext password authentication).
pub fn write_password(buf: &mut Vec<u8>, password: &str) {
    let mut msg = MessageBuilder::new(buf, msg_type::PASSWORD);
    msg.write_cstr(password);
    msg.finish();
}

/// Write a SASLInitialResponse message.
pub fn write_sasl_initial_response(buf: &mut Vec<u8>, mechanism: &str, initial: &[u8]) {
    let mut msg = MessageBuilder::new(buf, msg_type::SASL_INITIAL_RESPONSE);
    msg.write_cstr(mechanism);
    msg.write_i32(initial.len() as i32);
    msg.write_bytes(initial);
    msg.finish();
}

/// Write a SASLResponse message.
pub fn write_sasl_response(buf: &mut Vec<u8>, data: &[u8]) {
    let mut msg = MessageBuilder::new(buf, msg_type::SASL_RESPONSE);
    msg.write_bytes(data);
    msg.finish();
}

/// Write a Parse message to create a prepared statement.
///
/// - `name`: Statement name (empty string for unnamed statement)
/// - `query`: SQL query with $1, $2, ... placeholders
/// - `param_oids`: Parameter type OIDs (0 = let server infer)
pub fn write_parse(buf: &mut Vec<u8>, name: &str, query: &str, param_oids: &[Oid]) {
    let mut msg = MessageBuilder::new(buf, msg_type::PARSE);
    msg.write_cstr(name);
    msg.write_cstr(query);
    msg.write_i16(param_oids.len() as i16);
    for &oid in param_oids {
        msg.write_i32(oid as i32);
    }
    msg.finish();
}

/// Write a Bind message to create a portal from a prepared statement.
///
/// Parameters are transmitted in text format; `None` is NULL. Result
/// columns are requested in text format as well, which is what the type
/// registry decodes.
pub fn write_bind(buf: &mut Vec<u8>, portal: &str, statement: &str, params: &[Option<String>]) {
    let mut msg = MessageBuilder::new(buf, msg_type::BIND);

    msg.write_cstr(portal);
    msg.write_cstr(statement);

    // Parameter format codes: zero entries means all-text
    msg.write_i16(0);

    // Parameter values (count + length-prefixed data, -1 for NULL)
    msg.write_i16(params.len() as i16);
    for param in params {
        match param {
            Some(value) => {
                msg.write_i32(value.len() as i32);
                msg.write_bytes(value.as_bytes());
            }
            None => msg.write_i32(-1),
        }
    }

    // Result format codes: zero entries means all-text
    msg.write_i16(0);

    msg.finish();
}

/// Write a Describe message for a portal.
pub fn write_describe_portal(buf: &mut Vec<u8>, name: &str) {
    let mut msg = MessageBuilder::new(buf, msg_type::DESCRIBE);
    msg.write_u8(b'P');
    msg.write_cstr(name);
    msg.finish();
}

/// Write an Execute message to run a portal.
///
/// - `portal`: Portal name
/// - `max_rows`: Maximum number of rows to return (0 = unlimited)
pub fn write_execute(buf: &mut Vec<u8>, portal: &str, max_rows: u32) {
    let mut msg = MessageBuilder::new(buf, msg_type::EXECUTE);
    msg.write_cstr(portal);
    msg.write_i32(max_rows as i32);
    msg.finish();
}

/// Write a Close message for a statement (wire-level DEALLOCATE).
pub fn write_close_statement(buf: &mut Vec<u8>, name: &str) {
    let mut msg = MessageBuilder::new(buf, msg_type::CLOSE);
    msg.write_u8(b'S');
    msg.write_cstr(name);
    msg.finish();
}

/// Write a Sync message.
///
/// This ends an extended query sequence and causes:
/// - Implicit COMMIT if successful and not in explicit transaction
/// - Implicit ROLLBACK if failed and not in explicit transaction
/// - Server responds with ReadyForQuery
pub fn write_sync(buf: &mut Vec<u8>) {
    let msg = MessageBuilder::new(buf, msg_type::SYNC);
    msg.finish();
}

/// Write a Terminate message.
///
/// Sent to cleanly close the connection.
pub fn write_terminate(buf: &mut Vec<u8>) {
    let msg = MessageBuilder::new(buf, msg_type::TERMINATE);
    msg.finish();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup() {
        let mut buf = Vec::new();
        write_startup(&mut buf, &[("user", "postgres"), ("database", "test")]);

        // Check length is at start
        let len = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        assert_eq!(len as usize, buf.len());

        // Check protocol version
        let version = i32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        assert_eq!(version, PROTOCOL_VERSION_3_0);
    }

    #[test]
    fn test_parse() {
        let mut buf = Vec::new();
        write_parse(&mut buf, "ps_1", "SELECT $1::int", &[0]);

        assert_eq!(buf[0], b'P');
        let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        assert_eq!(len as usize, buf.len() - 1);
    }

    #[test]
    fn test_bind_text_params() {
        let mut buf = Vec::new();
        write_bind(&mut buf, "", "ps_1", &[Some("42".to_string()), None]);

        assert_eq!(buf[0], b'B');
        // portal "" + statement "ps_1" after the header
        assert_eq!(&buf[5..7], b"\0p");
        // param count is 2
        let tail = &buf[5 + 1 + 5 + 2..];
        assert_eq!(&tail[..2], &2_i16.to_be_bytes());
        // first value is "42", second is NULL (-1)
        assert_eq!(&tail[2..6], &2_i32.to_be_bytes());
        assert_eq!(&tail[6..8], b"42");
        assert_eq!(&tail[8..12], &(-1_i32).to_be_bytes());
    }

    #[test]
    fn test_sync() {
        let mut buf = Vec::new();
        write_sync(&mut buf);

        assert_eq!(buf.len(), 5);
        assert_eq!(buf[0], b'S');
        assert_eq!(&buf[1..5], &4_i32.to_be_bytes());
    }

    #[test]
    fn test_execute() {
        let mut buf = Vec::new();
        write_execute(&mut buf, "", 0);

        assert_eq!(buf[0], b'E');
        // Length: 4 + 1 (empty string + null) + 4 (max_rows) = 9
        let len = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        assert_eq!(len, 9);
    }

    #[test]
    fn test_close_statement() {
        let mut buf = Vec::new();
        write_close_statement(&mut buf, "ps_3");

        assert_eq!(buf[0], b'C');
        assert_eq!(buf[5], b'S');
        assert_eq!(&buf[6..10], b"ps_3");
    }
}
