//! Backend (server → client) messages.

use crate::error::{Error, Result, ServerErrorFields};

use super::codec::{read_cstr, read_i16, read_i32, read_u16, read_u32};
use super::{Oid, TransactionStatus};

/// Backend message type bytes.
pub mod msg_type {
    /// Authentication message
    pub const AUTHENTICATION: u8 = b'R';
    /// BackendKeyData
    pub const BACKEND_KEY_DATA: u8 = b'K';
    /// ParameterStatus
    pub const PARAMETER_STATUS: u8 = b'S';
    /// ReadyForQuery
    pub const READY_FOR_QUERY: u8 = b'Z';
    /// RowDescription
    pub const ROW_DESCRIPTION: u8 = b'T';
    /// DataRow
    pub const DATA_ROW: u8 = b'D';
    /// CommandComplete
    pub const COMMAND_COMPLETE: u8 = b'C';
    /// EmptyQueryResponse
    pub const EMPTY_QUERY_RESPONSE: u8 = b'I';
    /// ErrorResponse
    pub const ERROR_RESPONSE: u8 = b'E';
    /// NoticeResponse
    pub const NOTICE_RESPONSE: u8 = b'N';
    /// NotificationResponse
    pub const NOTIFICATION_RESPONSE: u8 = b'A';
    /// ParseComplete
    pub const PARSE_COMPLETE: u8 = b'1';
    /// BindComplete
    pub const BIND_COMPLETE: u8 = b'2';
    /// CloseComplete
    pub const CLOSE_COMPLETE: u8 = b'3';
    /// ParameterDescription
    pub const PARAMETER_DESCRIPTION: u8 = b't';
    /// NoData
    pub const NO_DATA: u8 = b'n';
    /// PortalSuspended
    pub const PORTAL_SUSPENDED: u8 = b's';
}

/// Check if a type byte represents an async message (can arrive at any time).
pub fn is_async_type(type_byte: u8) -> bool {
    matches!(
        type_byte,
        msg_type::NOTICE_RESPONSE | msg_type::NOTIFICATION_RESPONSE | msg_type::PARAMETER_STATUS
    )
}

/// Authentication request variants the client handles.
#[derive(Debug, Clone)]
pub enum AuthRequest {
    Ok,
    CleartextPassword,
    /// SASL with the advertised mechanism names.
    Sasl(Vec<String>),
    /// SASL challenge payload.
    SaslContinue(Vec<u8>),
    /// SASL final payload (server signature).
    SaslFinal(Vec<u8>),
    /// An authentication code this client does not implement.
    Unsupported(i32),
}

impl AuthRequest {
    /// Parse an Authentication message payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (code, rest) = read_i32(payload)?;
        Ok(match code {
            0 => AuthRequest::Ok,
            3 => AuthRequest::CleartextPassword,
            10 => {
                let mut mechanisms = Vec::new();
                let mut data = rest;
                while !data.is_empty() && data[0] != 0 {
                    let (name, next) = read_cstr(data)?;
                    mechanisms.push(name.to_string());
                    data = next;
                }
                AuthRequest::Sasl(mechanisms)
            }
            11 => AuthRequest::SaslContinue(rest.to_vec()),
            12 => AuthRequest::SaslFinal(rest.to_vec()),
            other => AuthRequest::Unsupported(other),
        })
    }
}

/// BackendKeyData message - pid and secret key for query cancellation.
#[derive(Debug, Clone, Copy)]
pub struct BackendKeyData {
    pub pid: u32,
    pub secret_key: u32,
}

impl BackendKeyData {
    /// Parse a BackendKeyData message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (pid, rest) = read_u32(payload)?;
        let (secret_key, _) = read_u32(rest)?;
        Ok(Self { pid, secret_key })
    }
}

/// ParameterStatus message - a server parameter value.
#[derive(Debug, Clone)]
pub struct ParameterStatus {
    pub name: String,
    pub value: String,
}

impl ParameterStatus {
    /// Parse a ParameterStatus message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (name, rest) = read_cstr(payload)?;
        let (value, _) = read_cstr(rest)?;
        Ok(Self {
            name: name.to_string(),
            value: value.to_string(),
        })
    }
}

/// Parse a ReadyForQuery payload into the transaction status it carries.
pub fn parse_ready_for_query(payload: &[u8]) -> Result<TransactionStatus> {
    let byte = *payload
        .first()
        .ok_or_else(|| Error::Protocol("ReadyForQuery: empty payload".into()))?;
    TransactionStatus::from_byte(byte)
        .ok_or_else(|| Error::Protocol(format!("ReadyForQuery: unknown status '{}'", byte as char)))
}

/// One column of a result set, as described by RowDescription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDesc {
    /// Field name
    pub name: String,
    /// Data type OID
    pub type_oid: Oid,
    /// Type modifier (type-specific)
    pub type_modifier: i32,
}

/// Parse a RowDescription payload into owned column descriptions.
///
/// The adapter materializes whole result sets, so borrowing from the read
/// buffer buys nothing here.
pub fn parse_row_description(payload: &[u8]) -> Result<Vec<ColumnDesc>> {
    let (num_fields, mut data) = read_u16(payload)?;
    let mut columns = Vec::with_capacity(num_fields as usize);

    for _ in 0..num_fields {
        let (name, rest) = read_cstr(data)?;
        let (_table_oid, rest) = read_u32(rest)?;
        let (_column_id, rest) = read_i16(rest)?;
        let (type_oid, rest) = read_u32(rest)?;
        let (_type_size, rest) = read_i16(rest)?;
        let (type_modifier, rest) = read_i32(rest)?;
        let (_format_code, rest) = read_u16(rest)?;

        columns.push(ColumnDesc {
            name: name.to_string(),
            type_oid,
            type_modifier,
        });

        data = rest;
    }

    Ok(columns)
}

/// Parse a DataRow payload into text-format column values (None = NULL).
pub fn parse_data_row(payload: &[u8]) -> Result<Vec<Option<String>>> {
    let (num_columns, mut data) = read_u16(payload)?;
    let mut values = Vec::with_capacity(num_columns as usize);

    for _ in 0..num_columns {
        let (len, rest) = read_i32(data)?;
        if len == -1 {
            values.push(None);
            data = rest;
            continue;
        }
        let len = len as usize;
        if rest.len() < len {
            return Err(Error::Protocol(format!(
                "DataRow: value length {} exceeds payload",
                len
            )));
        }
        let text = std::str::from_utf8(&rest[..len])
            .map_err(|e| Error::Protocol(format!("DataRow: invalid UTF-8: {e}")))?;
        values.push(Some(text.to_string()));
        data = &rest[len..];
    }

    Ok(values)
}

/// Parse the number of rows affected from a CommandComplete tag.
///
/// Tags look like "SELECT 5", "INSERT 0 1", "UPDATE 10", "DELETE 3".
/// Returns 0 for commands without a count (e.g. "BEGIN", "PREPARE").
pub fn parse_command_tag(payload: &[u8]) -> Result<u64> {
    let (tag, _) = read_cstr(payload)?;
    let parts: Vec<&str> = tag.split_whitespace().collect();

    let count = match parts.as_slice() {
        ["SELECT", count] => count.parse().ok(),
        ["INSERT", _oid, count] => count.parse().ok(),
        ["UPDATE", count] => count.parse().ok(),
        ["DELETE", count] => count.parse().ok(),
        ["COPY", count] => count.parse().ok(),
        ["MOVE", count] => count.parse().ok(),
        ["FETCH", count] => count.parse().ok(),
        _ => None,
    };

    Ok(count.unwrap_or(0))
}

/// Parse error/notice fields from an ErrorResponse or NoticeResponse payload.
pub fn parse_error_fields(payload: &[u8]) -> Result<ServerErrorFields> {
    let mut fields = ServerErrorFields::default();
    let mut data = payload;

    while !data.is_empty() && data[0] != 0 {
        let field_type = data[0];
        let (value, rest) = read_cstr(&data[1..])?;
        data = rest;

        match field_type {
            b'S' => fields.severity = Some(value.to_string()),
            b'C' => fields.code = Some(value.to_string()),
            b'M' => fields.message = Some(value.to_string()),
            b'D' => fields.detail = Some(value.to_string()),
            b'H' => fields.hint = Some(value.to_string()),
            b'P' => fields.position = value.parse().ok(),
            b's' => fields.schema = Some(value.to_string()),
            b't' => fields.table = Some(value.to_string()),
            b'c' => fields.column = Some(value.to_string()),
            b'n' => fields.constraint = Some(value.to_string()),
            b'R' => fields.routine = Some(value.to_string()),
            _ => {}
        }
    }

    Ok(fields)
}
