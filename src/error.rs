//! Error types for pg-pipeline.

use std::sync::Arc;

use thiserror::Error;

/// Result type for pg-pipeline operations.
pub type Result<T> = core::result::Result<T, Error>;

/// SQLSTATE class for data exceptions (22xxx).
const SQLSTATE_CLASS_DATA: &str = "22";
/// SQLSTATE for string data right truncation.
const SQLSTATE_VALUE_TOO_LONG: &str = "22001";
/// SQLSTATE for feature_not_supported, which PostgreSQL reuses for
/// invalidated cached plans.
const SQLSTATE_FEATURE_NOT_SUPPORTED: &str = "0A000";
/// SQLSTATE for in_failed_sql_transaction: the statement was rejected
/// because an earlier statement in the transaction failed.
const SQLSTATE_IN_FAILED_TRANSACTION: &str = "25P02";

/// PostgreSQL error/notice fields, as decoded from an ErrorResponse.
#[derive(Debug, Clone, Default)]
pub struct ServerErrorFields {
    /// Severity: ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG
    pub severity: Option<String>,
    /// SQLSTATE error code (5 characters)
    pub code: Option<String>,
    /// Primary error message
    pub message: Option<String>,
    /// Detailed error explanation
    pub detail: Option<String>,
    /// Suggestion for fixing the error
    pub hint: Option<String>,
    /// Cursor position in query string (1-based)
    pub position: Option<u32>,
    /// Schema name
    pub schema: Option<String>,
    /// Table name
    pub table: Option<String>,
    /// Column name
    pub column: Option<String>,
    /// Constraint name
    pub constraint: Option<String>,
    /// Source routine name
    pub routine: Option<String>,
    /// Statement text the reply belongs to, attached by the dispatch engine.
    pub sql: Option<String>,
}

impl std::fmt::Display for ServerErrorFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(severity) = &self.severity {
            write!(f, "{}: ", severity)?;
        }
        if let Some(message) = &self.message {
            write!(f, "{}", message)?;
        }
        if let Some(code) = &self.code {
            write!(f, " (SQLSTATE {})", code)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {}", detail)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {}", hint)?;
        }
        if let Some(sql) = &self.sql {
            write!(f, "\nSQL: {}", sql)?;
        }
        Ok(())
    }
}

impl ServerErrorFields {
    /// True when this error reports an invalidated cached plan, the
    /// condition that triggers prepared-statement re-preparation.
    pub fn is_cached_plan_invalidated(&self) -> bool {
        self.code.as_deref() == Some(SQLSTATE_FEATURE_NOT_SUPPORTED)
            && self
                .message
                .as_deref()
                .is_some_and(|m| m.contains("cached plan must not change result type"))
    }
}

/// Error type for pg-pipeline.
///
/// The enum is `Clone` so a failure stored in a deferred handle can be
/// handed back on every subsequent force.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The backend rejected this statement (syntax, constraint, type).
    #[error("statement invalid: {0}")]
    Statement(ServerErrorFields),

    /// Data-level backend rejection (SQLSTATE class 22).
    #[error("data error: {0}")]
    Data(ServerErrorFields),

    /// String data right truncation (SQLSTATE 22001).
    #[error("value too long: {0}")]
    ValueTooLong(ServerErrorFields),

    /// A cached plan was invalidated by a schema change. Recoverable by
    /// re-preparing outside a transaction, fatal inside one.
    #[error("prepared statement cache expired: {0}")]
    CacheExpired(ServerErrorFields),

    /// This request was aborted because an earlier pipelined request
    /// failed. Roll back and retry on a fresh sync boundary.
    #[error("prior query in pipeline failed{}", .0.as_ref().map(|f| format!(": {}", f)).unwrap_or_default())]
    PriorQueryAborted(Option<ServerErrorFields>),

    /// The connection was reset or closed while this request was in flight.
    #[error("connection reset with request in flight")]
    ConnectionReset,

    /// Connection is broken and cannot be reused.
    #[error("connection is broken")]
    ConnectionBroken,

    /// A write statement was issued on a read-only connection. Raised
    /// before transmission.
    #[error("write attempted on a read-only connection: {0}")]
    ReadOnly(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// Protocol error (malformed message, unexpected response, etc.)
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Authentication failed
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Invalid usage (e.g., binds that cannot be rendered)
    #[error("invalid usage: {0}")]
    InvalidUsage(String),

    /// Unsupported feature
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(err: std::convert::Infallible) -> Self {
        match err {}
    }
}

impl Error {
    /// Translate a server error reply into the adapter-level error kind.
    ///
    /// The dispatch engine attaches the statement text of the head handle
    /// before calling this, so the raised error carries its context.
    pub fn from_server(fields: ServerErrorFields) -> Self {
        if fields.is_cached_plan_invalidated() {
            return Error::CacheExpired(fields);
        }
        match fields.code.as_deref() {
            Some(SQLSTATE_IN_FAILED_TRANSACTION) => Error::PriorQueryAborted(Some(fields)),
            Some(SQLSTATE_VALUE_TOO_LONG) => Error::ValueTooLong(fields),
            Some(code) if code.starts_with(SQLSTATE_CLASS_DATA) => Error::Data(fields),
            _ => Error::Statement(fields),
        }
    }

    /// Returns true if the error indicates the connection is broken and
    /// cannot be reused.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Io(_) | Error::ConnectionBroken | Error::ConnectionReset => true,
            Error::Statement(fields) | Error::Data(fields) => {
                // FATAL and PANIC errors indicate connection is broken
                matches!(fields.severity.as_deref(), Some("FATAL") | Some("PANIC"))
            }
            _ => false,
        }
    }

    /// Get the SQLSTATE code if this is a server error.
    pub fn sqlstate(&self) -> Option<&str> {
        self.server_fields().and_then(|f| f.code.as_deref())
    }

    /// Get the server error fields if this error originated from the backend.
    pub fn server_fields(&self) -> Option<&ServerErrorFields> {
        match self {
            Error::Statement(f)
            | Error::Data(f)
            | Error::ValueTooLong(f)
            | Error::CacheExpired(f) => Some(f),
            Error::PriorQueryAborted(f) => f.as_ref(),
            _ => None,
        }
    }
}
