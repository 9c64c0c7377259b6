//! The backend protocol collaborator.
//!
//! [`WireClient`] is the pipeline API the dispatch engine consumes: send a
//! parameterized query / prepared execute / prepare / deallocate, emit a
//! pipeline sync, poll for the next reply, inspect transaction status,
//! enter/exit pipeline mode. [`WireConn`] implements it over a TCP or Unix
//! socket with the Extended Query protocol, assembling raw messages into
//! libpq-style reply statuses.

use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use crate::error::{Error, Result, ServerErrorFields};
use crate::opts::{Opts, SslMode};
use crate::protocol::auth::{ScramClient, SCRAM_SHA_256};
use crate::protocol::backend::{
    is_async_type, msg_type, parse_command_tag, parse_data_row, parse_error_fields,
    parse_ready_for_query, parse_row_description, AuthRequest, BackendKeyData, ColumnDesc,
    ParameterStatus,
};
use crate::protocol::frontend::{
    write_bind, write_close_statement, write_describe_portal, write_execute, write_parse,
    write_password, write_sasl_initial_response, write_sasl_response, write_startup, write_sync,
    write_terminate,
};
use crate::protocol::TransactionStatus;
use crate::session::ENDLESS_LOOP_SECONDS;
use crate::stream::Stream;

/// One reply popped off the backend, classified the way libpq classifies
/// pipeline results.
#[derive(Debug)]
pub enum Reply {
    /// TUPLES_OK: a row set.
    Rows(RawRows),
    /// COMMAND_OK: a command completed, with its affected-row count.
    Command(u64),
    /// PIPELINE_SYNC: the marker closing a sync unit, with the connection's
    /// transaction status at that boundary.
    Sync(TransactionStatus),
    /// PIPELINE_ABORTED: this request was discarded because an earlier
    /// request in the same sync unit failed.
    Aborted,
    /// FATAL_ERROR: the backend rejected the request.
    Error(ServerErrorFields),
    /// No reply arrived within the poll window. The queue has not moved.
    Idle,
}

/// An undecoded row set: column descriptions plus text-format values.
#[derive(Debug, Default)]
pub struct RawRows {
    pub columns: Vec<ColumnDesc>,
    pub rows: Vec<Vec<Option<String>>>,
    /// Count from the CommandComplete tag (e.g. `SELECT 4`).
    pub affected: u64,
}

/// The pipeline API of the underlying protocol implementation.
///
/// The dispatch engine is written against this trait so it can be driven by
/// a scripted double in tests; [`WireConn`] is the production implementation.
pub trait WireClient: Send {
    /// Send Parse+Bind+Describe+Execute for one-shot SQL. Does not block.
    fn send_query(&mut self, sql: &str, params: &[Option<String>]) -> Result<()>;
    /// Send Bind+Describe+Execute against a prepared statement. Does not block.
    fn send_prepared(&mut self, name: &str, params: &[Option<String>]) -> Result<()>;
    /// Send Parse for a named statement. Does not block.
    fn send_prepare(&mut self, name: &str, sql: &str) -> Result<()>;
    /// Send Close for a named statement (wire-level DEALLOCATE). Does not block.
    fn send_deallocate(&mut self, name: &str) -> Result<()>;
    /// Emit a pipeline sync boundary and flush the socket.
    fn pipeline_sync(&mut self) -> Result<()>;
    /// Fetch the next reply, blocking up to the poll window.
    fn next_reply(&mut self) -> Result<Reply>;
    /// Transaction status as of the last sync boundary.
    fn transaction_status(&self) -> TransactionStatus;
    /// Enter pipeline mode.
    fn enter_pipeline(&mut self) -> Result<()>;
    /// Exit pipeline mode. Fails while requests are in flight.
    fn exit_pipeline(&mut self) -> Result<()>;
    /// True when the connection is usable.
    fn is_healthy(&self) -> bool;
    /// Tear down and re-establish the connection.
    fn reconnect(&mut self) -> Result<()>;
    /// Close the connection gracefully.
    fn close(&mut self) -> Result<()>;
}

/// What response sequence to expect for a request already on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sent {
    /// Parse?+Bind+Describe+Execute: completions, row data, CommandComplete.
    Statement,
    /// Parse only: ParseComplete.
    Prepare,
    /// Close only: CloseComplete.
    Deallocate,
    /// Sync: ReadyForQuery.
    Sync,
}

/// Production [`WireClient`] over a buffered socket.
pub struct WireConn {
    stream: Stream,
    write_buffer: Vec<u8>,
    /// Requests on the wire whose replies have not been consumed, in
    /// transmission order.
    sent: std::collections::VecDeque<Sent>,
    /// Set after an ErrorResponse until the unit's Sync is consumed; the
    /// server discards the unit's remaining requests, so their replies are
    /// synthesized as [`Reply::Aborted`].
    unit_aborted: bool,
    /// Partially assembled row set carried across an idle tick, so a slow
    /// backend mid-result does not lose rows already received.
    partial_rows: Option<(RawRows, bool)>,
    transaction_status: TransactionStatus,
    pipeline_mode: bool,
    is_broken: bool,
    backend_key: Option<BackendKeyData>,
    server_params: Vec<(String, String)>,
    opts: Opts,
}

impl WireConn {
    /// Connect and run the startup/authentication handshake.
    pub fn connect(opts: &Opts) -> Result<Self> {
        if opts.ssl_mode == SslMode::Require {
            return Err(Error::Unsupported(
                "sslmode=require is not supported on the synchronous path".into(),
            ));
        }

        let stream = if let Some(ref socket_path) = opts.socket {
            Stream::unix(UnixStream::connect(socket_path)?)
        } else {
            if opts.host.is_empty() {
                return Err(Error::InvalidUsage("host is empty".into()));
            }
            let addr = format!("{}:{}", opts.host, opts.port);
            let tcp = TcpStream::connect(&addr)?;
            tcp.set_nodelay(true)?;
            Stream::tcp(tcp)
        };

        let mut conn = Self {
            stream,
            write_buffer: Vec::with_capacity(8192),
            sent: std::collections::VecDeque::new(),
            unit_aborted: false,
            partial_rows: None,
            transaction_status: TransactionStatus::Idle,
            pipeline_mode: false,
            is_broken: false,
            backend_key: None,
            server_params: Vec::new(),
            opts: opts.clone(),
        };
        conn.startup()?;
        conn.stream
            .set_read_timeout(Some(Duration::from_secs(ENDLESS_LOOP_SECONDS)))?;
        Ok(conn)
    }

    fn startup(&mut self) -> Result<()> {
        let mut params: Vec<(&str, &str)> = vec![("user", &self.opts.user)];
        if let Some(db) = &self.opts.database {
            params.push(("database", db));
        }
        if let Some(app) = &self.opts.application_name {
            params.push(("application_name", app));
        }
        for (key, value) in &self.opts.params {
            params.push((key, value));
        }

        self.write_buffer.clear();
        write_startup(&mut self.write_buffer, &params);
        self.stream.write_all(&self.write_buffer)?;
        self.stream.flush()?;

        let mut scram: Option<ScramClient> = None;
        loop {
            let (type_byte, payload) = self.read_message_blocking()?;
            match type_byte {
                msg_type::AUTHENTICATION => {
                    self.handle_auth_request(&payload, &mut scram)?;
                }
                msg_type::BACKEND_KEY_DATA => {
                    self.backend_key = Some(BackendKeyData::parse(&payload)?);
                }
                msg_type::PARAMETER_STATUS => {
                    let status = ParameterStatus::parse(&payload)?;
                    self.server_params.push((status.name, status.value));
                }
                msg_type::READY_FOR_QUERY => {
                    self.transaction_status = parse_ready_for_query(&payload)?;
                    return Ok(());
                }
                msg_type::ERROR_RESPONSE => {
                    let fields = parse_error_fields(&payload)?;
                    return Err(Error::from_server(fields));
                }
                msg_type::NOTICE_RESPONSE => {}
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected message during startup: '{}'",
                        other as char
                    )));
                }
            }
        }
    }

    fn handle_auth_request(
        &mut self,
        payload: &[u8],
        scram: &mut Option<ScramClient>,
    ) -> Result<()> {
        match AuthRequest::parse(payload)? {
            AuthRequest::Ok => Ok(()),
            AuthRequest::CleartextPassword => {
                let password = self.password()?;
                self.write_buffer.clear();
                write_password(&mut self.write_buffer, &password);
                self.stream.write_all(&self.write_buffer)?;
                self.stream.flush()?;
                Ok(())
            }
            AuthRequest::Sasl(mechanisms) => {
                if !mechanisms.iter().any(|m| m == SCRAM_SHA_256) {
                    return Err(Error::Auth(format!(
                        "no supported SASL mechanism in {:?}",
                        mechanisms
                    )));
                }
                let password = self.password()?;
                let client = ScramClient::new(&self.opts.user, &password);
                self.write_buffer.clear();
                write_sasl_initial_response(
                    &mut self.write_buffer,
                    SCRAM_SHA_256,
                    &client.client_first_message(),
                );
                self.stream.write_all(&self.write_buffer)?;
                self.stream.flush()?;
                *scram = Some(client);
                Ok(())
            }
            AuthRequest::SaslContinue(data) => {
                let client = scram
                    .as_mut()
                    .ok_or_else(|| Error::Auth("SASL continue without exchange".into()))?;
                let response = client.process_server_first(&data)?;
                self.write_buffer.clear();
                write_sasl_response(&mut self.write_buffer, &response);
                self.stream.write_all(&self.write_buffer)?;
                self.stream.flush()?;
                Ok(())
            }
            AuthRequest::SaslFinal(data) => {
                let client = scram
                    .as_ref()
                    .ok_or_else(|| Error::Auth("SASL final without exchange".into()))?;
                client.verify_server_final(&data)
            }
            AuthRequest::Unsupported(code) => Err(Error::Auth(format!(
                "unsupported authentication request: {}",
                code
            ))),
        }
    }

    fn password(&self) -> Result<String> {
        self.opts
            .password
            .clone()
            .ok_or_else(|| Error::Auth("password required but not configured".into()))
    }

    /// Read one message, blocking past the poll window.
    fn read_message_blocking(&mut self) -> Result<(u8, Vec<u8>)> {
        loop {
            if let Some(message) = self.read_message()? {
                return Ok(message);
            }
        }
    }

    /// Read one message. Returns `None` when the poll window elapsed before
    /// the first byte arrived (the idle tick); a timeout mid-message is a
    /// real error because the stream position is lost.
    fn read_message(&mut self) -> Result<Option<(u8, Vec<u8>)>> {
        let mut type_byte = [0u8; 1];
        if let Err(e) = self.stream.read_exact(&mut type_byte) {
            if matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            ) {
                return Ok(None);
            }
            self.is_broken = true;
            return Err(e.into());
        }

        let result = (|| -> Result<Vec<u8>> {
            let mut length_bytes = [0u8; 4];
            self.stream.read_exact(&mut length_bytes)?;
            let length = u32::from_be_bytes(length_bytes);
            if length < 4 {
                return Err(Error::Protocol(format!("invalid message length: {}", length)));
            }
            let mut payload = vec![0u8; (length - 4) as usize];
            self.stream.read_exact(&mut payload)?;
            Ok(payload)
        })();

        match result {
            Ok(payload) => Ok(Some((type_byte[0], payload))),
            Err(e) => {
                self.is_broken = true;
                Err(e)
            }
        }
    }

    fn send(&mut self) -> Result<()> {
        if let Err(e) = self.stream.write_all(&self.write_buffer) {
            self.is_broken = true;
            return Err(e.into());
        }
        Ok(())
    }

    /// Assemble the reply for a Statement entry at the head of the sent queue.
    fn assemble_statement_reply(&mut self) -> Result<Reply> {
        let (mut rows, mut saw_rows) = self.partial_rows.take().unwrap_or_default();

        loop {
            let Some((type_byte, payload)) = self.read_message()? else {
                self.partial_rows = Some((rows, saw_rows));
                return Ok(Reply::Idle);
            };
            if is_async_type(type_byte) {
                continue;
            }
            match type_byte {
                msg_type::PARSE_COMPLETE
                | msg_type::BIND_COMPLETE
                | msg_type::NO_DATA
                | msg_type::PARAMETER_DESCRIPTION => {}
                msg_type::ROW_DESCRIPTION => {
                    rows.columns = parse_row_description(&payload)?;
                    saw_rows = true;
                }
                msg_type::DATA_ROW => {
                    if !saw_rows {
                        return Err(Error::Protocol(
                            "received DataRow without RowDescription".into(),
                        ));
                    }
                    rows.rows.push(parse_data_row(&payload)?);
                }
                msg_type::COMMAND_COMPLETE => {
                    let affected = parse_command_tag(&payload)?;
                    self.sent.pop_front();
                    return Ok(if saw_rows {
                        rows.affected = affected;
                        Reply::Rows(rows)
                    } else {
                        Reply::Command(affected)
                    });
                }
                msg_type::EMPTY_QUERY_RESPONSE => {
                    self.sent.pop_front();
                    return Ok(Reply::Command(0));
                }
                msg_type::ERROR_RESPONSE => {
                    let fields = parse_error_fields(&payload)?;
                    self.sent.pop_front();
                    self.unit_aborted = true;
                    return Ok(Reply::Error(fields));
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected message in statement reply: '{}'",
                        other as char
                    )));
                }
            }
        }
    }

    /// Assemble the reply for a single-completion entry (Prepare/Deallocate).
    fn assemble_completion_reply(&mut self, expected: u8, what: &str) -> Result<Reply> {
        loop {
            let Some((type_byte, payload)) = self.read_message()? else {
                return Ok(Reply::Idle);
            };
            if is_async_type(type_byte) {
                continue;
            }
            if type_byte == expected {
                self.sent.pop_front();
                return Ok(Reply::Command(0));
            }
            if type_byte == msg_type::ERROR_RESPONSE {
                let fields = parse_error_fields(&payload)?;
                self.sent.pop_front();
                self.unit_aborted = true;
                return Ok(Reply::Error(fields));
            }
            return Err(Error::Protocol(format!(
                "expected {} completion, got '{}'",
                what, type_byte as char
            )));
        }
    }
}

impl WireClient for WireConn {
    fn send_query(&mut self, sql: &str, params: &[Option<String>]) -> Result<()> {
        self.write_buffer.clear();
        write_parse(&mut self.write_buffer, "", sql, &[]);
        write_bind(&mut self.write_buffer, "", "", params);
        write_describe_portal(&mut self.write_buffer, "");
        write_execute(&mut self.write_buffer, "", 0);
        self.send()?;
        self.sent.push_back(Sent::Statement);
        Ok(())
    }

    fn send_prepared(&mut self, name: &str, params: &[Option<String>]) -> Result<()> {
        self.write_buffer.clear();
        write_bind(&mut self.write_buffer, "", name, params);
        write_describe_portal(&mut self.write_buffer, "");
        write_execute(&mut self.write_buffer, "", 0);
        self.send()?;
        self.sent.push_back(Sent::Statement);
        Ok(())
    }

    fn send_prepare(&mut self, name: &str, sql: &str) -> Result<()> {
        self.write_buffer.clear();
        write_parse(&mut self.write_buffer, name, sql, &[]);
        self.send()?;
        self.sent.push_back(Sent::Prepare);
        Ok(())
    }

    fn send_deallocate(&mut self, name: &str) -> Result<()> {
        self.write_buffer.clear();
        write_close_statement(&mut self.write_buffer, name);
        self.send()?;
        self.sent.push_back(Sent::Deallocate);
        Ok(())
    }

    fn pipeline_sync(&mut self) -> Result<()> {
        self.write_buffer.clear();
        write_sync(&mut self.write_buffer);
        self.send()?;
        if let Err(e) = self.stream.flush() {
            self.is_broken = true;
            return Err(e.into());
        }
        self.sent.push_back(Sent::Sync);
        Ok(())
    }

    fn next_reply(&mut self) -> Result<Reply> {
        let Some(&head) = self.sent.front() else {
            return Err(Error::InvalidUsage(
                "next_reply called with no request in flight".into(),
            ));
        };

        match head {
            Sent::Sync => loop {
                let Some((type_byte, payload)) = self.read_message()? else {
                    return Ok(Reply::Idle);
                };
                if is_async_type(type_byte) {
                    continue;
                }
                if type_byte == msg_type::READY_FOR_QUERY {
                    self.transaction_status = parse_ready_for_query(&payload)?;
                    self.sent.pop_front();
                    self.unit_aborted = false;
                    return Ok(Reply::Sync(self.transaction_status));
                }
                return Err(Error::Protocol(format!(
                    "expected ReadyForQuery, got '{}'",
                    type_byte as char
                )));
            },
            // The server discards the rest of an aborted unit without
            // replying; synthesize the aborted status libpq would report.
            _ if self.unit_aborted => {
                self.sent.pop_front();
                Ok(Reply::Aborted)
            }
            Sent::Statement => self.assemble_statement_reply(),
            Sent::Prepare => self.assemble_completion_reply(msg_type::PARSE_COMPLETE, "Parse"),
            Sent::Deallocate => self.assemble_completion_reply(msg_type::CLOSE_COMPLETE, "Close"),
        }
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    fn enter_pipeline(&mut self) -> Result<()> {
        self.pipeline_mode = true;
        Ok(())
    }

    fn exit_pipeline(&mut self) -> Result<()> {
        if !self.pipeline_mode {
            return Err(Error::InvalidUsage("not in pipeline mode".into()));
        }
        if !self.sent.is_empty() {
            return Err(Error::InvalidUsage(
                "cannot exit pipeline mode with requests in flight".into(),
            ));
        }
        self.pipeline_mode = false;
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        !self.is_broken
    }

    fn reconnect(&mut self) -> Result<()> {
        let opts = self.opts.clone();
        *self = Self::connect(&opts)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.write_buffer.clear();
        write_terminate(&mut self.write_buffer);
        self.stream.write_all(&self.write_buffer)?;
        self.stream.flush()?;
        self.is_broken = true;
        Ok(())
    }
}

impl WireConn {
    /// Backend key data for query cancellation.
    pub fn backend_key(&self) -> Option<&BackendKeyData> {
        self.backend_key.as_ref()
    }

    /// Server parameters reported during startup.
    pub fn server_params(&self) -> &[(String, String)] {
        &self.server_params
    }

    /// A specific server parameter.
    pub fn get_param(&self, name: &str) -> Option<&str> {
        self.server_params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

impl Drop for WireConn {
    fn drop(&mut self) {
        // Try to send Terminate message, ignore errors
        self.write_buffer.clear();
        write_terminate(&mut self.write_buffer);
        let _ = self.stream.write_all(&self.write_buffer);
        let _ = self.stream.flush();
    }
}
