//! The dispatch/drain engine.
//!
//! A [`Session`] owns one backend connection, the pipeline queue of pending
//! handles, and the prepared statement cache. Issue paths enqueue and
//! return; only the drain loop blocks, reading replies and binding them to
//! queue heads in strict FIFO order.
//!
//! User statements batch into one open sync unit: issuing sends the request
//! but no boundary, and the sync is emitted lazily when a drain needs
//! replies. A failed statement therefore aborts the rest of its unit, and
//! the discarded requests come back as aborted replies. Administrative
//! statements go through the flush helper and are always their own unit.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use tracing::{debug, error, warn};

use crate::deferred::{Callback, HandleCore, HookVerdict};
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::result::{RowSet, SqlResult};
use crate::statements::StatementCache;
use crate::types::TypeRegistry;
use crate::value::Value;
use crate::wire::{Reply, WireClient};

/// Observation threshold for a drain pass that makes no progress. When no
/// reply arrives for this long with requests outstanding, the engine logs a
/// diagnostic and keeps waiting. It is not a deadline.
pub const ENDLESS_LOOP_SECONDS: u64 = 20;

/// Bounded depth for captured issue-site traces.
const ISSUE_TRACE_MAX_LINES: usize = 16;

/// Statement keywords rejected under a read-only connection.
const WRITE_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "MERGE", "TRUNCATE", "CREATE", "DROP", "ALTER", "GRANT",
    "REVOKE", "COPY", "LOCK",
];

/// One backend connection plus all pipeline state. All access goes through
/// the adapter's mutex; nothing here is shareable across threads on its own.
pub struct Session {
    client: Box<dyn WireClient>,
    queue: VecDeque<Arc<HandleCore>>,
    statements: StatementCache,
    registry: Arc<TypeRegistry>,
    opts: Opts,
    /// Requests have been sent since the last sync boundary. The boundary
    /// is emitted lazily, at the next drain, so outstanding statements
    /// share one sync unit.
    needs_sync: bool,
}

impl Session {
    pub(crate) fn new(
        mut client: Box<dyn WireClient>,
        registry: Arc<TypeRegistry>,
        opts: Opts,
    ) -> Result<Self> {
        if opts.pipeline {
            client.enter_pipeline()?;
        }
        Ok(Self {
            client,
            queue: VecDeque::new(),
            statements: StatementCache::new(opts.statement_limit),
            registry,
            opts,
            needs_sync: false,
        })
    }

    pub(crate) fn opts(&self) -> &Opts {
        &self.opts
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn healthy(&self) -> bool {
        self.client.is_healthy()
    }

    pub(crate) fn statement_cache_len(&self) -> usize {
        self.statements.len()
    }

    pub(crate) fn transaction_status(&self) -> crate::protocol::TransactionStatus {
        self.client.transaction_status()
    }

    // ========================================================================
    // Issue paths
    // ========================================================================

    /// Issue a user statement into the pipeline and return its handle core,
    /// already enqueued. Does not block: the statement joins the
    /// connection's open sync unit, whose boundary goes out at the next
    /// drain.
    pub(crate) fn issue(
        &mut self,
        sql: &str,
        name: &str,
        binds: Vec<Option<String>>,
        prepare: bool,
        callback: Option<Callback>,
    ) -> Result<Arc<HandleCore>> {
        self.guard_read_only(sql)?;

        let trace = self
            .opts
            .capture_issue_traces
            .then(|| crate::deferred::capture_issue_trace(ISSUE_TRACE_MAX_LINES));

        if prepare {
            let stmt_name = self.prepare_statement(sql)?;
            self.log_issue(name, sql, &binds, Some(&stmt_name));
            self.client.send_prepared(&stmt_name, &binds)?;
            self.needs_sync = true;

            let core = HandleCore::new(sql.to_string(), binds, callback, trace);
            self.install_expiry_hook(&core);
            self.queue.push_back(Arc::clone(&core));
            Ok(core)
        } else {
            self.log_issue(name, sql, &binds, None);
            self.client.send_query(sql, &binds)?;
            self.needs_sync = true;

            let core = HandleCore::new(sql.to_string(), binds, callback, trace);
            self.queue.push_back(Arc::clone(&core));
            Ok(core)
        }
    }

    /// The projector installed on `exec_query` handles: decode the raw
    /// reply through the type registry into a typed row set.
    pub(crate) fn row_set_callback(&self) -> Callback {
        let registry = Arc::clone(&self.registry);
        Box::new(move |raw| project_row_set(&registry, raw))
    }

    /// Re-prepare and re-issue a request whose cached plan was invalidated,
    /// re-enqueueing the same core so the caller's handle still resolves.
    fn reissue_prepared(&mut self, core: &Arc<HandleCore>) -> Result<()> {
        let sql = core.sql().to_string();

        if let Some(stale) = self.statements.remove(&sql) {
            // The invalidated statement still occupies its name server-side.
            self.deallocate_statement(&stale);
        }

        let stmt_name = self.prepare_statement(&sql)?;
        let binds = core.binds().to_vec();
        self.log_issue("RETRY", &sql, &binds, Some(&stmt_name));
        core.set_callback(self.row_set_callback());
        self.client.send_prepared(&stmt_name, &binds)?;
        self.needs_sync = true;
        self.queue.push_back(Arc::clone(core));
        Ok(())
    }

    /// Install the cache-expiry recovery hook on a prepared-exec handle.
    /// Registered at issue time so it still fires when resolution happens
    /// on a later drain. Retries at most once per handle.
    fn install_expiry_hook(&self, core: &Arc<HandleCore>) {
        let weak: Weak<HandleCore> = Arc::downgrade(core);
        let mut retried = false;
        core.push_hook(Box::new(move |session, err| {
            if !matches!(err, Error::CacheExpired(_)) || retried {
                return HookVerdict::Unhandled(err);
            }
            let Some(core) = weak.upgrade() else {
                return HookVerdict::Unhandled(err);
            };
            let sql = core.sql().to_string();
            if session.client.transaction_status().in_transaction() {
                // Not recoverable mid-transaction: the plan stays invalid
                // until rollback. Drop the cache entry so the next use
                // after rollback re-prepares.
                session.statements.remove(&sql);
                return HookVerdict::Unhandled(err);
            }
            warn!(sql = %sql, "cached plan invalidated; re-preparing and retrying");
            retried = true;
            match session.reissue_prepared(&core) {
                Ok(()) => HookVerdict::Retried,
                Err(retry_err) => HookVerdict::Unhandled(retry_err),
            }
        }));
    }

    // ========================================================================
    // Prepared statements
    // ========================================================================

    /// Resolve a statement to its server-side name, preparing it through
    /// the pipeline on miss. Eviction deallocates the displaced statement.
    fn prepare_statement(&mut self, sql: &str) -> Result<String> {
        if let Some(name) = self.statements.touch(sql) {
            return Ok(name.to_string());
        }

        let name = self.statements.next_statement_name();
        self.flush_pipeline_and_sync("PREPARE", sql, &[], |client| {
            client.send_prepare(&name, sql)
        })?;

        if let Some(evicted) = self.statements.insert(sql.to_string(), name.clone()) {
            self.deallocate_statement(&evicted);
        }
        Ok(name)
    }

    /// DEALLOCATE a server-side statement. Failure is logged, not fatal:
    /// losing a name leaks one slot, which the server reclaims on reset.
    fn deallocate_statement(&mut self, name: &str) {
        let result = self.flush_pipeline_and_sync("DEALLOCATE", name, &[], |client| {
            client.send_deallocate(name)
        });
        if let Err(err) = result {
            warn!(statement = name, error = %err, "failed to deallocate prepared statement");
        }
    }

    // ========================================================================
    // Synchronous control path
    // ========================================================================

    /// Run an administrative statement synchronously: drain any outstanding
    /// pipeline work first, then send, sync, and consume the single
    /// expected reply plus its sync marker. Control statements never
    /// interleave with user handles.
    pub(crate) fn flush_pipeline_and_sync<F>(
        &mut self,
        name: &str,
        sql: &str,
        binds: &[Option<String>],
        send_op: F,
    ) -> Result<Reply>
    where
        F: FnOnce(&mut dyn WireClient) -> Result<()>,
    {
        self.drain_until(None)?;

        self.log_sync_issue(name, sql, binds);
        send_op(self.client.as_mut())?;
        self.client.pipeline_sync()?;

        let mut op_reply: Option<Reply> = None;
        loop {
            match self.client.next_reply() {
                Err(err) => return Err(self.note_transport_failure(err)),
                Ok(Reply::Idle) => self.log_stall(),
                Ok(Reply::Sync(status)) => {
                    self.note_transaction_status(status);
                    if let Some(reply) = op_reply.take() {
                        return Ok(reply);
                    }
                    // A stray marker left by an earlier pass; keep reading.
                }
                Ok(Reply::Error(mut fields)) => {
                    fields.sql = Some(sql.to_string());
                    let err = Error::from_server(fields);
                    self.consume_unit_tail()?;
                    return Err(err);
                }
                Ok(Reply::Aborted) => {
                    return Err(Error::Protocol(
                        "aborted reply for a synchronous control statement".into(),
                    ));
                }
                Ok(reply) => op_reply = Some(reply),
            }
        }
    }

    /// Run a plain SQL command through the synchronous path, returning its
    /// affected-row count.
    pub(crate) fn execute_command(&mut self, name: &str, sql: &str) -> Result<u64> {
        self.guard_read_only(sql)?;
        let reply =
            self.flush_pipeline_and_sync(name, sql, &[], |client| client.send_query(sql, &[]))?;
        Ok(match reply {
            Reply::Command(n) => n,
            Reply::Rows(rows) => rows.affected,
            _ => 0,
        })
    }

    /// Run raw SQL through the synchronous path, returning undecoded rows.
    pub(crate) fn raw_query(&mut self, name: &str, sql: &str) -> Result<Vec<Vec<Value>>> {
        self.guard_read_only(sql)?;
        let reply =
            self.flush_pipeline_and_sync(name, sql, &[], |client| client.send_query(sql, &[]))?;
        Ok(match reply {
            Reply::Rows(rows) => rows
                .rows
                .into_iter()
                .map(|row| {
                    row.into_iter()
                        .map(|v| v.map(Value::Text).unwrap_or(Value::Null))
                        .collect()
                })
                .collect(),
            _ => Vec::new(),
        })
    }

    // ========================================================================
    // Drain loop
    // ========================================================================

    /// Consume replies and bind them to pending handles in FIFO order.
    ///
    /// Closes the open sync unit first, so everything issued since the last
    /// boundary becomes drainable. With a target, the loop runs until the
    /// target's core reaches a terminal state (resolving every handle
    /// issued before it as a side effect); without one, it runs until the
    /// queue is empty. Replies that arrive after the target resolves stay
    /// on the socket for later drains.
    pub(crate) fn drain_until(&mut self, target: Option<&Arc<HandleCore>>) -> Result<()> {
        if self.queue.is_empty() {
            return Ok(());
        }

        loop {
            // A retry hook may have re-opened the unit mid-drain, so the
            // boundary check runs every pass.
            let reply = match self.sync_if_needed().and_then(|()| self.client.next_reply()) {
                Ok(reply) => reply,
                Err(err) => {
                    let err = self.note_transport_failure(err);
                    // With a target the forcing caller reads the outcome
                    // from the handle state, which the failure just set.
                    return if target.is_some() { Ok(()) } else { Err(err) };
                }
            };

            match reply {
                Reply::Idle => self.log_stall(),
                Reply::Sync(status) => {
                    // A marker for a reply consumed on an earlier pass.
                    self.note_transaction_status(status);
                }
                reply @ (Reply::Rows(_) | Reply::Command(_)) => {
                    let head = self.pop_head()?;
                    if let Err(project_err) = head.assign(reply) {
                        self.dispatch_error(&head, project_err);
                    }
                    if self.finished_with(&head, target, false)? {
                        return Ok(());
                    }
                }
                Reply::Error(mut fields) => {
                    let head = self.pop_head()?;
                    fields.sql = Some(head.sql().to_string());
                    let err = Error::from_server(fields);
                    // The rest of this sync unit is aborted; settle the
                    // boundary before hooks run so a retry starts clean.
                    let tail = self.consume_unit_tail();
                    self.dispatch_error(&head, err);
                    tail?;
                    if self.finished_with(&head, target, true)? {
                        return Ok(());
                    }
                }
                Reply::Aborted => {
                    let head = self.pop_head()?;
                    self.dispatch_error(&head, Error::PriorQueryAborted(None));
                    if self.finished_with(&head, target, false)? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Close the open sync unit, if any.
    fn sync_if_needed(&mut self) -> Result<()> {
        if self.needs_sync {
            self.client.pipeline_sync()?;
            self.needs_sync = false;
        }
        Ok(())
    }

    fn pop_head(&mut self) -> Result<Arc<HandleCore>> {
        self.queue.pop_front().ok_or_else(|| {
            Error::Protocol("received a reply with no pending handle in the pipeline".into())
        })
    }

    /// Post-assignment bookkeeping shared by the drain arms. Returns true
    /// when the drain pass is complete. `sync_consumed` marks arms that
    /// already settled their unit's sync marker.
    fn finished_with(
        &mut self,
        head: &Arc<HandleCore>,
        target: Option<&Arc<HandleCore>>,
        sync_consumed: bool,
    ) -> Result<bool> {
        let is_target = target.is_some_and(|t| Arc::ptr_eq(t, head));

        if is_target && head.is_pending() {
            // A hook re-issued the request; keep draining for the retry.
            return Ok(false);
        }
        if self.queue.is_empty() {
            if !sync_consumed {
                self.consume_trailing_sync()?;
            }
            return Ok(true);
        }
        Ok(is_target)
    }

    /// Consume replies up to the current unit's sync marker, failing any
    /// handles the server discarded along the way.
    fn consume_unit_tail(&mut self) -> Result<()> {
        loop {
            match self.client.next_reply() {
                Err(err) => return Err(self.note_transport_failure(err)),
                Ok(Reply::Idle) => self.log_stall(),
                Ok(Reply::Sync(status)) => {
                    self.note_transaction_status(status);
                    return Ok(());
                }
                Ok(Reply::Aborted) => {
                    let head = self.pop_head()?;
                    self.dispatch_error(&head, Error::PriorQueryAborted(None));
                }
                Ok(_) => {
                    return Err(Error::Protocol(
                        "expected sync marker after an errored reply".into(),
                    ));
                }
            }
        }
    }

    /// Consume the sync marker trailing the final reply of a drain pass.
    fn consume_trailing_sync(&mut self) -> Result<()> {
        loop {
            match self.client.next_reply() {
                Err(err) => return Err(self.note_transport_failure(err)),
                Ok(Reply::Idle) => self.log_stall(),
                Ok(Reply::Sync(status)) => {
                    self.note_transaction_status(status);
                    return Ok(());
                }
                Ok(_) => {
                    return Err(Error::Protocol(
                        "expected trailing sync marker after final reply".into(),
                    ));
                }
            }
        }
    }

    /// The socket failed mid-drain. The head handle takes the error through
    /// its hooks; everything else still queued can never resolve and is
    /// failed with a reset error. Returns the error for propagation.
    fn note_transport_failure(&mut self, err: Error) -> Error {
        error!(error = %err, pending = self.queue.len(), "transport failure while draining pipeline");
        if let Some(head) = self.queue.pop_front() {
            self.dispatch_error(&head, err.clone());
        }
        self.fail_pending(Error::ConnectionReset);
        err
    }

    fn note_transaction_status(&self, status: crate::protocol::TransactionStatus) {
        if status.is_failed() {
            warn!("transaction is in error state; ROLLBACK required before further pipelined work");
        }
    }

    /// Fail every queued handle (through its hooks) and clear the queue.
    /// The open sync unit dies with them.
    pub(crate) fn fail_pending(&mut self, err: Error) {
        self.needs_sync = false;
        let pending: Vec<_> = self.queue.drain(..).collect();
        for core in pending {
            self.dispatch_error(&core, err.clone());
        }
    }

    /// Run a failed handle's error hooks in registration order, then apply
    /// the terminal transition the verdicts call for. Hooks are restored
    /// afterwards so a retried handle keeps its handlers.
    fn dispatch_error(&mut self, core: &Arc<HandleCore>, err: Error) {
        let mut current = err;
        let mut hooks = core.take_hooks();
        let mut verdict = None;
        for hook in hooks.iter_mut() {
            match hook(self, current.clone()) {
                HookVerdict::Consumed => {
                    verdict = Some(HookVerdict::Consumed);
                    break;
                }
                HookVerdict::Replaced(value) => {
                    verdict = Some(HookVerdict::Replaced(value));
                    break;
                }
                HookVerdict::Retried => {
                    verdict = Some(HookVerdict::Retried);
                    break;
                }
                HookVerdict::Unhandled(next) => current = next,
            }
        }
        core.restore_hooks(hooks);

        match verdict {
            Some(HookVerdict::Consumed) => core.fail(current, true),
            Some(HookVerdict::Replaced(value)) => core.resolve(Arc::new(value)),
            Some(HookVerdict::Retried) => {}
            _ => core.fail(current, false),
        }
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    /// Drain, roll back any open transaction, and put the backend session
    /// back into a pristine state.
    pub(crate) fn reset(&mut self) -> Result<()> {
        self.drain_until(None)?;
        if self.client.transaction_status().in_transaction() {
            self.flush_pipeline_and_sync("ROLLBACK", "ROLLBACK", &[], |client| {
                client.send_query("ROLLBACK", &[])
            })?;
        }
        self.flush_pipeline_and_sync("RESET", "DISCARD ALL", &[], |client| {
            client.send_query("DISCARD ALL", &[])
        })?;
        // DISCARD ALL deallocated every server-side statement.
        self.statements.clear();
        Ok(())
    }

    /// Tear down and re-establish the backend connection. Handles still in
    /// flight are failed with a reset error first.
    pub(crate) fn reconnect(&mut self) -> Result<()> {
        self.fail_pending(Error::ConnectionReset);
        self.statements.clear();
        self.client.reconnect()?;
        if self.opts.pipeline {
            self.client.enter_pipeline()?;
        }
        Ok(())
    }

    /// Close the backend connection. Handles still in flight are failed
    /// with a reset error first. Close failures are logged, not raised.
    pub(crate) fn disconnect(&mut self) {
        self.fail_pending(Error::ConnectionReset);
        self.statements.clear();
        if let Err(err) = self.client.close() {
            debug!(error = %err, "error closing connection");
        }
    }

    /// Probe the connection with an empty statement.
    pub(crate) fn is_active(&mut self) -> bool {
        if !self.client.is_healthy() {
            return false;
        }
        self.flush_pipeline_and_sync("PING", "", &[], |client| client.send_query("", &[]))
            .is_ok()
    }

    /// The check-in hook: settle everything outstanding before the
    /// connection goes back to a pool. Never raises; unread results were
    /// never observed and may be discarded.
    pub(crate) fn check_in_cleanup(&mut self) {
        if let Err(err) = self.drain_until(None) {
            warn!(error = %err, "discarding pipeline state at check-in");
        }
    }

    // ========================================================================
    // Policy and instrumentation
    // ========================================================================

    fn guard_read_only(&self, sql: &str) -> Result<()> {
        if self.opts.read_only && is_write_statement(sql) {
            return Err(Error::ReadOnly(sql.trim().to_string()));
        }
        Ok(())
    }

    fn log_issue(&self, name: &str, sql: &str, binds: &[Option<String>], prepared: Option<&str>) {
        match prepared {
            Some(stmt) => debug!(
                target: "pg_pipeline::sql",
                name,
                sql,
                binds = ?binds,
                prepared_name = stmt,
                "issue"
            ),
            None => debug!(target: "pg_pipeline::sql", name, sql, binds = ?binds, "issue"),
        }
    }

    fn log_sync_issue(&self, name: &str, sql: &str, binds: &[Option<String>]) {
        let name = format!("{} [SYNC]", name);
        debug!(target: "pg_pipeline::sql", name = %name, sql, binds = ?binds, "issue");
    }

    fn log_stall(&self) {
        warn!(
            pending = self.queue.len(),
            seconds = ENDLESS_LOOP_SECONDS,
            "pipeline drain made no progress; still waiting on the backend"
        );
    }
}

/// Whether a statement writes, by leading keyword.
fn is_write_statement(sql: &str) -> bool {
    let first_word = sql
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(')
        .find(|part| !part.is_empty())
        .unwrap_or("");
    WRITE_KEYWORDS
        .iter()
        .any(|kw| first_word.eq_ignore_ascii_case(kw))
}

/// Decode a raw reply into a typed row set via the registry.
fn project_row_set(registry: &TypeRegistry, raw: Reply) -> Result<SqlResult> {
    match raw {
        Reply::Rows(rows) => {
            let mut decoded = Vec::with_capacity(rows.rows.len());
            for row in &rows.rows {
                let mut out = Vec::with_capacity(row.len());
                for (column, value) in rows.columns.iter().zip(row.iter()) {
                    out.push(registry.decode(
                        column.type_oid,
                        column.type_modifier,
                        &column.name,
                        value.as_deref(),
                    )?);
                }
                decoded.push(out);
            }
            Ok(SqlResult::Rows(RowSet {
                columns: rows.columns.iter().map(|c| c.name.clone()).collect(),
                column_oids: rows.columns.iter().map(|c| c.type_oid).collect(),
                rows: decoded,
            }))
        }
        Reply::Command(n) => Ok(SqlResult::Affected(n)),
        _ => Err(Error::Protocol(
            "cannot materialize a non-terminal reply".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_statement_detection() {
        assert!(is_write_statement("INSERT INTO t VALUES (1)"));
        assert!(is_write_statement("  update t set x = 1"));
        assert!(is_write_statement("(INSERT INTO t VALUES (1))"));
        assert!(!is_write_statement("SELECT * FROM t"));
        assert!(!is_write_statement("WITH x AS (SELECT 1) SELECT * FROM x"));
        assert!(!is_write_statement(""));
    }
}
