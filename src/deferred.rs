//! Deferred result handles.
//!
//! Issuing a request in pipeline mode returns a [`DeferredResult`]: a
//! placeholder for a reply that has not been read from the socket yet.
//! Every value accessor forces materialization first, as does comparing the
//! handle against a non-handle value; operations on the handle itself
//! (scheduling state, equality with another handle, hook registration,
//! issue metadata) do not force.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::result::SqlResult;
use crate::session::Session;
use crate::value::Value;
use crate::wire::Reply;

/// Post-processor applied to a successful raw reply, exactly once.
pub(crate) type Callback = Box<dyn FnOnce(Reply) -> Result<SqlResult> + Send>;

/// Outcome of one error hook invocation.
pub enum HookVerdict {
    /// The error is consumed; the handle resolves empty and forcing does
    /// not raise.
    Consumed,
    /// The error is consumed and the handle resolves with this result.
    Replaced(SqlResult),
    /// The hook re-issued the request and re-enqueued the handle; no
    /// terminal transition yet.
    Retried,
    /// Not handled; the (possibly transformed) error goes to the next hook.
    Unhandled(Error),
}

/// An error hook. Hooks run in registration order when resolution fails;
/// they receive the session so a recovery strategy can re-issue requests.
pub type ErrorHook = Box<dyn FnMut(&mut Session, Error) -> HookVerdict + Send>;

/// Handle state. Exactly one terminal transition per handle.
enum HandleState {
    Pending,
    Resolved(Arc<SqlResult>),
    Failed { error: Error, consumed: bool },
}

/// The queue-resident core of a deferred handle.
pub(crate) struct HandleCore {
    sql: String,
    binds: Vec<Option<String>>,
    state: Mutex<HandleState>,
    callback: Mutex<Option<Callback>>,
    hooks: Mutex<Vec<ErrorHook>>,
    issued_at: Instant,
    resolved_at: Mutex<Option<Instant>>,
    issue_trace: Option<String>,
}

impl HandleCore {
    pub(crate) fn new(
        sql: String,
        binds: Vec<Option<String>>,
        callback: Option<Callback>,
        issue_trace: Option<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            sql,
            binds,
            state: Mutex::new(HandleState::Pending),
            callback: Mutex::new(callback),
            hooks: Mutex::new(Vec::new()),
            issued_at: Instant::now(),
            resolved_at: Mutex::new(None),
            issue_trace,
        })
    }

    pub(crate) fn sql(&self) -> &str {
        &self.sql
    }

    pub(crate) fn binds(&self) -> &[Option<String>] {
        &self.binds
    }

    pub(crate) fn is_pending(&self) -> bool {
        matches!(*self.state.lock(), HandleState::Pending)
    }

    /// The terminal outcome, if any. `Failed { consumed: true }` reads as
    /// an empty success: a hook already swallowed the error.
    pub(crate) fn terminal_outcome(&self) -> Option<Result<Arc<SqlResult>>> {
        match &*self.state.lock() {
            HandleState::Pending => None,
            HandleState::Resolved(value) => Some(Ok(Arc::clone(value))),
            HandleState::Failed { consumed: true, .. } => Some(Ok(Arc::new(SqlResult::empty()))),
            HandleState::Failed { error, .. } => Some(Err(error.clone())),
        }
    }

    /// Materialize a successful raw reply: apply the callback (or the
    /// default projection) and transition to Resolved.
    ///
    /// A callback failure does not transition the handle; the engine routes
    /// it through the error hooks instead.
    pub(crate) fn assign(&self, raw: Reply) -> Result<()> {
        let callback = self.callback.lock().take();
        let value = match callback {
            Some(project) => project(raw)?,
            None => default_projection(raw),
        };
        self.resolve(Arc::new(value));
        Ok(())
    }

    pub(crate) fn resolve(&self, value: Arc<SqlResult>) {
        let mut state = self.state.lock();
        debug_assert!(matches!(*state, HandleState::Pending));
        if matches!(*state, HandleState::Pending) {
            *state = HandleState::Resolved(value);
            *self.resolved_at.lock() = Some(Instant::now());
        }
    }

    pub(crate) fn fail(&self, error: Error, consumed: bool) {
        let mut state = self.state.lock();
        debug_assert!(matches!(*state, HandleState::Pending));
        if matches!(*state, HandleState::Pending) {
            *state = HandleState::Failed { error, consumed };
            *self.resolved_at.lock() = Some(Instant::now());
        }
    }

    pub(crate) fn set_callback(&self, callback: Callback) {
        *self.callback.lock() = Some(callback);
    }

    pub(crate) fn push_hook(&self, hook: ErrorHook) {
        self.hooks.lock().push(hook);
    }

    /// Take the hooks for one resolution pass.
    pub(crate) fn take_hooks(&self) -> Vec<ErrorHook> {
        std::mem::take(&mut *self.hooks.lock())
    }

    /// Put hooks back after a resolution pass, ahead of any registered
    /// while the pass ran, so a retried handle keeps its handlers in order.
    pub(crate) fn restore_hooks(&self, mut hooks: Vec<ErrorHook>) {
        let mut slot = self.hooks.lock();
        hooks.extend(slot.drain(..));
        *slot = hooks;
    }

    pub(crate) fn issue_trace(&self) -> Option<&str> {
        self.issue_trace.as_deref()
    }

    pub(crate) fn resolve_latency(&self) -> Option<Duration> {
        let resolved_at = *self.resolved_at.lock();
        resolved_at.map(|at| at.duration_since(self.issued_at))
    }
}

/// Projection used when no callback is installed: row replies keep their
/// text values, command replies carry the affected count.
fn default_projection(raw: Reply) -> SqlResult {
    match raw {
        Reply::Rows(rows) => SqlResult::Values(
            rows.rows
                .into_iter()
                .map(|row| {
                    row.into_iter()
                        .map(|v| v.map(Value::Text).unwrap_or(Value::Null))
                        .collect()
                })
                .collect(),
        ),
        Reply::Command(n) => SqlResult::Affected(n),
        // The engine only assigns row/command replies.
        _ => SqlResult::empty(),
    }
}

/// Capture a bounded issue-site trace. Only called when
/// `Opts::capture_issue_traces` is set.
pub(crate) fn capture_issue_trace(max_lines: usize) -> String {
    let trace = std::backtrace::Backtrace::force_capture().to_string();
    let mut out = String::new();
    for line in trace.lines().take(max_lines) {
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// A deferred result handle.
///
/// Forcing blocks until the dispatch engine has drained the reply for this
/// handle (resolving every handle issued before it on the same connection
/// as a side effect), then yields the materialized value or the stored
/// error.
#[must_use]
pub struct DeferredResult {
    core: Arc<HandleCore>,
    session: Arc<Mutex<Session>>,
}

impl DeferredResult {
    pub(crate) fn new(core: Arc<HandleCore>, session: Arc<Mutex<Session>>) -> Self {
        Self { core, session }
    }

    /// True while the reply has not been materialized yet.
    pub fn scheduled(&self) -> bool {
        self.core.is_pending()
    }

    /// The statement text this handle belongs to.
    pub fn sql(&self) -> &str {
        self.core.sql()
    }

    /// The parameter values as transmitted.
    pub fn binds(&self) -> &[Option<String>] {
        self.core.binds()
    }

    /// The captured issue-site trace, when trace capture is enabled.
    pub fn issue_trace(&self) -> Option<&str> {
        self.core.issue_trace()
    }

    /// Time from issue to terminal transition, once terminal.
    pub fn resolve_latency(&self) -> Option<Duration> {
        self.core.resolve_latency()
    }

    /// Register an error hook. Hooks run in registration order when
    /// resolution fails; a hook may consume, replace, or transform the
    /// error. Registration does not force.
    pub fn on_error<F>(&self, hook: F)
    where
        F: FnMut(&mut Session, Error) -> HookVerdict + Send + 'static,
    {
        self.core.push_hook(Box::new(hook));
    }

    /// Block until the reply is materialized; return it or raise the
    /// stored error. Repeated calls return the cached materialization
    /// without touching the connection.
    pub fn force(&self) -> Result<Arc<SqlResult>> {
        if let Some(outcome) = self.core.terminal_outcome() {
            return outcome;
        }
        {
            let mut session = self.session.lock();
            // Re-check under the lock: a drain on another handle from this
            // connection may have resolved us meanwhile.
            if self.core.terminal_outcome().is_none() {
                session.drain_until(Some(&self.core))?;
            }
        }
        self.core.terminal_outcome().unwrap_or_else(|| {
            Err(Error::Protocol(
                "drain finished without resolving the forced handle".into(),
            ))
        })
    }

    /// Force, then return the rows.
    pub fn rows(&self) -> Result<Vec<Vec<Value>>> {
        Ok(self.force()?.rows().to_vec())
    }

    /// Force, then return the column names.
    pub fn columns(&self) -> Result<Vec<String>> {
        Ok(self.force()?.columns().to_vec())
    }

    /// Force, then return the affected-row count.
    pub fn affected(&self) -> Result<u64> {
        Ok(self.force()?.affected())
    }

    /// Force, then return the first row, if any.
    pub fn first(&self) -> Result<Option<Vec<Value>>> {
        Ok(self.force()?.first().map(|r| r.to_vec()))
    }

    /// Force, then return the number of rows.
    pub fn len(&self) -> Result<usize> {
        Ok(self.force()?.len())
    }

    /// Force, then report whether the result has no rows.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.force()?.is_empty())
    }
}

/// Equality between handles is identity and does not force: two handles are
/// equal when they stand for the same queued request.
impl PartialEq for DeferredResult {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

/// Equality against a materialized result forces first. A handle whose
/// resolution failed compares unequal to every value.
impl PartialEq<SqlResult> for DeferredResult {
    fn eq(&self, other: &SqlResult) -> bool {
        self.force().map(|value| *value == *other).unwrap_or(false)
    }
}

/// Equality against plain rows forces first and compares row contents. A
/// handle whose resolution failed compares unequal to every value.
impl PartialEq<Vec<Vec<Value>>> for DeferredResult {
    fn eq(&self, other: &Vec<Vec<Value>>) -> bool {
        self.force()
            .map(|value| value.rows() == other.as_slice())
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for DeferredResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredResult")
            .field("sql", &self.core.sql())
            .field("scheduled", &self.core.is_pending())
            .finish()
    }
}
