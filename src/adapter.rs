//! The adapter facade.
//!
//! [`Adapter`] is the user-visible surface over one pipelined backend
//! connection: issue queries (deferred in pipeline mode, synchronous
//! otherwise), run raw commands, manage transactions, and control the
//! connection lifecycle.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::deferred::DeferredResult;
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::TransactionStatus;
use crate::result::RowSet;
use crate::session::Session;
use crate::types::TypeRegistry;
use crate::value::Value;
use crate::wire::{WireClient, WireConn};

/// A pipelined PostgreSQL connection adapter.
///
/// One adapter owns one backend connection; a single mutex serializes all
/// pipeline operations on it. For concurrency, check out one adapter per
/// thread from a [`Pool`](crate::pool::Pool).
pub struct Adapter {
    session: Arc<Mutex<Session>>,
}

impl Adapter {
    /// Connect to a PostgreSQL server with the default type registry.
    pub fn connect<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let opts = opts.try_into()?;
        let client = WireConn::connect(&opts)?;
        Self::with_client(Box::new(client), TypeRegistry::with_defaults(), opts)
    }

    /// Build an adapter over an already-established protocol client.
    ///
    /// This is the seam the tests drive a scripted client through; it also
    /// allows callers to supply their own registry.
    pub fn with_client(
        client: Box<dyn WireClient>,
        registry: TypeRegistry,
        opts: Opts,
    ) -> Result<Self> {
        let session = Session::new(client, Arc::new(registry), opts)?;
        Ok(Self {
            session: Arc::new(Mutex::new(session)),
        })
    }

    /// Issue a parameterized query.
    ///
    /// In pipeline mode this enqueues the request and returns a pending
    /// [`DeferredResult`] whose accessors force materialization; with
    /// pipelining off the request resolves before returning. Rows are
    /// decoded through the type registry either way.
    ///
    /// `name` labels the statement in instrumentation. With `prepare` the
    /// statement goes through the prepared-statement cache and carries the
    /// cache-expiry retry hook.
    pub fn exec_query(
        &self,
        sql: &str,
        name: &str,
        binds: Vec<Option<String>>,
        prepare: bool,
    ) -> Result<DeferredResult> {
        let mut session = self.session.lock();
        let callback = Some(session.row_set_callback());
        let core = session.issue(sql, name, binds, prepare, callback)?;
        if !session.opts().pipeline {
            session.drain_until(Some(&core))?;
        }
        drop(session);
        Ok(DeferredResult::new(core, Arc::clone(&self.session)))
    }

    /// Execute a raw command synchronously and return its affected-row
    /// count. Goes through the flush helper, so outstanding pipelined work
    /// drains first.
    pub fn execute(&self, sql: &str, name: &str) -> Result<u64> {
        self.session.lock().execute_command(name, sql)
    }

    /// Run raw SQL synchronously and return undecoded rows.
    pub fn query(&self, sql: &str, name: &str) -> Result<Vec<Vec<Value>>> {
        self.session.lock().raw_query(name, sql)
    }

    /// Run a query and return the fully materialized row set.
    pub fn select_all(&self, sql: &str, binds: Vec<Option<String>>) -> Result<RowSet> {
        let handle = self.exec_query(sql, "SELECT", binds, false)?;
        let result = handle.force()?;
        Ok(result.row_set().cloned().unwrap_or_default())
    }

    /// Run a query and return the first row as (column, value) pairs.
    pub fn select_one(
        &self,
        sql: &str,
        binds: Vec<Option<String>>,
    ) -> Result<Option<Vec<(String, Value)>>> {
        let set = self.select_all(sql, binds)?;
        Ok(set.rows.first().map(|row| {
            set.columns
                .iter()
                .cloned()
                .zip(row.iter().cloned())
                .collect()
        }))
    }

    /// Run a query and return the first value of the first row.
    pub fn select_value(&self, sql: &str, binds: Vec<Option<String>>) -> Result<Option<Value>> {
        let set = self.select_all(sql, binds)?;
        Ok(set.rows.first().and_then(|row| row.first().cloned()))
    }

    /// Run a query and return the first column of every row.
    pub fn select_values(&self, sql: &str, binds: Vec<Option<String>>) -> Result<Vec<Value>> {
        let set = self.select_all(sql, binds)?;
        Ok(set
            .rows
            .iter()
            .filter_map(|row| row.first().cloned())
            .collect())
    }

    /// Open a transaction.
    pub fn begin(&self) -> Result<()> {
        self.session
            .lock()
            .flush_pipeline_and_sync("TRANSACTION", "BEGIN", &[], |client| {
                client.send_query("BEGIN", &[])
            })
            .map(|_| ())
    }

    /// Commit the open transaction.
    pub fn commit(&self) -> Result<()> {
        self.session
            .lock()
            .flush_pipeline_and_sync("TRANSACTION", "COMMIT", &[], |client| {
                client.send_query("COMMIT", &[])
            })
            .map(|_| ())
    }

    /// Roll back the open transaction.
    pub fn rollback(&self) -> Result<()> {
        self.session
            .lock()
            .flush_pipeline_and_sync("TRANSACTION", "ROLLBACK", &[], |client| {
                client.send_query("ROLLBACK", &[])
            })
            .map(|_| ())
    }

    /// The connection's transaction status as of the last sync boundary.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.session.lock().transaction_status()
    }

    /// Drain outstanding work, roll back if a transaction is open, and
    /// DISCARD ALL. Leaves the connection pristine.
    pub fn reset(&self) -> Result<()> {
        self.session.lock().reset()
    }

    /// Re-establish the backend connection. Pending handles are failed
    /// with a reset error.
    pub fn reconnect(&self) -> Result<()> {
        self.session.lock().reconnect()
    }

    /// Close the backend connection. Pending handles are failed with a
    /// reset error. Never raises.
    pub fn disconnect(&self) {
        self.session.lock().disconnect()
    }

    /// Probe whether the connection is usable.
    pub fn is_active(&self) -> bool {
        self.session.lock().is_active()
    }

    /// Cheap health check: the transport has not failed. Does not probe.
    pub fn is_healthy(&self) -> bool {
        self.session.lock().healthy()
    }

    /// Number of requests issued but not yet resolved.
    pub fn pending_count(&self) -> usize {
        self.session.lock().pending_count()
    }

    /// Number of statements in the prepared-statement cache.
    pub fn statement_cache_len(&self) -> usize {
        self.session.lock().statement_cache_len()
    }

    /// The check-in hook: settle all outstanding handles so the connection
    /// can return to a pool. Never raises.
    pub fn check_in_cleanup(&self) {
        self.session.lock().check_in_cleanup()
    }
}
