//! Integration tests for the pipelined adapter, driven through a scripted
//! protocol client.
//!
//! ## Test Matrix
//!
//! ### Deferred handles
//! - `test_deferred_force` - issue, force, cached re-access
//! - `test_two_in_flight_force_later` - forcing the later handle resolves both
//! - `test_transparent_materialization` - accessor output equals forced output
//! - `test_handle_equality_forces` - comparing against values materializes
//! - `test_handle_identity_does_not_force` - handle-to-handle equality is identity
//! - `test_early_stop_leaves_replies_for_later_drains`
//! - `test_non_pipeline_mode_resolves_inline`
//!
//! ### Ordering
//! - `test_admin_statement_waits_for_drain` - sync path runs after pipelined work
//! - `test_fifo_resolution` - k-th reply resolves k-th handle
//!
//! ### Prepared statements
//! - `test_prepared_statement_reuse` - second execution skips PREPARE
//! - `test_lru_eviction_deallocates` - cache bound and DEALLOCATE
//! - `test_cache_expiry_retry` - invalidated plan re-prepares transparently
//! - `test_cache_expiry_inside_transaction_is_fatal`
//!
//! ### Errors
//! - `test_pipeline_aborted_propagation` - failed + following request kinds
//! - `test_batch_abort_outside_transaction` - aborted unit fails the batch tail
//! - `test_error_hook_consumes_transport_failure`
//! - `test_read_only_rejects_before_transmission`
//!
//! ### Lifecycle
//! - `test_check_in_drains_pending`
//! - `test_reconnect_fails_pending_handles`

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use pg_pipeline::protocol::backend::ColumnDesc;
use pg_pipeline::{
    Adapter, Error, HookVerdict, Opts, RawRows, Reply, Result, ServerErrorFields,
    TransactionStatus, TypeRegistry, Value, WireClient,
};

// === Scripted client ===

#[derive(Default, Clone)]
struct SentLog(Arc<Mutex<Vec<String>>>);

impl SentLog {
    fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    fn position(&self, prefix: &str) -> Option<usize> {
        self.entries().iter().position(|e| e.starts_with(prefix))
    }
}

/// A `WireClient` that replays a canned reply script and records every
/// operation sent.
struct ScriptedClient {
    replies: VecDeque<Result<Reply>>,
    log: SentLog,
    status: TransactionStatus,
    healthy: bool,
}

impl ScriptedClient {
    fn new(replies: Vec<Result<Reply>>, log: SentLog) -> Self {
        Self {
            replies: replies.into(),
            log,
            status: TransactionStatus::Idle,
            healthy: true,
        }
    }
}

impl WireClient for ScriptedClient {
    fn send_query(&mut self, sql: &str, _params: &[Option<String>]) -> Result<()> {
        self.log.push(format!("query:{}", sql));
        Ok(())
    }

    fn send_prepared(&mut self, name: &str, _params: &[Option<String>]) -> Result<()> {
        self.log.push(format!("exec:{}", name));
        Ok(())
    }

    fn send_prepare(&mut self, name: &str, sql: &str) -> Result<()> {
        self.log.push(format!("prepare:{}:{}", name, sql));
        Ok(())
    }

    fn send_deallocate(&mut self, name: &str) -> Result<()> {
        self.log.push(format!("close:{}", name));
        Ok(())
    }

    fn pipeline_sync(&mut self) -> Result<()> {
        self.log.push("sync".into());
        Ok(())
    }

    fn next_reply(&mut self) -> Result<Reply> {
        let reply = self
            .replies
            .pop_front()
            .unwrap_or_else(|| Err(Error::Protocol("reply script exhausted".into())))?;
        if let Reply::Sync(status) = &reply {
            self.status = *status;
        }
        Ok(reply)
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.status
    }

    fn enter_pipeline(&mut self) -> Result<()> {
        Ok(())
    }

    fn exit_pipeline(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.healthy
    }

    fn reconnect(&mut self) -> Result<()> {
        self.log.push("reconnect".into());
        self.healthy = true;
        self.status = TransactionStatus::Idle;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.log.push("close-conn".into());
        self.healthy = false;
        Ok(())
    }
}

// === Script helpers ===

fn init_logging() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

fn adapter_with(replies: Vec<Result<Reply>>) -> (Adapter, SentLog) {
    adapter_with_opts(replies, Opts::default())
}

fn adapter_with_opts(replies: Vec<Result<Reply>>, opts: Opts) -> (Adapter, SentLog) {
    init_logging();
    let log = SentLog::default();
    let client = ScriptedClient::new(replies, log.clone());
    let adapter =
        Adapter::with_client(Box::new(client), TypeRegistry::with_defaults(), opts).unwrap();
    (adapter, log)
}

fn sync() -> Result<Reply> {
    Ok(Reply::Sync(TransactionStatus::Idle))
}

fn sync_with(status: TransactionStatus) -> Result<Reply> {
    Ok(Reply::Sync(status))
}

fn command(n: u64) -> Result<Reply> {
    Ok(Reply::Command(n))
}

fn aborted() -> Result<Reply> {
    Ok(Reply::Aborted)
}

/// A user row set: (id int4, name text).
fn user_rows(users: &[(i64, &str)]) -> Result<Reply> {
    Ok(Reply::Rows(RawRows {
        columns: vec![
            ColumnDesc {
                name: "id".into(),
                type_oid: 23,
                type_modifier: -1,
            },
            ColumnDesc {
                name: "name".into(),
                type_oid: 25,
                type_modifier: -1,
            },
        ],
        rows: users
            .iter()
            .map(|(id, name)| vec![Some(id.to_string()), Some((*name).to_string())])
            .collect(),
        affected: users.len() as u64,
    }))
}

fn server_error(code: &str, message: &str) -> Result<Reply> {
    Ok(Reply::Error(ServerErrorFields {
        severity: Some("ERROR".into()),
        code: Some(code.into()),
        message: Some(message.into()),
        ..Default::default()
    }))
}

fn transport_error() -> Result<Reply> {
    Err(Error::from(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "connection reset by peer",
    )))
}

fn user(id: i64, name: &str) -> Vec<Value> {
    vec![Value::Int(id), Value::Text(name.to_string())]
}

// === Deferred handles ===

/// S1: issue deferred, force, re-access without re-draining.
#[test]
fn test_deferred_force() {
    let (adapter, _log) = adapter_with(vec![user_rows(&[(3, "ada"), (4, "grace")]), sync()]);

    let handle = adapter
        .exec_query(
            "SELECT * FROM users WHERE id IS NOT NULL",
            "User Load",
            vec![],
            false,
        )
        .unwrap();
    assert!(handle.scheduled());

    let rows = handle.rows().unwrap();
    assert_eq!(rows, vec![user(3, "ada"), user(4, "grace")]);
    assert!(!handle.scheduled());

    // The script is exhausted: a second access must come from the cached
    // materialization, not another drain.
    assert_eq!(handle, vec![user(3, "ada"), user(4, "grace")]);
    assert_eq!(handle.columns().unwrap(), vec!["id", "name"]);
}

/// S2: two in flight share one sync unit; forcing the later handle
/// resolves both.
#[test]
fn test_two_in_flight_force_later() {
    let (adapter, log) = adapter_with(vec![
        user_rows(&[(3, "ada"), (4, "grace")]),
        user_rows(&[(4, "grace")]),
        sync(),
    ]);

    let h1 = adapter
        .exec_query("SELECT * FROM users WHERE id IS NOT NULL", "User Load", vec![], false)
        .unwrap();
    let h2 = adapter
        .exec_query(
            "SELECT * FROM users WHERE id = $1",
            "User Load",
            vec![Some("4".into())],
            false,
        )
        .unwrap();
    // Nothing synced yet: both requests sit in one open unit.
    assert!(!log.entries().contains(&"sync".to_string()));

    // Force the later handle first.
    assert_eq!(h2.first().unwrap(), Some(user(4, "grace")));
    // Exactly one boundary went out for the batch.
    let syncs = log.entries().iter().filter(|e| *e == "sync").count();
    assert_eq!(syncs, 1);
    // The earlier one was resolved as a side effect.
    assert!(!h1.scheduled());
    assert_eq!(h1, vec![user(3, "ada"), user(4, "grace")]);
}

/// Invariant 3: `handle.op()` equals `force().op()`.
#[test]
fn test_transparent_materialization() {
    let (adapter, _log) = adapter_with(vec![user_rows(&[(7, "alan")]), sync()]);

    let handle = adapter
        .exec_query("SELECT * FROM users", "User Load", vec![], false)
        .unwrap();

    let forced = handle.force().unwrap();
    assert_eq!(handle.rows().unwrap(), forced.rows().to_vec());
    assert_eq!(handle.len().unwrap(), forced.len());
    assert_eq!(handle.affected().unwrap(), forced.affected());
    assert_eq!(handle.is_empty().unwrap(), forced.is_empty());
}

/// Two handles can compare for identity without draining anything.
#[test]
fn test_handle_identity_does_not_force() {
    let (adapter, _log) = adapter_with(vec![]);

    let h1 = adapter
        .exec_query("SELECT 1", "Q1", vec![], false)
        .unwrap();
    let h2 = adapter
        .exec_query("SELECT 2", "Q2", vec![], false)
        .unwrap();

    assert!(h1 == h1, "a handle equals itself");
    assert!(h1 != h2);
    // Identity comparison read no replies.
    assert!(h1.scheduled() && h2.scheduled());
}

/// Comparing a handle against a non-handle value materializes it first.
#[test]
fn test_handle_equality_forces() {
    let (adapter, _log) = adapter_with(vec![user_rows(&[(3, "ada")]), sync()]);

    let handle = adapter
        .exec_query("SELECT * FROM users WHERE id = $1", "User Load", vec![Some("3".into())], false)
        .unwrap();
    assert!(handle.scheduled());

    assert_eq!(handle, vec![user(3, "ada")]);
    assert!(!handle.scheduled());

    // Equality against the materialized result goes through force as well.
    let forced = handle.force().unwrap();
    assert!(handle == *forced);
    assert!(handle != vec![user(4, "grace")]);
}

/// Forcing an earlier handle stops the drain; later replies stay on the
/// socket for the next pass.
#[test]
fn test_early_stop_leaves_replies_for_later_drains() {
    let (adapter, _log) = adapter_with(vec![
        user_rows(&[(1, "a")]),
        user_rows(&[(2, "b")]),
        sync(),
    ]);

    let h1 = adapter
        .exec_query("SELECT 1", "Q1", vec![], false)
        .unwrap();
    let h2 = adapter
        .exec_query("SELECT 2", "Q2", vec![], false)
        .unwrap();

    assert_eq!(h1.first().unwrap(), Some(user(1, "a")));
    // h2 is still pending; its reply has not been consumed.
    assert!(h2.scheduled());
    assert_eq!(h2.first().unwrap(), Some(user(2, "b")));
}

#[test]
fn test_non_pipeline_mode_resolves_inline() {
    let opts = Opts {
        pipeline: false,
        ..Default::default()
    };
    let (adapter, _log) = adapter_with_opts(vec![user_rows(&[(1, "a")]), sync()], opts);

    let handle = adapter
        .exec_query("SELECT 1", "Q", vec![], false)
        .unwrap();
    // Already resolved: no deferred work left.
    assert!(!handle.scheduled());
    assert_eq!(handle.len().unwrap(), 1);
}

// === Ordering ===

/// S3: an administrative statement issued while a handle is in flight runs
/// only after the pipelined work drains; instrumented order is preserved.
#[test]
fn test_admin_statement_waits_for_drain() {
    let (adapter, log) = adapter_with(vec![
        user_rows(&[(1, "a")]),
        sync(),
        command(0),
        sync(),
    ]);

    let h1 = adapter
        .exec_query("SELECT * FROM users", "User Load", vec![], false)
        .unwrap();
    assert!(h1.scheduled());

    adapter.execute("SET search_path TO public", "SCHEMA").unwrap();

    // The drain ran before the admin statement went out.
    assert!(!h1.scheduled());
    let user_pos = log.position("query:SELECT * FROM users").unwrap();
    let admin_pos = log.position("query:SET search_path").unwrap();
    assert!(user_pos < admin_pos);
}

/// Invariant 1: the k-th reply resolves the k-th handle.
#[test]
fn test_fifo_resolution() {
    let (adapter, _log) = adapter_with(vec![
        user_rows(&[(1, "a")]),
        user_rows(&[(2, "b")]),
        user_rows(&[(3, "c")]),
        sync(),
    ]);

    let handles: Vec<_> = (1..=3)
        .map(|i| {
            adapter
                .exec_query(&format!("SELECT {}", i), "Q", vec![], false)
                .unwrap()
        })
        .collect();

    // Force the last; invariant 4 resolves all predecessors.
    assert_eq!(handles[2].first().unwrap(), Some(user(3, "c")));
    assert_eq!(handles[0].first().unwrap(), Some(user(1, "a")));
    assert_eq!(handles[1].first().unwrap(), Some(user(2, "b")));
}

// === Prepared statements ===

#[test]
fn test_prepared_statement_reuse() {
    let (adapter, log) = adapter_with(vec![
        // First issue: PREPARE, then the execution reply.
        command(0),
        sync(),
        user_rows(&[(3, "ada")]),
        sync(),
        // Second issue: cache hit, execution reply only.
        user_rows(&[(3, "ada")]),
        sync(),
    ]);

    let sql = "SELECT * FROM authors WHERE user_id = $1";
    let h1 = adapter
        .exec_query(sql, "Author Load", vec![Some("3".into())], true)
        .unwrap();
    assert_eq!(h1.len().unwrap(), 1);

    let h2 = adapter
        .exec_query(sql, "Author Load", vec![Some("3".into())], true)
        .unwrap();
    assert_eq!(h2.len().unwrap(), 1);

    let prepares: Vec<_> = log
        .entries()
        .into_iter()
        .filter(|e| e.starts_with("prepare:"))
        .collect();
    assert_eq!(prepares.len(), 1, "second execution must reuse the name");
    assert_eq!(adapter.statement_cache_len(), 1);
}

/// Invariant 5: the cache never exceeds its bound and evictions deallocate.
#[test]
fn test_lru_eviction_deallocates() {
    let opts = Opts {
        statement_limit: 2,
        ..Default::default()
    };
    let (adapter, log) = adapter_with_opts(
        vec![
            // q1: prepare + exec
            command(0),
            sync(),
            user_rows(&[(1, "a")]),
            sync(),
            // q2: prepare + exec
            command(0),
            sync(),
            user_rows(&[(2, "b")]),
            sync(),
            // q3: prepare, deallocate of the evicted name, exec
            command(0),
            sync(),
            command(0),
            sync(),
            user_rows(&[(3, "c")]),
            sync(),
        ],
        opts,
    );

    for i in 1..=3 {
        let handle = adapter
            .exec_query(&format!("SELECT {}", i), "Q", vec![], true)
            .unwrap();
        handle.force().unwrap();
    }

    assert_eq!(adapter.statement_cache_len(), 2);
    // ps_1 (the LRU entry) was deallocated when ps_3 came in.
    assert!(log.entries().contains(&"close:ps_1".to_string()));
}

/// S4: a cached-plan invalidation re-prepares and re-executes; the original
/// handle resolves with the fresh rows.
#[test]
fn test_cache_expiry_retry() {
    let (adapter, log) = adapter_with(vec![
        // PREPARE ps_1
        command(0),
        sync(),
        // Execution fails: plan invalidated by a schema change.
        server_error("0A000", "cached plan must not change result type"),
        sync(),
        // DEALLOCATE ps_1
        command(0),
        sync(),
        // PREPARE ps_2
        command(0),
        sync(),
        // Retried execution succeeds with the new column set.
        user_rows(&[(3, "ada")]),
        sync(),
    ]);

    let sql = "SELECT * FROM authors WHERE user_id = $1";
    let handle = adapter
        .exec_query(sql, "Author Load", vec![Some("3".into())], true)
        .unwrap();

    // One force; the retry happens inside the drain.
    assert_eq!(handle.rows().unwrap(), vec![user(3, "ada")]);

    let entries = log.entries();
    assert!(entries.contains(&"close:ps_1".to_string()));
    assert!(entries.iter().any(|e| e.starts_with("prepare:ps_2:")));
    assert!(entries.contains(&"exec:ps_2".to_string()));
    assert_eq!(adapter.statement_cache_len(), 1);
}

#[test]
fn test_cache_expiry_inside_transaction_is_fatal() {
    let (adapter, _log) = adapter_with(vec![
        // BEGIN
        command(0),
        sync_with(TransactionStatus::InTransaction),
        // PREPARE ps_1
        command(0),
        sync_with(TransactionStatus::InTransaction),
        // Execution fails with the invalidated plan; transaction now failed.
        server_error("0A000", "cached plan must not change result type"),
        sync_with(TransactionStatus::Failed),
    ]);

    adapter.begin().unwrap();
    let handle = adapter
        .exec_query("SELECT * FROM authors", "Author Load", vec![], true)
        .unwrap();

    let err = handle.force().unwrap_err();
    assert!(matches!(err, Error::CacheExpired(_)));
    // The stale entry is gone so the next use after rollback re-prepares.
    assert_eq!(adapter.statement_cache_len(), 0);
}

// === Errors ===

/// S5: a failed request aborts the rest of its sync unit; the following
/// request resolves with the prior-query kind, and the connection works
/// after ROLLBACK.
#[test]
fn test_pipeline_aborted_propagation() {
    let (adapter, _log) = adapter_with(vec![
        // BEGIN
        command(0),
        sync_with(TransactionStatus::InTransaction),
        // H1 violates a constraint; H2 shares its unit and is discarded.
        server_error("23505", "duplicate key value violates unique constraint"),
        aborted(),
        sync_with(TransactionStatus::Failed),
        // ROLLBACK
        command(0),
        sync(),
        // Post-rollback probe works.
        user_rows(&[(1, "a")]),
        sync(),
    ]);

    adapter.begin().unwrap();
    let h1 = adapter
        .exec_query("INSERT INTO t VALUES (1)", "Insert", vec![], false)
        .unwrap();
    let h2 = adapter
        .exec_query("SELECT * FROM t", "Load", vec![], false)
        .unwrap();

    // Force the later handle first.
    let e2 = h2.force().unwrap_err();
    assert!(matches!(e2, Error::PriorQueryAborted(_)), "got {:?}", e2);

    let e1 = h1.force().unwrap_err();
    assert!(matches!(e1, Error::Statement(_)), "got {:?}", e1);
    assert!(e1.to_string().contains("duplicate key"));

    adapter.rollback().unwrap();
    let probe = adapter
        .exec_query("SELECT * FROM t", "Load", vec![], false)
        .unwrap();
    assert_eq!(probe.len().unwrap(), 1);
}

/// Outside a transaction a failed statement still aborts its whole sync
/// unit: every later request in the batch resolves as a prior-query
/// failure when the first one's force drains the unit.
#[test]
fn test_batch_abort_outside_transaction() {
    let (adapter, _log) = adapter_with(vec![
        server_error("22012", "division by zero"),
        aborted(),
        aborted(),
        sync(),
    ]);

    let h1 = adapter
        .exec_query("SELECT 1/0", "Bad", vec![], false)
        .unwrap();
    let h2 = adapter
        .exec_query("SELECT 2", "Q2", vec![], false)
        .unwrap();
    let h3 = adapter
        .exec_query("SELECT 3", "Q3", vec![], false)
        .unwrap();

    assert!(matches!(h1.force().unwrap_err(), Error::Data(_)));
    // The unit tail was settled while draining for h1.
    assert!(!h2.scheduled() && !h3.scheduled());
    assert!(matches!(h2.force().unwrap_err(), Error::PriorQueryAborted(_)));
    assert!(matches!(h3.force().unwrap_err(), Error::PriorQueryAborted(_)));
}

/// S6: an error hook can consume a transport failure; forcing then returns
/// an empty result instead of raising.
#[test]
fn test_error_hook_consumes_transport_failure() {
    let (adapter, _log) = adapter_with(vec![transport_error()]);

    let handle = adapter
        .exec_query("SELECT * FROM t", "Load", vec![], false)
        .unwrap();

    let fired = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&fired);
    handle.on_error(move |_session, _error| {
        flag.store(true, Ordering::SeqCst);
        HookVerdict::Consumed
    });

    let result = handle.force().unwrap();
    assert!(fired.load(Ordering::SeqCst));
    assert!(result.is_empty());
}

/// A failing hook's error replaces the current one for later hooks.
#[test]
fn test_error_hooks_chain_in_order() {
    let (adapter, _log) = adapter_with(vec![
        server_error("42601", "syntax error"),
        sync(),
    ]);

    let handle = adapter
        .exec_query("SELEC 1", "Broken", vec![], false)
        .unwrap();
    handle.on_error(|_session, _error| {
        HookVerdict::Unhandled(Error::InvalidUsage("transformed".into()))
    });
    let seen = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&seen);
    handle.on_error(move |_session, error| {
        *slot.lock().unwrap() = Some(error.to_string());
        HookVerdict::Unhandled(error)
    });

    let err = handle.force().unwrap_err();
    assert!(matches!(err, Error::InvalidUsage(_)));
    assert_eq!(
        seen.lock().unwrap().as_deref(),
        Some("invalid usage: transformed")
    );
}

#[test]
fn test_read_only_rejects_before_transmission() {
    let opts = Opts {
        read_only: true,
        ..Default::default()
    };
    let (adapter, log) = adapter_with_opts(vec![], opts);

    let err = adapter
        .exec_query("INSERT INTO t VALUES (1)", "Insert", vec![], false)
        .unwrap_err();
    assert!(matches!(err, Error::ReadOnly(_)));
    assert!(log.entries().is_empty(), "nothing may reach the wire");

    let err = adapter.execute("DROP TABLE t", "DDL").unwrap_err();
    assert!(matches!(err, Error::ReadOnly(_)));
}

// === Lifecycle ===

/// Invariant 6: check-in leaves an empty queue and a usable connection.
#[test]
fn test_check_in_drains_pending() {
    let (adapter, _log) = adapter_with(vec![
        user_rows(&[(1, "a")]),
        user_rows(&[(2, "b")]),
        sync(),
        command(1),
        sync(),
    ]);

    let _h1 = adapter
        .exec_query("SELECT 1", "Q1", vec![], false)
        .unwrap();
    let _h2 = adapter
        .exec_query("SELECT 2", "Q2", vec![], false)
        .unwrap();
    assert_eq!(adapter.pending_count(), 2);

    adapter.check_in_cleanup();
    assert_eq!(adapter.pending_count(), 0);

    // The connection still works for the next check-out.
    assert_eq!(adapter.execute("DELETE FROM t", "Cleanup").unwrap(), 1);
}

#[test]
fn test_reconnect_fails_pending_handles() {
    let (adapter, log) = adapter_with(vec![]);

    let handle = adapter
        .exec_query("SELECT 1", "Q", vec![], false)
        .unwrap();
    assert!(handle.scheduled());

    adapter.reconnect().unwrap();

    let err = handle.force().unwrap_err();
    assert!(matches!(err, Error::ConnectionReset), "got {:?}", err);
    assert!(log.entries().contains(&"reconnect".to_string()));
}

#[test]
fn test_disconnect_fails_pending_handles() {
    let (adapter, _log) = adapter_with(vec![]);

    let handle = adapter
        .exec_query("SELECT 1", "Q", vec![], false)
        .unwrap();
    adapter.disconnect();

    assert!(matches!(handle.force().unwrap_err(), Error::ConnectionReset));
    assert!(!adapter.is_healthy());
}

/// `select_*` conveniences ride the same pipeline.
#[test]
fn test_select_helpers() {
    let (adapter, _log) = adapter_with(vec![
        user_rows(&[(3, "ada"), (4, "grace")]),
        sync(),
        user_rows(&[(3, "ada")]),
        sync(),
        user_rows(&[(3, "ada"), (4, "grace")]),
        sync(),
    ]);

    let all = adapter.select_all("SELECT * FROM users", vec![]).unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all.get(1, "name"), Some(&Value::Text("grace".into())));

    let one = adapter
        .select_one("SELECT * FROM users LIMIT 1", vec![])
        .unwrap()
        .unwrap();
    assert_eq!(one[0], ("id".to_string(), Value::Int(3)));

    let values = adapter
        .select_values("SELECT id FROM users", vec![])
        .unwrap();
    assert_eq!(values, vec![Value::Int(3), Value::Int(4)]);
}
