//! A pipelined PostgreSQL client adapter.
//!
//! # Features
//!
//! - **Pipeline mode**: requests go out without waiting for replies; each
//!   issue returns a deferred result handle immediately
//! - **Transparent materialization**: forcing a handle drains the reply
//!   stream and binds replies to handles in FIFO order
//! - **Prepared statement cache**: LRU-bounded, with transparent retry when
//!   the server invalidates a cached plan
//! - **Pooling**: check-in drains outstanding handles before reuse
//!
//! # Example
//!
//! ```no_run
//! use pg_pipeline::{Adapter, Opts};
//!
//! fn main() -> pg_pipeline::Result<()> {
//!     let adapter = Adapter::connect("postgres://localhost/mydb")?;
//!
//!     // Both requests are on the wire before either reply is read.
//!     let users = adapter.exec_query(
//!         "SELECT id, name FROM users WHERE id IS NOT NULL",
//!         "User Load",
//!         vec![],
//!         true,
//!     )?;
//!     let count = adapter.exec_query("SELECT COUNT(*) FROM users", "User Count", vec![], false)?;
//!
//!     // Forcing the later handle resolves the earlier one as a side effect.
//!     println!("count: {:?}", count.first()?);
//!     println!("users: {:?}", users.rows()?);
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod deferred;
pub mod error;
pub mod opts;
pub mod pool;
pub mod protocol;
pub mod result;
pub mod session;
pub mod statements;
pub mod stream;
pub mod types;
pub mod value;
pub mod wire;

pub use adapter::Adapter;
pub use deferred::{DeferredResult, ErrorHook, HookVerdict};
pub use error::{Error, Result, ServerErrorFields};
pub use opts::{Opts, SslMode};
pub use pool::{Pool, PooledAdapter};
pub use protocol::{Oid, TransactionStatus};
pub use result::{RowSet, SqlResult};
pub use session::{Session, ENDLESS_LOOP_SECONDS};
pub use types::TypeRegistry;
pub use value::Value;
pub use wire::{RawRows, Reply, WireClient, WireConn};
