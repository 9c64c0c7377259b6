//! Connection pool with the pipeline-aware check-in hook.

use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use std_semaphore::Semaphore;
use tracing::debug;

use crate::adapter::Adapter;
use crate::error::Result;
use crate::opts::Opts;

/// A fixed-capacity pool of adapters.
///
/// Checked-in adapters have been drained of pipeline state; a connection
/// that fails its check-in reset is dropped instead of being reused.
pub struct Pool {
    opts: Opts,
    conns: ArrayQueue<Adapter>,
    semaphore: Option<Semaphore>,
}

impl Pool {
    pub fn new(opts: Opts) -> Self {
        let semaphore = opts.pool_max_concurrency.map(|n| Semaphore::new(n as isize));
        Self {
            conns: ArrayQueue::new(opts.pool_max_idle_conn),
            opts,
            semaphore,
        }
    }

    /// Check out an adapter, connecting fresh when no healthy idle one is
    /// available.
    pub fn get(self: &Arc<Self>) -> Result<PooledAdapter> {
        if let Some(sem) = &self.semaphore {
            sem.acquire();
        }
        let conn = loop {
            match self.conns.pop() {
                Some(c) => {
                    if c.is_active() {
                        break c;
                    }
                    // Connection dead, try next one
                }
                None => break Adapter::connect(self.opts.clone())?,
            }
        };
        Ok(PooledAdapter {
            conn: ManuallyDrop::new(conn),
            pool: Arc::clone(self),
        })
    }

    /// The check-in hook: drain anything outstanding (never raises), then
    /// reset the backend session. Unusable connections are dropped.
    fn check_in(&self, conn: Adapter) {
        conn.check_in_cleanup();
        if !conn.is_healthy() {
            debug!("dropping broken connection at check-in");
            return;
        }
        if conn.reset().is_err() {
            debug!("dropping connection that failed check-in reset");
            return;
        }
        let _ = self.conns.push(conn);
    }
}

/// An adapter checked out from a [`Pool`]; returns itself on drop.
pub struct PooledAdapter {
    pool: Arc<Pool>,
    conn: ManuallyDrop<Adapter>,
}

impl Deref for PooledAdapter {
    type Target = Adapter;
    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for PooledAdapter {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl Drop for PooledAdapter {
    fn drop(&mut self) {
        // SAFETY: conn is never accessed after this
        let conn = unsafe { ManuallyDrop::take(&mut self.conn) };
        self.pool.check_in(conn);
        if let Some(sem) = &self.pool.semaphore {
            sem.release();
        }
    }
}
