//! Connection pool management with limits.
//!
//! Caps concurrent IPC connections with RAII guards that outlive the
//! accept loop's borrow, so they can move into per-connection tasks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

/// Configuration for connection pool.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub max_connections: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self { max_connections: 64 }
    }
}

/// Global connection pool with atomic counting.
#[derive(Debug)]
pub struct ConnectionPool {
    active: AtomicUsize,
    released: Notify,
    config: ConnectionConfig,
}

impl ConnectionPool {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            active: AtomicUsize::new(0),
            released: Notify::new(),
            config,
        }
    }

    /// Try to take a slot. The guard keeps the pool alive and frees the slot
    /// on drop.
    pub fn try_acquire_owned(self: &Arc<Self>) -> Option<OwnedConnectionGuard> {
        loop {
            let current = self.active.load(Ordering::Relaxed);
            if current >= self.config.max_connections {
                return None;
            }

            // CAS to atomically increment
            if self
                .active
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                return Some(OwnedConnectionGuard {
                    pool: Arc::clone(self),
                });
            }
            // CAS failed, retry
        }
    }

    /// Current number of active connections.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Maximum allowed connections.
    pub fn max_connections(&self) -> usize {
        self.config.max_connections
    }

    /// Wait until every slot is released or `timeout` passes. Returns the
    /// number of connections still open.
    pub async fn wait_for_drain(&self, timeout: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            // Register before reading the count so a release in between wakes us.
            notified.as_mut().enable();

            let count = self.active_count();
            if count == 0 {
                return 0;
            }

            let remaining_time = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining_time.is_zero() {
                return count;
            }

            tokio::select! {
                _ = &mut notified => continue,
                _ = tokio::time::sleep(remaining_time) => return self.active_count(),
            }
        }
    }

    fn release(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.released.notify_waiters();
    }
}

/// RAII guard that releases its slot on drop.
#[derive(Debug)]
pub struct OwnedConnectionGuard {
    pool: Arc<ConnectionPool>,
}

impl Drop for OwnedConnectionGuard {
    fn drop(&mut self) {
        self.pool.release();
    }
}
