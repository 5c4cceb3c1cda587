//! Service context shared by the dispatcher and the server

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::pool::ConnectionPool;

/// Process-wide gateway state: the slave pool and the response timeout
#[derive(Debug)]
pub struct GatewayContext {
    pool: ConnectionPool,
    timeout_us: AtomicU64,
}

impl GatewayContext {
    pub fn new(pool: ConnectionPool, timeout_us: u64) -> Self {
        Self {
            pool,
            timeout_us: AtomicU64::new(timeout_us),
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Response timeout in microseconds
    pub fn timeout_us(&self) -> u64 {
        self.timeout_us.load(Ordering::SeqCst)
    }

    /// Change the response timeout
    ///
    /// Sessions pick the new value up on their next connect.
    pub fn set_timeout_us(&self, timeout_us: u64) {
        self.timeout_us.store(timeout_us, Ordering::SeqCst);
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_micros(self.timeout_us())
    }
}
