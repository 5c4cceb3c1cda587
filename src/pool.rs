//! Slave connection pool
//!
//! The pool maps a [`SlaveKey`] to exactly one [`SlaveConnection`] for the
//! lifetime of the process. Entries are created on first use and never
//! evicted. A connection that fails with a reset-class error is marked
//! disconnected and re-opened by the next request against the same key.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{Mutex, RwLock};

use crate::error::{ModbusError, ModbusResult};
use crate::transport::{SessionFactory, SlaveSession, TcpSessionFactory, TransportStats};

/// Identity of a slave endpoint
///
/// Equality is exact string equality on both fields, so `"502"` and
/// `"modbus"` are different keys even though they reach the same port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlaveKey {
    pub host: String,
    pub service: String,
}

impl SlaveKey {
    pub fn new<H: Into<String>, S: Into<String>>(host: H, service: S) -> Self {
        Self {
            host: host.into(),
            service: service.into(),
        }
    }
}

impl fmt::Display for SlaveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.service)
    }
}

/// One pooled session to one slave
pub struct SlaveConnection {
    key: SlaveKey,
    connected: bool,
    session: Box<dyn SlaveSession>,
}

impl SlaveConnection {
    /// Wrap a freshly allocated session; the entry starts disconnected
    pub fn new(key: SlaveKey, session: Box<dyn SlaveSession>) -> Self {
        Self {
            key,
            connected: false,
            session,
        }
    }

    pub fn key(&self) -> &SlaveKey {
        &self.key
    }

    /// Last known transport state. Never slaves the socket.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub fn mark_disconnected(&mut self) {
        self.connected = false;
    }

    /// Open the session unless it is already marked connected
    ///
    /// No I/O happens for a connected entry, even a stale one. On failure
    /// the entry stays disconnected and the transport error is returned
    /// unchanged; there is no retry.
    pub async fn ensure_connected(&mut self, timeout: Duration) -> ModbusResult<()> {
        if self.connected {
            return Ok(());
        }

        match self.session.connect(timeout).await {
            Ok(()) => {
                self.connected = true;
                info!("connected to {} (timeout {}us)", self.key, timeout.as_micros());
                Ok(())
            }
            Err(e) => {
                warn!("connect to {} failed: {}", self.key, e);
                Err(e)
            }
        }
    }

    pub fn session_mut(&mut self) -> &mut dyn SlaveSession {
        self.session.as_mut()
    }
}

impl fmt::Debug for SlaveConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlaveConnection")
            .field("key", &self.key)
            .field("connected", &self.connected)
            .finish()
    }
}

/// Shared handle to a pooled connection
///
/// The mutex serializes every operation on one slave; holders of different
/// handles never block each other.
pub type SlaveHandle = Arc<Mutex<SlaveConnection>>;

/// Keyed registry of slave connections
pub struct ConnectionPool {
    entries: RwLock<HashMap<SlaveKey, SlaveHandle>>,
    factory: Arc<dyn SessionFactory>,
}

impl ConnectionPool {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            factory,
        }
    }

    /// Pool backed by Modbus TCP sessions
    pub fn tcp() -> Self {
        Self::new(Arc::new(TcpSessionFactory))
    }

    /// Get the entry for `key`, creating it on first use
    ///
    /// A new entry is inserted whether or not its initial connect succeeds;
    /// the caller learns the outcome from [`SlaveConnection::is_connected`].
    /// Only session allocation failure is reported as an error.
    pub async fn resolve(&self, key: &SlaveKey, timeout: Duration) -> ModbusResult<SlaveHandle> {
        if let Some(handle) = self.entries.read().await.get(key) {
            return Ok(Arc::clone(handle));
        }

        let (handle, mut guard) = {
            let mut entries = self.entries.write().await;
            // Another task may have inserted it between the two locks
            if let Some(handle) = entries.get(key) {
                return Ok(Arc::clone(handle));
            }

            let session = self.factory.create(&key.host, &key.service).map_err(|e| {
                error!("cannot allocate session for {}: {}", key, e);
                e
            })?;
            let handle: SlaveHandle = Arc::new(Mutex::new(SlaveConnection::new(key.clone(), session)));

            // Locked before it is visible, so the first connect is
            // serialized with every later user of this key
            let guard = Arc::clone(&handle)
                .try_lock_owned()
                .map_err(|_| ModbusError::internal("new pool entry is already locked"))?;
            entries.insert(key.clone(), Arc::clone(&handle));
            debug!("pool entry created for {} ({} total)", key, entries.len());
            (handle, guard)
        };

        // Failure is already logged and leaves the entry disconnected
        let _ = guard.ensure_connected(timeout).await;
        drop(guard);

        Ok(handle)
    }

    /// Cached connection flag of an entry, without network I/O
    pub async fn connection_status(handle: &SlaveHandle) -> bool {
        handle.lock().await.is_connected()
    }

    /// Keys of all entries, in no particular order
    pub async fn list_entries(&self) -> Vec<SlaveKey> {
        let keys: Vec<SlaveKey> = self.entries.read().await.keys().cloned().collect();
        for key in &keys {
            debug!("pool entry {}", key);
        }
        keys
    }

    /// Counters of every pooled session, keyed by endpoint
    pub async fn session_stats(&self) -> Vec<(SlaveKey, TransportStats)> {
        let handles: Vec<(SlaveKey, SlaveHandle)> = self
            .entries
            .read()
            .await
            .iter()
            .map(|(key, handle)| (key.clone(), Arc::clone(handle)))
            .collect();

        let mut stats = Vec::with_capacity(handles.len());
        for (key, handle) in handles {
            let conn = handle.lock().await;
            stats.push((key, conn.session.get_stats()));
        }
        stats
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockFactory, MockSession};
    use std::io::ErrorKind;

    const TIMEOUT: Duration = Duration::from_millis(200);

    #[tokio::test]
    async fn test_resolve_returns_same_entry() {
        let factory = Arc::new(MockFactory::new());
        let pool = ConnectionPool::new(factory.clone());
        let key = SlaveKey::new("192.168.3.2", "502");

        let first = pool.resolve(&key, TIMEOUT).await.unwrap();
        let second = pool.resolve(&key, TIMEOUT).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.sessions_created(), 1);
        assert_eq!(factory.slave(0).connects(), 1);
        assert!(ConnectionPool::connection_status(&first).await);
    }

    #[tokio::test]
    async fn test_keys_compare_exactly() {
        let factory = Arc::new(MockFactory::new());
        let pool = ConnectionPool::new(factory.clone());

        pool.resolve(&SlaveKey::new("10.0.0.1", "502"), TIMEOUT).await.unwrap();
        pool.resolve(&SlaveKey::new("10.0.0.1", "modbus"), TIMEOUT).await.unwrap();
        pool.resolve(&SlaveKey::new("10.0.0.2", "502"), TIMEOUT).await.unwrap();

        assert_eq!(pool.len().await, 3);
        let mut keys = pool.list_entries().await;
        keys.sort_by(|a, b| (&a.host, &a.service).cmp(&(&b.host, &b.service)));
        assert_eq!(keys[0], SlaveKey::new("10.0.0.1", "502"));
        assert_eq!(keys[1], SlaveKey::new("10.0.0.1", "modbus"));
    }

    #[tokio::test]
    async fn test_failed_initial_connect_still_inserts() {
        let factory = Arc::new(MockFactory::new());
        factory.fail_connects(ModbusError::connection("Connection refused"));
        let pool = ConnectionPool::new(factory.clone());
        let key = SlaveKey::new("10.0.0.9", "502");

        let handle = pool.resolve(&key, TIMEOUT).await.unwrap();
        assert!(!ConnectionPool::connection_status(&handle).await);
        assert_eq!(pool.len().await, 1);

        let again = pool.resolve(&key, TIMEOUT).await.unwrap();
        assert!(Arc::ptr_eq(&handle, &again));
        assert_eq!(factory.sessions_created(), 1);
    }

    #[tokio::test]
    async fn test_allocation_failure() {
        let factory = Arc::new(MockFactory::new());
        factory.fail_allocation(true);
        let pool = ConnectionPool::new(factory);

        let err = pool
            .resolve(&SlaveKey::new("10.0.0.1", "502"), TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, ModbusError::Allocation { .. }));
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn test_concurrent_resolve_creates_one_session() {
        let factory = Arc::new(MockFactory::new());
        factory.delay_connects(Duration::from_millis(50));
        let pool = Arc::new(ConnectionPool::new(factory.clone()));
        let key = SlaveKey::new("10.0.0.1", "502");

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let key = key.clone();
                tokio::spawn(async move { pool.resolve(&key, TIMEOUT).await.unwrap() })
            })
            .collect();

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap());
        }

        assert_eq!(factory.sessions_created(), 1);
        assert_eq!(factory.slave(0).connects(), 1);
        assert!(handles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        // Every waiter observes the finished initial connect
        assert!(ConnectionPool::connection_status(&handles[0]).await);
    }

    #[tokio::test]
    async fn test_session_stats_per_entry() {
        let factory = Arc::new(MockFactory::new());
        let pool = ConnectionPool::new(factory.clone());
        let key = SlaveKey::new("10.0.0.1", "502");

        let handle = pool.resolve(&key, TIMEOUT).await.unwrap();
        {
            let mut conn = handle.lock().await;
            conn.session_mut().read_03(0, 2).await.unwrap();
            conn.session_mut().read_03(1000, 2).await.unwrap_err();
        }

        let stats = pool.session_stats().await;
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].0, key);
        assert_eq!(stats[0].1.connects, 1);
        assert_eq!(stats[0].1.requests_sent, 2);
        assert_eq!(stats[0].1.responses_received, 1);
        assert_eq!(stats[0].1.errors, 1);
    }

    #[tokio::test]
    async fn test_ensure_connected_is_lazy() {
        let (session, slave) = MockSession::new();
        let mut conn = SlaveConnection::new(SlaveKey::new("10.0.0.1", "502"), Box::new(session));

        conn.ensure_connected(TIMEOUT).await.unwrap();
        conn.ensure_connected(TIMEOUT).await.unwrap();
        assert_eq!(slave.connects(), 1);
        assert_eq!(slave.last_timeout(), Some(TIMEOUT));

        conn.mark_disconnected();
        conn.ensure_connected(Duration::from_millis(300)).await.unwrap();
        assert_eq!(slave.connects(), 2);
        assert_eq!(slave.last_timeout(), Some(Duration::from_millis(300)));
    }

    #[tokio::test]
    async fn test_ensure_connected_failure_keeps_disconnected() {
        let (session, slave) = MockSession::new();
        slave.fail_connects(ModbusError::io(ErrorKind::ConnectionRefused, "Connection refused"));
        let mut conn = SlaveConnection::new(SlaveKey::new("10.0.0.1", "502"), Box::new(session));

        let err = conn.ensure_connected(TIMEOUT).await.unwrap_err();
        assert_eq!(err.to_string(), "Connection refused");
        assert!(!conn.is_connected());

        slave.clear_connect_failure();
        conn.ensure_connected(TIMEOUT).await.unwrap();
        assert!(conn.is_connected());
    }
}
