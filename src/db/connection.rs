//! Connection pooling for database access.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::storage::{StorageError, StorageResult, Store};

/// A database connection from the pool.
///
/// Dropping it hands it back to the pool; a closed connection frees its
/// slot instead.
pub struct Connection {
    id: usize,
    store: Store,
    closed: bool,
    pool: Arc<ConnectionPoolInner>,
}

impl Connection {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn is_open(&self) -> bool {
        !self.closed && self.store.is_online()
    }

    /// Fail with an interface error if the connection cannot be used.
    pub fn check(&self) -> StorageResult<()> {
        if self.closed {
            return Err(StorageError::ConnectionClosed(self.id));
        }
        self.store.check_online()
    }

    /// Close the connection. Later use fails with an interface error.
    pub fn close(&mut self) {
        if !self.closed {
            debug!(connection = self.id, "connection closed");
        }
        self.closed = true;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.closed {
            self.pool.created.fetch_sub(1, Ordering::SeqCst);
        } else {
            self.pool.available.lock().push_back(self.id);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish()
    }
}

struct ConnectionPoolInner {
    store: Store,
    available: Mutex<VecDeque<usize>>,
    max_connections: usize,
    /// live connections, idle or in use
    created: AtomicUsize,
    next_id: AtomicUsize,
}

/// Connection pool for database access.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<ConnectionPoolInner>,
}

impl ConnectionPool {
    /// Create a new connection pool.
    pub fn new(store: Store, max_connections: usize) -> Self {
        Self {
            inner: Arc::new(ConnectionPoolInner {
                store,
                available: Mutex::new(VecDeque::new()),
                max_connections: max_connections.max(1),
                created: AtomicUsize::new(0),
                next_id: AtomicUsize::new(0),
            }),
        }
    }

    fn connection(&self, id: usize) -> Connection {
        Connection {
            id,
            store: self.inner.store.clone(),
            closed: false,
            pool: self.inner.clone(),
        }
    }

    /// Get a connection from the pool.
    pub fn get(&self) -> StorageResult<Connection> {
        self.inner.store.check_online()?;

        // Try to get an available connection.
        if let Some(id) = self.inner.available.lock().pop_front() {
            return Ok(self.connection(id));
        }

        // Create a new connection if under limit.
        let reserved = self
            .inner
            .created
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |created| {
                (created < self.inner.max_connections).then_some(created + 1)
            });
        match reserved {
            Ok(_) => {
                let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                debug!(database = self.inner.store.name(), connection = id, "opened connection");
                Ok(self.connection(id))
            }
            // No waiting: a full pool is a transient failure the caller may retry.
            Err(_) => Err(StorageError::PoolExhausted {
                max: self.inner.max_connections,
            }),
        }
    }

    /// Get the number of available connections.
    pub fn available(&self) -> usize {
        self.inner.available.lock().len()
    }

    /// Get the number of live connections.
    pub fn created(&self) -> usize {
        self.inner.created.load(Ordering::SeqCst)
    }

    pub fn max_connections(&self) -> usize {
        self.inner.max_connections
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("created", &self.created())
            .field("available", &self.available())
            .field("max_connections", &self.inner.max_connections)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ErrorKind;

    #[test]
    fn test_connection_pool() {
        let pool = ConnectionPool::new(Store::in_memory("test"), 5);
        let conn = pool.get().unwrap();
        assert!(conn.is_open());
        assert!(conn.check().is_ok());
        assert_eq!(pool.created(), 1);
    }

    #[test]
    fn test_pool_reuse() {
        let pool = ConnectionPool::new(Store::in_memory("test"), 5);

        {
            let _conn1 = pool.get().unwrap();
            let _conn2 = pool.get().unwrap();
            assert_eq!(pool.created(), 2);
        }

        // Connections returned to pool.
        assert_eq!(pool.available(), 2);

        // Reuse existing connection.
        let _conn3 = pool.get().unwrap();
        assert_eq!(pool.created(), 2); // No new connection created.
    }

    #[test]
    fn test_pool_exhausted() {
        let pool = ConnectionPool::new(Store::in_memory("test"), 1);
        let _conn = pool.get().unwrap();
        let err = pool.get().unwrap_err();
        assert!(matches!(err, StorageError::PoolExhausted { max: 1 }));
        assert_eq!(err.kind(), ErrorKind::Operational);
    }

    #[test]
    fn test_closed_connection_frees_slot() {
        let pool = ConnectionPool::new(Store::in_memory("test"), 1);
        {
            let mut conn = pool.get().unwrap();
            conn.close();
            let err = conn.check().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Interface);
        }
        assert_eq!(pool.available(), 0);
        assert_eq!(pool.created(), 0);
        assert!(pool.get().is_ok());
    }

    #[test]
    fn test_offline_store() {
        let store = Store::in_memory("test");
        let pool = ConnectionPool::new(store.clone(), 2);
        let conn = pool.get().unwrap();

        store.set_online(false);
        assert!(!conn.is_open());
        assert_eq!(pool.get().unwrap_err().kind(), ErrorKind::Interface);
    }
}
