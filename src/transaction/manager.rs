//! Transaction manager - coordinates all transaction operations.
//!
//! The TransactionManager is the main entry point for transactions.
//! It handles:
//! - Transaction creation on pooled connections
//! - Tracking active transactions
//! - Serializing commits
//! - Counting outcomes (commit, release, rollback)

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;
use ulid::Ulid;

use crate::db::ConnectionPool;
use crate::pool::Pool;
use crate::storage::UserId;
use crate::transaction::context::{Context, Transaction, TransactionMetadata, TxActive};
use crate::transaction::error::TransactionResult;

/// Outcome counters of a manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionStats {
    pub begun: u64,
    pub committed: u64,
    pub released: u64,
    pub rolled_back: u64,
}

#[derive(Default)]
struct Counters {
    begun: AtomicU64,
    committed: AtomicU64,
    released: AtomicU64,
    rolled_back: AtomicU64,
}

/// Transaction manager - coordinates all transaction operations.
///
/// Thread-safe: can be shared across threads via Clone (uses Arc internally).
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<TransactionManagerInner>,
}

struct TransactionManagerInner {
    pool: Pool,
    connections: ConnectionPool,
    /// Active transactions tracked by ID.
    active: RwLock<HashMap<String, TransactionMetadata>>,
    /// Serializes commits issued through this manager.
    commit_lock: Mutex<()>,
    counters: Counters,
}

impl TransactionManager {
    pub fn new(pool: Pool, connections: ConnectionPool) -> Self {
        Self {
            inner: Arc::new(TransactionManagerInner {
                pool,
                connections,
                active: RwLock::new(HashMap::new()),
                commit_lock: Mutex::new(()),
                counters: Counters::default(),
            }),
        }
    }

    pub fn pool(&self) -> &Pool {
        &self.inner.pool
    }

    /// Begin a new transaction on a pooled connection.
    pub fn begin(
        &self,
        user: UserId,
        readonly: bool,
        context: Context,
    ) -> TransactionResult<Transaction<TxActive>> {
        let connection = self.inner.connections.get()?;

        // Generate unique transaction ID
        let tx_id = Ulid::new().to_string().to_lowercase();

        let tx = Transaction::new(
            self.inner.pool.clone(),
            connection,
            tx_id.clone(),
            user,
            readonly,
            context,
        );

        self.inner.active.write().insert(tx_id.clone(), tx.metadata.clone());
        self.inner.counters.begun.fetch_add(1, Ordering::SeqCst);
        debug!(tx = %tx_id, user = %user, readonly, "transaction started");

        Ok(tx)
    }

    /// Get the number of active transactions.
    pub fn active_count(&self) -> usize {
        self.inner.active.read().len()
    }

    /// Check if a transaction is active.
    pub fn is_active(&self, tx_id: &str) -> bool {
        self.inner.active.read().contains_key(tx_id)
    }

    /// Get metadata for an active transaction.
    pub fn get_transaction_info(&self, tx_id: &str) -> Option<TransactionMetadata> {
        self.inner.active.read().get(tx_id).cloned()
    }

    fn mark_completed(&self, tx_id: &str) {
        self.inner.active.write().remove(tx_id);
    }

    /// Commit a transaction with serialization.
    ///
    /// A failed commit discards the write set and counts as a rollback.
    /// Returns the store head after the commit.
    pub fn commit_transaction(&self, tx: Transaction<TxActive>) -> TransactionResult<u64> {
        let _guard = self.inner.commit_lock.lock();
        let tx_id = tx.id().to_string();

        let result = tx.commit();
        self.mark_completed(&tx_id);

        match result {
            Ok(committed) => {
                self.inner.counters.committed.fetch_add(1, Ordering::SeqCst);
                debug!(tx = %tx_id, head = committed.head(), changes = committed.change_count(), "transaction committed");
                Ok(committed.head())
            }
            Err(e) => {
                self.inner.counters.rolled_back.fetch_add(1, Ordering::SeqCst);
                debug!(tx = %tx_id, error = %e, "commit failed, transaction rolled back");
                Err(e)
            }
        }
    }

    /// Close a transaction that wrote nothing.
    pub fn release(&self, tx: Transaction<TxActive>) -> TransactionResult<()> {
        let tx_id = tx.id().to_string();
        let result = tx.release();
        self.mark_completed(&tx_id);

        match result {
            Ok(_) => {
                self.inner.counters.released.fetch_add(1, Ordering::SeqCst);
                debug!(tx = %tx_id, "transaction released");
                Ok(())
            }
            Err(e) => {
                self.inner.counters.rolled_back.fetch_add(1, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Rollback a transaction.
    pub fn rollback_transaction(&self, tx: Transaction<TxActive>) {
        let tx_id = tx.id().to_string();
        let pending = tx.pending_changes().len();
        tx.rollback();
        self.mark_completed(&tx_id);
        self.inner.counters.rolled_back.fetch_add(1, Ordering::SeqCst);
        debug!(tx = %tx_id, discarded = pending, "transaction rolled back");
    }

    /// Execute a function within a transaction.
    ///
    /// On success a read-write transaction is committed and a read-only one
    /// released. On error the transaction is rolled back.
    pub fn with_transaction<F, T, E>(&self, user: UserId, readonly: bool, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Transaction<TxActive>) -> Result<T, E>,
        E: From<crate::transaction::TransactionError>,
    {
        let mut tx = self.begin(user, readonly, Context::new())?;

        match f(&mut tx) {
            Ok(result) => {
                if readonly {
                    self.release(tx)?;
                } else {
                    self.commit_transaction(tx)?;
                }
                Ok(result)
            }
            Err(e) => {
                self.rollback_transaction(tx);
                Err(e)
            }
        }
    }

    /// Snapshot of the outcome counters.
    pub fn stats(&self) -> TransactionStats {
        let counters = &self.inner.counters;
        TransactionStats {
            begun: counters.begun.load(Ordering::SeqCst),
            committed: counters.committed.load(Ordering::SeqCst),
            released: counters.released.load(Ordering::SeqCst),
            rolled_back: counters.rolled_back.load(Ordering::SeqCst),
        }
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active_count", &self.active_count())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::pool::ModelDef;
    use crate::storage::{ModelName, StorageError, Store, Values};
    use crate::transaction::TransactionError;

    fn setup() -> (TransactionManager, ModelName) {
        let store = Store::in_memory("test");
        let pool = Pool::new(store.clone());
        let model = ModelName::new("party.party").unwrap();
        pool.register(ModelDef::new(model.clone()));
        let manager = TransactionManager::new(pool, ConnectionPool::new(store, 4));
        (manager, model)
    }

    fn values(name: &str) -> Values {
        let mut values = Values::new();
        values.insert("name".to_string(), json!(name));
        values
    }

    #[test]
    fn test_begin_and_commit() {
        let (manager, model) = setup();

        let mut tx = manager.begin(UserId::ROOT, false, Context::new()).unwrap();
        assert!(manager.is_active(tx.id()));
        let record = tx.insert(&model, values("Alice")).unwrap();

        let head = manager.commit_transaction(tx).unwrap();
        assert_eq!(head, 1);
        assert_eq!(manager.active_count(), 0);
        assert!(manager.pool().store().read(&model, record.id).unwrap().is_some());
        assert_eq!(manager.stats().committed, 1);
    }

    #[test]
    fn test_begin_and_rollback() {
        let (manager, model) = setup();

        let mut tx = manager.begin(UserId::ROOT, false, Context::new()).unwrap();
        tx.insert(&model, values("Alice")).unwrap();
        manager.rollback_transaction(tx);

        assert_eq!(manager.active_count(), 0);
        assert_eq!(manager.pool().store().head(), 0);
        assert_eq!(manager.stats().rolled_back, 1);
    }

    #[test]
    fn test_with_transaction() {
        let (manager, model) = setup();

        let id = manager
            .with_transaction(UserId::ROOT, false, |tx| {
                let record = tx.insert(&model, values("Alice"))?;
                Ok::<_, TransactionError>(record.id)
            })
            .unwrap();

        let stored = manager.pool().store().read(&model, id).unwrap().unwrap();
        assert_eq!(stored.get_str("name"), Some("Alice"));
    }

    #[test]
    fn test_with_transaction_rollback_on_error() {
        let (manager, model) = setup();

        let result: TransactionResult<()> = manager.with_transaction(UserId::ROOT, false, |tx| {
            tx.insert(&model, values("Alice"))?;
            Err(TransactionError::Internal("test error".to_string()))
        });

        assert!(result.is_err());
        assert_eq!(manager.pool().store().head(), 0);
        assert_eq!(manager.stats().rolled_back, 1);
    }

    #[test]
    fn test_active_transactions() {
        let (manager, _model) = setup();

        assert_eq!(manager.active_count(), 0);

        let tx1 = manager.begin(UserId::ROOT, true, Context::new()).unwrap();
        assert_eq!(manager.active_count(), 1);

        let tx2 = manager.begin(UserId::ROOT, true, Context::new()).unwrap();
        assert_eq!(manager.active_count(), 2);
        assert!(manager.get_transaction_info(tx2.id()).unwrap().readonly);

        manager.release(tx1).unwrap();
        assert_eq!(manager.active_count(), 1);

        manager.rollback_transaction(tx2);
        assert_eq!(manager.active_count(), 0);
        assert_eq!(manager.stats().released, 1);
    }

    #[test]
    fn test_concurrent_update_conflict() {
        let (manager, model) = setup();
        let id = manager
            .with_transaction(UserId::ROOT, false, |tx| {
                Ok::<_, TransactionError>(tx.insert(&model, values("Alice"))?.id)
            })
            .unwrap();

        // two transactions read the same version
        let mut tx1 = manager.begin(UserId::ROOT, false, Context::new()).unwrap();
        let mut tx2 = manager.begin(UserId::ROOT, false, Context::new()).unwrap();

        let mut first = tx1.read(&model, id).unwrap().unwrap();
        first.merge_data(values("Bob"));
        tx1.update(&model, first).unwrap();

        let mut second = tx2.read(&model, id).unwrap().unwrap();
        second.merge_data(values("Carol"));
        tx2.update(&model, second).unwrap();

        assert!(manager.commit_transaction(tx1).is_ok());
        let err = manager.commit_transaction(tx2).unwrap_err();
        assert!(matches!(
            err,
            TransactionError::Storage(StorageError::SerializationFailure { .. })
        ));
        assert!(err.is_retryable());

        let stats = manager.stats();
        assert_eq!(stats.committed, 2);
        assert_eq!(stats.rolled_back, 1);
    }

    #[test]
    fn test_pool_exhausted() {
        let store = Store::in_memory("test");
        let manager = TransactionManager::new(Pool::new(store.clone()), ConnectionPool::new(store, 1));

        let _tx = manager.begin(UserId::ROOT, true, Context::new()).unwrap();
        let err = manager.begin(UserId::ROOT, true, Context::new()).unwrap_err();
        assert!(matches!(err, TransactionError::Storage(StorageError::PoolExhausted { max: 1 })));
    }
}
