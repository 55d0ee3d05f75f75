//! Transaction context using typestate pattern.
//!
//! The typestate pattern ensures at compile time that transactions
//! are used correctly:
//! - Only active transactions can read and write
//! - Committed, released or aborted transactions cannot be reused
//! - The connection goes back to its pool when the transaction is finished

use std::collections::BTreeMap;
use std::marker::PhantomData;

use serde_json::Value;

use crate::db::Connection;
use crate::pool::Pool;
use crate::storage::{Change, ChangeSet, ModelName, Record, RecordId, StorageError, UserId, Values};
use crate::transaction::error::{TransactionError, TransactionResult};

/// Context map carried by a transaction (language, company, user, ...).
pub type Context = BTreeMap<String, Value>;

/// Marker type for active transactions.
#[derive(Debug)]
pub struct TxActive;

/// Marker type for committed transactions.
#[derive(Debug)]
pub struct TxCommitted;

/// Marker type for read-only transactions closed without commit.
#[derive(Debug)]
pub struct TxReleased;

/// Marker type for aborted transactions.
#[derive(Debug)]
pub struct TxAborted;

/// Transaction metadata stored in the manager.
#[derive(Debug, Clone)]
pub struct TransactionMetadata {
    /// Unique transaction ID.
    pub tx_id: String,
    /// Principal the transaction runs as.
    pub user: UserId,
    pub readonly: bool,
    pub context: Context,
    /// Store head when the transaction started.
    pub base_head: u64,
    /// When the transaction started.
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// A database transaction with typestate for lifecycle safety.
///
/// The `State` parameter tracks whether the transaction is:
/// - `TxActive`: Can perform operations
/// - `TxCommitted`: Write set applied to the store
/// - `TxReleased`: Closed without writing
/// - `TxAborted`: Rolled back, write set discarded
pub struct Transaction<State = TxActive> {
    pub(crate) metadata: TransactionMetadata,
    connection: Connection,
    pool: Pool,
    writes: ChangeSet,
    depth: usize,
    head: u64,
    _state: PhantomData<State>,
}

impl<State> Transaction<State> {
    /// Get the transaction ID.
    pub fn id(&self) -> &str {
        &self.metadata.tx_id
    }

    pub fn user(&self) -> UserId {
        self.metadata.user
    }

    pub fn is_readonly(&self) -> bool {
        self.metadata.readonly
    }

    pub fn context(&self) -> &Context {
        &self.metadata.context
    }

    pub fn metadata(&self) -> &TransactionMetadata {
        &self.metadata
    }

    fn into_state<Next>(self) -> Transaction<Next> {
        Transaction {
            metadata: self.metadata,
            connection: self.connection,
            pool: self.pool,
            writes: self.writes,
            depth: self.depth,
            head: self.head,
            _state: PhantomData,
        }
    }
}

impl Transaction<TxActive> {
    /// Create a new active transaction on a connection.
    pub(crate) fn new(
        pool: Pool,
        connection: Connection,
        tx_id: String,
        user: UserId,
        readonly: bool,
        context: Context,
    ) -> Self {
        let base_head = pool.store().head();
        Self {
            metadata: TransactionMetadata {
                tx_id,
                user,
                readonly,
                context,
                base_head,
                started_at: chrono::Utc::now(),
            },
            connection,
            pool,
            writes: ChangeSet::new(),
            depth: 0,
            head: base_head,
            _state: PhantomData,
        }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.connection
    }

    /// Number of nested wrappers currently sharing this transaction.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub(crate) fn enter(&mut self) {
        self.depth += 1;
    }

    pub(crate) fn exit(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Changes not yet committed.
    pub fn pending_changes(&self) -> &ChangeSet {
        &self.writes
    }

    /// Fail with an interface error if the connection is gone.
    pub fn check_connection(&self) -> TransactionResult<()> {
        self.connection.check().map_err(TransactionError::from)
    }

    fn ensure_writable(&self, model: &ModelName) -> TransactionResult<()> {
        if self.metadata.readonly {
            return Err(TransactionError::ReadOnly {
                tx_id: self.metadata.tx_id.clone(),
                model: model.clone(),
            });
        }
        Ok(())
    }

    // ==================== Reads ====================

    /// Read a record, seeing this transaction's own writes.
    pub fn read(&self, model: &ModelName, id: RecordId) -> TransactionResult<Option<Record>> {
        self.check_connection()?;
        match self.writes.get(model, id) {
            Some(Change::Insert(record)) | Some(Change::Update { record, .. }) => {
                return Ok(Some(record.clone()));
            }
            Some(Change::Delete { .. }) => return Ok(None),
            None => {}
        }

        let cache = self.pool.cache();
        if let Some(record) = cache.get_record(model, id) {
            return Ok(Some(record));
        }
        let store = self.pool.store();
        let generation = store.cache_generation();
        let record = store.read(model, id)?;
        if let Some(record) = &record {
            cache.put_record(store, generation, model, record.clone());
        }
        Ok(record)
    }

    /// All records of a model, ordered by id, seeing own writes.
    pub fn scan(&self, model: &ModelName) -> TransactionResult<Vec<Record>> {
        self.check_connection()?;
        let mut records: BTreeMap<RecordId, Record> = self
            .pool
            .store()
            .scan(model)?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();

        for (id, change) in self.writes.for_model(model) {
            match change {
                Change::Insert(record) | Change::Update { record, .. } => {
                    records.insert(id, record.clone());
                }
                Change::Delete { .. } => {
                    records.remove(&id);
                }
            }
        }
        Ok(records.into_values().collect())
    }

    /// Number of records of a model, seeing own writes.
    pub fn count(&self, model: &ModelName) -> TransactionResult<usize> {
        self.check_connection()?;
        let committed = self.pool.store().count(model)?;
        // inserts are new records and deletes only ever target committed ones
        let (inserted, deleted) =
            self.writes
                .for_model(model)
                .fold((0, 0), |(ins, del), (_, change)| match change {
                    Change::Insert(_) => (ins + 1, del),
                    Change::Delete { .. } => (ins, del + 1),
                    Change::Update { .. } => (ins, del),
                });
        Ok((committed + inserted).saturating_sub(deleted))
    }

    // ==================== Writes ====================

    /// Stage a new record and return it.
    pub fn insert(&mut self, model: &ModelName, values: Values) -> TransactionResult<Record> {
        self.ensure_writable(model)?;
        self.check_connection()?;
        let store = self.pool.store();
        if !store.has_model(model) {
            return Err(StorageError::ModelNotFound(model.clone()).into());
        }
        let record = Record::new(store.next_id(model), values);
        self.writes.insert(model, record.clone());
        Ok(record)
    }

    /// Stage a modified record. Its `version` is the committed version the
    /// change is based on.
    pub fn update(&mut self, model: &ModelName, record: Record) -> TransactionResult<()> {
        self.ensure_writable(model)?;
        self.check_connection()?;
        let base_version = record.version;
        self.writes.update(model, record, base_version);
        Ok(())
    }

    /// Stage the deletion of a record.
    pub fn remove(&mut self, model: &ModelName, id: RecordId) -> TransactionResult<()> {
        self.ensure_writable(model)?;
        let record = self.read(model, id)?.ok_or_else(|| StorageError::RecordNotFound {
            model: model.clone(),
            id,
        })?;
        self.writes.delete(model, id, record.version);
        Ok(())
    }

    // ==================== Transaction Control ====================

    /// Commit the write set to the store.
    ///
    /// Fails with a serialization failure if a record changed underneath;
    /// the write set is discarded in that case.
    pub fn commit(mut self) -> TransactionResult<Transaction<TxCommitted>> {
        if self.metadata.readonly && !self.writes.is_empty() {
            return Err(TransactionError::Internal(format!(
                "read-only transaction {} has pending writes",
                self.metadata.tx_id
            )));
        }
        self.check_connection()?;
        self.head = self.pool.store().commit(&self.writes, &self.metadata.tx_id)?;
        Ok(self.into_state())
    }

    /// Close without writing. Only valid for transactions that wrote nothing.
    pub fn release(self) -> TransactionResult<Transaction<TxReleased>> {
        if !self.writes.is_empty() {
            return Err(TransactionError::Internal(format!(
                "transaction {} released with {} pending changes",
                self.metadata.tx_id,
                self.writes.len()
            )));
        }
        Ok(self.into_state())
    }

    /// Rollback the transaction, discarding the write set.
    pub fn rollback(mut self) -> Transaction<TxAborted> {
        self.writes = ChangeSet::new();
        self.into_state()
    }
}

impl Transaction<TxCommitted> {
    /// Store head after the commit.
    pub fn head(&self) -> u64 {
        self.head
    }

    /// Number of record changes that were applied.
    pub fn change_count(&self) -> usize {
        self.writes.len()
    }
}

impl std::fmt::Debug for Transaction<TxActive> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.metadata.tx_id)
            .field("user", &self.metadata.user)
            .field("readonly", &self.metadata.readonly)
            .field("depth", &self.depth)
            .field("pending", &self.writes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ConnectionPool;
    use crate::pool::ModelDef;
    use crate::storage::{ErrorKind, Store};
    use serde_json::json;

    fn setup() -> (Pool, ConnectionPool, ModelName) {
        let store = Store::in_memory("test");
        let pool = Pool::new(store.clone());
        let model = ModelName::new("party.party").unwrap();
        pool.register(ModelDef::new(model.clone()));
        (pool, ConnectionPool::new(store, 4), model)
    }

    fn begin(pool: &Pool, connections: &ConnectionPool, readonly: bool) -> Transaction {
        Transaction::new(
            pool.clone(),
            connections.get().unwrap(),
            "tx001".to_string(),
            UserId::ROOT,
            readonly,
            Context::new(),
        )
    }

    fn values(name: &str) -> Values {
        let mut values = Values::new();
        values.insert("name".to_string(), json!(name));
        values
    }

    #[test]
    fn test_transaction_insert_read() {
        let (pool, connections, model) = setup();
        let mut tx = begin(&pool, &connections, false);

        let record = tx.insert(&model, values("Alice")).unwrap();
        let read = tx.read(&model, record.id).unwrap().unwrap();
        assert_eq!(read.get_str("name"), Some("Alice"));
        // not visible outside before commit
        assert!(pool.store().read(&model, record.id).unwrap().is_none());

        let committed = tx.commit().unwrap();
        assert_eq!(committed.head(), 1);
        assert_eq!(committed.change_count(), 1);
        assert!(pool.store().read(&model, record.id).unwrap().is_some());
    }

    #[test]
    fn test_transaction_rollback() {
        let (pool, connections, model) = setup();
        let mut tx = begin(&pool, &connections, false);
        let record = tx.insert(&model, values("Alice")).unwrap();

        let _aborted = tx.rollback();
        assert!(pool.store().read(&model, record.id).unwrap().is_none());
        assert_eq!(pool.store().head(), 0);
    }

    #[test]
    fn test_readonly_rejects_writes() {
        let (pool, connections, model) = setup();
        let mut tx = begin(&pool, &connections, true);

        let err = tx.insert(&model, values("Alice")).unwrap_err();
        assert!(matches!(err, TransactionError::ReadOnly { .. }));
        assert_eq!(err.kind(), ErrorKind::Application);
        assert!(tx.pending_changes().is_empty());
        tx.release().unwrap();
    }

    #[test]
    fn test_transaction_sees_own_writes_in_scan() {
        let (pool, connections, model) = setup();
        let mut setup_tx = begin(&pool, &connections, false);
        let kept = setup_tx.insert(&model, values("Kept")).unwrap();
        let dropped = setup_tx.insert(&model, values("Dropped")).unwrap();
        setup_tx.commit().unwrap();

        let mut tx = begin(&pool, &connections, false);
        tx.remove(&model, dropped.id).unwrap();
        let mut changed = tx.read(&model, kept.id).unwrap().unwrap();
        changed.merge_data(values("Changed"));
        tx.update(&model, changed).unwrap();
        tx.insert(&model, values("New")).unwrap();

        let names: Vec<String> = tx
            .scan(&model)
            .unwrap()
            .iter()
            .filter_map(|r| r.get_str("name").map(String::from))
            .collect();
        assert_eq!(names, vec!["Changed", "New"]);
        let _ = tx.rollback();
    }

    #[test]
    fn test_count_sees_own_writes() {
        let (pool, connections, model) = setup();
        let mut setup_tx = begin(&pool, &connections, false);
        let first = setup_tx.insert(&model, values("First")).unwrap();
        let second = setup_tx.insert(&model, values("Second")).unwrap();
        setup_tx.commit().unwrap();

        let mut tx = begin(&pool, &connections, false);
        assert_eq!(tx.count(&model).unwrap(), 2);

        tx.remove(&model, first.id).unwrap();
        let mut changed = tx.read(&model, second.id).unwrap().unwrap();
        changed.merge_data(values("Changed"));
        tx.update(&model, changed).unwrap();
        let added = tx.insert(&model, values("Added")).unwrap();
        tx.insert(&model, values("Other")).unwrap();
        // created and dropped within the transaction
        tx.remove(&model, added.id).unwrap();

        assert_eq!(tx.count(&model).unwrap(), 2);
        assert_eq!(tx.count(&model).unwrap(), tx.scan(&model).unwrap().len());
        let _ = tx.rollback();
    }

    #[test]
    fn test_closed_connection_is_interface_error() {
        let (pool, connections, model) = setup();
        let mut tx = begin(&pool, &connections, true);
        tx.connection_mut().close();

        let err = tx.read(&model, RecordId::new(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Interface);
    }

    #[test]
    fn test_release_with_writes_fails() {
        let (pool, connections, model) = setup();
        let mut tx = begin(&pool, &connections, false);
        tx.insert(&model, values("Alice")).unwrap();
        assert!(tx.release().is_err());
    }
}
