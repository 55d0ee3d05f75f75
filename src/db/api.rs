//! Database API - the transaction wrapper.
//!
//! `Tdb` opens (or joins) a transaction for every unit of work, decides
//! between read-only and read-write mode, retries transient failures and
//! signals cache resets after writes.
//!
//! Outcome of one attempt:
//!
//! ```text
//!   closure Ok  + read-write  -> commit, reset caches
//!   closure Ok  + read-only   -> release
//!   closure Err (operational) -> rollback, retry if budget left and read-write
//!   closure Err (interface)   -> rollback, retry if budget left
//!   closure Err (other)       -> rollback, return the error
//! ```

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::connection::ConnectionPool;
use super::error::{TdbError, TdbResult};
use crate::config::TdbConfig;
use crate::models::User;
use crate::pool::{Model, Pool};
use crate::storage::{JournalEntry, Store, UserId};
use crate::transaction::{
    Context, Method, Transaction, TransactionManager, TransactionStats, TxOptions,
};

/// Handle to one database, shared by all units of work of a worker.
///
/// Clone to share; it uses Arc internally.
#[derive(Clone)]
pub struct Tdb {
    inner: Arc<TdbInner>,
}

struct TdbInner {
    config: TdbConfig,
    store: Store,
    pool: Pool,
    manager: TransactionManager,
}

impl Tdb {
    /// Open the configured database and initialize its pool.
    pub fn init(config: TdbConfig) -> TdbResult<Self> {
        let store = match &config.storage_path {
            Some(path) => Store::open(config.database.clone(), path)?,
            None => Store::in_memory(config.database.clone()),
        };
        Self::with_store(config, store)
    }

    /// Attach to an existing store, e.g. one shared with other workers.
    ///
    /// Every worker gets its own pool and cache; they coordinate through
    /// the store's cache-reset generation.
    pub fn with_store(config: TdbConfig, store: Store) -> TdbResult<Self> {
        let pool = Pool::new(store.clone());
        let connections = ConnectionPool::new(store.clone(), config.max_connections);
        let manager = TransactionManager::new(pool.clone(), connections);

        // pool initialization runs in exactly one read-only transaction
        manager.with_transaction(UserId::ROOT, true, |tx| pool.init(tx))?;
        pool.cache().clean(&store);

        info!(
            database = %config.database,
            retry = config.retry,
            persistent = store.is_persistent(),
            "database initialized"
        );

        Ok(Self {
            inner: Arc::new(TdbInner {
                config,
                store,
                pool,
                manager,
            }),
        })
    }

    pub fn config(&self) -> &TdbConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn pool(&self) -> &Pool {
        &self.inner.pool
    }

    pub fn manager(&self) -> &TransactionManager {
        &self.inner.manager
    }

    /// Outcome counters of all transactions opened through this handle,
    /// including the anonymous ones used to connect.
    pub fn stats(&self) -> TransactionStats {
        self.inner.manager.stats()
    }

    /// Context of a transaction: user preferences merged with caller context.
    pub fn context<'a>(&self, tx: &'a Transaction) -> &'a Context {
        tx.context()
    }

    /// Resolve a model by name.
    pub fn get(&self, model: Option<&str>) -> TdbResult<Model> {
        let name = model.ok_or(TdbError::MissingModelName)?;
        Ok(self.inner.pool.model(name)?)
    }

    /// Journal history, newest first.
    pub fn history(&self, limit: Option<usize>) -> TdbResult<Vec<JournalEntry>> {
        Ok(self.inner.store.history(limit)?)
    }

    /// Run `f` in its own transaction.
    ///
    /// The closure may run several times: it is retried after transient
    /// failures while the retry budget lasts, so it must not have effects
    /// outside the transaction.
    pub fn transaction<T, F>(&self, options: TxOptions, mut f: F) -> TdbResult<T>
    where
        F: FnMut(&mut Transaction) -> TdbResult<T>,
    {
        let readonly = options.resolve_readonly();
        let user = options.user.unwrap_or(self.inner.config.user);
        let mut remaining = self.inner.config.retry;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let result = self
                .connect(user, readonly, options.context.as_ref())
                .and_then(|mut tx| {
                    tx.enter();
                    let outcome = f(&mut tx);
                    tx.exit();
                    self.finish(tx, outcome)
                });

            match result {
                Ok(value) => return Ok(value),
                Err(e) if remaining > 0 && e.retry_allowed(readonly) => {
                    remaining -= 1;
                    warn!(
                        attempt,
                        remaining,
                        readonly,
                        kind = %e.kind(),
                        error = %e,
                        "transient database failure, retrying"
                    );
                    // the failure may come from stale cached reads
                    self.inner.pool.cache().clear();
                }
                Err(e) => {
                    if e.is_transient() {
                        warn!(attempt, readonly, error = %e, "giving up on transaction");
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Run `f` on the caller's open transaction.
    ///
    /// Nested units of work never commit or roll back: the outermost
    /// wrapper owns the transaction, and its mode, user and context apply.
    pub fn join<T, F>(&self, outer: &mut Transaction, options: TxOptions, f: F) -> TdbResult<T>
    where
        F: FnOnce(&mut Transaction) -> TdbResult<T>,
    {
        if !options.is_empty() {
            debug!(
                tx = outer.id(),
                depth = outer.depth(),
                ?options,
                "nested call joins open transaction, options ignored"
            );
        }
        outer.check_connection()?;

        outer.enter();
        let result = f(outer);
        outer.exit();
        result
    }

    /// Open a transaction covering one request.
    ///
    /// The mode follows the request method; the default principal is used.
    pub fn begin_request(&self, method: Method) -> TdbResult<RequestScope<'_>> {
        let readonly = TxOptions::for_method(method).resolve_readonly();
        let tx = self.connect(self.inner.config.user, readonly, None)?;
        debug!(tx = tx.id(), %method, readonly, "request transaction started");
        Ok(RequestScope {
            tdb: self,
            tx: Some(tx),
            method,
        })
    }

    /// Establish the transaction of one attempt.
    ///
    /// An anonymous read-only transaction cleans the worker cache and loads
    /// the user's preferences; the caller's context is merged over them.
    fn connect(&self, user: UserId, readonly: bool, extra: Option<&Context>) -> TdbResult<Transaction> {
        let manager = &self.inner.manager;

        let anonymous = manager.begin(UserId::ROOT, true, Context::new())?;
        self.inner.pool.cache().clean(&self.inner.store);
        let preferences = match User::get_preferences(&anonymous, user, self.inner.config.company) {
            Ok(preferences) => {
                manager.release(anonymous)?;
                preferences
            }
            Err(e) => {
                manager.rollback_transaction(anonymous);
                return Err(e);
            }
        };

        let mut context = preferences;
        if let Some(extra) = extra {
            context.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let tx = manager.begin(user, readonly, context)?;
        debug!(tx = tx.id(), user = %user, readonly, "connected");
        Ok(tx)
    }

    /// Close a transaction according to the outcome of its unit of work.
    fn finish<T>(&self, tx: Transaction, outcome: TdbResult<T>) -> TdbResult<T> {
        let manager = &self.inner.manager;
        match outcome {
            Ok(value) => {
                if tx.is_readonly() {
                    manager.release(tx)?;
                } else {
                    manager.commit_transaction(tx)?;
                    self.inner.pool.cache().reset(&self.inner.store);
                }
                Ok(value)
            }
            Err(e) => {
                debug!(tx = tx.id(), error = %e, "unit of work failed, rolling back");
                manager.rollback_transaction(tx);
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for Tdb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tdb")
            .field("database", &self.inner.config.database)
            .field("store", &self.inner.store)
            .field("manager", &self.inner.manager)
            .finish()
    }
}

/// Transaction spanning one request.
///
/// Finished explicitly with [`RequestScope::finish`]; a scope dropped
/// unfinished rolls back.
pub struct RequestScope<'a> {
    tdb: &'a Tdb,
    tx: Option<Transaction>,
    method: Method,
}

impl RequestScope<'_> {
    pub fn method(&self) -> Method {
        self.method
    }

    pub fn is_readonly(&self) -> bool {
        self.tx.as_ref().map(Transaction::is_readonly).unwrap_or(true)
    }

    /// Run a unit of work on the request transaction.
    pub fn run<T, F>(&mut self, f: F) -> TdbResult<T>
    where
        F: FnOnce(&mut Transaction) -> TdbResult<T>,
    {
        let tx = self
            .tx
            .as_mut()
            .ok_or_else(|| TdbError::application("request transaction already finished"))?;
        self.tdb.join(tx, TxOptions::default(), f)
    }

    /// Commit (read-write) or release (read-only) the request transaction.
    pub fn finish(mut self) -> TdbResult<()> {
        match self.tx.take() {
            Some(tx) => self.tdb.finish(tx, Ok(())),
            None => Ok(()),
        }
    }
}

impl Drop for RequestScope<'_> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            debug!(tx = tx.id(), method = %self.method, "request ended unfinished, rolling back");
            self.tdb.inner.manager.rollback_transaction(tx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use serde_json::json;

    use crate::domain::Domain;
    use crate::pool::{FieldDef, ModelDef};
    use crate::storage::{ErrorKind, ModelName, RecordId, StorageError, Values};
    use crate::transaction::TransactionError;

    const PARTY: &str = "party.party";

    fn setup(retry: u32) -> Tdb {
        let tdb = Tdb::init(TdbConfig::new("test").retry(retry)).unwrap();
        tdb.pool()
            .register(ModelDef::new(ModelName::new(PARTY).unwrap()).field(FieldDef::required("name")));
        tdb
    }

    fn party(name: &str) -> Values {
        let mut values = Values::new();
        values.insert("name".to_string(), json!(name));
        values
    }

    fn create_party(tx: &mut Transaction, name: &str) -> TdbResult<RecordId> {
        let model = tx.pool().model(PARTY)?;
        Ok(model.create(tx, vec![party(name)])?[0].id)
    }

    fn count_parties(tdb: &Tdb) -> usize {
        tdb.transaction(TxOptions::read_only(), |tx| {
            Ok(tx.pool().model(PARTY)?.search_count(tx, &Domain::All)?)
        })
        .unwrap()
    }

    fn conflict() -> TdbError {
        StorageError::SerializationFailure {
            model: ModelName::new(PARTY).unwrap(),
            id: RecordId::new(1),
        }
        .into()
    }

    #[test]
    fn test_init_runs_one_readonly_transaction() {
        let tdb = setup(5);
        let stats = tdb.stats();
        assert_eq!(stats.begun, 1);
        assert_eq!(stats.released, 1);
        assert_eq!(stats.committed, 0);
        assert!(tdb.pool().is_initialized());
    }

    #[test]
    fn test_readonly_never_commits() {
        let tdb = setup(5);
        let before = tdb.stats();

        let err = tdb
            .transaction(TxOptions::for_method(Method::Get), |tx| create_party(tx, "Alice"))
            .unwrap_err();
        assert!(matches!(err, TdbError::Transaction(TransactionError::ReadOnly { .. })));

        let after = tdb.stats();
        assert_eq!(after.committed, before.committed);
        assert_eq!(tdb.store().head(), 0);
        assert_eq!(count_parties(&tdb), 0);
    }

    #[test]
    fn test_method_inference() {
        let tdb = setup(5);
        let post = tdb
            .transaction(TxOptions::for_method(Method::Post), |tx| Ok(tx.is_readonly()))
            .unwrap();
        let get = tdb
            .transaction(TxOptions::for_method(Method::Get), |tx| Ok(tx.is_readonly()))
            .unwrap();
        let default = tdb.transaction(TxOptions::new(), |tx| Ok(tx.is_readonly())).unwrap();
        assert!(!post);
        assert!(get);
        assert!(default);
    }

    #[test]
    fn test_nested_calls_commit_once() {
        let tdb = setup(5);
        let before = tdb.stats();

        tdb.transaction(TxOptions::for_method(Method::Post), |tx| {
            create_party(tx, "Outer")?;
            tdb.join(tx, TxOptions::read_only(), |tx| {
                assert_eq!(tx.depth(), 2);
                // the outer read-write mode governs
                create_party(tx, "Inner")
            })?;
            Ok(())
        })
        .unwrap();

        let after = tdb.stats();
        assert_eq!(after.committed - before.committed, 1);
        assert_eq!(tdb.store().head(), 1);
        assert_eq!(count_parties(&tdb), 2);
    }

    #[test]
    fn test_always_transient_exhausts_budget() {
        let tdb = setup(3);
        let attempts = Cell::new(0);
        let before = tdb.stats();

        let err = tdb
            .transaction(TxOptions::read_write(), |_tx| -> TdbResult<()> {
                attempts.set(attempts.get() + 1);
                Err(conflict())
            })
            .unwrap_err();

        assert_eq!(attempts.get(), 4);
        assert_eq!(err.kind(), ErrorKind::Operational);
        assert_eq!(tdb.stats().rolled_back - before.rolled_back, 4);
    }

    #[test]
    fn test_operational_not_retried_when_readonly() {
        let tdb = setup(3);
        let attempts = Cell::new(0);
        let result = tdb.transaction(TxOptions::read_only(), |_tx| -> TdbResult<()> {
            attempts.set(attempts.get() + 1);
            Err(conflict())
        });
        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_interface_errors_retried_in_both_modes() {
        let tdb = setup(2);
        for options in [TxOptions::read_only(), TxOptions::read_write()] {
            let attempts = Cell::new(0);
            let value = tdb
                .transaction(options, |tx| {
                    attempts.set(attempts.get() + 1);
                    if attempts.get() == 1 {
                        tx.connection_mut().close();
                    }
                    tx.check_connection()?;
                    Ok(attempts.get())
                })
                .unwrap();
            assert_eq!(value, 2);
        }
    }

    #[test]
    fn test_zero_budget_means_one_attempt() {
        let tdb = setup(0);
        let attempts = Cell::new(0);
        let err = tdb
            .transaction(TxOptions::read_only(), |tx| -> TdbResult<()> {
                attempts.set(attempts.get() + 1);
                tx.connection_mut().close();
                Ok(tx.check_connection()?)
            })
            .unwrap_err();
        assert_eq!(attempts.get(), 1);
        assert_eq!(err.kind(), ErrorKind::Interface);
    }

    #[test]
    fn test_application_error_rolls_back_once() {
        let tdb = setup(5);
        let attempts = Cell::new(0);
        let before = tdb.stats();

        let err = tdb
            .transaction(TxOptions::read_write(), |tx| -> TdbResult<()> {
                attempts.set(attempts.get() + 1);
                create_party(tx, "Ghost")?;
                Err(TdbError::application("validation failed"))
            })
            .unwrap_err();

        assert_eq!(err.to_string(), "validation failed");
        assert_eq!(attempts.get(), 1);
        assert_eq!(tdb.stats().rolled_back - before.rolled_back, 1);
        assert_eq!(count_parties(&tdb), 0);
    }

    #[test]
    fn test_cache_reset_once_per_write_commit() {
        let tdb = setup(5);
        let generation = tdb.store().cache_generation();

        tdb.transaction(TxOptions::read_only(), |tx| {
            Ok(tx.pool().model(PARTY)?.search(tx, &Domain::All)?)
        })
        .unwrap();
        assert_eq!(tdb.store().cache_generation(), generation);

        tdb.transaction(TxOptions::read_write(), |tx| create_party(tx, "Alice"))
            .unwrap();
        assert_eq!(tdb.store().cache_generation(), generation + 1);
    }

    #[test]
    fn test_retry_scenario() {
        let tdb = setup(2);
        let attempts = Cell::new(0);
        let before = tdb.stats();

        let id = tdb
            .transaction(TxOptions::for_method(Method::Post), |tx| {
                attempts.set(attempts.get() + 1);
                let id = create_party(tx, "Persistent")?;
                if attempts.get() <= 2 {
                    return Err(conflict());
                }
                Ok(id)
            })
            .unwrap();

        let after = tdb.stats();
        assert_eq!(attempts.get(), 3);
        assert_eq!(after.rolled_back - before.rolled_back, 2);
        assert_eq!(after.committed - before.committed, 1);

        let record = tdb
            .transaction(TxOptions::read_only(), |tx| Ok(tx.pool().model(PARTY)?.read(tx, id)?))
            .unwrap();
        assert_eq!(record.get_str("name"), Some("Persistent"));
    }

    #[test]
    fn test_write_conflict_between_workers_is_retried() {
        let store = Store::in_memory("shared");
        let first = Tdb::with_store(TdbConfig::new("shared").retry(1), store.clone()).unwrap();
        let second = Tdb::with_store(TdbConfig::new("shared").retry(1), store).unwrap();
        for tdb in [&first, &second] {
            tdb.pool().register(ModelDef::new(ModelName::new(PARTY).unwrap()));
        }

        let id = first
            .transaction(TxOptions::read_write(), |tx| create_party(tx, "Alice"))
            .unwrap();

        let attempts = Cell::new(0);
        second
            .transaction(TxOptions::read_write(), |tx| {
                attempts.set(attempts.get() + 1);
                let model = tx.pool().model(PARTY)?;
                model.read(tx, id)?;
                if attempts.get() == 1 {
                    // another worker writes the same record meanwhile
                    first.transaction(TxOptions::read_write(), |other| {
                        Ok(other.pool().model(PARTY)?.write(other, &[id], party("Bob"))?)
                    })?;
                }
                Ok(model.write(tx, &[id], party("Carol"))?)
            })
            .unwrap();

        assert_eq!(attempts.get(), 2);
        let name = first
            .transaction(TxOptions::read_only(), |tx| {
                Ok(tx.pool().model(PARTY)?.read(tx, id)?.get_str("name").map(String::from))
            })
            .unwrap();
        assert_eq!(name.as_deref(), Some("Carol"));
    }

    fn count_of(tx: &Transaction, id: RecordId) -> TdbResult<u64> {
        let record = tx.pool().model(PARTY)?.read(tx, id)?;
        Ok(record.get("count").and_then(|v| v.as_u64()).unwrap_or(0))
    }

    #[test]
    fn test_threads_sharing_one_handle() {
        let tdb = Tdb::init(TdbConfig::new("shared").retry(1000)).unwrap();
        tdb.pool().register(ModelDef::new(ModelName::new(PARTY).unwrap()));
        let id = tdb
            .transaction(TxOptions::read_write(), |tx| {
                let mut values = Values::new();
                values.insert("count".to_string(), json!(0));
                Ok(tx.pool().model(PARTY)?.create(tx, vec![values])?[0].id)
            })
            .unwrap();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..10 {
                        tdb.transaction(TxOptions::for_method(Method::Post), |tx| {
                            let next = count_of(tx, id)? + 1;
                            let mut values = Values::new();
                            values.insert("count".to_string(), json!(next));
                            Ok(tx.pool().model(PARTY)?.write(tx, &[id], values)?)
                        })
                        .unwrap();
                    }
                });
            }
            for _ in 0..2 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        let count = tdb
                            .transaction(TxOptions::for_method(Method::Get), |tx| count_of(tx, id))
                            .unwrap();
                        assert!(count <= 40);
                    }
                });
            }
        });

        // every increment landed once and no worker serves a stale value
        let stats = tdb.stats();
        assert_eq!(stats.committed, 41);
        assert_eq!(tdb.manager().active_count(), 0);
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    let count = tdb
                        .transaction(TxOptions::read_only(), |tx| count_of(tx, id))
                        .unwrap();
                    assert_eq!(count, 40);
                });
            }
        });
    }

    #[test]
    fn test_context_merges_caller_values() {
        let tdb = setup(5);
        let mut extra = Context::new();
        extra.insert("language".to_string(), json!("de"));
        extra.insert("portal".to_string(), json!("repertoire"));

        let context = tdb
            .transaction(TxOptions::read_only().context(extra), |tx| Ok(tdb.context(tx).clone()))
            .unwrap();
        assert_eq!(context["language"], json!("de"));
        assert_eq!(context["portal"], json!("repertoire"));
        assert_eq!(context["user"], json!(0));
    }

    #[test]
    fn test_get_model() {
        let tdb = setup(5);
        assert!(matches!(tdb.get(None), Err(TdbError::MissingModelName)));
        assert_eq!(tdb.get(Some(PARTY)).unwrap().name().as_str(), PARTY);
        assert_eq!(tdb.get(Some("missing")).unwrap_err().kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_request_scope() {
        let tdb = setup(5);

        let mut scope = tdb.begin_request(Method::Post).unwrap();
        assert!(!scope.is_readonly());
        scope.run(|tx| create_party(tx, "Request")).unwrap();
        scope.finish().unwrap();
        assert_eq!(count_parties(&tdb), 1);

        {
            let mut scope = tdb.begin_request(Method::Patch).unwrap();
            scope.run(|tx| create_party(tx, "Abandoned")).unwrap();
        }
        assert_eq!(count_parties(&tdb), 1);
        assert_eq!(tdb.manager().active_count(), 0);

        let mut scope = tdb.begin_request(Method::Get).unwrap();
        assert!(scope.run(|tx| create_party(tx, "Nope")).is_err());
        scope.finish().unwrap();
    }

    #[test]
    fn test_nested_call_on_closed_connection_fails() {
        let tdb = setup(0);
        let err = tdb
            .transaction(TxOptions::read_only(), |tx| {
                tx.connection_mut().close();
                tdb.join(tx, TxOptions::new(), |_inner| Ok(()))
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Interface);
    }

    #[test]
    fn test_journaled_database_keeps_history() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = TdbConfig::new("journal").storage_path(dir.path());
        {
            let tdb = Tdb::init(config.clone()).unwrap();
            tdb.transaction(TxOptions::read_write(), |tx| {
                let model = tdb.get(Some("company.company"))?;
                Ok(model.create(tx, vec![party("C3S")])?)
            })
            .unwrap();
            assert_eq!(tdb.history(None).unwrap().len(), 1);
        }

        let tdb = Tdb::init(config).unwrap();
        let count = tdb
            .transaction(TxOptions::read_only(), |tx| {
                Ok(tdb.get(Some("company.company"))?.search_count(tx, &Domain::All)?)
            })
            .unwrap();
        assert_eq!(count, 1);
    }
}
