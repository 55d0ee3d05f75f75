//! Model pool.
//!
//! The pool is the per-database registry of model definitions. It is
//! initialized once, inside a transaction, which registers the built-in
//! models and creates their tables. Model handles are resolved lazily by
//! name and cached for the pool's lifetime.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                           Pool                              │
//! │      (model registry, handle cache, init-once flag)         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │  ModelDef   │       │    Model    │       │    Cache    │
//!  │  (fields)   │       │  (handle)   │       │(worker-local)│
//!  └─────────────┘       └─────────────┘       └─────────────┘
//! ```

mod cache;
mod model;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::storage::{ModelName, StorageError, StorageResult, Store};
use crate::transaction::{Transaction, TransactionResult};

pub use cache::Cache;
pub use model::{FieldDef, Model, ModelDef};

use model::Registry;

/// Model pool of one database.
///
/// Clone to share; it uses Arc internally.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    store: Store,
    registry: RwLock<Registry>,
    handles: RwLock<HashMap<String, Model>>,
    cache: Cache,
    initialized: AtomicBool,
    init_lock: Mutex<()>,
}

impl Pool {
    pub fn new(store: Store) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                store,
                registry: RwLock::new(Registry::new()),
                handles: RwLock::new(HashMap::new()),
                cache: Cache::new(),
                initialized: AtomicBool::new(false),
                init_lock: Mutex::new(()),
            }),
        }
    }

    /// Database this pool serves.
    pub fn database(&self) -> &str {
        self.inner.store.name()
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn cache(&self) -> &Cache {
        &self.inner.cache
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    /// Register a model definition and create its table.
    ///
    /// Re-registering a name replaces the definition.
    pub fn register(&self, def: ModelDef) {
        self.inner.store.ensure_model(&def.name);
        let name = def.name.clone();
        self.inner.registry.write().insert(name.clone(), Arc::new(def));
        // drop stale handles to a replaced definition
        self.inner.handles.write().retain(|_, model| model.name() != &name);
        debug!(database = self.database(), model = %name, "registered model");
    }

    /// Initialize the pool: register the built-in models.
    ///
    /// Idempotent; returns false if the pool was already initialized.
    pub fn init(&self, tx: &Transaction) -> TransactionResult<bool> {
        let _guard = self.inner.init_lock.lock();
        if self.is_initialized() {
            return Ok(false);
        }
        tx.check_connection()?;

        for def in crate::models::builtin_definitions() {
            self.register(def);
        }
        // tables restored from a journal but without a definition
        for name in self.inner.store.models() {
            if !self.inner.registry.read().contains_key(&name) {
                self.register(ModelDef::new(name));
            }
        }

        self.inner.initialized.store(true, Ordering::SeqCst);
        info!(
            database = self.database(),
            models = self.inner.registry.read().len(),
            tx = tx.id(),
            "pool initialized"
        );
        Ok(true)
    }

    /// Resolve a model by name.
    pub fn model(&self, name: &str) -> StorageResult<Model> {
        if let Some(model) = self.inner.handles.read().get(name) {
            return Ok(model.clone());
        }

        let model_name = ModelName::new(name)?;
        let def = self
            .inner
            .registry
            .read()
            .get(&model_name)
            .cloned()
            .ok_or(StorageError::ModelNotFound(model_name))?;

        let model = Model::new(def);
        self.inner
            .handles
            .write()
            .insert(name.to_string(), model.clone());
        Ok(model)
    }

    /// Registered model names, sorted.
    pub fn models(&self) -> Vec<ModelName> {
        self.inner.registry.read().keys().cloned().collect()
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("database", &self.database())
            .field("initialized", &self.is_initialized())
            .field("models", &self.inner.registry.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ErrorKind, UserId};
    use crate::transaction::{Context, TransactionManager};
    use crate::db::ConnectionPool;

    fn setup() -> (Pool, TransactionManager) {
        let store = Store::in_memory("test");
        let pool = Pool::new(store.clone());
        let manager = TransactionManager::new(pool.clone(), ConnectionPool::new(store, 4));
        (pool, manager)
    }

    #[test]
    fn test_init_once() {
        let (pool, manager) = setup();
        let tx = manager.begin(UserId::ROOT, true, Context::new()).unwrap();
        assert!(pool.init(&tx).unwrap());
        assert!(!pool.init(&tx).unwrap());
        manager.release(tx).unwrap();

        assert!(pool.is_initialized());
        let names: Vec<String> = pool.models().iter().map(|m| m.to_string()).collect();
        assert!(names.contains(&"res.user".to_string()));
        assert!(names.contains(&"company.company".to_string()));
        assert!(names.contains(&"checksum".to_string()));
        for name in ["party.party", "party.address", "bank.account.number", "country.subdivision"] {
            assert!(names.contains(&name.to_string()), "{name} not registered");
        }
        assert!(pool.store().has_model(&ModelName::new("checksum").unwrap()));
    }

    #[test]
    fn test_model_lookup() {
        let (pool, _manager) = setup();
        pool.register(ModelDef::new(ModelName::new("party.party").unwrap()));

        let first = pool.model("party.party").unwrap();
        let second = pool.model("party.party").unwrap();
        assert_eq!(first.name(), second.name());

        let missing = pool.model("party.address").unwrap_err();
        assert!(matches!(missing, StorageError::ModelNotFound(_)));
        assert_eq!(missing.kind(), ErrorKind::Configuration);

        let invalid = pool.model("Party").unwrap_err();
        assert_eq!(invalid.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_register_replaces_handle() {
        let (pool, _manager) = setup();
        let name = ModelName::new("party.party").unwrap();
        pool.register(ModelDef::new(name.clone()));
        assert!(pool.model("party.party").unwrap().definition().fields.is_empty());

        pool.register(ModelDef::new(name).field(FieldDef::required("name")));
        assert_eq!(pool.model("party.party").unwrap().definition().fields.len(), 1);
    }
}
