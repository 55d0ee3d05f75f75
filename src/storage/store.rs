//! The shared record store.
//!
//! A `Store` is the physical database every worker talks to. It keeps the
//! committed state of all model tables in memory, serializes commits, detects
//! write conflicts by record version, and optionally mirrors each commit into
//! a git journal so the state survives restarts.
//!
//! The store also hosts the cache-reset generation: workers keep private
//! caches and compare their last seen generation against this counter.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::journal::{GitJournal, JournalEntry, JournalMeta, Tables};
use crate::storage::record::Record;
use crate::storage::types::{ModelName, RecordId};

type Table = BTreeMap<RecordId, Record>;

/// A committed change stamped with its new version; `None` means deleted.
pub(crate) type StampedChange = (ModelName, RecordId, Option<Record>);

/// A pending change to one record, as accumulated by a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// A record created in this transaction.
    Insert(Record),
    /// A committed record modified in this transaction.
    Update { base_version: u64, record: Record },
    /// A committed record deleted in this transaction.
    Delete { base_version: u64 },
}

/// The write set of a transaction.
///
/// Repeated changes to the same record collapse into one entry that keeps
/// the version the record had when the transaction first touched it.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    changes: BTreeMap<(ModelName, RecordId), Change>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Get the pending change for a record.
    pub fn get(&self, model: &ModelName, id: RecordId) -> Option<&Change> {
        self.changes.get(&(model.clone(), id))
    }

    /// Record the creation of a new record.
    pub fn insert(&mut self, model: &ModelName, record: Record) {
        self.changes.insert((model.clone(), record.id), Change::Insert(record));
    }

    /// Record a modification; `base_version` is the committed version read.
    pub fn update(&mut self, model: &ModelName, record: Record, base_version: u64) {
        let key = (model.clone(), record.id);
        let change = match self.changes.remove(&key) {
            Some(Change::Insert(_)) => Change::Insert(record),
            Some(Change::Update { base_version, .. }) => Change::Update { base_version, record },
            Some(Change::Delete { .. }) | None => Change::Update { base_version, record },
        };
        self.changes.insert(key, change);
    }

    /// Record a deletion; `base_version` is the committed version read.
    pub fn delete(&mut self, model: &ModelName, id: RecordId, base_version: u64) {
        let key = (model.clone(), id);
        match self.changes.remove(&key) {
            // created and dropped within the same transaction
            Some(Change::Insert(_)) => {}
            Some(Change::Update { base_version, .. }) | Some(Change::Delete { base_version }) => {
                self.changes.insert(key, Change::Delete { base_version });
            }
            None => {
                self.changes.insert(key, Change::Delete { base_version });
            }
        }
    }

    /// Iterate over pending changes in (model, id) order.
    pub fn iter(&self) -> impl Iterator<Item = (&ModelName, RecordId, &Change)> {
        self.changes.iter().map(|((model, id), change)| (model, *id, change))
    }

    /// Pending changes of one model.
    pub fn for_model<'a>(
        &'a self,
        model: &'a ModelName,
    ) -> impl Iterator<Item = (RecordId, &'a Change)> + 'a {
        self.iter()
            .filter(move |(m, _, _)| *m == model)
            .map(|(_, id, change)| (id, change))
    }

    /// Models touched by this change set.
    pub fn models(&self) -> BTreeSet<&ModelName> {
        self.changes.keys().map(|(model, _)| model).collect()
    }
}

/// The shared record store.
///
/// Clone this to share across workers and threads - it uses Arc internally.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    name: String,
    tables: RwLock<HashMap<ModelName, Table>>,
    sequences: Mutex<HashMap<ModelName, u64>>,
    /// commit counter, also the version stamped on written records
    head: AtomicU64,
    /// serializes conflict detection and application of commits
    commit_lock: Mutex<()>,
    cache_generation: AtomicU64,
    online: AtomicBool,
    journal: Option<Mutex<GitJournal>>,
}

impl Store {
    /// Create a volatile store.
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self::build(name.into(), HashMap::new(), JournalMeta::default(), None)
    }

    /// Open a journaled store at `path`, creating the journal if missing.
    pub fn open(name: impl Into<String>, path: impl AsRef<Path>) -> StorageResult<Self> {
        let journal = GitJournal::open_or_init(path.as_ref())?;
        let (tables, meta) = journal.load()?;
        let store = Self::build(name.into(), tables, meta, Some(journal));
        info!(
            database = store.name(),
            path = %path.as_ref().display(),
            head = store.head(),
            "opened journaled store"
        );
        Ok(store)
    }

    fn build(name: String, tables: Tables, meta: JournalMeta, journal: Option<GitJournal>) -> Self {
        // persisted counters win; surviving records only ever raise them
        let head = tables
            .values()
            .flat_map(|table| table.values().map(|r| r.version))
            .fold(meta.head, u64::max);
        let mut sequences = meta.sequences;
        for (model, table) in &tables {
            let last = table.keys().next_back().map(RecordId::value).unwrap_or(0);
            let entry = sequences.entry(model.clone()).or_insert(0);
            *entry = (*entry).max(last);
        }
        let sequences: HashMap<ModelName, u64> = sequences.into_iter().collect();

        Self {
            inner: Arc::new(StoreInner {
                name,
                tables: RwLock::new(tables),
                sequences: Mutex::new(sequences),
                head: AtomicU64::new(head),
                commit_lock: Mutex::new(()),
                cache_generation: AtomicU64::new(0),
                online: AtomicBool::new(true),
                journal: journal.map(Mutex::new),
            }),
        }
    }

    /// Database name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether commits are mirrored into a git journal.
    pub fn is_persistent(&self) -> bool {
        self.inner.journal.is_some()
    }

    /// Number of commits applied so far.
    pub fn head(&self) -> u64 {
        self.inner.head.load(Ordering::SeqCst)
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Take the database up or down. While down every access fails with an
    /// interface error.
    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::SeqCst);
    }

    pub fn check_online(&self) -> StorageResult<()> {
        if self.is_online() {
            Ok(())
        } else {
            Err(StorageError::DatabaseUnavailable(self.inner.name.clone()))
        }
    }

    // ==================== Schema ====================

    /// Create the table for a model if it does not exist yet.
    pub fn ensure_model(&self, model: &ModelName) {
        let mut tables = self.inner.tables.write();
        if !tables.contains_key(model) {
            debug!(database = self.name(), model = %model, "creating table");
            tables.insert(model.clone(), Table::new());
        }
    }

    pub fn has_model(&self, model: &ModelName) -> bool {
        self.inner.tables.read().contains_key(model)
    }

    /// List all model tables.
    pub fn models(&self) -> Vec<ModelName> {
        let mut models: Vec<_> = self.inner.tables.read().keys().cloned().collect();
        models.sort();
        models
    }

    // ==================== Reads ====================

    /// Read the committed state of a record.
    pub fn read(&self, model: &ModelName, id: RecordId) -> StorageResult<Option<Record>> {
        self.check_online()?;
        let tables = self.inner.tables.read();
        let table = tables
            .get(model)
            .ok_or_else(|| StorageError::ModelNotFound(model.clone()))?;
        Ok(table.get(&id).cloned())
    }

    /// Read all committed records of a model, ordered by id.
    ///
    /// Warning: this clones the whole table.
    pub fn scan(&self, model: &ModelName) -> StorageResult<Vec<Record>> {
        self.check_online()?;
        let tables = self.inner.tables.read();
        let table = tables
            .get(model)
            .ok_or_else(|| StorageError::ModelNotFound(model.clone()))?;
        Ok(table.values().cloned().collect())
    }

    /// Count committed records of a model.
    pub fn count(&self, model: &ModelName) -> StorageResult<usize> {
        self.check_online()?;
        let tables = self.inner.tables.read();
        tables
            .get(model)
            .map(BTreeMap::len)
            .ok_or_else(|| StorageError::ModelNotFound(model.clone()))
    }

    /// Allocate the next id of a model.
    ///
    /// Like a database sequence, allocation is not rolled back with the
    /// transaction that requested it.
    pub fn next_id(&self, model: &ModelName) -> RecordId {
        let mut sequences = self.inner.sequences.lock();
        let last = sequences.entry(model.clone()).or_insert(0);
        *last += 1;
        RecordId::new(*last)
    }

    // ==================== Commits ====================

    /// Apply a write set atomically.
    ///
    /// Fails with `SerializationFailure` if any updated or deleted record was
    /// committed by someone else since it was read. Nothing is applied on
    /// failure. Returns the new head.
    pub fn commit(&self, changes: &ChangeSet, tx_id: &str) -> StorageResult<u64> {
        self.check_online()?;
        let _guard = self.inner.commit_lock.lock();

        if changes.is_empty() {
            return Ok(self.head());
        }

        {
            let tables = self.inner.tables.read();
            for (model, id, change) in changes.iter() {
                let table = tables
                    .get(model)
                    .ok_or_else(|| StorageError::ModelNotFound(model.clone()))?;
                let current = table.get(&id).map(|r| r.version);
                match change {
                    Change::Insert(_) => {
                        if current.is_some() {
                            return Err(StorageError::Internal(format!(
                                "record {} {} already exists",
                                model, id
                            )));
                        }
                    }
                    Change::Update { base_version, .. } | Change::Delete { base_version } => {
                        if current != Some(*base_version) {
                            return Err(StorageError::SerializationFailure {
                                model: model.clone(),
                                id,
                            });
                        }
                    }
                }
            }
        }

        let version = self.head() + 1;
        let stamped: Vec<StampedChange> = changes
            .iter()
            .map(|(model, id, change)| match change {
                Change::Insert(record) | Change::Update { record, .. } => {
                    let mut record = record.clone();
                    record.version = version;
                    (model.clone(), id, Some(record))
                }
                Change::Delete { .. } => (model.clone(), id, None),
            })
            .collect();

        if let Some(journal) = &self.inner.journal {
            let meta = JournalMeta {
                head: version,
                sequences: self.inner.sequences.lock().iter().map(|(m, last)| (m.clone(), *last)).collect(),
            };
            journal.lock().record(&stamped, tx_id, &meta)?;
        }

        {
            let mut tables = self.inner.tables.write();
            for (model, id, record) in stamped {
                let table = tables.entry(model).or_default();
                match record {
                    Some(record) => {
                        table.insert(id, record);
                    }
                    None => {
                        table.remove(&id);
                    }
                }
            }
        }

        self.inner.head.store(version, Ordering::SeqCst);
        debug!(database = self.name(), tx = tx_id, head = version, changes = changes.len(), "commit applied");
        Ok(version)
    }

    // ==================== Cache coordination ====================

    /// Current cache-reset generation.
    pub fn cache_generation(&self) -> u64 {
        self.inner.cache_generation.load(Ordering::SeqCst)
    }

    /// Tell every worker sharing this store to drop its cache.
    ///
    /// Returns the new generation.
    pub fn signal_cache_reset(&self) -> u64 {
        self.inner.cache_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    // ==================== History ====================

    /// Most recent journal entries, newest first. Empty for volatile stores.
    pub fn history(&self, limit: Option<usize>) -> StorageResult<Vec<JournalEntry>> {
        match &self.inner.journal {
            Some(journal) => journal.lock().history(limit),
            None => Ok(Vec::new()),
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.inner.name)
            .field("head", &self.head())
            .field("persistent", &self.is_persistent())
            .finish()
    }
}
