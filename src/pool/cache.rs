//! Worker-local cache.
//!
//! Each pool keeps records and user preferences it has read. The store's
//! cache-reset generation tells it when another worker committed writes:
//! `clean` runs at connection time and drops everything if the generation
//! moved since the last look.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::storage::{ModelName, Record, RecordId, Store, UserId};
use crate::transaction::Context;

#[derive(Debug, Default)]
pub struct Cache {
    records: Mutex<HashMap<(ModelName, RecordId), Record>>,
    preferences: Mutex<HashMap<UserId, Context>>,
    seen_generation: AtomicU64,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop local entries if another worker signalled a reset.
    ///
    /// Returns true when the cache was cleared.
    pub fn clean(&self, store: &Store) -> bool {
        let current = store.cache_generation();
        let seen = self.seen_generation.swap(current, Ordering::SeqCst);
        if seen == current {
            return false;
        }
        debug!(database = store.name(), seen, current, "cache generation moved, cleaning");
        self.clear();
        true
    }

    /// Signal all workers to drop their caches, starting with this one.
    pub fn reset(&self, store: &Store) {
        let generation = store.signal_cache_reset();
        self.clear();
        self.seen_generation.store(generation, Ordering::SeqCst);
        debug!(database = store.name(), generation, "cache reset signalled");
    }

    /// Clear local entries without signalling anyone.
    pub fn clear(&self) {
        self.records.lock().clear();
        self.preferences.lock().clear();
    }

    /// Generation this cache last synchronized with.
    pub fn seen_generation(&self) -> u64 {
        self.seen_generation.load(Ordering::SeqCst)
    }

    pub fn get_record(&self, model: &ModelName, id: RecordId) -> Option<Record> {
        self.records.lock().get(&(model.clone(), id)).cloned()
    }

    /// Cache a record read from `store` while its generation was `generation`.
    ///
    /// Nothing is stored if a reset was signalled since. The generation is
    /// checked under the entry lock. Returns whether the record was cached.
    pub fn put_record(
        &self,
        store: &Store,
        generation: u64,
        model: &ModelName,
        record: Record,
    ) -> bool {
        let mut records = self.records.lock();
        if store.cache_generation() != generation {
            return false;
        }
        records.insert((model.clone(), record.id), record);
        true
    }

    pub fn get_preferences(&self, user: UserId) -> Option<Context> {
        self.preferences.lock().get(&user).cloned()
    }

    /// Cache preferences computed while the generation was `generation`.
    pub fn put_preferences(
        &self,
        store: &Store,
        generation: u64,
        user: UserId,
        preferences: Context,
    ) -> bool {
        let mut cached = self.preferences.lock();
        if store.cache_generation() != generation {
            return false;
        }
        cached.insert(user, preferences);
        true
    }

    /// Number of cached records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0 && self.preferences.lock().is_empty()
    }
}
