//! storage layer for portaldb
//!
//! this module owns the physical database: the committed record tables, the
//! commit protocol with optimistic conflict detection, and the optional git
//! journal. The upper layers (pool, transactions) use this API and never
//! touch git2 directly.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Store                              │
//! │  (tables, sequences, commit lock, cache-reset generation)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │  ChangeSet  │       │   Record    │       │ GitJournal  │
//!  │ (write set) │       │   (JSON)    │       │  (history)  │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use portaldb::storage::{ChangeSet, ModelName, Record, Store, Values};
//!
//! let store = Store::open("portal", "./portal-db")?;
//! let model = ModelName::new("checksum")?;
//! store.ensure_model(&model);
//!
//! let mut changes = ChangeSet::new();
//! changes.insert(&model, Record::new(store.next_id(&model), Values::new()));
//! let head = store.commit(&changes, "tx-1")?;
//! ```

mod error;
mod journal;
mod record;
mod store;
mod types;

pub use error::{ErrorKind, StorageError, StorageResult};
pub use journal::{GitJournal, JournalEntry};
pub use record::{deserialize_record, serialize_record, Record, Values};
pub use store::{Change, ChangeSet, Store};
pub use types::{InvalidNameError, ModelName, RecordId, UserId};
