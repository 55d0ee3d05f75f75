//! portaldb - transactional model access for a member portal
//!
//! Application code runs its units of work through [`Tdb`], which wraps
//! each one in a database transaction: read-only unless asked otherwise,
//! retried on transient failures, committed or rolled back as a whole.
//! Records live in a [`Store`](storage::Store), optionally journaled to
//! git so every commit stays in history.
//!
//! # Example
//!
//! ```no_run
//! use portaldb::{Tdb, TdbConfig, TxOptions};
//! use portaldb::models::{Checksum, SearchByCode};
//!
//! let tdb = Tdb::init(TdbConfig::new("portal").storage_path("./portal-db")).unwrap();
//! let found = tdb
//!     .transaction(TxOptions::read_only(), |tx| Checksum::search_by_code(tx, "abc"))
//!     .unwrap();
//! ```

pub mod config;
pub mod db;
pub mod domain;
pub mod models;
pub mod pool;
pub mod storage;
pub mod transaction;

pub use config::TdbConfig;
pub use db::{Tdb, TdbError, TdbResult};
pub use domain::Domain;
pub use transaction::{Method, Transaction, TxOptions};
