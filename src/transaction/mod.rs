//! Transaction management for portaldb.
//!
//! A transaction accumulates its writes in a private write set on top of
//! a pooled connection. Reads see the transaction's own writes first, then
//! the worker cache, then the committed store. On commit the write set is
//! applied atomically with per-record version checks; on rollback or
//! release it is discarded.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TransactionManager                        │
//! │  (begins on pooled connections, tracks, serializes commits) │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │ Transaction │       │  TxOptions  │       │ Connection  │
//!  │  (Context)  │       │  (mode)     │       │   Pool      │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use portaldb::transaction::TransactionManager;
//!
//! let manager = TransactionManager::new(pool, connections);
//!
//! let mut tx = manager.begin(UserId::ROOT, false, Context::new())?;
//! tx.insert(&model, values)?;
//! manager.commit_transaction(tx)?;  // or manager.rollback_transaction(tx);
//! ```

mod context;
mod error;
mod manager;
mod options;

pub use context::{
    Context, Transaction, TransactionMetadata, TxAborted, TxActive, TxCommitted, TxReleased,
};
pub use error::{TransactionError, TransactionResult};
pub use manager::{TransactionManager, TransactionStats};
pub use options::{Method, TxOptions};
