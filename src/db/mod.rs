//! Database handle and transaction wrapper.
//!
//! `Tdb` is what application code talks to: it opens a transaction per
//! unit of work, retries transient failures and keeps worker caches in
//! step with committed writes. Connections are pooled per handle.

mod api;
mod connection;
mod error;

pub use api::{RequestScope, Tdb};
pub use connection::{Connection, ConnectionPool};
pub use error::{TdbError, TdbResult};
