//! Persistence layer: libSQL-backed storage for contacts, threads, and
//! scheduler records.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{ContactStore, ContentStore, Database, SubscriptionStore, ThreadStore};
