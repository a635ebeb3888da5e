//! Persistence layer: libSQL-backed storage for sessions, the message log,
//! accounts and trade records.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::*;
