//! chaintable-storage — table store backends.
//!
//! The core crate ships an in-memory store for tests; this crate provides
//! the persistent backends. The SQLite backend doubles as the local
//! emulator-endpoint implementation of the partitioned table store.

pub mod sqlite;

pub use sqlite::SqliteTableStore;
