//! holonindex-storage: entity store backends for holonindex.
//!
//! Backends:
//! - [`memory`]: in-memory (dev/testing, no persistence)
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence)
//!
//! Both implement `EntityStore` and `CheckpointStore` from `holonindex-core`
//! and share its write rules, so a batch behaves the same on either.

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::{InMemoryStorage, StoreSnapshot};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;
