//! Storage backends
//!
//! Graphs are persisted through the `GraphStore` trait. The primary
//! implementation is `SqliteStore`.

mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{GraphSnapshot, GraphStore, InsertOutcome, OpenStore, StorageError, StorageResult};
