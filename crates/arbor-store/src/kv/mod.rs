//! Key-value snapshot stores
//!
//! A store holds one whole-tree snapshot per key, along with the name of the
//! model that produced it and a digest of its canonical body.

pub mod digest;
pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::errors::Result;
use arbor_core::Snapshot;
use chrono::{DateTime, Utc};

/// Whether `save` actually wrote anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Written,
    /// The stored body already had the same digest
    Unchanged,
}

/// Metadata about a stored snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub key: String,
    pub model: String,
    pub digest: String,
    pub updated_at: DateTime<Utc>,
}

/// Storage contract for persisted snapshots
///
/// Implementations take `&self`; the trees they back are single-threaded.
pub trait SnapshotStore {
    /// Load the snapshot stored under `key`, if any
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot be read or the stored body is not JSON.
    fn load(&self, key: &str) -> Result<Option<Snapshot>>;

    /// Store `snapshot` under `key`, skipping the write when unchanged
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot be written.
    fn save(&self, key: &str, model: &str, snapshot: &Snapshot) -> Result<SaveOutcome>;

    /// Remove the snapshot under `key`, returning whether one existed
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot be written.
    fn remove(&self, key: &str) -> Result<bool>;

    /// All stored keys, sorted
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot be read.
    fn keys(&self) -> Result<Vec<String>>;

    /// Metadata for the snapshot under `key`
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot be read.
    fn record(&self, key: &str) -> Result<Option<SnapshotRecord>>;
}
