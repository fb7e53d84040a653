//! arbor-store - snapshot persistence for arbor trees
//!
//! Provides:
//! - `SnapshotStore`, a small key-value contract over whole-tree snapshots
//! - An in-process `MemoryStore` and a SQLite-backed `SqliteStore`
//! - Migrations framework for the SQLite schema
//! - `restore`/`save`/`autosave` bindings between an instance and a store

#![allow(clippy::result_large_err)]

pub mod db;
pub mod errors;
pub mod kv;
pub mod migrations;
pub mod persist;

// Re-export key types
pub use errors::Result;
pub use kv::{MemoryStore, SaveOutcome, SnapshotRecord, SnapshotStore, SqliteStore};
pub use persist::{autosave, restore, save};
