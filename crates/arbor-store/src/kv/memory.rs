//! In-process snapshot store

use super::digest::{canonical_body, digest_of};
use super::{SaveOutcome, SnapshotRecord, SnapshotStore};
use crate::errors::{serialization_error, Result};
use arbor_core::Snapshot;
use chrono::Utc;
use std::cell::RefCell;
use std::collections::BTreeMap;

struct Entry {
    body: String,
    record: SnapshotRecord,
}

/// Snapshot store backed by a map; contents vanish with the value
#[derive(Default)]
pub struct MemoryStore {
    entries: RefCell<BTreeMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<Snapshot>> {
        let entries = self.entries.borrow();
        let Some(entry) = entries.get(key) else {
            return Ok(None);
        };
        serde_json::from_str(&entry.body)
            .map(Some)
            .map_err(|e| serialization_error("snapshot_decode", key, e))
    }

    fn save(&self, key: &str, model: &str, snapshot: &Snapshot) -> Result<SaveOutcome> {
        let body = canonical_body(key, snapshot)?;
        let digest = digest_of(&body);

        let mut entries = self.entries.borrow_mut();
        if let Some(existing) = entries.get(key) {
            if existing.record.digest == digest && existing.record.model == model {
                return Ok(SaveOutcome::Unchanged);
            }
        }

        let record = SnapshotRecord {
            key: key.to_string(),
            model: model.to_string(),
            digest,
            updated_at: Utc::now(),
        };
        entries.insert(key.to_string(), Entry { body, record });
        Ok(SaveOutcome::Written)
    }

    fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.entries.borrow_mut().remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.borrow().keys().cloned().collect())
    }

    fn record(&self, key: &str) -> Result<Option<SnapshotRecord>> {
        Ok(self.entries.borrow().get(key).map(|e| e.record.clone()))
    }
}
