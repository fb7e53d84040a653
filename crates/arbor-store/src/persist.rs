//! Binding instances to snapshot stores
//!
//! `restore` and `save` are logged boundary operations; `autosave` hooks a
//! store onto a tree's post-action snapshot notifications.

use crate::errors::{from_tree, Result};
use crate::kv::{SaveOutcome, SnapshotStore};
use arbor_core::{log_op_end, log_op_error, log_op_start};
use arbor_core::{Instance, ListenerId};
use std::rc::Rc;
use std::time::Instant;

/// Apply the snapshot stored under `key` to `instance`
///
/// The snapshot is applied as one action, so listeners on the tree are
/// notified once. Returns `false` when nothing is stored under `key`.
///
/// # Errors
///
/// Fails if the store cannot be read or the stored snapshot does not fit
/// the instance's model (`ERR_INVALID_SNAPSHOT`).
pub fn restore(instance: &Instance, store: &dyn SnapshotStore, key: &str) -> Result<bool> {
    let start = Instant::now();
    log_op_start!("snapshot_restore", key = key);

    let result = store.load(key).and_then(|loaded| match loaded {
        Some(snapshot) => instance
            .apply_snapshot(snapshot)
            .map(|()| true)
            .map_err(|e| from_tree("snapshot_restore", e)),
        None => Ok(false),
    });

    match &result {
        Ok(restored) => {
            log_op_end!(
                "snapshot_restore",
                duration_ms = start.elapsed().as_millis() as u64,
                key = key,
                restored = *restored
            );
        }
        Err(e) => {
            log_op_error!(
                "snapshot_restore",
                e.clone(),
                duration_ms = start.elapsed().as_millis() as u64,
                key = key
            );
        }
    }
    result
}

/// Store the snapshot of the tree containing `instance` under `key`
///
/// The whole tree is saved, from its root, tagged with the root's model.
///
/// # Errors
///
/// Fails if the instance is destroyed or the store cannot be written.
pub fn save(instance: &Instance, store: &dyn SnapshotStore, key: &str) -> Result<SaveOutcome> {
    let start = Instant::now();
    log_op_start!("snapshot_save", key = key);

    let result =
        root_snapshot(instance).and_then(|(model, snapshot)| store.save(key, &model, &snapshot));

    match &result {
        Ok(outcome) => {
            log_op_end!(
                "snapshot_save",
                duration_ms = start.elapsed().as_millis() as u64,
                key = key,
                outcome = ?outcome
            );
        }
        Err(e) => {
            log_op_error!(
                "snapshot_save",
                e.clone(),
                duration_ms = start.elapsed().as_millis() as u64,
                key = key
            );
        }
    }
    result
}

/// Save the tree's snapshot under `key` after every outermost action
///
/// Write failures are logged and dropped; the action that triggered them
/// has already completed. Unregister with `Tree::remove_listener`.
///
/// # Errors
///
/// Fails if the instance is destroyed.
pub fn autosave(
    instance: &Instance,
    store: Rc<dyn SnapshotStore>,
    key: &str,
) -> Result<ListenerId> {
    let root = instance.root().map_err(|e| from_tree("autosave", e))?;
    let model = root
        .model()
        .map_err(|e| from_tree("autosave", e))?
        .name()
        .to_string();
    let key = key.to_string();

    let id = root
        .on_snapshot(move |snapshot| match store.save(&key, &model, snapshot) {
            Ok(outcome) => tracing::debug!(key = %key, outcome = ?outcome, "autosave"),
            Err(e) => tracing::warn!(key = %key, error = %e, "autosave failed"),
        })
        .map_err(|e| from_tree("autosave", e))?;
    Ok(id)
}

fn root_snapshot(instance: &Instance) -> Result<(String, arbor_core::Snapshot)> {
    let root = instance.root().map_err(|e| from_tree("snapshot_save", e))?;
    let model = root.model().map_err(|e| from_tree("snapshot_save", e))?;
    let snapshot = root.snapshot().map_err(|e| from_tree("snapshot_save", e))?;
    Ok((model.name().to_string(), snapshot))
}
