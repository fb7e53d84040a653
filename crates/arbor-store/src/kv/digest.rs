//! Canonical snapshot bodies and their digests

use crate::errors::{serialization_error, Result};
use arbor_core::Snapshot;
use sha2::{Digest, Sha256};

/// Serialize a snapshot to its canonical JSON text
///
/// Object keys come out sorted, so equal snapshots give equal text
/// regardless of how they were assembled.
pub fn canonical_body(key: &str, snapshot: &Snapshot) -> Result<String> {
    serde_json::to_string(snapshot).map_err(|e| serialization_error("snapshot_encode", key, e))
}

/// SHA-256 of a canonical body, hex encoded
pub fn digest_of(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}
