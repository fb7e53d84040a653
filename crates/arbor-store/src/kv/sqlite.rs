//! SQLite-backed snapshot store
//!
//! One row per key in the `snapshots` table (see `migrations/`).

use super::digest::{canonical_body, digest_of};
use super::{SaveOutcome, SnapshotRecord, SnapshotStore};
use crate::db;
use crate::errors::{from_rusqlite, serialization_error, Result};
use crate::migrations::apply_migrations;
use arbor_core::{ExError, ExErrorKind, Snapshot};
use chrono::{TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) a store file and bring its schema up to date
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened or a migration fails.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = db::open(path)?;
        db::configure(&conn)?;
        Self::from_connection(conn)
    }

    /// A store that lives only as long as the value
    ///
    /// # Errors
    ///
    /// Fails if the schema cannot be created.
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(db::open_in_memory()?)
    }

    /// Wrap an existing connection, applying pending migrations
    ///
    /// # Errors
    ///
    /// Fails if a migration fails or no longer matches its checksum.
    pub fn from_connection(mut conn: Connection) -> Result<Self> {
        apply_migrations(&mut conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn stored_digest(&self, key: &str) -> Result<Option<(String, String)>> {
        self.conn
            .query_row(
                "SELECT model, digest FROM snapshots WHERE key = ?1",
                [key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(from_rusqlite)
    }
}

impl SnapshotStore for SqliteStore {
    fn load(&self, key: &str) -> Result<Option<Snapshot>> {
        let body: Option<String> = self
            .conn
            .query_row("SELECT body FROM snapshots WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(from_rusqlite)?;

        match body {
            Some(body) => serde_json::from_str(&body)
                .map(Some)
                .map_err(|e| serialization_error("snapshot_decode", key, e)),
            None => Ok(None),
        }
    }

    fn save(&self, key: &str, model: &str, snapshot: &Snapshot) -> Result<SaveOutcome> {
        let body = canonical_body(key, snapshot)?;
        let digest = digest_of(&body);

        if let Some((stored_model, stored_digest)) = self.stored_digest(key)? {
            if stored_digest == digest && stored_model == model {
                tracing::trace!(key, "snapshot unchanged");
                return Ok(SaveOutcome::Unchanged);
            }
        }

        let now = Utc::now().timestamp_millis();
        self.conn
            .execute(
                "INSERT INTO snapshots (key, model, body, digest, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(key) DO UPDATE SET
                    model = excluded.model,
                    body = excluded.body,
                    digest = excluded.digest,
                    updated_at = excluded.updated_at",
                rusqlite::params![key, model, body, digest, now],
            )
            .map_err(from_rusqlite)?;

        tracing::debug!(key, model, digest = %digest, size_bytes = body.len(), "stored snapshot");
        Ok(SaveOutcome::Written)
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM snapshots WHERE key = ?1", [key])
            .map_err(from_rusqlite)?;
        Ok(removed > 0)
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key FROM snapshots ORDER BY key")
            .map_err(from_rusqlite)?;
        let keys = stmt
            .query_map([], |row| row.get(0))
            .map_err(from_rusqlite)?
            .collect::<std::result::Result<Vec<String>, _>>()
            .map_err(from_rusqlite)?;
        Ok(keys)
    }

    fn record(&self, key: &str) -> Result<Option<SnapshotRecord>> {
        let row: Option<(String, String, i64)> = self
            .conn
            .query_row(
                "SELECT model, digest, updated_at FROM snapshots WHERE key = ?1",
                [key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(from_rusqlite)?;

        let Some((model, digest, millis)) = row else {
            return Ok(None);
        };
        let updated_at = Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
            ExError::new(ExErrorKind::Persistence)
                .with_op("snapshot_record")
                .with_message(format!("Invalid updated_at {} for '{}'", millis, key))
        })?;

        Ok(Some(SnapshotRecord {
            key: key.to_string(),
            model,
            digest,
            updated_at,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_upsert_replaces_body() {
        let store = SqliteStore::in_memory().unwrap();
        store.save("cart", "Cart", &json!({"entries": []})).unwrap();
        store
            .save("cart", "Cart", &json!({"entries": [{"quantity": 1}]}))
            .unwrap();

        let rows: i64 = store
            .connection()
            .query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(
            store.load("cart").unwrap(),
            Some(json!({"entries": [{"quantity": 1}]}))
        );
    }

    #[test]
    fn test_corrupt_body_is_a_serialization_error() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .connection()
            .execute(
                "INSERT INTO snapshots (key, model, body, digest, updated_at)
                 VALUES ('bad', 'Cart', '{oops', 'x', 0)",
                [],
            )
            .unwrap();

        let err = store.load("bad").unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::Serialization);
        assert_eq!(err.op(), Some("snapshot_decode"));
    }
}
