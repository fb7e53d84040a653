//! Handles for array and map fields
//!
//! Reads are tracked like field reads; writes pass the same access gate as
//! `Instance::set` and are then applied by the tree.

use std::collections::BTreeMap;

use super::Instance;
use crate::errors::{ArborError, Result};
use crate::tree::{NodeId, NodeKind, Tree};
use crate::value::{json_identifier_key, Value};

fn wrong_kind(id: NodeId, expected: &str, actual: &str) -> ArborError {
    ArborError::WrongNodeKind {
        node_id: id.raw(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

fn model_instances(tree: &Tree, values: Vec<Value>) -> Vec<Instance> {
    values
        .into_iter()
        .filter_map(|v| v.as_node())
        .map(|id| Instance::new(tree.clone(), id))
        .collect()
}

/// Array field of an instance
#[derive(Clone)]
pub struct ListRef {
    tree: Tree,
    id: NodeId,
}

impl ListRef {
    pub(crate) fn new(tree: Tree, id: NodeId) -> Result<Self> {
        match &tree.state().node(id)?.kind {
            NodeKind::List { .. } => {}
            other => return Err(wrong_kind(id, "list", other.label())),
        }
        Ok(Self { tree, id })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    fn tracked(&self) -> Result<Vec<Value>> {
        let (atom, items) = {
            let state = self.tree.state();
            match &state.node(self.id)?.kind {
                NodeKind::List { atom, items, .. } => (*atom, items.clone()),
                other => return Err(wrong_kind(self.id, "list", other.label())),
            }
        };
        self.tree.state_mut().graph.observe(atom);
        Ok(items)
    }

    fn guard(&self, operation: &str) -> Result<()> {
        self.tree.check_write(self.id, || {
            let path = self
                .tree
                .try_state()
                .map(|s| s.path_of(self.id))
                .unwrap_or_default();
            format!("{}.{}", path, operation)
        })
    }

    /// # Errors
    ///
    /// Returns `NodeDestroyed` once the owner is gone.
    pub fn len(&self) -> Result<usize> {
        Ok(self.tracked()?.len())
    }

    /// # Errors
    ///
    /// Returns `NodeDestroyed` once the owner is gone.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.tracked()?.is_empty())
    }

    /// # Errors
    ///
    /// Returns `NodeDestroyed` once the owner is gone.
    pub fn get(&self, index: usize) -> Result<Option<Value>> {
        Ok(self.tracked()?.get(index).cloned())
    }

    /// # Errors
    ///
    /// Returns `NodeDestroyed` once the owner is gone.
    pub fn items(&self) -> Result<Vec<Value>> {
        self.tracked()
    }

    /// Model items as instance handles
    ///
    /// # Errors
    ///
    /// Returns `NodeDestroyed` once the owner is gone.
    pub fn instances(&self) -> Result<Vec<Instance>> {
        Ok(model_instances(&self.tree, self.tracked()?))
    }

    /// Append a value; snapshots of model items are materialized
    ///
    /// # Errors
    ///
    /// Returns the write-gate errors of [`Instance::set`] or `InvalidSnapshot`.
    pub fn push(&self, value: impl Into<Value>) -> Result<Value> {
        self.guard("push")?;
        self.tree.list_push(self.id, value.into())
    }

    /// Remove and destroy the item at `index`
    ///
    /// # Errors
    ///
    /// Returns the write-gate errors or `UnexpectedValue` for an index out of
    /// range.
    pub fn remove(&self, index: usize) -> Result<()> {
        self.guard("remove")?;
        self.tree.list_remove(self.id, index)
    }

    /// # Errors
    ///
    /// Returns the write-gate errors.
    pub fn clear(&self) -> Result<()> {
        self.guard("clear")?;
        self.tree.list_clear(self.id)
    }

    /// Take the item at `index` out of the tree; it becomes a new root
    ///
    /// # Errors
    ///
    /// Returns the write-gate errors or `UnexpectedValue` if the item is not
    /// a model node.
    pub fn detach(&self, index: usize) -> Result<Instance> {
        self.guard("detach")?;
        let id = self.tree.list_detach(self.id, index)?;
        Ok(Instance::new(self.tree.clone(), id))
    }
}

/// Map field of an instance
#[derive(Clone)]
pub struct MapRef {
    tree: Tree,
    id: NodeId,
}

impl MapRef {
    pub(crate) fn new(tree: Tree, id: NodeId) -> Result<Self> {
        match &tree.state().node(id)?.kind {
            NodeKind::Map { .. } => {}
            other => return Err(wrong_kind(id, "map", other.label())),
        }
        Ok(Self { tree, id })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    fn tracked(&self) -> Result<BTreeMap<String, Value>> {
        let (atom, entries) = {
            let state = self.tree.state();
            match &state.node(self.id)?.kind {
                NodeKind::Map { atom, entries, .. } => (*atom, entries.clone()),
                other => return Err(wrong_kind(self.id, "map", other.label())),
            }
        };
        self.tree.state_mut().graph.observe(atom);
        Ok(entries)
    }

    fn guard(&self, operation: &str) -> Result<()> {
        self.tree.check_write(self.id, || {
            let path = self
                .tree
                .try_state()
                .map(|s| s.path_of(self.id))
                .unwrap_or_default();
            format!("{}.{}", path, operation)
        })
    }

    /// # Errors
    ///
    /// Returns `NodeDestroyed` once the owner is gone.
    pub fn len(&self) -> Result<usize> {
        Ok(self.tracked()?.len())
    }

    /// # Errors
    ///
    /// Returns `NodeDestroyed` once the owner is gone.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.tracked()?.is_empty())
    }

    /// Keys in ascending order
    ///
    /// # Errors
    ///
    /// Returns `NodeDestroyed` once the owner is gone.
    pub fn keys(&self) -> Result<Vec<String>> {
        Ok(self.tracked()?.into_keys().collect())
    }

    /// # Errors
    ///
    /// Returns `NodeDestroyed` once the owner is gone.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.tracked()?.remove(key))
    }

    /// Model entry under `key` as an instance handle
    ///
    /// # Errors
    ///
    /// Returns `NodeDestroyed` once the owner is gone.
    pub fn instance(&self, key: &str) -> Result<Option<Instance>> {
        Ok(self
            .get(key)?
            .and_then(|v| v.as_node())
            .map(|id| Instance::new(self.tree.clone(), id)))
    }

    /// # Errors
    ///
    /// Returns `NodeDestroyed` once the owner is gone.
    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.tracked()?.contains_key(key))
    }

    /// Values in key order
    ///
    /// # Errors
    ///
    /// Returns `NodeDestroyed` once the owner is gone.
    pub fn values(&self) -> Result<Vec<Value>> {
        Ok(self.tracked()?.into_values().collect())
    }

    /// # Errors
    ///
    /// Returns `NodeDestroyed` once the owner is gone.
    pub fn instances(&self) -> Result<Vec<Instance>> {
        Ok(model_instances(&self.tree, self.values()?))
    }

    /// Insert or replace the entry under `key`
    ///
    /// # Errors
    ///
    /// Returns the write-gate errors, or `InvalidSnapshot` if the value does
    /// not fit or a model's identifier differs from `key`.
    pub fn insert(&self, key: &str, value: impl Into<Value>) -> Result<Value> {
        self.guard("insert")?;
        self.tree.map_insert(self.id, key, value.into())
    }

    /// Insert a model keyed by its own identifier
    ///
    /// An existing entry with the same identifier is reconciled in place, so
    /// handles to it stay valid.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSnapshot` when the value carries no identifier, plus
    /// the errors of [`MapRef::insert`].
    pub fn put(&self, value: impl Into<Value>) -> Result<Instance> {
        self.guard("put")?;
        let value = value.into();
        let key = self.key_of(&value)?;

        let existing = self.tracked()?.get(&key).and_then(Value::as_node);
        let id = match (existing, &value) {
            (Some(current), Value::Json(json)) => {
                self.tree.apply_snapshot_to(current, json.clone())?;
                current
            }
            _ => self.tree.map_insert(self.id, &key, value)?.try_node()?,
        };
        Ok(Instance::new(self.tree.clone(), id))
    }

    fn key_of(&self, value: &Value) -> Result<String> {
        let (item, model) = {
            let state = self.tree.state();
            match &state.node(self.id)?.kind {
                NodeKind::Map { item, .. } => (item.clone(), item.target_model()?),
                other => return Err(wrong_kind(self.id, "map", other.label())),
            }
        };
        let missing = || ArborError::InvalidSnapshot {
            type_name: item.name(),
            violations: vec!["value carries no identifier to key it by".to_string()],
        };
        let field = model
            .as_ref()
            .and_then(|m| m.identifier_field().map(str::to_string))
            .ok_or_else(missing)?;
        match value {
            Value::Json(serde_json::Value::Object(entries)) => {
                entries.get(&field).and_then(json_identifier_key).ok_or_else(missing)
            }
            Value::Node(id) => {
                let state = self.tree.state();
                state
                    .node(*id)?
                    .identifier()
                    .and_then(crate::value::identifier_key)
                    .ok_or_else(missing)
            }
            _ => Err(missing()),
        }
    }

    /// Remove and destroy the entry under `key`; returns whether it existed
    ///
    /// # Errors
    ///
    /// Returns the write-gate errors.
    pub fn delete(&self, key: &str) -> Result<bool> {
        self.guard("delete")?;
        self.tree.map_delete(self.id, key)
    }

    /// # Errors
    ///
    /// Returns the write-gate errors.
    pub fn clear(&self) -> Result<()> {
        self.guard("clear")?;
        self.tree.map_clear(self.id)
    }
}
