//! Snapshot capture and application
//!
//! Capturing reports every atom it reads, so a view that snapshots part of
//! the tree is invalidated by any change below it. Applying a snapshot
//! reconciles in place: model children with a matching identifier and map
//! entries keep their nodes, everything else is rebuilt.

use super::{NodeId, NodeKind, Tree};
use crate::errors::{ArborError, Result};
use crate::model::{FieldDef, Hook, Instance, Model};
use crate::types::model_violations;
use crate::value::{identifier_key, json_identifier_key, Snapshot, Value};

enum Shape {
    Model(Model, Vec<(String, Value)>),
    Map(Vec<(String, Value)>),
    List(Vec<Value>),
}

impl Tree {
    /// Structural copy of the subtree at `id`
    pub(crate) fn snapshot_of(&self, id: NodeId) -> Result<Snapshot> {
        let shape = {
            let mut state = self.state_mut();
            let (shape, atoms) = match &state.node(id)?.kind {
                NodeKind::Model { model, fields } => (
                    Shape::Model(
                        model.clone(),
                        fields.iter().map(|s| (s.name.clone(), s.value.clone())).collect(),
                    ),
                    fields.iter().map(|s| s.atom).collect(),
                ),
                NodeKind::Map { atom, entries, .. } => (
                    Shape::Map(entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
                    vec![*atom],
                ),
                NodeKind::List { atom, items, .. } => (Shape::List(items.clone()), vec![*atom]),
            };
            for atom in atoms {
                state.graph.observe(atom);
            }
            shape
        };

        match shape {
            Shape::Model(model, fields) => {
                let mut object = serde_json::Map::new();
                for (name, value) in fields {
                    object.insert(name, self.value_snapshot(&value)?);
                }
                self.post_process(id, &model, Snapshot::Object(object))
            }
            Shape::Map(entries) => {
                let mut object = serde_json::Map::new();
                for (key, value) in entries {
                    object.insert(key, self.value_snapshot(&value)?);
                }
                Ok(Snapshot::Object(object))
            }
            Shape::List(items) => Ok(Snapshot::Array(
                items
                    .iter()
                    .map(|v| self.value_snapshot(v))
                    .collect::<Result<Vec<_>>>()?,
            )),
        }
    }

    fn value_snapshot(&self, value: &Value) -> Result<Snapshot> {
        match value {
            Value::Node(child) => self.snapshot_of(*child),
            Value::List(items) => Ok(Snapshot::Array(
                items
                    .iter()
                    .map(|v| self.value_snapshot(v))
                    .collect::<Result<Vec<_>>>()?,
            )),
            other => other.to_json(),
        }
    }

    /// `post_process_snapshot` runs as a pure transform, outside any action
    fn post_process(&self, id: NodeId, model: &Model, snapshot: Snapshot) -> Result<Snapshot> {
        let Some(hook) = model.hook(Hook::PostProcessSnapshot) else {
            return Ok(snapshot);
        };
        let instance = Instance::new(self.clone(), id);
        match hook.invoke(&instance, &[Value::Json(snapshot.clone())])? {
            Value::Null => Ok(snapshot),
            Value::Json(replaced) => Ok(replaced),
            other => other.to_json(),
        }
    }

    /// Reconcile the subtree at `id` with `snapshot`
    ///
    /// Callers are responsible for access checks and for running this inside
    /// an action.
    pub(crate) fn apply_snapshot_to(&self, id: NodeId, snapshot: Snapshot) -> Result<()> {
        enum Target {
            Model(Model),
            Map,
            List,
        }
        let target = match &self.state().node(id)?.kind {
            NodeKind::Model { model, .. } => Target::Model(model.clone()),
            NodeKind::Map { .. } => Target::Map,
            NodeKind::List { .. } => Target::List,
        };

        match (target, snapshot) {
            (Target::Model(model), snapshot) => {
                let snapshot = model.preprocess(snapshot);
                let violations = model_violations(&model, &snapshot);
                if !violations.is_empty() {
                    return Err(model.ty().invalid(violations));
                }
                let Snapshot::Object(mut entries) = snapshot else {
                    return Err(ArborError::internal("validated model snapshot is not an object"));
                };
                for field in model.fields() {
                    self.reconcile_field(id, &model, field, entries.remove(&field.name))?;
                }
                Ok(())
            }
            (Target::Map, Snapshot::Object(entries)) => self.reconcile_map(id, entries),
            (Target::List, Snapshot::Array(items)) => self.rebuild_list(id, items),
            (_, other) => Err(ArborError::InvalidSnapshot {
                type_name: self.state().node(id)?.kind.label().to_string(),
                violations: vec![format!("value {} is not assignable", other)],
            }),
        }
    }

    fn reconcile_field(
        &self,
        id: NodeId,
        model: &Model,
        field: &FieldDef,
        incoming: Option<Snapshot>,
    ) -> Result<()> {
        let current = {
            let state = self.state();
            state
                .node(id)?
                .slot(&field.name)
                .map(|s| s.value.clone())
                .unwrap_or_default()
        };

        if model.identifier_field() == Some(field.name.as_str()) {
            let unchanged = incoming.as_ref().and_then(json_identifier_key) == identifier_key(&current);
            if unchanged {
                return Ok(());
            }
            return Err(ArborError::IdentifierImmutable {
                model: model.name().to_string(),
                field: field.name.clone(),
            });
        }

        if let (Value::Node(child), Some(json)) = (&current, &incoming) {
            if !field.ty.is_reference() && self.reconcilable(*child, json)? {
                return self.apply_snapshot_to(*child, json.clone());
            }
        }
        self.reset_field(id, &field.name, &field.ty, incoming)
    }

    /// Whether `json` can be applied onto the existing node in place
    fn reconcilable(&self, child: NodeId, json: &Snapshot) -> Result<bool> {
        let state = self.state();
        let node = state.node(child)?;
        Ok(match (&node.kind, json) {
            (NodeKind::Model { model, .. }, Snapshot::Object(entries)) => {
                match model.identifier_field() {
                    Some(ident) => {
                        entries.get(ident).and_then(json_identifier_key)
                            == node.identifier().and_then(identifier_key)
                    }
                    None => true,
                }
            }
            (NodeKind::Map { .. }, Snapshot::Object(_)) => true,
            (NodeKind::List { .. }, Snapshot::Array(_)) => true,
            _ => false,
        })
    }

    fn reconcile_map(&self, id: NodeId, mut incoming: serde_json::Map<String, Snapshot>) -> Result<()> {
        let existing: Vec<(String, Value)> = match &self.state().node(id)?.kind {
            NodeKind::Map { entries, .. } => entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            _ => Vec::new(),
        };

        for (key, value) in existing {
            match incoming.remove(&key) {
                None => {
                    self.map_delete(id, &key)?;
                }
                Some(json) => {
                    let in_place = match value.as_node() {
                        Some(child) => self.reconcilable(child, &json)?,
                        None => false,
                    };
                    match value {
                        Value::Node(child) if in_place => self.apply_snapshot_to(child, json)?,
                        current => {
                            if current.to_json().ok().as_ref() != Some(&json) {
                                self.map_insert(id, &key, Value::from_json(&json))?;
                            }
                        }
                    }
                }
            }
        }
        for (key, json) in incoming {
            self.map_insert(id, &key, Value::from_json(&json))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::model::ModelBuilder;
    use crate::tree::Tree;
    use crate::types::TypeNamespace;
    use serde_json::json;

    #[test]
    fn test_snapshot_round_trip_of_nested_collections() {
        let ns = TypeNamespace::new();
        let tag = ModelBuilder::new("Tag")
            .field("id", |t| t.identifier())
            .unwrap()
            .compile(&ns)
            .unwrap();
        let post = ModelBuilder::new("Post")
            .field_default("tags", move |t| t.map(t.of(&tag)), json!({}))
            .unwrap()
            .field_default("lines", |t| t.array(t.string()), json!([]))
            .unwrap()
            .compile(&ns)
            .unwrap();

        let tree = Tree::new();
        let input = json!({"tags": {"a": {"id": "a"}}, "lines": ["x", "y"]});
        let instance = post.create(&tree, input.clone()).unwrap();
        assert_eq!(instance.snapshot().unwrap(), input);
    }
}
