//! Building nodes from snapshots and tearing them down again
//!
//! Every structural change funnels through here: model creation, field
//! assignment, collection writes and snapshot application. A build records
//! what it allocated so a failure can discard it without running hooks, and
//! what it created so a success can fire `after_create`/`after_attach` once
//! the whole graph exists.

use std::collections::BTreeMap;

use super::reactive::AtomId;
use super::{NodeData, NodeId, NodeKind, ParentLink, PathSegment, Slot, Tree};
use crate::errors::{ArborError, Result};
use crate::model::{Hook, Instance, Model};
use crate::types::{model_violations, Initializer, Type, TypeKind};
use crate::value::{json_identifier_key, Snapshot, Value};

/// Source for one value being materialized
pub(crate) enum Input {
    /// The key was missing from the snapshot
    Absent,
    Json(Snapshot),
    /// An existing root node to adopt as a child
    Node(NodeId),
}

impl Input {
    pub fn from_value(value: Value) -> Result<Input> {
        match value {
            Value::Node(id) => Ok(Input::Node(id)),
            other => Ok(Input::Json(other.to_json()?)),
        }
    }

    fn describe(&self) -> String {
        match self {
            Input::Absent => "value is required".to_string(),
            Input::Json(json) => format!("value {} is not assignable", json),
            Input::Node(id) => format!("node {} is not assignable", id),
        }
    }
}

/// Book-keeping for one materialization
#[derive(Default)]
pub(crate) struct Build {
    /// Every node allocated, parents first
    allocated: Vec<NodeId>,
    /// Bound model nodes, children first
    created: Vec<NodeId>,
    /// Pre-existing roots adopted as children
    adopted: Vec<NodeId>,
}

fn mismatch(ty: &Type, input: &Input) -> ArborError {
    ArborError::InvalidSnapshot {
        type_name: ty.name(),
        violations: vec![input.describe()],
    }
}

impl Tree {
    pub(crate) fn build_value(
        &self,
        ty: &Type,
        input: Input,
        parent: Option<ParentLink>,
        out: &mut Build,
    ) -> Result<Value> {
        let ty = ty.resolved()?;
        match ty.kind() {
            TypeKind::Optional { inner, default } => {
                let input = match input {
                    Input::Absent => match default {
                        Initializer::Snapshot(seed) => Input::Json(seed.clone()),
                        Initializer::Compute(init) => Input::from_value(init(self)?)?,
                    },
                    other => other,
                };
                self.build_value(inner, input, parent, out)
            }
            TypeKind::Maybe(inner) => match input {
                Input::Absent | Input::Json(Snapshot::Null) => Ok(Value::Null),
                other => self.build_value(inner, other, parent, out),
            },
            TypeKind::String | TypeKind::Number | TypeKind::Boolean | TypeKind::Identifier => {
                match input {
                    Input::Json(json) => {
                        let violations = ty.validate(&json);
                        if !violations.is_empty() {
                            return Err(ty.invalid(violations));
                        }
                        Ok(Value::from_json(&json))
                    }
                    other => Err(mismatch(&ty, &other)),
                }
            }
            TypeKind::Reference(target) => self.reference_value(&ty, target, input),
            TypeKind::Model(model) => match input {
                Input::Json(json) => self.build_model(model, json, parent, false, out),
                Input::Node(id) => self.adopt(id, model, parent, out),
                Input::Absent => Err(mismatch(&ty, &Input::Absent)),
            },
            TypeKind::Map(item) => match input {
                Input::Json(Snapshot::Object(entries)) => {
                    let id = self.alloc(parent, out, |atom| NodeKind::Map {
                        item: item.clone(),
                        atom,
                        entries: BTreeMap::new(),
                    });
                    for (key, json) in entries {
                        let link = ParentLink {
                            node: id,
                            segment: PathSegment::Key(key.clone()),
                        };
                        let value = self.build_value(item, Input::Json(json), Some(link), out)?;
                        if let NodeKind::Map { entries, .. } = &mut self.state_mut().node_mut(id)?.kind {
                            entries.insert(key, value);
                        }
                    }
                    Ok(Value::Node(id))
                }
                other => Err(mismatch(&ty, &other)),
            },
            TypeKind::Array(item) => match input {
                Input::Json(Snapshot::Array(items)) => {
                    let id = self.alloc(parent, out, |atom| NodeKind::List {
                        item: item.clone(),
                        atom,
                        items: Vec::new(),
                    });
                    for (index, json) in items.into_iter().enumerate() {
                        let link = ParentLink {
                            node: id,
                            segment: PathSegment::Item(index),
                        };
                        let value = self.build_value(item, Input::Json(json), Some(link), out)?;
                        if let NodeKind::List { items, .. } = &mut self.state_mut().node_mut(id)?.kind {
                            items.push(value);
                        }
                    }
                    Ok(Value::Node(id))
                }
                other => Err(mismatch(&ty, &other)),
            },
            TypeKind::Param(name) => Err(ArborError::configuration(
                name.clone(),
                "generic parameter was never bound",
            )),
            TypeKind::Late { label, .. } => Err(ArborError::internal(format!(
                "late type '{}' survived resolution",
                label
            ))),
        }
    }

    fn alloc(
        &self,
        parent: Option<ParentLink>,
        out: &mut Build,
        kind: impl FnOnce(AtomId) -> NodeKind,
    ) -> NodeId {
        let mut state = self.state_mut();
        let atom = state.graph.new_atom();
        let id = state.fresh_id();
        state.nodes.insert(
            id,
            NodeData {
                parent,
                kind: kind(atom),
            },
        );
        out.allocated.push(id);
        id
    }

    /// Allocate a model node, fill its fields and bind it
    ///
    /// A root allocation for the model waiting in the pending slot takes the
    /// reserved handle. The slot is emptied here, before the pre-processor or
    /// any initializer runs, so those may create further instances.
    pub(crate) fn build_model(
        &self,
        model: &Model,
        json: Snapshot,
        parent: Option<ParentLink>,
        validate: bool,
        out: &mut Build,
    ) -> Result<Value> {
        let id = {
            let mut state = self.state_mut();
            let id = match state.pending.take() {
                Some(pending) if parent.is_none() && pending.model.ptr_eq(model) => {
                    tracing::trace!(model = %model.name(), node = %pending.handle, "consume pending slot");
                    pending.handle
                }
                other => {
                    state.pending = other;
                    state.fresh_id()
                }
            };
            state.nodes.insert(
                id,
                NodeData {
                    parent,
                    kind: NodeKind::Model {
                        model: model.clone(),
                        fields: Vec::with_capacity(model.fields().len()),
                    },
                },
            );
            id
        };
        out.allocated.push(id);

        let snapshot = model.preprocess(json);
        if validate {
            let violations = model_violations(model, &snapshot);
            if !violations.is_empty() {
                return Err(model.ty().invalid(violations));
            }
        }
        let mut entries = match snapshot {
            Snapshot::Object(entries) => entries,
            other => return Err(mismatch(&model.ty(), &Input::Json(other))),
        };

        for field in model.fields() {
            let input = entries
                .remove(&field.name)
                .map(Input::Json)
                .unwrap_or(Input::Absent);
            let link = ParentLink {
                node: id,
                segment: PathSegment::Field(field.name.clone()),
            };
            let value = self.build_value(&field.ty, input, Some(link), out)?;
            let mut state = self.state_mut();
            let atom = state.graph.new_atom();
            if let NodeKind::Model { fields, .. } = &mut state.node_mut(id)?.kind {
                fields.push(Slot {
                    name: field.name.clone(),
                    ty: field.ty.clone(),
                    atom,
                    value,
                });
            }
        }

        self.state_mut().bind(id);
        tracing::trace!(model = %model.name(), node = %id, "bind instance");
        out.created.push(id);
        Ok(Value::Node(id))
    }

    /// Turn an existing root into a child
    fn adopt(
        &self,
        id: NodeId,
        model: &Model,
        parent: Option<ParentLink>,
        out: &mut Build,
    ) -> Result<Value> {
        let mut state = self.state_mut();
        let actual = state.model_of(id)?;
        if !actual.is_a(model) {
            return Err(ArborError::InvalidSnapshot {
                type_name: model.name().to_string(),
                violations: vec![format!("{} is not a {}", actual.name(), model.name())],
            });
        }
        let already_attached = state.node(id)?.parent.is_some()
            || parent
                .as_ref()
                .is_some_and(|link| state.is_within(link.node, id));
        if already_attached {
            return Err(ArborError::AlreadyAttached { node_id: id.raw() });
        }
        state.node_mut(id)?.parent = parent;
        state.envs.remove(&id);
        state.listeners.remove(&id);
        out.adopted.push(id);
        Ok(Value::Node(id))
    }

    fn reference_value(&self, ty: &Type, target: &Type, input: Input) -> Result<Value> {
        match input {
            Input::Json(json) if json_identifier_key(&json).is_some() => Ok(Value::from_json(&json)),
            Input::Node(id) => {
                let wanted = target.target_model()?;
                let state = self.state();
                let actual = state.model_of(id)?;
                if wanted.as_ref().is_some_and(|m| !actual.is_a(m)) {
                    return Err(mismatch(ty, &Input::Node(id)));
                }
                state
                    .node(id)?
                    .identifier()
                    .filter(|v| !v.is_null())
                    .cloned()
                    .ok_or_else(|| ArborError::configuration(
                        actual.name(),
                        "references require an identifier field on the target model",
                    ))
            }
            other => Err(mismatch(ty, &other)),
        }
    }

    /// Fire creation hooks for a successful build
    pub(crate) fn finalize(&self, out: Build) -> Result<()> {
        for id in &out.created {
            self.fire_hook(*id, Hook::AfterCreate)?;
        }
        let attached: Vec<NodeId> = {
            let state = self.state();
            out.created
                .iter()
                .filter(|id| state.parent_of(**id).is_some())
                .chain(out.adopted.iter())
                .copied()
                .collect()
        };
        for id in attached {
            self.fire_hook(id, Hook::AfterAttach)?;
        }
        Ok(())
    }

    /// Undo a failed build without running hooks
    pub(crate) fn discard(&self, out: &Build) {
        let mut state = self.state_mut();
        for id in out.allocated.iter().rev() {
            state.drop_node(*id);
        }
        for id in &out.adopted {
            if let Some(node) = state.nodes.get_mut(id) {
                node.parent = None;
            }
        }
        tracing::debug!(discarded = out.allocated.len(), "discard failed build");
    }

    /// Run the hook mutation `hook` on a model node, if its model declares one
    pub(crate) fn fire_hook(&self, id: NodeId, hook: Hook) -> Result<()> {
        let model = match self.state().node(id)?.model() {
            Some(model) => model.clone(),
            None => return Ok(()),
        };
        let Some(mutation) = model.hook(hook) else {
            return Ok(());
        };
        tracing::debug!(model = %model.name(), node = %id, hook = hook.name(), "fire hook");
        let instance = Instance::new(self.clone(), id);
        self.run_action(id, hook.name(), || mutation.invoke(&instance, &[]))
            .map(|_| ())
    }

    /// Destroy `id` and everything below it
    ///
    /// `before_destroy` fires parent-first while the subtree is still
    /// intact; the nodes are dropped afterwards even if a hook failed, and the
    /// first hook error is returned.
    pub(crate) fn destroy_subtree(&self, id: NodeId) -> Result<()> {
        let nodes = self.state().subtree(id);
        let mut first_error = None;
        for node in &nodes {
            if let Err(e) = self.fire_hook(*node, Hook::BeforeDestroy) {
                tracing::warn!(node = %node, error = %e, "before_destroy failed");
                first_error.get_or_insert(e);
            }
        }
        let mut state = self.state_mut();
        for node in nodes {
            state.drop_node(node);
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Release a value that was replaced in a container
    fn release(&self, old: &Value, new: &Value) -> Result<()> {
        match old {
            Value::Node(child) if Some(*child) != new.as_node() => self.destroy_subtree(*child),
            _ => Ok(()),
        }
    }

    // ----- field writes -----

    /// Assign a field without access checks
    pub(crate) fn write_field(&self, id: NodeId, field: &str, value: Value) -> Result<()> {
        let (model, ty) = {
            let state = self.state();
            let model = state.model_of(id)?;
            let slot = state.node(id)?.slot(field).ok_or_else(|| ArborError::UnknownMember {
                model: model.name().to_string(),
                member_kind: "field".to_string(),
                member: field.to_string(),
            })?;
            (model, slot.ty.clone())
        };
        if model.identifier_field() == Some(field) {
            return Err(ArborError::IdentifierImmutable {
                model: model.name().to_string(),
                field: field.to_string(),
            });
        }
        let input = Input::from_value(value)?;
        self.assign_field(id, field, &ty, input)
    }

    /// Rebuild one field slot from `input`
    fn assign_field(&self, id: NodeId, field: &str, ty: &Type, input: Input) -> Result<()> {
        if let Input::Json(json) = &input {
            let violations = ty.validate(json);
            if !violations.is_empty() {
                return Err(ty.invalid(violations));
            }
        }
        let mut out = Build::default();
        let link = ParentLink {
            node: id,
            segment: PathSegment::Field(field.to_string()),
        };
        let new = match self.build_value(ty, input, Some(link), &mut out) {
            Ok(value) => value,
            Err(e) => {
                self.discard(&out);
                return Err(e);
            }
        };
        let old = {
            let mut state = self.state_mut();
            let slot = state
                .node_mut(id)?
                .slot_mut(field)
                .ok_or_else(|| ArborError::internal(format!("slot '{}' vanished", field)))?;
            if slot.value == new {
                None
            } else {
                let atom = slot.atom;
                let old = std::mem::replace(&mut slot.value, new.clone());
                state.graph.bump(atom);
                Some(old)
            }
        };
        let mut released = Ok(());
        if let Some(old) = old {
            if !ty.is_reference() {
                released = self.release(&old, &new);
            }
            self.note_change(id);
        }
        let finalized = self.finalize(out);
        released.and(finalized)
    }

    // ----- collection writes -----

    fn container(&self, id: NodeId, expected: &str) -> Result<(Type, AtomId)> {
        let state = self.state();
        let node = state.node(id)?;
        match (&node.kind, expected) {
            (NodeKind::List { item, atom, .. }, "list") | (NodeKind::Map { item, atom, .. }, "map") => {
                Ok((item.clone(), *atom))
            }
            (other, _) => Err(ArborError::WrongNodeKind {
                node_id: id.raw(),
                expected: expected.to_string(),
                actual: other.label().to_string(),
            }),
        }
    }

    fn validated_input(ty: &Type, value: Value) -> Result<Input> {
        let input = Input::from_value(value)?;
        if let Input::Json(json) = &input {
            let violations = ty.validate(json);
            if !violations.is_empty() {
                return Err(ty.invalid(violations));
            }
        }
        Ok(input)
    }

    pub(crate) fn list_push(&self, list: NodeId, value: Value) -> Result<Value> {
        let (item, atom) = self.container(list, "list")?;
        let input = Self::validated_input(&item, value)?;
        let index = match &self.state().node(list)?.kind {
            NodeKind::List { items, .. } => items.len(),
            _ => 0,
        };
        let mut out = Build::default();
        let link = ParentLink {
            node: list,
            segment: PathSegment::Item(index),
        };
        let value = match self.build_value(&item, input, Some(link), &mut out) {
            Ok(value) => value,
            Err(e) => {
                self.discard(&out);
                return Err(e);
            }
        };
        {
            let mut state = self.state_mut();
            if let NodeKind::List { items, .. } = &mut state.node_mut(list)?.kind {
                items.push(value.clone());
            }
            state.graph.bump(atom);
        }
        self.note_change(list);
        self.finalize(out)?;
        Ok(value)
    }

    /// Remove and return the item at `index`, reindexing the rest
    fn list_take(&self, list: NodeId, index: usize) -> Result<Value> {
        let (_, atom) = self.container(list, "list")?;
        let mut state = self.state_mut();
        let removed = match &mut state.node_mut(list)?.kind {
            NodeKind::List { items, .. } if index < items.len() => items.remove(index),
            NodeKind::List { items, .. } => {
                return Err(ArborError::UnexpectedValue {
                    expected: format!("index below {}", items.len()),
                    actual: index.to_string(),
                })
            }
            _ => return Err(ArborError::internal("list changed kind")),
        };
        let children: Vec<(usize, NodeId)> = match &state.node(list)?.kind {
            NodeKind::List { items, .. } => items
                .iter()
                .enumerate()
                .skip(index)
                .filter_map(|(i, v)| v.as_node().map(|id| (i, id)))
                .collect(),
            _ => Vec::new(),
        };
        for (i, child) in children {
            if let Some(node) = state.nodes.get_mut(&child) {
                node.parent = Some(ParentLink {
                    node: list,
                    segment: PathSegment::Item(i),
                });
            }
        }
        state.graph.bump(atom);
        Ok(removed)
    }

    pub(crate) fn list_remove(&self, list: NodeId, index: usize) -> Result<()> {
        let removed = self.list_take(list, index)?;
        let released = self.release(&removed, &Value::Null);
        self.note_change(list);
        released
    }

    /// Detach the item at `index`; it becomes a new root
    pub(crate) fn list_detach(&self, list: NodeId, index: usize) -> Result<NodeId> {
        let child = match &self.state().node(list)?.kind {
            NodeKind::List { items, .. } => items.get(index).and_then(Value::as_node),
            _ => None,
        }
        .ok_or_else(|| ArborError::UnexpectedValue {
            expected: "model node".to_string(),
            actual: format!("item {}", index),
        })?;
        self.fire_hook(child, Hook::BeforeDetach)?;
        self.list_take(list, index)?;
        if let Some(node) = self.state_mut().nodes.get_mut(&child) {
            node.parent = None;
        }
        self.note_change(list);
        Ok(child)
    }

    pub(crate) fn list_clear(&self, list: NodeId) -> Result<()> {
        let (_, atom) = self.container(list, "list")?;
        let removed = {
            let mut state = self.state_mut();
            let removed = match &mut state.node_mut(list)?.kind {
                NodeKind::List { items, .. } => std::mem::take(items),
                _ => Vec::new(),
            };
            state.graph.bump(atom);
            removed
        };
        let mut first_error = None;
        for value in &removed {
            if let Err(e) = self.release(value, &Value::Null) {
                first_error.get_or_insert(e);
            }
        }
        self.note_change(list);
        first_error.map_or(Ok(()), Err)
    }

    pub(crate) fn map_insert(&self, map: NodeId, key: &str, value: Value) -> Result<Value> {
        let (item, atom) = self.container(map, "map")?;
        let input = Self::validated_input(&item, value)?;
        let mut out = Build::default();
        let link = ParentLink {
            node: map,
            segment: PathSegment::Key(key.to_string()),
        };
        let value = match self.build_value(&item, input, Some(link), &mut out) {
            Ok(value) => value,
            Err(e) => {
                self.discard(&out);
                return Err(e);
            }
        };
        if let Some(err) = self.key_mismatch(key, &value)? {
            self.discard(&out);
            return Err(err);
        }
        let old = {
            let mut state = self.state_mut();
            let old = match &mut state.node_mut(map)?.kind {
                NodeKind::Map { entries, .. } => entries.insert(key.to_string(), value.clone()),
                _ => None,
            };
            state.graph.bump(atom);
            old
        };
        let released = match old {
            Some(old) => self.release(&old, &value),
            None => Ok(()),
        };
        self.note_change(map);
        let finalized = self.finalize(out);
        released.and(finalized)?;
        Ok(value)
    }

    /// Models stored in a map must sit under their own identifier
    fn key_mismatch(&self, key: &str, value: &Value) -> Result<Option<ArborError>> {
        let Some(id) = value.as_node() else {
            return Ok(None);
        };
        let state = self.state();
        let node = state.node(id)?;
        let own = node.identifier().and_then(crate::value::identifier_key);
        match (node.model(), own) {
            (Some(model), Some(own)) if own != key => Ok(Some(ArborError::InvalidSnapshot {
                type_name: model.name().to_string(),
                violations: vec![format!("map key '{}' does not match identifier '{}'", key, own)],
            })),
            _ => Ok(None),
        }
    }

    pub(crate) fn map_delete(&self, map: NodeId, key: &str) -> Result<bool> {
        let (_, atom) = self.container(map, "map")?;
        let removed = {
            let mut state = self.state_mut();
            let removed = match &mut state.node_mut(map)?.kind {
                NodeKind::Map { entries, .. } => entries.remove(key),
                _ => None,
            };
            if removed.is_some() {
                state.graph.bump(atom);
            }
            removed
        };
        match removed {
            Some(old) => {
                let released = self.release(&old, &Value::Null);
                self.note_change(map);
                released.map(|()| true)
            }
            None => Ok(false),
        }
    }

    pub(crate) fn map_clear(&self, map: NodeId) -> Result<()> {
        let (_, atom) = self.container(map, "map")?;
        let removed = {
            let mut state = self.state_mut();
            let removed = match &mut state.node_mut(map)?.kind {
                NodeKind::Map { entries, .. } => std::mem::take(entries),
                _ => BTreeMap::new(),
            };
            state.graph.bump(atom);
            removed
        };
        let mut first_error = None;
        for value in removed.values() {
            if let Err(e) = self.release(value, &Value::Null) {
                first_error.get_or_insert(e);
            }
        }
        self.note_change(map);
        first_error.map_or(Ok(()), Err)
    }

    /// Replace the full contents of a list node
    pub(crate) fn rebuild_list(&self, list: NodeId, items: Vec<Snapshot>) -> Result<()> {
        let (item, atom) = self.container(list, "list")?;
        let mut out = Build::default();
        let mut values = Vec::with_capacity(items.len());
        for (index, json) in items.into_iter().enumerate() {
            let link = ParentLink {
                node: list,
                segment: PathSegment::Item(index),
            };
            match self.build_value(&item, Input::Json(json), Some(link), &mut out) {
                Ok(value) => values.push(value),
                Err(e) => {
                    self.discard(&out);
                    return Err(e);
                }
            }
        }
        let old = {
            let mut state = self.state_mut();
            let old = match &mut state.node_mut(list)?.kind {
                NodeKind::List { items, .. } => std::mem::replace(items, values),
                _ => Vec::new(),
            };
            state.graph.bump(atom);
            old
        };
        let mut first_error = None;
        for value in &old {
            if let Err(e) = self.release(value, &Value::Null) {
                first_error.get_or_insert(e);
            }
        }
        self.note_change(list);
        let finalized = self.finalize(out);
        first_error.map_or(finalized, Err)
    }

    /// Reset a field slot from a snapshot fragment (absent means default)
    pub(crate) fn reset_field(&self, id: NodeId, field: &str, ty: &Type, json: Option<Snapshot>) -> Result<()> {
        let input = json.map(Input::Json).unwrap_or(Input::Absent);
        self.assign_field(id, field, ty, input)
    }
}
