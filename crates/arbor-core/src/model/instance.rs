use std::fmt;
use std::rc::Rc;

use super::{ListRef, MapRef, Model};
use crate::errors::{ArborError, Result};
use crate::mutation::{self, FlowFuture};
use crate::tree::{Environment, ListenerId, NodeId, NodeKind, PathSegment, Tree};
use crate::types::Type;
use crate::value::{identifier_key, Snapshot, Value};
use crate::view;

/// Handle to a model node
///
/// Handles stay valid across snapshot application and reconciliation; after
/// the node is destroyed every access fails with `NodeDestroyed`.
#[derive(Clone)]
pub struct Instance {
    tree: Tree,
    id: NodeId,
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.tree.ptr_eq(&other.tree)
    }
}

impl Eq for Instance {}

impl Instance {
    pub(crate) fn new(tree: Tree, id: NodeId) -> Self {
        Self { tree, id }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn model(&self) -> Result<Model> {
        self.tree.state().model_of(self.id)
    }

    pub fn is_alive(&self) -> bool {
        self.tree.state().nodes.contains_key(&self.id)
    }

    fn qualified(&self, member: &str) -> String {
        format!("{}.{}", self, member)
    }

    // ----- reads -----

    /// Current value of a field
    ///
    /// Reads are tracked by the enclosing view. Reference fields resolve to
    /// the node holding the stored identifier within the same root.
    ///
    /// # Errors
    ///
    /// Returns `UnknownMember` for an undeclared field and
    /// `InvalidReference` when a reference has no live target.
    pub fn get(&self, field: &str) -> Result<Value> {
        let (atom, value, ty) = {
            let state = self.tree.state();
            let model = state.model_of(self.id)?;
            let slot = state
                .node(self.id)?
                .slot(field)
                .ok_or_else(|| ArborError::UnknownMember {
                    model: model.name().to_string(),
                    member_kind: "field".to_string(),
                    member: field.to_string(),
                })?;
            (slot.atom, slot.value.clone(), slot.ty.clone())
        };
        self.tree.state_mut().graph.observe(atom);
        if value.is_null() || !ty.is_reference() {
            return Ok(value);
        }
        self.resolve_reference(&ty, &value).map(Value::Node)
    }

    /// Identifier stored in a reference field, without resolving it
    ///
    /// # Errors
    ///
    /// Returns `UnknownMember` for an undeclared field.
    pub fn raw(&self, field: &str) -> Result<Value> {
        let state = self.tree.state();
        let model = state.model_of(self.id)?;
        state
            .node(self.id)?
            .slot(field)
            .map(|s| s.value.clone())
            .ok_or_else(|| ArborError::UnknownMember {
                model: model.name().to_string(),
                member_kind: "field".to_string(),
                member: field.to_string(),
            })
    }

    /// Scan the root subtree for the target with a matching identifier
    fn resolve_reference(&self, ty: &Type, stored: &Value) -> Result<NodeId> {
        let target = ty
            .target_model()?
            .ok_or_else(|| ArborError::internal("reference type without a target model"))?;
        let unresolved = || ArborError::InvalidReference {
            target: target.name().to_string(),
            identifier: stored.to_string(),
        };
        let key = identifier_key(stored).ok_or_else(unresolved)?;

        let root = self.tree.state().root_of(self.id);
        let mut stack = vec![root];
        while let Some(next) = stack.pop() {
            let (atoms, children, hit) = {
                let state = self.tree.state();
                let node = state.node(next)?;
                let hit = node.model().is_some_and(|m| m.is_a(&target))
                    && node.identifier().and_then(identifier_key).as_deref() == Some(key.as_str());
                (node.structural_atoms(), node.children(), hit)
            };
            {
                let mut state = self.tree.state_mut();
                for atom in atoms {
                    state.graph.observe(atom);
                }
            }
            if hit {
                return Ok(next);
            }
            stack.extend(children.into_iter().rev());
        }
        Err(unresolved())
    }

    /// # Errors
    ///
    /// As [`Instance::get`], plus `UnexpectedValue` for a non-number.
    pub fn number(&self, field: &str) -> Result<f64> {
        self.get(field)?.try_number()
    }

    /// # Errors
    ///
    /// As [`Instance::get`], plus `UnexpectedValue` for a non-string.
    pub fn string(&self, field: &str) -> Result<String> {
        self.get(field)?.try_string()
    }

    /// # Errors
    ///
    /// As [`Instance::get`], plus `UnexpectedValue` for a non-boolean.
    pub fn boolean(&self, field: &str) -> Result<bool> {
        self.get(field)?.try_bool()
    }

    /// Model child (or resolved reference) held by a field
    ///
    /// # Errors
    ///
    /// As [`Instance::get`], plus `UnexpectedValue` if the field does not hold
    /// a model node.
    pub fn child(&self, field: &str) -> Result<Instance> {
        let id = self.get(field)?.try_node()?;
        self.tree.state().model_of(id)?;
        Ok(Instance::new(self.tree.clone(), id))
    }

    /// Array field as a list handle
    ///
    /// # Errors
    ///
    /// Returns `WrongNodeKind` if the field is not an array.
    pub fn list(&self, field: &str) -> Result<ListRef> {
        let id = self.get(field)?.try_node()?;
        ListRef::new(self.tree.clone(), id)
    }

    /// Map field as a map handle
    ///
    /// # Errors
    ///
    /// Returns `WrongNodeKind` if the field is not a map.
    pub fn map(&self, field: &str) -> Result<MapRef> {
        let id = self.get(field)?.try_node()?;
        MapRef::new(self.tree.clone(), id)
    }

    /// Value of the identifier field, if the model declares one
    pub fn identifier(&self) -> Result<Option<Value>> {
        let state = self.tree.state();
        Ok(state.node(self.id)?.identifier().cloned())
    }

    // ----- writes -----

    /// Assign a field
    ///
    /// # Errors
    ///
    /// Returns `IllegalMutation` inside a view, `ProtectedWrite` outside an
    /// action on a protected tree, `IdentifierImmutable` for the identifier
    /// and `InvalidSnapshot` for a value of the wrong shape.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> Result<()> {
        self.tree.check_write(self.id, || self.qualified(field))?;
        self.tree.write_field(self.id, field, value.into())
    }

    /// Reconcile this subtree with `snapshot`; runs as its own action
    ///
    /// # Errors
    ///
    /// Returns `IllegalMutation` inside a view, `InvalidSnapshot` when the
    /// snapshot does not fit and `IdentifierImmutable` if it changes the
    /// identifier.
    pub fn apply_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        self.model()?;
        if self.tree.in_view() {
            return Err(ArborError::IllegalMutation {
                operation: self.qualified("apply_snapshot"),
            });
        }
        self.tree.run_action(self.id, "apply_snapshot", || {
            self.tree.apply_snapshot_to(self.id, snapshot)
        })
    }

    /// Destroy this instance, removing it from its parent
    ///
    /// A root is destroyed outright. A child is removed from its list or
    /// map, or its field is reset to `null`; fields that do not accept
    /// `null` cannot lose their child.
    ///
    /// # Errors
    ///
    /// Returns `IllegalMutation` inside a view and `InvalidSnapshot` when the
    /// owning field requires a value.
    pub fn destroy(&self) -> Result<()> {
        let model = self.model()?;
        if self.tree.in_view() {
            return Err(ArborError::IllegalMutation {
                operation: self.qualified("destroy"),
            });
        }
        let link = self.tree.state().parent_of(self.id).cloned();
        tracing::debug!(model = %model.name(), node = %self.id, "destroy instance");
        let Some(link) = link else {
            return self
                .tree
                .run_action(self.id, "destroy", || self.tree.destroy_subtree(self.id));
        };
        self.tree.run_action(link.node, "destroy", || match &link.segment {
            PathSegment::Item(index) => self.tree.list_remove(link.node, *index),
            PathSegment::Key(key) => self.tree.map_delete(link.node, key).map(|_| ()),
            PathSegment::Field(field) => {
                let ty = {
                    let state = self.tree.state();
                    state
                        .node(link.node)?
                        .slot(field)
                        .map(|s| s.ty.clone())
                        .ok_or_else(|| ArborError::internal(format!("slot '{}' vanished", field)))?
                };
                if !ty.accepts_null() {
                    return Err(ArborError::InvalidSnapshot {
                        type_name: ty.name(),
                        violations: vec![format!(
                            "field '{}' requires a value; its child cannot be destroyed",
                            field
                        )],
                    });
                }
                self.tree
                    .reset_field(link.node, field, &ty, Some(Snapshot::Null))
            }
        })
    }

    // ----- views and mutations -----

    /// Read an accessor view
    ///
    /// # Errors
    ///
    /// Returns `UnknownMember`, `ViewCycle`, `TypeViolation` or whatever the
    /// view body fails with.
    pub fn view(&self, name: &str) -> Result<Value> {
        view::read_view(self, name, &[])
    }

    /// Call a view that takes arguments
    ///
    /// # Errors
    ///
    /// See [`Instance::view`].
    pub fn view_with(&self, name: &str, args: &[Value]) -> Result<Value> {
        view::read_view(self, name, args)
    }

    /// Run a mutation as an action on this instance
    ///
    /// # Errors
    ///
    /// Returns `IllegalMutation` when called from a view, `TypeViolation` for
    /// a result not matching a declared return type, or the body's error.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value> {
        mutation::call_mutation(self, name, args)
    }

    /// Start a flow; every step runs as a separate action
    ///
    /// # Errors
    ///
    /// Returns `UnknownMember` or `IllegalMutation` before the flow starts.
    pub fn flow(&self, name: &str, args: Vec<Value>) -> Result<FlowFuture> {
        mutation::start_flow(self, name, args)
    }

    /// Run an ad-hoc closure as an action on this instance
    ///
    /// # Errors
    ///
    /// Returns `IllegalMutation` when called from a view, or the closure's
    /// error.
    pub fn dispatch<T>(&self, name: &str, f: impl FnOnce(&Instance) -> Result<T>) -> Result<T> {
        self.model()?;
        if self.tree.in_view() {
            return Err(ArborError::IllegalMutation {
                operation: self.qualified(name),
            });
        }
        self.tree.run_action(self.id, name, || f(self))
    }

    // ----- structure -----

    /// # Errors
    ///
    /// Returns `NodeDestroyed` once the node is gone.
    pub fn snapshot(&self) -> Result<Snapshot> {
        self.tree.snapshot_of(self.id)
    }

    /// Nearest model ancestor
    ///
    /// # Errors
    ///
    /// Returns `NodeDestroyed` once the node is gone.
    pub fn parent(&self) -> Result<Option<Instance>> {
        self.find_ancestor(|_| true)
    }

    /// Nearest ancestor that is (or was composed from) `model`
    ///
    /// # Errors
    ///
    /// Returns `NodeDestroyed` once the node is gone.
    pub fn parent_instance(&self, model: &Model) -> Result<Option<Instance>> {
        self.find_ancestor(|m| m.is_a(model))
    }

    fn find_ancestor(&self, accept: impl Fn(&Model) -> bool) -> Result<Option<Instance>> {
        let state = self.tree.state();
        state.node(self.id)?;
        let mut current = state.parent_of(self.id).map(|l| l.node);
        while let Some(id) = current {
            if let Some(NodeKind::Model { model, .. }) = state.nodes.get(&id).map(|n| &n.kind) {
                if accept(model) {
                    return Ok(Some(Instance::new(self.tree.clone(), id)));
                }
            }
            current = state.parent_of(id).map(|l| l.node);
        }
        Ok(None)
    }

    /// # Errors
    ///
    /// Returns `NodeDestroyed` once the node is gone.
    pub fn root(&self) -> Result<Instance> {
        let state = self.tree.state();
        state.node(self.id)?;
        Ok(Instance::new(self.tree.clone(), state.root_of(self.id)))
    }

    /// Slash-separated location from the root
    ///
    /// # Errors
    ///
    /// Returns `NodeDestroyed` once the node is gone.
    pub fn path(&self) -> Result<String> {
        let state = self.tree.state();
        state.node(self.id)?;
        Ok(state.path_of(self.id))
    }

    /// Services of the root environment
    ///
    /// # Errors
    ///
    /// Returns `NodeDestroyed` once the node is gone.
    pub fn env(&self) -> Result<Environment> {
        self.tree.env_of(self.id)
    }

    /// Receive the root snapshot after each outermost action that changed it
    ///
    /// # Errors
    ///
    /// Returns `NodeDestroyed` once the node is gone.
    pub fn on_snapshot(&self, listener: impl Fn(&Snapshot) + 'static) -> Result<ListenerId> {
        self.tree.add_listener(self.id, Rc::new(listener))
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(state) = self.tree.try_state() else {
            return write!(f, "{}", self.id);
        };
        match state.nodes.get(&self.id) {
            Some(node) => {
                let name = node.model().map(Model::name).unwrap_or(node.kind.label());
                write!(f, "{}@{}", name, state.path_of(self.id))
            }
            None => {
                let name = state.tombstones.get(&self.id).map(String::as_str).unwrap_or("node");
                write!(f, "{}{} (destroyed)", name, self.id)
            }
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance").field("id", &self.id).finish()
    }
}
