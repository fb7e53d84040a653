//! Compiled models and their instances
//!
//! A [`ModelBuilder`] collects declarations, `compile` turns them into a
//! [`Model`], and `Model::create` materializes an [`Instance`] in a tree.

mod builder;
mod collections;
mod compiler;
mod hooks;
mod instance;

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::Instant;

use crate::errors::{ArborError, Result};
use crate::mutation::{FlowDef, MutationDef};
use crate::tree::{Build, Environment, NodeId, PendingInstance, Tree};
use crate::types::Type;
use crate::value::Snapshot;
use crate::view::ViewDef;
use crate::{log_op_end, log_op_error, log_op_start};

pub use builder::{FieldSpec, ModelBuilder};
pub use collections::{ListRef, MapRef};
pub use hooks::Hook;
pub use instance::Instance;

/// Snapshot transform applied before validation and materialization
pub type Preprocessor = Rc<dyn Fn(Snapshot) -> Snapshot>;

/// A resolved field of a compiled model
#[derive(Clone, Debug)]
pub struct FieldDef {
    pub name: String,
    pub ty: Type,
}

pub(crate) struct ModelDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
    pub identifier: Option<usize>,
    /// Own name first, then every composed parent
    pub lineage: Vec<String>,
    pub views: HashMap<String, Rc<ViewDef>>,
    pub mutations: HashMap<String, Rc<MutationDef>>,
    pub flows: HashMap<String, Rc<FlowDef>>,
    pub hooks: Vec<Hook>,
    pub preprocessor: Option<Preprocessor>,
}

/// A compiled model
///
/// Cloning shares the definition; two `Model`s are the same model only if
/// they come from the same compilation (`ptr_eq`).
#[derive(Clone)]
pub struct Model(Rc<ModelDef>);

impl Model {
    pub(crate) fn from_def(def: ModelDef) -> Self {
        Model(Rc::new(def))
    }

    pub(crate) fn def(&self) -> &ModelDef {
        &self.0
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.0.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.0.fields.iter().find(|f| f.name == name)
    }

    pub fn identifier_field(&self) -> Option<&str> {
        self.0
            .identifier
            .and_then(|i| self.0.fields.get(i))
            .map(|f| f.name.as_str())
    }

    pub(crate) fn identifier_index(&self) -> Option<usize> {
        self.0.identifier
    }

    pub fn lineage(&self) -> &[String] {
        &self.0.lineage
    }

    /// Whether this model is `other` or was composed from it
    pub fn is_a(&self, other: &Model) -> bool {
        self.ptr_eq(other) || self.0.lineage.iter().any(|name| name == other.name())
    }

    pub fn ptr_eq(&self, other: &Model) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn hooks(&self) -> &[Hook] {
        &self.0.hooks
    }

    pub(crate) fn hook(&self, hook: Hook) -> Option<Rc<MutationDef>> {
        if !self.0.hooks.contains(&hook) {
            return None;
        }
        self.0.mutations.get(hook.name()).cloned()
    }

    pub fn has_view(&self, name: &str) -> bool {
        self.0.views.contains_key(name)
    }

    pub fn has_mutation(&self, name: &str) -> bool {
        self.0.mutations.contains_key(name)
    }

    pub fn has_flow(&self, name: &str) -> bool {
        self.0.flows.contains_key(name)
    }

    fn unknown(&self, member_kind: &str, member: &str) -> ArborError {
        ArborError::UnknownMember {
            model: self.name().to_string(),
            member_kind: member_kind.to_string(),
            member: member.to_string(),
        }
    }

    pub(crate) fn view_def(&self, name: &str) -> Result<Rc<ViewDef>> {
        self.0
            .views
            .get(name)
            .cloned()
            .ok_or_else(|| self.unknown("view", name))
    }

    pub(crate) fn mutation_def(&self, name: &str) -> Result<Rc<MutationDef>> {
        self.0
            .mutations
            .get(name)
            .cloned()
            .ok_or_else(|| self.unknown("mutation", name))
    }

    pub(crate) fn flow_def(&self, name: &str) -> Result<Rc<FlowDef>> {
        self.0
            .flows
            .get(name)
            .cloned()
            .ok_or_else(|| self.unknown("flow", name))
    }

    /// Schema type of this model
    pub fn ty(&self) -> Type {
        Type::model(self.clone())
    }

    /// Stable textual signature, e.g. `Book { id: identifier; price: number }`
    pub fn describe(&self) -> String {
        self.ty().describe()
    }

    /// Apply the snapshot pre-processor, if any
    pub fn preprocess(&self, snapshot: Snapshot) -> Snapshot {
        match &self.0.preprocessor {
            Some(pre) => pre(snapshot),
            None => snapshot,
        }
    }

    /// Create a new root instance from a snapshot
    ///
    /// # Errors
    ///
    /// Returns `InvalidSnapshot` if the (pre-processed) snapshot does not fit
    /// the model, or any error raised by an initializer or creation hook.
    pub fn create(&self, tree: &Tree, snapshot: Snapshot) -> Result<Instance> {
        self.create_with_env(tree, snapshot, Environment::default())
    }

    /// Create a new root instance with services attached to the root
    ///
    /// # Errors
    ///
    /// See [`Model::create`].
    pub fn create_with_env(
        &self,
        tree: &Tree,
        snapshot: Snapshot,
        env: Environment,
    ) -> Result<Instance> {
        let start = Instant::now();
        log_op_start!("model_create", model = %self.name());

        match self.materialize(tree, snapshot, env) {
            Ok(instance) => {
                log_op_end!(
                    "model_create",
                    duration_ms = start.elapsed().as_millis() as u64,
                    model = %self.name(),
                    node_id = instance.id().raw()
                );
                Ok(instance)
            }
            Err(e) => {
                log_op_error!(
                    "model_create",
                    e.clone(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    model = %self.name()
                );
                Err(e)
            }
        }
    }

    /// Two-phase construction
    ///
    /// Phase 1 reserves a handle and parks it with the model in the tree's
    /// pending slot. Phase 2 materializes the node graph; the root
    /// allocation consumes the slot, each model node is bound as soon as its
    /// fields exist, and creation hooks fire once the whole graph is built.
    fn materialize(&self, tree: &Tree, snapshot: Snapshot, env: Environment) -> Result<Instance> {
        let handle = tree.reserve_handle();
        tree.set_pending(PendingInstance {
            handle,
            model: self.clone(),
        })?;
        tree.set_env(handle, env);

        let mut out = Build::default();
        let built = tree.build_model(self, snapshot, None, true, &mut out);
        tree.clear_pending();

        let root = built.and_then(|value| value.try_node()).and_then(|id| {
            if id == handle {
                Ok(id)
            } else {
                Err(ArborError::internal(format!(
                    "root materialized as {} instead of reserved {}",
                    id, handle
                )))
            }
        });
        let id = match root {
            Ok(id) => id,
            Err(e) => {
                abandon(tree, &out, handle);
                return Err(e);
            }
        };

        tree.finalize(out)?;
        Ok(Instance::new(tree.clone(), id))
    }
}

/// Drop everything a failed creation left behind, including the root's services
fn abandon(tree: &Tree, out: &Build, handle: NodeId) {
    tree.discard(out);
    tree.state_mut().envs.remove(&handle);
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.0.name)
            .field("fields", &self.0.fields.len())
            .finish()
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.name)
    }
}
