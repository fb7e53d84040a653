//! The tree context
//!
//! A [`Tree`] owns every node, the reactive graph, the handle → instance
//! indirection table, the action stack, snapshot listeners and root
//! environments. It also carries the two pieces of scratch state the model
//! layer needs: the pending-instance slot used by `Model::create`, and the
//! view depth counter that vetoes writes while a view body runs. Separate
//! trees share nothing.

mod env;
mod materialize;
mod node;
pub(crate) mod reactive;
mod snapshot;

use std::cell::{Ref, RefCell, RefMut};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use arbor_core_types::{ActionId, TreeId};

use crate::config::TreeOptions;
use crate::errors::{ArborError, Result};
use crate::model::Model;
use crate::value::Snapshot;
use crate::view::ArgCache;
use reactive::{CellId, Graph};

pub use env::Environment;
pub use node::{NodeId, PathSegment};
pub(crate) use materialize::Build;
pub(crate) use node::{NodeData, NodeKind, ParentLink, Slot};

/// Callback receiving a root snapshot after each outermost action
pub type SnapshotListener = Rc<dyn Fn(&Snapshot)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Node handles are drawn from one counter so a handle from another tree
/// never aliases a node here
static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Handle reserved by `Model::create` and consumed by the root allocation
pub(crate) struct PendingInstance {
    pub handle: NodeId,
    pub model: Model,
}

/// Per-instance reactive bookkeeping, keyed by node handle
pub(crate) struct InstanceRecord {
    pub views: HashMap<String, CellId>,
    pub args: HashMap<String, ArgCache>,
}

impl InstanceRecord {
    fn new() -> Self {
        Self {
            views: HashMap::new(),
            args: HashMap::new(),
        }
    }

    fn cells(&self) -> impl Iterator<Item = CellId> + '_ {
        self.views
            .values()
            .copied()
            .chain(self.args.values().map(|cache| cache.cell))
    }
}

struct ActionFrame {
    node: NodeId,
}

#[derive(Default)]
pub(crate) struct TreeState {
    pub nodes: HashMap<NodeId, NodeData>,
    pub tombstones: HashMap<NodeId, String>,
    pub instances: HashMap<NodeId, InstanceRecord>,
    pub graph: Graph,
    pub pending: Option<PendingInstance>,
    pub view_depth: usize,
    pub envs: HashMap<NodeId, Environment>,
    actions: Vec<ActionFrame>,
    dirty_roots: BTreeSet<NodeId>,
    listeners: BTreeMap<NodeId, Vec<(ListenerId, SnapshotListener)>>,
    next_listener: u64,
}

impl TreeState {
    /// Allocate a handle unique across every tree in the process
    pub fn fresh_id(&mut self) -> NodeId {
        NodeId::from_raw(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    fn gone(&self, id: NodeId) -> ArborError {
        match self.tombstones.get(&id) {
            Some(model) => ArborError::NodeDestroyed {
                model: model.clone(),
                node_id: id.raw(),
            },
            None => ArborError::NodeNotFound { node_id: id.raw() },
        }
    }

    pub fn node(&self, id: NodeId) -> Result<&NodeData> {
        self.nodes.get(&id).ok_or_else(|| self.gone(id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeData> {
        if !self.nodes.contains_key(&id) {
            return Err(self.gone(id));
        }
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| ArborError::internal("node vanished"))
    }

    pub fn model_of(&self, id: NodeId) -> Result<Model> {
        let node = self.node(id)?;
        node.model()
            .cloned()
            .ok_or_else(|| ArborError::WrongNodeKind {
                node_id: id.raw(),
                expected: "model".to_string(),
                actual: node.kind.label().to_string(),
            })
    }

    pub fn parent_of(&self, id: NodeId) -> Option<&ParentLink> {
        self.nodes.get(&id).and_then(|n| n.parent.as_ref())
    }

    pub fn root_of(&self, mut id: NodeId) -> NodeId {
        while let Some(link) = self.parent_of(id) {
            id = link.node;
        }
        id
    }

    /// `true` if `ancestor` is `id` or lies on its parent chain
    pub fn is_within(&self, mut id: NodeId, ancestor: NodeId) -> bool {
        loop {
            if id == ancestor {
                return true;
            }
            match self.parent_of(id) {
                Some(link) => id = link.node,
                None => return false,
            }
        }
    }

    /// Slash-separated location from the root, `/` for the root itself
    pub fn path_of(&self, mut id: NodeId) -> String {
        let mut segments = Vec::new();
        while let Some(link) = self.parent_of(id) {
            segments.push(link.segment.to_string());
            id = link.node;
        }
        segments.reverse();
        format!("/{}", segments.join("/"))
    }

    fn in_action_for(&self, id: NodeId) -> bool {
        self.actions
            .iter()
            .any(|frame| self.is_within(id, frame.node))
    }

    /// Subtree handles, parents before children
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(node) = self.nodes.get(&next) {
                out.push(next);
                stack.extend(node.children().into_iter().rev());
            }
        }
        out
    }

    /// Give a model node its reactive bookkeeping
    pub fn bind(&mut self, id: NodeId) {
        self.instances.insert(id, InstanceRecord::new());
    }

    /// Forget a node without running hooks
    pub fn drop_node(&mut self, id: NodeId) {
        if let Some(record) = self.instances.remove(&id) {
            let cells: Vec<CellId> = record.cells().collect();
            for cell in cells {
                self.graph.drop_cell(cell);
            }
        }
        if let Some(node) = self.nodes.remove(&id) {
            let label = node
                .model()
                .map(|m| m.name().to_string())
                .unwrap_or_else(|| node.kind.label().to_string());
            self.tombstones.insert(id, label);
        }
        self.envs.remove(&id);
        self.listeners.remove(&id);
    }
}

struct TreeInner {
    id: TreeId,
    options: TreeOptions,
    state: RefCell<TreeState>,
}

/// Shared, single-threaded tree context
///
/// Cloning is cheap and yields another handle to the same tree.
#[derive(Clone)]
pub struct Tree {
    inner: Rc<TreeInner>,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tree")
            .field("id", &self.inner.id)
            .field("nodes", &self.node_count())
            .finish()
    }
}

impl Tree {
    pub fn new() -> Self {
        Self::with_options(TreeOptions::default())
    }

    pub fn with_options(options: TreeOptions) -> Self {
        Self {
            inner: Rc::new(TreeInner {
                id: TreeId::new(),
                options,
                state: RefCell::new(TreeState::default()),
            }),
        }
    }

    pub fn id(&self) -> &TreeId {
        &self.inner.id
    }

    pub fn options(&self) -> &TreeOptions {
        &self.inner.options
    }

    pub fn ptr_eq(&self, other: &Tree) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of live nodes (models, maps and lists)
    pub fn node_count(&self) -> usize {
        self.state().nodes.len()
    }

    /// Whether an action is currently running anywhere in the tree
    pub fn in_action(&self) -> bool {
        !self.state().actions.is_empty()
    }

    pub(crate) fn state(&self) -> Ref<'_, TreeState> {
        self.inner.state.borrow()
    }

    pub(crate) fn state_mut(&self) -> RefMut<'_, TreeState> {
        self.inner.state.borrow_mut()
    }

    /// Non-panicking read for formatting paths
    pub(crate) fn try_state(&self) -> Option<Ref<'_, TreeState>> {
        self.inner.state.try_borrow().ok()
    }

    // ----- pending-instance slot -----

    pub(crate) fn reserve_handle(&self) -> NodeId {
        self.state_mut().fresh_id()
    }

    pub(crate) fn set_pending(&self, pending: PendingInstance) -> Result<()> {
        let mut state = self.state_mut();
        if let Some(current) = &state.pending {
            return Err(ArborError::internal(format!(
                "pending-instance slot already holds {} for {}",
                current.handle,
                current.model.name()
            )));
        }
        state.pending = Some(pending);
        Ok(())
    }

    pub(crate) fn clear_pending(&self) {
        self.state_mut().pending = None;
    }

    // ----- view-read flag -----

    pub(crate) fn enter_view(&self) -> ViewGuard<'_> {
        self.state_mut().view_depth += 1;
        ViewGuard { tree: self }
    }

    /// Whether a view body is currently executing
    pub fn in_view(&self) -> bool {
        self.state().view_depth > 0
    }

    // ----- action dispatch -----

    /// Run `f` as an action on `node`
    ///
    /// This is the single entry point for state changes. Actions nest: inner
    /// actions join the outermost one, and snapshot listeners are notified
    /// once when the outermost action returns, whether it succeeded or not.
    /// Partially applied writes are not rolled back.
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns.
    pub fn run_action<T>(
        &self,
        node: NodeId,
        name: &str,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let outermost = {
            let mut state = self.state_mut();
            state.actions.push(ActionFrame { node });
            state.actions.len() == 1
        };
        let span = outermost.then(|| {
            tracing::debug_span!(
                "action",
                action_id = %ActionId::new(),
                tree_id = %self.id(),
                name
            )
        });
        let _entered = span.as_ref().map(|s| s.enter());

        let result = {
            let _frame = ActionFrameGuard { tree: self };
            f()
        };

        if outermost {
            self.flush_listeners();
        }
        result
    }

    /// Gate for every field and collection write
    pub(crate) fn check_write(&self, node: NodeId, target: impl FnOnce() -> String) -> Result<()> {
        let state = self.state();
        state.node(node)?;
        if state.view_depth > 0 {
            return Err(ArborError::IllegalMutation { operation: target() });
        }
        if self.options().protected && !state.in_action_for(node) {
            return Err(ArborError::ProtectedWrite { path: target() });
        }
        Ok(())
    }

    /// Mark the root of `node` dirty; notify at once when no action is open
    pub(crate) fn note_change(&self, node: NodeId) {
        let idle = {
            let mut state = self.state_mut();
            let root = state.root_of(node);
            state.dirty_roots.insert(root);
            state.actions.is_empty()
        };
        if idle {
            self.flush_listeners();
        }
    }

    fn flush_listeners(&self) {
        let pending: Vec<(NodeId, Vec<SnapshotListener>)> = {
            let mut state = self.state_mut();
            let roots = std::mem::take(&mut state.dirty_roots);
            roots
                .into_iter()
                .filter(|root| state.nodes.contains_key(root))
                .filter_map(|root| {
                    let listeners = state.listeners.get(&root)?;
                    Some((root, listeners.iter().map(|(_, l)| l.clone()).collect()))
                })
                .collect()
        };

        for (root, listeners) in pending {
            match self.snapshot_of(root) {
                Ok(snapshot) => {
                    tracing::debug!(root = %root, listeners = listeners.len(), "notify snapshot listeners");
                    for listener in listeners {
                        listener(&snapshot);
                    }
                }
                Err(e) => tracing::warn!(root = %root, error = %e, "snapshot for listeners failed"),
            }
        }
    }

    /// Register a snapshot listener on the root containing `node`
    pub(crate) fn add_listener(&self, node: NodeId, listener: SnapshotListener) -> Result<ListenerId> {
        let mut state = self.state_mut();
        state.node(node)?;
        let root = state.root_of(node);
        state.next_listener += 1;
        let id = ListenerId(state.next_listener);
        state.listeners.entry(root).or_default().push((id, listener));
        Ok(id)
    }

    /// Unregister a snapshot listener; returns whether it was registered
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut state = self.state_mut();
        let mut removed = false;
        for listeners in state.listeners.values_mut() {
            let before = listeners.len();
            listeners.retain(|(lid, _)| *lid != id);
            removed |= listeners.len() != before;
        }
        removed
    }

    // ----- environment -----

    pub(crate) fn set_env(&self, root: NodeId, env: Environment) {
        self.state_mut().envs.insert(root, env);
    }

    /// Environment of the root containing `node`
    pub(crate) fn env_of(&self, node: NodeId) -> Result<Environment> {
        let state = self.state();
        state.node(node)?;
        let root = state.root_of(node);
        Ok(state.envs.get(&root).cloned().unwrap_or_default())
    }
}

/// Lowers the view depth when a view body returns or fails
pub(crate) struct ViewGuard<'a> {
    tree: &'a Tree,
}

impl Drop for ViewGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.tree.state_mut();
        state.view_depth = state.view_depth.saturating_sub(1);
    }
}

struct ActionFrameGuard<'a> {
    tree: &'a Tree,
}

impl Drop for ActionFrameGuard<'_> {
    fn drop(&mut self) {
        self.tree.state_mut().actions.pop();
    }
}
