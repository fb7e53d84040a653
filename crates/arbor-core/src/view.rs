//! Memoized views
//!
//! Every accessor view of an instance is one computed cell, created on first
//! read. A view taking arguments keeps one cell plus an argument cache: each
//! call writes its arguments into per-position atoms (bumping only the
//! positions whose value changed) and then reads the cell, so repeating a
//! call with equal arguments and unchanged state returns the memoized value.
//! The cache holds the most recent argument list only. A view that calls
//! another function view depends on what that call read, not on the shared
//! cell, so a later call with other arguments cannot mask a change.

use std::rc::Rc;

use crate::errors::{ArborError, Result};
use crate::model::{Instance, Model};
use crate::tree::reactive::{AtomId, CellBody, CellId};
use crate::tree::{NodeId, NodeKind, Tree};
use crate::types::{Type, TypeKind};
use crate::value::Value;

pub(crate) type AccessorFn = Rc<dyn Fn(&Instance) -> Result<Value>>;
pub(crate) type ViewFn = Rc<dyn Fn(&Instance, &[Value]) -> Result<Value>>;

#[derive(Clone)]
pub(crate) enum ViewBody {
    Accessor(AccessorFn),
    Function(ViewFn),
}

pub(crate) struct ViewDef {
    pub name: String,
    pub returns: Option<Type>,
    pub body: ViewBody,
}

/// Positional argument cache of one function view on one instance
pub(crate) struct ArgCache {
    len: AtomId,
    slots: Vec<(AtomId, Value)>,
    pub cell: CellId,
}

/// Read view `name` of `instance`, computing it if needed
pub(crate) fn read_view(instance: &Instance, name: &str, args: &[Value]) -> Result<Value> {
    let tree = instance.tree();
    let model = instance.model()?;
    let def = model.view_def(name)?;
    let cell = match &def.body {
        ViewBody::Accessor(_) => {
            if !args.is_empty() {
                return Err(ArborError::UnexpectedValue {
                    expected: format!("no arguments for view '{}.{}'", model.name(), name),
                    actual: format!("{} arguments", args.len()),
                });
            }
            accessor_cell(tree, instance.id(), &model, &def)?
        }
        ViewBody::Function(_) => reconcile_args(tree, instance.id(), &model, &def, args)?,
    };
    tree.read_cell(cell)
}

fn unbound(id: NodeId) -> ArborError {
    ArborError::internal(format!("instance {} is not bound yet", id))
}

fn accessor_cell(tree: &Tree, id: NodeId, model: &Model, def: &Rc<ViewDef>) -> Result<CellId> {
    let mut state = tree.state_mut();
    let state = &mut *state;
    let record = state.instances.get_mut(&id).ok_or_else(|| unbound(id))?;
    if let Some(cell) = record.views.get(&def.name) {
        return Ok(*cell);
    }
    let qualified = format!("{}.{}", model.name(), def.name);
    let cell = state
        .graph
        .new_cell(qualified.clone(), view_body(id, qualified, def.clone()));
    record.views.insert(def.name.clone(), cell);
    Ok(cell)
}

/// Write `args` into the argument cache of `def`, creating it on first call
fn reconcile_args(
    tree: &Tree,
    id: NodeId,
    model: &Model,
    def: &Rc<ViewDef>,
    args: &[Value],
) -> Result<CellId> {
    let mut state = tree.state_mut();
    let state = &mut *state;
    let record = state.instances.get_mut(&id).ok_or_else(|| unbound(id))?;
    if !record.args.contains_key(&def.name) {
        let qualified = format!("{}.{}", model.name(), def.name);
        let cell = state
            .graph
            .new_parametric_cell(qualified.clone(), view_body(id, qualified, def.clone()));
        let len = state.graph.new_atom();
        record.args.insert(
            def.name.clone(),
            ArgCache {
                len,
                slots: Vec::new(),
                cell,
            },
        );
    }
    let cache = record
        .args
        .get_mut(&def.name)
        .ok_or_else(|| ArborError::internal("argument cache vanished"))?;

    let mut moved = Vec::new();
    if cache.slots.len() != args.len() {
        cache.slots.truncate(args.len());
        while cache.slots.len() < args.len() {
            let atom = state.graph.new_atom();
            cache.slots.push((atom, args[cache.slots.len()].clone()));
        }
        moved.push(cache.len);
    }
    for ((atom, held), arg) in cache.slots.iter_mut().zip(args) {
        if held != arg {
            *held = arg.clone();
            moved.push(*atom);
        }
    }
    let cell = cache.cell;
    for atom in moved {
        state.graph.bump(atom);
    }
    Ok(cell)
}

/// Current arguments of a function view, read as tracked dependencies
fn current_args(tree: &Tree, id: NodeId, name: &str) -> Result<Vec<Value>> {
    let mut state = tree.state_mut();
    let state = &mut *state;
    let cache = state
        .instances
        .get(&id)
        .and_then(|r| r.args.get(name))
        .ok_or_else(|| unbound(id))?;
    state.graph.observe_arg(cache.len);
    for (atom, _) in &cache.slots {
        state.graph.observe_arg(*atom);
    }
    Ok(cache.slots.iter().map(|(_, v)| v.clone()).collect())
}

fn view_body(id: NodeId, qualified: String, def: Rc<ViewDef>) -> CellBody {
    Rc::new(move |tree: &Tree| {
        let instance = Instance::new(tree.clone(), id);
        let value = match &def.body {
            ViewBody::Accessor(body) => {
                let _view = tree.enter_view();
                body(&instance)
            }
            ViewBody::Function(body) => {
                let args = current_args(tree, id, &def.name)?;
                let _view = tree.enter_view();
                body(&instance, &args)
            }
        }?;
        if let Some(ty) = &def.returns {
            if tree.options().check_return_types {
                check_return(tree, ty, &qualified, &value)?;
            }
        }
        Ok(value)
    })
}

/// Check a view or mutation result against its declared type
pub(crate) fn check_return(tree: &Tree, ty: &Type, name: &str, value: &Value) -> Result<()> {
    if accepts(tree, ty, value)? {
        return Ok(());
    }
    Err(ArborError::TypeViolation {
        name: name.to_string(),
        expected: ty.name(),
        actual: runtime_name(tree, value),
    })
}

fn node_model_is(tree: &Tree, id: NodeId, model: &Model) -> bool {
    tree.state()
        .model_of(id)
        .map(|actual| actual.is_a(model))
        .unwrap_or(false)
}

fn accepts(tree: &Tree, ty: &Type, value: &Value) -> Result<bool> {
    let ty = ty.resolved()?;
    Ok(match (ty.kind(), value) {
        (TypeKind::Maybe(_), Value::Null) => true,
        (TypeKind::Optional { inner, .. }, v) | (TypeKind::Maybe(inner), v) => {
            accepts(tree, inner, v)?
        }
        (TypeKind::Model(model), Value::Node(id)) => node_model_is(tree, *id, model),
        (TypeKind::Reference(_), Value::Node(id)) => match ty.target_model()? {
            Some(model) => node_model_is(tree, *id, &model),
            None => false,
        },
        (TypeKind::Map(_), Value::Node(id)) => matches!(
            tree.state().nodes.get(id).map(|n| &n.kind),
            Some(NodeKind::Map { .. })
        ),
        (TypeKind::Array(_), Value::Node(id)) => matches!(
            tree.state().nodes.get(id).map(|n| &n.kind),
            Some(NodeKind::List { .. })
        ),
        (TypeKind::Array(item), Value::List(items)) => {
            for v in items {
                if !accepts(tree, item, v)? {
                    return Ok(false);
                }
            }
            true
        }
        (_, Value::Node(_)) => false,
        (_, other) => match other.to_json() {
            Ok(json) => ty.is_valid_snapshot(&json),
            Err(_) => false,
        },
    })
}

fn runtime_name(tree: &Tree, value: &Value) -> String {
    match value {
        Value::Node(id) => match tree.state().nodes.get(id) {
            Some(node) => node
                .model()
                .map(|m| m.name().to_string())
                .unwrap_or_else(|| node.kind.label().to_string()),
            None => "destroyed node".to_string(),
        },
        other => other.type_tag().to_string(),
    }
}
