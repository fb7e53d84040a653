//! Mutations and asynchronous flows
//!
//! A mutation is a synchronous action: it runs inside `Tree::run_action` on
//! its instance, so protected writes are allowed and snapshot listeners fire
//! once it returns. A flow is an asynchronous mutation made of steps; each
//! [`FlowContext::step`] is its own action, and nothing is protected between
//! steps. Flows run on whatever local executor polls them.

use std::rc::Rc;

use futures::future::LocalBoxFuture;

use crate::errors::{ArborError, Result};
use crate::model::Instance;
use crate::tree::Environment;
use crate::types::Type;
use crate::value::Value;
use crate::view::check_return;

pub(crate) type MutationFn = Rc<dyn Fn(&Instance, &[Value]) -> Result<Value>>;

/// Future returned by starting a flow
pub type FlowFuture = LocalBoxFuture<'static, Result<Value>>;

pub(crate) type FlowFn = Rc<dyn Fn(FlowContext, Vec<Value>) -> FlowFuture>;

pub(crate) struct MutationDef {
    pub name: String,
    pub returns: Option<Type>,
    pub body: MutationFn,
}

impl MutationDef {
    /// Run the body without action bookkeeping
    pub fn invoke(&self, instance: &Instance, args: &[Value]) -> Result<Value> {
        (self.body)(instance, args)
    }
}

pub(crate) struct FlowDef {
    pub name: String,
    pub body: FlowFn,
}

/// Handle a running flow uses to reach its instance
#[derive(Clone)]
pub struct FlowContext {
    instance: Instance,
    flow: Rc<str>,
}

impl FlowContext {
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Qualified flow name, e.g. `Shop.restock`
    pub fn name(&self) -> &str {
        &self.flow
    }

    /// # Errors
    ///
    /// Returns `NodeDestroyed` if the instance was destroyed meanwhile.
    pub fn env(&self) -> Result<Environment> {
        self.instance.env()
    }

    /// Run one synchronous step of the flow as an action
    ///
    /// # Errors
    ///
    /// Returns `NodeDestroyed` if the instance is gone, `IllegalMutation`
    /// when polled from inside a view, or the step's error.
    pub fn step<T>(&self, f: impl FnOnce(&Instance) -> Result<T>) -> Result<T> {
        let tree = self.instance.tree();
        self.instance.model()?;
        if tree.in_view() {
            return Err(ArborError::IllegalMutation {
                operation: self.flow.to_string(),
            });
        }
        tracing::trace!(flow = %self.flow, node = %self.instance.id(), "flow step");
        tree.run_action(self.instance.id(), &self.flow, || f(&self.instance))
    }
}

/// Dispatch mutation `name` on `instance`
pub(crate) fn call_mutation(instance: &Instance, name: &str, args: &[Value]) -> Result<Value> {
    let tree = instance.tree();
    let model = instance.model()?;
    let def = model.mutation_def(name)?;
    let qualified = format!("{}.{}", model.name(), def.name);
    if tree.in_view() {
        return Err(ArborError::IllegalMutation {
            operation: qualified,
        });
    }
    tracing::debug!(mutation = %qualified, node = %instance.id(), args = args.len(), "call mutation");

    let value = tree.run_action(instance.id(), &def.name, || def.invoke(instance, args))?;
    if let Some(ty) = &def.returns {
        if tree.options().check_return_types {
            check_return(tree, ty, &qualified, &value)?;
        }
    }
    Ok(value)
}

/// Build the future of flow `name`; nothing runs until it is polled
pub(crate) fn start_flow(instance: &Instance, name: &str, args: Vec<Value>) -> Result<FlowFuture> {
    let tree = instance.tree();
    let model = instance.model()?;
    let def = model.flow_def(name)?;
    let qualified = format!("{}.{}", model.name(), def.name);
    if tree.in_view() {
        return Err(ArborError::IllegalMutation {
            operation: qualified,
        });
    }
    tracing::debug!(flow = %qualified, node = %instance.id(), "start flow");
    let ctx = FlowContext {
        instance: instance.clone(),
        flow: Rc::from(qualified.as_str()),
    };
    Ok((def.body)(ctx, args))
}
