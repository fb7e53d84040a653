//! Arbor Core - declarative models over a managed observable tree
//!
//! This crate provides:
//! - A type and field registry (`types`, `model::ModelBuilder`)
//! - A model compiler that turns declarations into immutable [`Model`]s
//! - Two-phase instance creation through a per-tree pending-instance slot
//! - Memoized, argument-sensitive views with dependency tracking
//! - Mutations and asynchronous flows dispatched as actions
//! - Parametric models ([`GenericModel`])
//!
//! All state lives in a [`Tree`]; separate trees share nothing.

pub mod config;
pub mod errors;
pub mod generic;
pub mod logging_facility;
pub mod model;
pub mod mutation;
pub mod tree;
pub mod types;
pub mod value;
mod view;

pub use arbor_core_types;

// Re-export commonly used types
pub use config::{ArborConfig, TreeOptions};
pub use errors::{ArborError, ExError, ExErrorKind, Result};
pub use generic::GenericModel;
pub use model::{FieldSpec, Hook, Instance, ListRef, MapRef, Model, ModelBuilder};
pub use mutation::{FlowContext, FlowFuture};
pub use tree::{Environment, ListenerId, NodeId, Tree};
pub use types::{resolver, Type, TypeNamespace, TypeResolver};
pub use value::{Snapshot, Value};
