//! Schema types
//!
//! A [`Type`] is an immutable, cheaply cloneable description of a field's
//! shape. Types are produced by resolvers run against a [`TypeNamespace`] at
//! model-compile time; forward references go through `late`/`named` types
//! that resolve on first use.

mod namespace;
mod validate;

use std::cell::OnceCell;
use std::fmt;
use std::rc::Rc;

use crate::errors::{ArborError, Result};
use crate::model::Model;
use crate::tree::Tree;
use crate::value::{Snapshot, Value};

pub use namespace::{resolver, Catalog, TypeNamespace, TypeResolver};
pub use validate::Violation;
pub(crate) use validate::model_violations;

/// Computes a default value when an optional field is absent
pub type InitFn = Rc<dyn Fn(&Tree) -> Result<Value>>;

/// Default for an `optional` type
#[derive(Clone)]
pub enum Initializer {
    /// A fixed snapshot
    Snapshot(Snapshot),
    /// A function run at materialization time; it may create other instances
    Compute(InitFn),
}

impl fmt::Debug for Initializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Initializer::Snapshot(s) => write!(f, "Snapshot({})", s),
            Initializer::Compute(_) => write!(f, "Compute(..)"),
        }
    }
}

pub(crate) type LateFn = Rc<dyn Fn() -> Result<Type>>;

pub enum TypeKind {
    String,
    Number,
    Boolean,
    Identifier,
    Optional {
        inner: Type,
        default: Initializer,
    },
    Maybe(Type),
    Map(Type),
    Array(Type),
    Reference(Type),
    Model(Model),
    Late {
        label: String,
        resolver: LateFn,
        resolved: OnceCell<Type>,
    },
    /// Generic parameter that was never bound; rejected at compile time
    Param(String),
}

#[derive(Clone)]
pub struct Type(Rc<TypeKind>);

impl Type {
    pub(crate) fn new(kind: TypeKind) -> Self {
        Type(Rc::new(kind))
    }

    pub fn kind(&self) -> &TypeKind {
        &self.0
    }

    pub fn model(model: Model) -> Self {
        Type::new(TypeKind::Model(model))
    }

    pub(crate) fn optional(inner: Type, default: Initializer) -> Self {
        Type::new(TypeKind::Optional { inner, default })
    }

    pub(crate) fn maybe(inner: Type) -> Self {
        Type::new(TypeKind::Maybe(inner))
    }

    /// Follow `late` indirections to a concrete type
    ///
    /// # Errors
    ///
    /// Returns the resolver's error (usually `Configuration` for a `named`
    /// model that was never compiled).
    pub fn resolved(&self) -> Result<Type> {
        match self.kind() {
            TypeKind::Late {
                resolver, resolved, ..
            } => {
                if let Some(ty) = resolved.get() {
                    return ty.resolved();
                }
                let ty = resolver()?;
                let _ = resolved.set(ty.clone());
                ty.resolved()
            }
            _ => Ok(self.clone()),
        }
    }

    /// Strip `optional`/`maybe` wrappers (after resolving late types)
    pub(crate) fn core(&self) -> Result<Type> {
        let ty = self.resolved()?;
        match ty.kind() {
            TypeKind::Optional { inner, .. } | TypeKind::Maybe(inner) => inner.core(),
            _ => Ok(ty),
        }
    }

    /// Model behind a model or reference type
    pub(crate) fn target_model(&self) -> Result<Option<Model>> {
        let ty = self.core()?;
        match ty.kind() {
            TypeKind::Model(m) => Ok(Some(m.clone())),
            TypeKind::Reference(target) => target.target_model(),
            _ => Ok(None),
        }
    }

    pub fn is_identifier(&self) -> bool {
        matches!(self.core().map(|t| matches!(t.kind(), TypeKind::Identifier)), Ok(true))
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.core().map(|t| matches!(t.kind(), TypeKind::Reference(_))), Ok(true))
    }

    /// Whether `null` is an acceptable value
    pub fn accepts_null(&self) -> bool {
        match self.resolved().as_ref().map(Type::kind) {
            Ok(TypeKind::Maybe(_)) => true,
            Ok(TypeKind::Optional { inner, .. }) => inner.accepts_null(),
            _ => false,
        }
    }

    /// First unbound generic parameter reachable from this type
    pub(crate) fn unbound_param(&self) -> Option<String> {
        match self.kind() {
            TypeKind::Param(name) => Some(name.clone()),
            TypeKind::Optional { inner, .. }
            | TypeKind::Maybe(inner)
            | TypeKind::Map(inner)
            | TypeKind::Array(inner)
            | TypeKind::Reference(inner) => inner.unbound_param(),
            _ => None,
        }
    }

    /// Stable textual signature
    ///
    /// The outermost model is spelled out with its fields; nested models are
    /// referred to by name.
    pub fn describe(&self) -> String {
        self.describe_at(true)
    }

    /// Short name used in error messages
    pub fn name(&self) -> String {
        self.describe_at(false)
    }

    fn describe_at(&self, top: bool) -> String {
        match self.kind() {
            TypeKind::String => "string".to_string(),
            TypeKind::Number => "number".to_string(),
            TypeKind::Boolean => "boolean".to_string(),
            TypeKind::Identifier => "identifier".to_string(),
            TypeKind::Optional { inner, .. } => format!("{}?", inner.describe_at(false)),
            TypeKind::Maybe(inner) => format!("({} | null)?", inner.describe_at(false)),
            TypeKind::Map(inner) => format!("Map<string, {}>", inner.describe_at(false)),
            TypeKind::Array(inner) => format!("{}[]", inner.describe_at(false)),
            TypeKind::Reference(target) => format!("reference({})", target.describe_at(false)),
            TypeKind::Model(m) if top => {
                let fields: Vec<String> = m
                    .fields()
                    .iter()
                    .map(|f| format!("{}: {}", f.name, f.ty.describe_at(false)))
                    .collect();
                format!("{} {{ {} }}", m.name(), fields.join("; "))
            }
            TypeKind::Model(m) => m.name().to_string(),
            TypeKind::Late { label, .. } => self
                .resolved()
                .map(|t| t.describe_at(top))
                .unwrap_or_else(|_| label.clone()),
            TypeKind::Param(name) => name.clone(),
        }
    }

    /// Structural check of a snapshot against this type
    pub fn validate(&self, snapshot: &Snapshot) -> Vec<Violation> {
        let mut out = Vec::new();
        validate::check(self, Some(snapshot), "", &mut out);
        out
    }

    pub fn is_valid_snapshot(&self, snapshot: &Snapshot) -> bool {
        self.validate(snapshot).is_empty()
    }

    /// Turn violations into the error raised at write/create boundaries
    pub(crate) fn invalid(&self, violations: Vec<Violation>) -> ArborError {
        ArborError::InvalidSnapshot {
            type_name: self.name(),
            violations: violations.iter().map(ToString::to_string).collect(),
        }
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Type({})", self.name())
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_describe_wrappers() {
        let ns = TypeNamespace::new();
        assert_eq!(ns.optional(ns.number(), json!(0)).describe(), "number?");
        assert_eq!(ns.maybe(ns.string()).describe(), "(string | null)?");
        assert_eq!(ns.map(ns.boolean()).describe(), "Map<string, boolean>");
        assert_eq!(ns.array(ns.string()).describe(), "string[]");
    }

    #[test]
    fn test_accepts_null() {
        let ns = TypeNamespace::new();
        assert!(ns.maybe(ns.string()).accepts_null());
        assert!(ns.optional(ns.maybe(ns.string()), json!(null)).accepts_null());
        assert!(!ns.optional(ns.string(), json!("x")).accepts_null());
        assert!(!ns.string().accepts_null());
    }

    #[test]
    fn test_unbound_param_is_found_through_wrappers() {
        let ns = TypeNamespace::new();
        let ty = ns.array(ns.maybe(ns.param("T")));
        assert_eq!(ty.unbound_param(), Some("T".to_string()));
        assert_eq!(ns.array(ns.string()).unbound_param(), None);
    }

    #[test]
    fn test_late_resolves_once() {
        let ns = TypeNamespace::new();
        let calls = Rc::new(std::cell::Cell::new(0));
        let seen = calls.clone();
        let ty = ns.late("Later", move |ns| {
            seen.set(seen.get() + 1);
            ns.number()
        });
        assert_eq!(ty.describe(), "number");
        assert_eq!(ty.describe(), "number");
        assert_eq!(calls.get(), 1);
    }
}
