use std::rc::Rc;

use super::{Hook, Instance, Model, Preprocessor};
use crate::errors::{ArborError, Result};
use crate::mutation::{FlowContext, FlowDef, FlowFuture, MutationFn};
use crate::tree::Tree;
use crate::types::{Initializer, Type, TypeNamespace, TypeResolver};
use crate::value::{Snapshot, Value};
use crate::view::ViewBody;

pub type FieldGetter = Rc<dyn Fn(&Instance) -> Result<Value>>;
pub type FieldSetter = Rc<dyn Fn(&Instance, Value) -> Result<()>>;

/// Declaration of one field
///
/// Fields are plain value slots. A spec carrying a getter or setter is
/// rejected by [`ModelBuilder::declare`]; derived values belong in views.
#[derive(Clone)]
pub struct FieldSpec {
    pub name: String,
    pub resolver: Option<TypeResolver>,
    pub initializer: Option<Initializer>,
    pub nullable: bool,
    pub getter: Option<FieldGetter>,
    pub setter: Option<FieldSetter>,
}

impl FieldSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            resolver: None,
            initializer: None,
            nullable: false,
            getter: None,
            setter: None,
        }
    }

    pub fn typed(mut self, resolver: impl Fn(&TypeNamespace) -> Type + 'static) -> Self {
        self.resolver = Some(Rc::new(resolver));
        self
    }

    pub fn default_snapshot(mut self, snapshot: Snapshot) -> Self {
        self.initializer = Some(Initializer::Snapshot(snapshot));
        self
    }

    pub fn default_with(mut self, init: impl Fn(&Tree) -> Result<Value> + 'static) -> Self {
        self.initializer = Some(Initializer::Compute(Rc::new(init)));
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn getter(mut self, getter: impl Fn(&Instance) -> Result<Value> + 'static) -> Self {
        self.getter = Some(Rc::new(getter));
        self
    }

    pub fn setter(mut self, setter: impl Fn(&Instance, Value) -> Result<()> + 'static) -> Self {
        self.setter = Some(Rc::new(setter));
        self
    }
}

#[derive(Clone)]
pub(crate) struct ViewSpec {
    pub name: String,
    pub returns: Option<TypeResolver>,
    pub body: ViewBody,
}

#[derive(Clone)]
pub(crate) struct MutationSpec {
    pub name: String,
    pub returns: Option<TypeResolver>,
    pub body: MutationFn,
}

/// Declarations of one model, in declaration order
///
/// Builders are values: cloning one and compiling it again (as the generic
/// factory does) yields an independent model.
#[derive(Clone)]
pub struct ModelBuilder {
    pub(crate) name: String,
    pub(crate) fields: Vec<FieldSpec>,
    pub(crate) views: Vec<ViewSpec>,
    pub(crate) mutations: Vec<MutationSpec>,
    pub(crate) flows: Vec<Rc<FlowDef>>,
    pub(crate) hooks: Vec<Hook>,
    pub(crate) parent: Option<Model>,
    pub(crate) preprocessor: Option<Preprocessor>,
}

impl ModelBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: Vec::new(),
            views: Vec::new(),
            mutations: Vec::new(),
            flows: Vec::new(),
            hooks: Vec::new(),
            parent: None,
            preprocessor: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    fn reject(&self, reason: impl Into<String>) -> ArborError {
        ArborError::configuration(self.name.clone(), reason)
    }

    fn ensure_new_member(&self, member: &str) -> Result<()> {
        if member.trim().is_empty() {
            return Err(self.reject("member names must not be empty"));
        }
        let taken = self.fields.iter().any(|f| f.name == member)
            || self.views.iter().any(|v| v.name == member)
            || self.mutations.iter().any(|m| m.name == member)
            || self.flows.iter().any(|f| f.name == member);
        if taken {
            return Err(self.reject(format!("duplicate member '{}'", member)));
        }
        Ok(())
    }

    /// Register a field
    ///
    /// # Errors
    ///
    /// Returns `Configuration` immediately for a missing type resolver, a
    /// getter or setter, an empty name or a name already declared.
    pub fn declare(mut self, spec: FieldSpec) -> Result<Self> {
        self.ensure_new_member(&spec.name)?;
        if spec.resolver.is_none() {
            return Err(self.reject(format!(
                "field '{}' has no type resolver; untyped fields are not supported",
                spec.name
            )));
        }
        if spec.getter.is_some() || spec.setter.is_some() {
            return Err(self.reject(format!(
                "field '{}' declares a getter or setter; fields must be plain value slots, use a view for derived values",
                spec.name
            )));
        }
        tracing::trace!(model = %self.name, field = %spec.name, "declare field");
        self.fields.push(spec);
        Ok(self)
    }

    /// # Errors
    ///
    /// See [`ModelBuilder::declare`].
    pub fn field(
        self,
        name: &str,
        resolver: impl Fn(&TypeNamespace) -> Type + 'static,
    ) -> Result<Self> {
        self.declare(FieldSpec::new(name).typed(resolver))
    }

    /// Field that may be omitted; absence materializes `default`
    ///
    /// # Errors
    ///
    /// See [`ModelBuilder::declare`].
    pub fn field_default(
        self,
        name: &str,
        resolver: impl Fn(&TypeNamespace) -> Type + 'static,
        default: Snapshot,
    ) -> Result<Self> {
        self.declare(FieldSpec::new(name).typed(resolver).default_snapshot(default))
    }

    /// Field whose default is computed at materialization time
    ///
    /// # Errors
    ///
    /// See [`ModelBuilder::declare`].
    pub fn field_with(
        self,
        name: &str,
        resolver: impl Fn(&TypeNamespace) -> Type + 'static,
        init: impl Fn(&Tree) -> Result<Value> + 'static,
    ) -> Result<Self> {
        self.declare(FieldSpec::new(name).typed(resolver).default_with(init))
    }

    /// Field that accepts `null`; absence materializes `null`
    ///
    /// # Errors
    ///
    /// See [`ModelBuilder::declare`].
    pub fn nullable(
        self,
        name: &str,
        resolver: impl Fn(&TypeNamespace) -> Type + 'static,
    ) -> Result<Self> {
        self.declare(FieldSpec::new(name).typed(resolver).nullable())
    }

    /// # Errors
    ///
    /// See [`ModelBuilder::declare`].
    pub fn nullable_default(
        self,
        name: &str,
        resolver: impl Fn(&TypeNamespace) -> Type + 'static,
        default: Snapshot,
    ) -> Result<Self> {
        self.declare(
            FieldSpec::new(name)
                .typed(resolver)
                .nullable()
                .default_snapshot(default),
        )
    }

    /// Compose with an already compiled parent
    ///
    /// Parent fields come first; own declarations override same-named
    /// parent members.
    pub fn extends(mut self, parent: &Model) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// Transform raw snapshots before validation and materialization
    pub fn preprocess_snapshot(mut self, f: impl Fn(Snapshot) -> Snapshot + 'static) -> Self {
        self.preprocessor = Some(Rc::new(f));
        self
    }

    fn push_view(
        mut self,
        name: &str,
        returns: Option<TypeResolver>,
        body: ViewBody,
    ) -> Result<Self> {
        self.ensure_new_member(name)?;
        self.views.push(ViewSpec {
            name: name.to_string(),
            returns,
            body,
        });
        Ok(self)
    }

    /// Memoized accessor view
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for an empty or duplicate name.
    pub fn view(
        self,
        name: &str,
        body: impl Fn(&Instance) -> Result<Value> + 'static,
    ) -> Result<Self> {
        self.push_view(name, None, ViewBody::Accessor(Rc::new(body)))
    }

    /// Accessor view whose result is checked against a declared type
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for an empty or duplicate name.
    pub fn typed_view(
        self,
        name: &str,
        returns: impl Fn(&TypeNamespace) -> Type + 'static,
        body: impl Fn(&Instance) -> Result<Value> + 'static,
    ) -> Result<Self> {
        self.push_view(
            name,
            Some(Rc::new(returns)),
            ViewBody::Accessor(Rc::new(body)),
        )
    }

    /// Memoized view taking arguments
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for an empty or duplicate name.
    pub fn view_fn(
        self,
        name: &str,
        body: impl Fn(&Instance, &[Value]) -> Result<Value> + 'static,
    ) -> Result<Self> {
        self.push_view(name, None, ViewBody::Function(Rc::new(body)))
    }

    /// # Errors
    ///
    /// Returns `Configuration` for an empty or duplicate name.
    pub fn typed_view_fn(
        self,
        name: &str,
        returns: impl Fn(&TypeNamespace) -> Type + 'static,
        body: impl Fn(&Instance, &[Value]) -> Result<Value> + 'static,
    ) -> Result<Self> {
        self.push_view(
            name,
            Some(Rc::new(returns)),
            ViewBody::Function(Rc::new(body)),
        )
    }

    fn push_mutation(
        mut self,
        name: &str,
        returns: Option<TypeResolver>,
        body: MutationFn,
    ) -> Result<Self> {
        self.ensure_new_member(name)?;
        if let Some(hook) = Hook::from_name(name) {
            tracing::trace!(model = %self.name, hook = hook.name(), "register hook");
            self.hooks.push(hook);
        }
        self.mutations.push(MutationSpec {
            name: name.to_string(),
            returns,
            body,
        });
        Ok(self)
    }

    /// Operation that runs as an action on the instance
    ///
    /// A mutation named after a lifecycle hook (`after_create`,
    /// `before_destroy`, ...) is also registered as that hook.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for an empty or duplicate name.
    pub fn mutation(
        self,
        name: &str,
        body: impl Fn(&Instance, &[Value]) -> Result<Value> + 'static,
    ) -> Result<Self> {
        self.push_mutation(name, None, Rc::new(body))
    }

    /// # Errors
    ///
    /// Returns `Configuration` for an empty or duplicate name.
    pub fn typed_mutation(
        self,
        name: &str,
        returns: impl Fn(&TypeNamespace) -> Type + 'static,
        body: impl Fn(&Instance, &[Value]) -> Result<Value> + 'static,
    ) -> Result<Self> {
        self.push_mutation(name, Some(Rc::new(returns)), Rc::new(body))
    }

    /// Asynchronous mutation made of action steps
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for an empty or duplicate name.
    pub fn flow(
        mut self,
        name: &str,
        body: impl Fn(FlowContext, Vec<Value>) -> FlowFuture + 'static,
    ) -> Result<Self> {
        self.ensure_new_member(name)?;
        self.flows.push(Rc::new(FlowDef {
            name: name.to_string(),
            body: Rc::new(body),
        }));
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_reason(err: ArborError) -> String {
        match err {
            ArborError::Configuration { reason, .. } => reason,
            other => panic!("expected a configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_resolver_fails_at_declaration() {
        let err = ModelBuilder::new("Book")
            .declare(FieldSpec::new("title"))
            .err()
            .unwrap();
        assert!(config_reason(err).contains("untyped fields are not supported"));
    }

    #[test]
    fn test_getter_or_setter_is_rejected() {
        let with_getter = FieldSpec::new("price")
            .typed(|t| t.number())
            .getter(|_| Ok(Value::Number(1.0)));
        let err = ModelBuilder::new("Book").declare(with_getter).err().unwrap();
        assert!(config_reason(err).contains("getter or setter"));

        let with_setter = FieldSpec::new("price")
            .typed(|t| t.number())
            .setter(|_, _| Ok(()));
        assert!(ModelBuilder::new("Book").declare(with_setter).is_err());
    }

    #[test]
    fn test_duplicate_and_empty_names() {
        let builder = ModelBuilder::new("Book").field("title", |t| t.string()).unwrap();
        let err = builder
            .clone()
            .view("title", |_| Ok(Value::Null))
            .err()
            .unwrap();
        assert!(config_reason(err).contains("duplicate member 'title'"));
        assert!(builder.field(" ", |t| t.string()).is_err());
    }

    #[test]
    fn test_hook_named_mutations_register_hooks() {
        let builder = ModelBuilder::new("Book")
            .mutation("after_create", |_, _| Ok(Value::Null))
            .unwrap()
            .mutation("rename", |_, _| Ok(Value::Null))
            .unwrap();
        assert_eq!(builder.hooks, vec![Hook::AfterCreate]);
        assert_eq!(builder.mutations.len(), 2);
    }

    #[test]
    fn test_declaration_order_is_kept() {
        let builder = ModelBuilder::new("Entry")
            .field_default("quantity", |t| t.number(), json!(0))
            .unwrap()
            .nullable("note", |t| t.string())
            .unwrap();
        let names: Vec<&str> = builder.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["quantity", "note"]);
        assert!(builder.fields[1].nullable);
    }
}
