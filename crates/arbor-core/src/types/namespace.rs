use std::cell::{OnceCell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use super::{Initializer, Type, TypeKind};
use crate::errors::{ArborError, Result};
use crate::model::{Model, ModelBuilder};
use crate::tree::Tree;
use crate::value::{Snapshot, Value};

/// Lazily evaluated type descriptor, run against a namespace at compile time
pub type TypeResolver = Rc<dyn Fn(&TypeNamespace) -> Type>;

/// Wrap a closure as a [`TypeResolver`]
pub fn resolver(f: impl Fn(&TypeNamespace) -> Type + 'static) -> TypeResolver {
    Rc::new(f)
}

/// Name → compiled model table backing `named` forward references
#[derive(Clone, Default)]
pub struct Catalog(Rc<RefCell<HashMap<String, Model>>>);

impl Catalog {
    pub fn get(&self, name: &str) -> Option<Model> {
        self.0.borrow().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.borrow().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Registered model names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.0.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn register(&self, model: &Model) {
        // Recompiling a name replaces the previous entry
        self.0
            .borrow_mut()
            .insert(model.name().to_string(), model.clone());
    }
}

/// The fixed set of type constructors handed to resolvers
#[derive(Clone, Default)]
pub struct TypeNamespace {
    catalog: Catalog,
    params: Rc<HashMap<String, Type>>,
}

impl TypeNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// A namespace sharing this catalog with generic parameters bound
    pub fn with_params(&self, params: HashMap<String, Type>) -> Self {
        Self {
            catalog: self.catalog.clone(),
            params: Rc::new(params),
        }
    }

    /// Run a resolver against this namespace
    pub fn resolve(&self, resolver: &TypeResolver) -> Type {
        resolver(self)
    }

    pub fn string(&self) -> Type {
        Type::new(TypeKind::String)
    }

    pub fn number(&self) -> Type {
        Type::new(TypeKind::Number)
    }

    pub fn boolean(&self) -> Type {
        Type::new(TypeKind::Boolean)
    }

    /// Unique key of a model within its tree (string or number)
    pub fn identifier(&self) -> Type {
        Type::new(TypeKind::Identifier)
    }

    /// May be absent; absence materializes `default`
    pub fn optional(&self, inner: Type, default: Snapshot) -> Type {
        Type::optional(inner, Initializer::Snapshot(default))
    }

    /// May be absent; absence runs `init` at materialization time
    pub fn optional_with(
        &self,
        inner: Type,
        init: impl Fn(&Tree) -> Result<Value> + 'static,
    ) -> Type {
        Type::optional(inner, Initializer::Compute(Rc::new(init)))
    }

    /// Nullable; absence materializes `null`
    pub fn maybe(&self, inner: Type) -> Type {
        Type::maybe(inner)
    }

    pub fn map(&self, item: Type) -> Type {
        Type::new(TypeKind::Map(item))
    }

    pub fn array(&self, item: Type) -> Type {
        Type::new(TypeKind::Array(item))
    }

    /// Stores the target's identifier, resolves to the live target on read
    pub fn reference(&self, target: Type) -> Type {
        Type::new(TypeKind::Reference(target))
    }

    /// Ad-hoc model with plain fields
    ///
    /// # Errors
    ///
    /// Returns `Configuration` on duplicate field names or a second
    /// identifier field.
    pub fn model(&self, name: &str, fields: Vec<(&str, Type)>) -> Result<Type> {
        let mut builder = ModelBuilder::new(name);
        for (field, ty) in fields {
            builder = builder.field(field, move |_| ty.clone())?;
        }
        Ok(Type::model(builder.compile(self)?))
    }

    /// Union of two model types; fields of `b` override those of `a`
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if either side is not a model type.
    pub fn compose(&self, a: &Type, b: &Type) -> Result<Type> {
        let left = compose_side(a)?;
        let right = compose_side(b)?;
        let name = format!("{}_{}", left.name(), right.name());
        let model = Model::compose(&name, &left, &right)?;
        self.catalog.register(&model);
        Ok(Type::model(model))
    }

    /// Forward reference resolved on first use
    pub fn late(&self, label: &str, f: impl Fn(&TypeNamespace) -> Type + 'static) -> Type {
        let ns = self.clone();
        Type::new(TypeKind::Late {
            label: label.to_string(),
            resolver: Rc::new(move || Ok(f(&ns))),
            resolved: OnceCell::new(),
        })
    }

    /// Forward reference to a model compiled later under `name`
    pub fn named(&self, name: &str) -> Type {
        let catalog = self.catalog.clone();
        let wanted = name.to_string();
        Type::new(TypeKind::Late {
            label: name.to_string(),
            resolver: Rc::new(move || {
                catalog.get(&wanted).map(Type::model).ok_or_else(|| {
                    ArborError::configuration(
                        wanted.clone(),
                        "referenced model has not been compiled",
                    )
                })
            }),
            resolved: OnceCell::new(),
        })
    }

    pub fn of(&self, model: &Model) -> Type {
        Type::model(model.clone())
    }

    /// Bound generic parameter, or a placeholder rejected at compile time
    pub fn param(&self, name: &str) -> Type {
        self.params
            .get(name)
            .cloned()
            .unwrap_or_else(|| Type::new(TypeKind::Param(name.to_string())))
    }
}

fn compose_side(ty: &Type) -> Result<Model> {
    match ty.resolved()?.kind() {
        TypeKind::Model(m) => Ok(m.clone()),
        _ => Err(ArborError::configuration(
            ty.name(),
            "only model types can be composed",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_falls_back_to_placeholder() {
        let ns = TypeNamespace::new();
        assert!(matches!(ns.param("T").kind(), TypeKind::Param(_)));

        let mut params = HashMap::new();
        params.insert("T".to_string(), ns.number());
        let bound = ns.with_params(params);
        assert_eq!(bound.param("T").describe(), "number");
    }

    #[test]
    fn test_named_fails_until_compiled() {
        let ns = TypeNamespace::new();
        let ty = ns.named("Ghost");
        assert!(matches!(
            ty.resolved(),
            Err(ArborError::Configuration { .. })
        ));
        assert_eq!(ty.name(), "Ghost");
    }

    #[test]
    fn test_model_type_registers_in_catalog() {
        let ns = TypeNamespace::new();
        let point = ns
            .model("Point", vec![("x", ns.number()), ("y", ns.number())])
            .unwrap();
        assert_eq!(point.describe(), "Point { x: number; y: number }");
        assert!(ns.catalog().contains("Point"));
        assert_eq!(ns.named("Point").name(), "Point");
    }

    #[test]
    fn test_compose_requires_models() {
        let ns = TypeNamespace::new();
        let err = ns.compose(&ns.string(), &ns.number()).unwrap_err();
        assert!(matches!(err, ArborError::Configuration { .. }));
    }
}
