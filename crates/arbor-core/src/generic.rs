//! Parametric models
//!
//! A [`GenericModel`] holds a builder whose field types mention parameters
//! through `TypeNamespace::param`. Instantiating it binds every parameter to
//! a concrete type and compiles a fresh model; instantiations are cached by
//! the signatures of their arguments, so asking twice for the same types
//! returns the same model.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Instant;

use crate::errors::{ArborError, Result};
use crate::model::{Model, ModelBuilder};
use crate::types::{Type, TypeNamespace, TypeResolver};
use crate::{log_op_end, log_op_error, log_op_start};

struct Param {
    name: String,
    default: Option<TypeResolver>,
}

pub struct GenericModel {
    builder: ModelBuilder,
    params: Vec<Param>,
    cache: RefCell<HashMap<String, Model>>,
}

impl GenericModel {
    pub fn new(builder: ModelBuilder, params: &[&str]) -> Self {
        Self {
            builder,
            params: params
                .iter()
                .map(|name| Param {
                    name: name.to_string(),
                    default: None,
                })
                .collect(),
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Type used when an instantiation omits `param`
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if `param` is not declared.
    pub fn with_default(
        mut self,
        param: &str,
        default: impl Fn(&TypeNamespace) -> Type + 'static,
    ) -> Result<Self> {
        let name = self.builder.name().to_string();
        let slot = self
            .params
            .iter_mut()
            .find(|p| p.name == param)
            .ok_or_else(|| {
                ArborError::configuration(name, format!("unknown type parameter '{}'", param))
            })?;
        slot.default = Some(Rc::new(default));
        Ok(self)
    }

    pub fn name(&self) -> &str {
        self.builder.name()
    }

    pub fn params(&self) -> Vec<&str> {
        self.params.iter().map(|p| p.name.as_str()).collect()
    }

    /// Parameter list, e.g. `{ T, U }`
    pub fn describe(&self) -> String {
        format!("{{ {} }}", self.params().join(", "))
    }

    /// Number of distinct instantiations compiled so far
    pub fn instantiations(&self) -> usize {
        self.cache.borrow().len()
    }

    /// Bind parameters positionally and compile (or reuse) the model
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for too many arguments, a parameter with
    /// neither argument nor default, or any compile error of the bound
    /// builder.
    pub fn instantiate(&self, types: &TypeNamespace, args: &[TypeResolver]) -> Result<Model> {
        let start = Instant::now();
        log_op_start!("generic_instantiate", model = %self.builder.name());

        match self.instantiate_with(types, args) {
            Ok(model) => {
                log_op_end!(
                    "generic_instantiate",
                    duration_ms = start.elapsed().as_millis() as u64,
                    model = %model.name()
                );
                Ok(model)
            }
            Err(e) => {
                log_op_error!(
                    "generic_instantiate",
                    e.clone(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    model = %self.builder.name()
                );
                Err(e)
            }
        }
    }

    fn instantiate_with(&self, types: &TypeNamespace, args: &[TypeResolver]) -> Result<Model> {
        if args.len() > self.params.len() {
            return Err(ArborError::configuration(
                self.builder.name(),
                format!(
                    "expected at most {} type arguments, got {}",
                    self.params.len(),
                    args.len()
                ),
            ));
        }

        let mut bound = Vec::with_capacity(self.params.len());
        for (index, param) in self.params.iter().enumerate() {
            let ty = match (args.get(index), &param.default) {
                (Some(arg), _) => types.resolve(arg),
                (None, Some(default)) => types.resolve(default),
                (None, None) => {
                    return Err(ArborError::configuration(
                        self.builder.name(),
                        format!("missing type argument for '{}'", param.name),
                    ))
                }
            };
            bound.push((param.name.clone(), ty));
        }

        let key = format!(
            "<{}>",
            bound
                .iter()
                .map(|(_, ty)| ty.describe())
                .collect::<Vec<_>>()
                .join(", ")
        );
        if let Some(model) = self.cache.borrow().get(&key) {
            tracing::trace!(model = %model.name(), "reuse instantiation");
            return Ok(model.clone());
        }

        let display = format!(
            "{}<{}>",
            self.builder.name(),
            bound
                .iter()
                .map(|(_, ty)| ty.name())
                .collect::<Vec<_>>()
                .join(", ")
        );
        let scope = types.with_params(bound.into_iter().collect());
        let model = self.builder.clone().named(&display).compile(&scope)?;
        self.cache.borrow_mut().insert(key, model.clone());
        Ok(model)
    }
}
