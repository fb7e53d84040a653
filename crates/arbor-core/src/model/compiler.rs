//! Model compilation
//!
//! Turns a [`ModelBuilder`] into an immutable [`Model`]: field resolvers run
//! against the namespace, parent members are merged in, and the result is
//! registered in the namespace catalog so `named` forward references can
//! find it.

use std::collections::HashMap;
use std::rc::Rc;
use std::time::Instant;

use super::{FieldDef, Hook, Model, ModelBuilder, ModelDef};
use crate::errors::{ArborError, Result};
use crate::mutation::MutationDef;
use crate::types::{Type, TypeKind, TypeNamespace};
use crate::view::ViewDef;
use crate::{log_op_end, log_op_error, log_op_start};

/// Whether `ty` declares an identifier without forcing late resolution
fn declares_identifier(ty: &Type) -> bool {
    match ty.kind() {
        TypeKind::Identifier => true,
        TypeKind::Optional { inner, .. } | TypeKind::Maybe(inner) => declares_identifier(inner),
        _ => false,
    }
}

fn identifier_index(model: &str, fields: &[FieldDef]) -> Result<Option<usize>> {
    let found: Vec<usize> = fields
        .iter()
        .enumerate()
        .filter(|(_, f)| declares_identifier(&f.ty))
        .map(|(i, _)| i)
        .collect();
    match found.as_slice() {
        [] => Ok(None),
        [one] => Ok(Some(*one)),
        many => Err(ArborError::configuration(
            model,
            format!(
                "at most one identifier field is allowed, found {}: {}",
                many.len(),
                many.iter()
                    .map(|i| fields[*i].name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        )),
    }
}

fn merge_field(fields: &mut Vec<FieldDef>, field: FieldDef) {
    match fields.iter_mut().find(|f| f.name == field.name) {
        Some(existing) => existing.ty = field.ty,
        None => fields.push(field),
    }
}

fn merge_hooks(into: &mut Vec<Hook>, from: &[Hook]) {
    for hook in from {
        if !into.contains(hook) {
            into.push(*hook);
        }
    }
}

impl ModelBuilder {
    /// Compile the declarations into a model
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if a type still refers to an unbound generic
    /// parameter or more than one identifier field results.
    pub fn compile(&self, types: &TypeNamespace) -> Result<Model> {
        let start = Instant::now();
        log_op_start!("model_compile", model = %self.name);

        match self.compile_with(types) {
            Ok(model) => {
                types.catalog().register(&model);
                log_op_end!(
                    "model_compile",
                    duration_ms = start.elapsed().as_millis() as u64,
                    model = %self.name,
                    field_count = model.fields().len()
                );
                Ok(model)
            }
            Err(e) => {
                log_op_error!(
                    "model_compile",
                    e.clone(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    model = %self.name
                );
                Err(e)
            }
        }
    }

    fn unbound(&self, member: &str, param: &str) -> ArborError {
        ArborError::configuration(
            self.name.clone(),
            format!("'{}' uses unbound type parameter '{}'", member, param),
        )
    }

    fn compile_with(&self, types: &TypeNamespace) -> Result<Model> {
        let parent = self.parent.as_ref().map(Model::def);

        let mut fields: Vec<FieldDef> = parent.map(|p| p.fields.clone()).unwrap_or_default();
        for spec in &self.fields {
            let resolver = spec.resolver.as_ref().ok_or_else(|| {
                ArborError::configuration(
                    self.name.clone(),
                    format!("field '{}' has no type resolver", spec.name),
                )
            })?;
            let mut ty = types.resolve(resolver);
            if let Some(param) = ty.unbound_param() {
                return Err(self.unbound(&spec.name, &param));
            }
            if spec.nullable {
                ty = types.maybe(ty);
            }
            if let Some(init) = &spec.initializer {
                ty = Type::optional(ty, init.clone());
            }
            merge_field(
                &mut fields,
                FieldDef {
                    name: spec.name.clone(),
                    ty,
                },
            );
        }
        let identifier = identifier_index(&self.name, &fields)?;

        let mut views: HashMap<String, Rc<ViewDef>> =
            parent.map(|p| p.views.clone()).unwrap_or_default();
        for spec in &self.views {
            let returns = spec.returns.as_ref().map(|r| types.resolve(r));
            if let Some(param) = returns.as_ref().and_then(Type::unbound_param) {
                return Err(self.unbound(&spec.name, &param));
            }
            views.insert(
                spec.name.clone(),
                Rc::new(ViewDef {
                    name: spec.name.clone(),
                    returns,
                    body: spec.body.clone(),
                }),
            );
        }

        let mut mutations: HashMap<String, Rc<MutationDef>> =
            parent.map(|p| p.mutations.clone()).unwrap_or_default();
        for spec in &self.mutations {
            let returns = spec.returns.as_ref().map(|r| types.resolve(r));
            if let Some(param) = returns.as_ref().and_then(Type::unbound_param) {
                return Err(self.unbound(&spec.name, &param));
            }
            mutations.insert(
                spec.name.clone(),
                Rc::new(MutationDef {
                    name: spec.name.clone(),
                    returns,
                    body: spec.body.clone(),
                }),
            );
        }

        let mut flows = parent.map(|p| p.flows.clone()).unwrap_or_default();
        for flow in &self.flows {
            flows.insert(flow.name.clone(), flow.clone());
        }

        let mut hooks = parent.map(|p| p.hooks.clone()).unwrap_or_default();
        merge_hooks(&mut hooks, &self.hooks);

        let mut lineage = vec![self.name.clone()];
        if let Some(p) = parent {
            lineage.extend(p.lineage.iter().cloned());
        }

        tracing::debug!(
            model = %self.name,
            fields = fields.len(),
            views = views.len(),
            mutations = mutations.len(),
            flows = flows.len(),
            "compiled model"
        );

        Ok(Model::from_def(ModelDef {
            name: self.name.clone(),
            fields,
            identifier,
            lineage,
            views,
            mutations,
            flows,
            hooks,
            preprocessor: self
                .preprocessor
                .clone()
                .or_else(|| parent.and_then(|p| p.preprocessor.clone())),
        }))
    }
}

impl Model {
    /// Union of two compiled models; members of `b` override those of `a`
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the union ends up with two identifier
    /// fields.
    pub(crate) fn compose(name: &str, a: &Model, b: &Model) -> Result<Model> {
        let (left, right) = (a.def(), b.def());

        let mut fields = left.fields.clone();
        for field in &right.fields {
            merge_field(&mut fields, field.clone());
        }
        let identifier = identifier_index(name, &fields)?;

        let mut views = left.views.clone();
        views.extend(right.views.iter().map(|(k, v)| (k.clone(), v.clone())));
        let mut mutations = left.mutations.clone();
        mutations.extend(right.mutations.iter().map(|(k, v)| (k.clone(), v.clone())));
        let mut flows = left.flows.clone();
        flows.extend(right.flows.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut hooks = left.hooks.clone();
        merge_hooks(&mut hooks, &right.hooks);

        let mut lineage = vec![name.to_string()];
        lineage.extend(left.lineage.iter().cloned());
        lineage.extend(right.lineage.iter().cloned());

        Ok(Model::from_def(ModelDef {
            name: name.to_string(),
            fields,
            identifier,
            lineage,
            views,
            mutations,
            flows,
            hooks,
            preprocessor: right.preprocessor.clone().or_else(|| left.preprocessor.clone()),
        }))
    }
}
