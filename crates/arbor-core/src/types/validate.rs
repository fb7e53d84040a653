use std::fmt;

use super::{Type, TypeKind};
use crate::model::Model;
use crate::value::{json_identifier_key, Snapshot};

/// One reason a snapshot is not assignable to a type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Slash-separated location inside the snapshot, empty for the root
    pub path: String,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        write!(f, "at {}: {}", path, self.message)
    }
}

fn push(out: &mut Vec<Violation>, path: &str, message: String) {
    out.push(Violation {
        path: path.to_string(),
        message,
    });
}

fn not_assignable(out: &mut Vec<Violation>, path: &str, value: &Snapshot, ty: &Type) {
    push(
        out,
        path,
        format!("value {} is not assignable to type '{}'", value, ty.name()),
    );
}

/// `None` means the key was absent
pub(super) fn check(ty: &Type, value: Option<&Snapshot>, path: &str, out: &mut Vec<Violation>) {
    let ty = match ty.resolved() {
        Ok(ty) => ty,
        Err(e) => return push(out, path, e.to_string()),
    };

    match (ty.kind(), value) {
        (TypeKind::Optional { .. }, None) | (TypeKind::Maybe(_), None) => {}
        (TypeKind::Maybe(_), Some(Snapshot::Null)) => {}
        (TypeKind::Optional { inner, .. }, Some(v)) | (TypeKind::Maybe(inner), Some(v)) => {
            check(inner, Some(v), path, out)
        }
        (TypeKind::Param(name), _) => push(
            out,
            path,
            format!("generic parameter '{}' was never bound", name),
        ),
        (_, None) => push(out, path, format!("value of type '{}' is required", ty.name())),
        (TypeKind::String, Some(v)) if !v.is_string() => not_assignable(out, path, v, &ty),
        (TypeKind::Number, Some(v)) if !v.is_number() => not_assignable(out, path, v, &ty),
        (TypeKind::Boolean, Some(v)) if !v.is_boolean() => not_assignable(out, path, v, &ty),
        (TypeKind::Identifier, Some(v)) | (TypeKind::Reference(_), Some(v))
            if json_identifier_key(v).is_none() =>
        {
            not_assignable(out, path, v, &ty)
        }
        (TypeKind::Model(model), Some(v)) => {
            let snapshot = model.preprocess(v.clone());
            check_model(model, &snapshot, path, out);
        }
        (TypeKind::Map(item), Some(Snapshot::Object(entries))) => {
            let keyed_by = item.target_model().ok().flatten().filter(|_| !item.is_reference());
            for (key, entry) in entries {
                let entry_path = format!("{}/{}", path, key);
                check(item, Some(entry), &entry_path, out);
                if let Some(ident) = keyed_by.as_ref().and_then(|m| m.identifier_field()) {
                    let own = entry.get(ident).and_then(json_identifier_key);
                    if own.as_deref() != Some(key.as_str()) {
                        push(
                            out,
                            &entry_path,
                            format!("map key '{}' does not match identifier '{}'", key, ident),
                        );
                    }
                }
            }
        }
        (TypeKind::Array(item), Some(Snapshot::Array(items))) => {
            for (index, entry) in items.iter().enumerate() {
                check(item, Some(entry), &format!("{}/{}", path, index), out);
            }
        }
        (TypeKind::Map(_), Some(v)) | (TypeKind::Array(_), Some(v)) => {
            not_assignable(out, path, v, &ty)
        }
        _ => {}
    }
}

fn check_model(model: &Model, snapshot: &Snapshot, path: &str, out: &mut Vec<Violation>) {
    let Snapshot::Object(entries) = snapshot else {
        return push(
            out,
            path,
            format!("value {} is not assignable to type '{}'", snapshot, model.name()),
        );
    };
    for field in model.fields() {
        let field_path = format!("{}/{}", path, field.name);
        check(&field.ty, entries.get(&field.name), &field_path, out);
    }
}

/// Validate an already pre-processed model snapshot
pub(crate) fn model_violations(model: &Model, snapshot: &Snapshot) -> Vec<Violation> {
    let mut out = Vec::new();
    check_model(model, snapshot, "", &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::super::TypeNamespace;
    use serde_json::json;

    #[test]
    fn test_primitives() {
        let ns = TypeNamespace::new();
        assert!(ns.string().is_valid_snapshot(&json!("a")));
        assert!(!ns.string().is_valid_snapshot(&json!(1)));
        assert!(ns.identifier().is_valid_snapshot(&json!(1)));
        assert!(ns.identifier().is_valid_snapshot(&json!("b1")));
        assert!(!ns.identifier().is_valid_snapshot(&json!(true)));
    }

    #[test]
    fn test_optional_rejects_explicit_null() {
        let ns = TypeNamespace::new();
        let ty = ns.optional(ns.number(), json!(0));
        assert!(!ty.is_valid_snapshot(&json!(null)));
        let nullable = ns.optional(ns.maybe(ns.number()), json!(null));
        assert!(nullable.is_valid_snapshot(&json!(null)));
    }

    #[test]
    fn test_array_violation_paths() {
        let ns = TypeNamespace::new();
        let violations = ns.array(ns.number()).validate(&json!([1, "two", 3]));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "/1");
        assert!(violations[0].to_string().starts_with("at /1:"));
    }

    #[test]
    fn test_model_fields_required_unless_optional() {
        let ns = TypeNamespace::new();
        let ty = ns
            .model(
                "Pair",
                vec![
                    ("left", ns.string()),
                    ("right", ns.maybe(ns.string())),
                ],
            )
            .unwrap();
        assert!(ty.is_valid_snapshot(&json!({"left": "a"})));
        // unknown keys are ignored
        assert!(ty.is_valid_snapshot(&json!({"left": "a", "extra": 1})));
        let violations = ty.validate(&json!({"right": "b"}));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "/left");
    }

    #[test]
    fn test_map_keys_must_match_identifiers() {
        let ns = TypeNamespace::new();
        let item = ns
            .model("Tag", vec![("id", ns.identifier()), ("label", ns.string())])
            .unwrap();
        let map = ns.map(item);
        assert!(map.is_valid_snapshot(&json!({"t1": {"id": "t1", "label": "x"}})));
        let violations = map.validate(&json!({"t1": {"id": "t2", "label": "x"}}));
        assert_eq!(violations.len(), 1);
        assert!(violations[0].message.contains("does not match"));
    }
}
