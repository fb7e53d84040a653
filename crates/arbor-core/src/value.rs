//! Runtime values held in field slots and passed to views and mutations

use std::fmt;

use serde_json::Number;

use crate::errors::{ArborError, Result};
use crate::tree::NodeId;

/// Plain, serializable structural copy of a node
pub type Snapshot = serde_json::Value;

/// A value stored in a field slot, passed as an argument, or returned from a
/// view/mutation.
///
/// Children are never stored inline: a field holding a model, map or list
/// stores `Value::Node` with the child's handle. Reference fields store the
/// target's identifier and resolve it on read.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Node(NodeId),
    List(Vec<Value>),
    /// Opaque JSON payload (objects, snapshots handed to hooks)
    Json(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Value::Node(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// # Errors
    ///
    /// Returns `UnexpectedValue` if the value is not a number.
    pub fn try_number(&self) -> Result<f64> {
        self.as_number().ok_or_else(|| self.unexpected("number"))
    }

    /// # Errors
    ///
    /// Returns `UnexpectedValue` if the value is not a string.
    pub fn try_string(&self) -> Result<String> {
        self.as_str()
            .map(str::to_string)
            .ok_or_else(|| self.unexpected("string"))
    }

    /// # Errors
    ///
    /// Returns `UnexpectedValue` if the value is not a boolean.
    pub fn try_bool(&self) -> Result<bool> {
        self.as_bool().ok_or_else(|| self.unexpected("boolean"))
    }

    /// # Errors
    ///
    /// Returns `UnexpectedValue` if the value is not a node handle.
    pub fn try_node(&self) -> Result<NodeId> {
        self.as_node().ok_or_else(|| self.unexpected("node"))
    }

    /// Runtime tag of the value, used in type-violation messages
    pub fn type_tag(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Node(_) => "node",
            Value::List(_) => "array",
            Value::Json(serde_json::Value::Object(_)) => "object",
            Value::Json(_) => "json",
        }
    }

    /// Convert a snapshot fragment into a runtime value
    ///
    /// Arrays become `Value::List`; objects stay opaque as `Value::Json`.
    pub fn from_json(json: &Snapshot) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::List(items.iter().map(Value::from_json).collect())
            }
            other => Value::Json(other.clone()),
        }
    }

    /// Convert a node-free value into JSON
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedValue` if the value contains a node handle; nodes
    /// are snapshotted through the tree.
    pub fn to_json(&self) -> Result<Snapshot> {
        Ok(match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => serde_json::Value::Array(
                items.iter().map(Value::to_json).collect::<Result<Vec<_>>>()?,
            ),
            Value::Json(json) => json.clone(),
            Value::Node(_) => return Err(self.unexpected("plain value")),
        })
    }

    fn unexpected(&self, expected: &str) -> ArborError {
        ArborError::UnexpectedValue {
            expected: expected.to_string(),
            actual: self.type_tag().to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", number_to_json(*n)),
            Value::String(s) => f.write_str(s),
            Value::Node(id) => write!(f, "{}", id),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Json(json) => write!(f, "{}", json),
        }
    }
}

/// Whole numbers snapshot as integers so `3.0` and `3` compare equal as JSON.
pub(crate) fn number_to_json(n: f64) -> Snapshot {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        serde_json::Value::from(n as i64)
    } else {
        Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

/// Normalized text form of an identifier value (string or number)
pub(crate) fn identifier_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(number_to_json(*n).to_string()),
        _ => None,
    }
}

/// Same as [`identifier_key`], for snapshot fragments
pub(crate) fn json_identifier_key(json: &Snapshot) -> Option<String> {
    match json {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => n.as_f64().map(|f| number_to_json(f).to_string()),
        _ => None,
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<NodeId> for Value {
    fn from(id: NodeId) -> Self {
        Value::Node(id)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from_json(&json)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_whole_numbers_snapshot_as_integers() {
        assert_eq!(Value::Number(3.0).to_json().unwrap(), json!(3));
        assert_eq!(Value::Number(2.5).to_json().unwrap(), json!(2.5));
    }

    #[test]
    fn test_from_json_keeps_objects_opaque() {
        let v = Value::from_json(&json!({"a": 1}));
        assert_eq!(v.type_tag(), "object");
        assert_eq!(Value::from_json(&json!([1, "x"])).type_tag(), "array");
    }

    #[test]
    fn test_nodes_cannot_become_plain_json() {
        let err = Value::Node(NodeId::from_raw(4)).to_json().unwrap_err();
        assert!(matches!(err, ArborError::UnexpectedValue { .. }));
    }

    #[test]
    fn test_identifier_keys_normalize_numbers() {
        assert_eq!(identifier_key(&Value::Number(7.0)), Some("7".to_string()));
        assert_eq!(json_identifier_key(&json!(7)), Some("7".to_string()));
        assert_eq!(identifier_key(&Value::Bool(true)), None);
    }

    #[test]
    fn test_try_accessors_report_actual_tag() {
        let err = Value::from("x").try_number().unwrap_err();
        assert_eq!(
            err,
            ArborError::UnexpectedValue {
                expected: "number".to_string(),
                actual: "string".to_string()
            }
        );
    }
}
