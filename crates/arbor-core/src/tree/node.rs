use std::collections::BTreeMap;
use std::fmt;

use super::reactive::AtomId;
use crate::model::Model;
use crate::types::Type;
use crate::value::Value;

/// Opaque handle of a tree node
///
/// Handles are never reused, in any tree, so a stale handle reliably
/// reports `NodeDestroyed` and a handle from another tree reports
/// `NodeNotFound` instead of aliasing a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        NodeId(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Position of a child inside its parent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Field(String),
    Key(String),
    Item(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Field(name) | PathSegment::Key(name) => f.write_str(name),
            PathSegment::Item(index) => write!(f, "{}", index),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ParentLink {
    pub node: NodeId,
    pub segment: PathSegment,
}

/// One field value of a model node
pub(crate) struct Slot {
    pub name: String,
    pub ty: Type,
    pub atom: AtomId,
    pub value: Value,
}

pub(crate) enum NodeKind {
    Model {
        model: Model,
        fields: Vec<Slot>,
    },
    Map {
        item: Type,
        atom: AtomId,
        entries: BTreeMap<String, Value>,
    },
    List {
        item: Type,
        atom: AtomId,
        items: Vec<Value>,
    },
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Model { .. } => "model",
            NodeKind::Map { .. } => "map",
            NodeKind::List { .. } => "list",
        }
    }
}

pub(crate) struct NodeData {
    pub parent: Option<ParentLink>,
    pub kind: NodeKind,
}

impl NodeData {
    pub fn model(&self) -> Option<&Model> {
        match &self.kind {
            NodeKind::Model { model, .. } => Some(model),
            _ => None,
        }
    }

    /// Child handles in positional order
    pub fn children(&self) -> Vec<NodeId> {
        let values: Box<dyn Iterator<Item = &Value>> = match &self.kind {
            NodeKind::Model { fields, .. } => Box::new(fields.iter().map(|s| &s.value)),
            NodeKind::Map { entries, .. } => Box::new(entries.values()),
            NodeKind::List { items, .. } => Box::new(items.iter()),
        };
        values.filter_map(Value::as_node).collect()
    }

    /// Atoms a structural scan of this node depends on
    pub fn structural_atoms(&self) -> Vec<AtomId> {
        match &self.kind {
            NodeKind::Model { model, fields } => fields
                .iter()
                .enumerate()
                .filter(|(i, s)| Some(*i) == model.identifier_index() || s.value.as_node().is_some())
                .map(|(_, s)| s.atom)
                .collect(),
            NodeKind::Map { atom, .. } | NodeKind::List { atom, .. } => vec![*atom],
        }
    }

    pub fn slot(&self, name: &str) -> Option<&Slot> {
        match &self.kind {
            NodeKind::Model { fields, .. } => fields.iter().find(|s| s.name == name),
            _ => None,
        }
    }

    pub fn slot_mut(&mut self, name: &str) -> Option<&mut Slot> {
        match &mut self.kind {
            NodeKind::Model { fields, .. } => fields.iter_mut().find(|s| s.name == name),
            _ => None,
        }
    }

    /// Identifier value of a model node, if its model declares one
    pub fn identifier(&self) -> Option<&Value> {
        match &self.kind {
            NodeKind::Model { model, fields } => {
                model.identifier_index().and_then(|i| fields.get(i)).map(|s| &s.value)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_segment_display() {
        assert_eq!(PathSegment::Field("book".to_string()).to_string(), "book");
        assert_eq!(PathSegment::Item(3).to_string(), "3");
        assert_eq!(NodeId::from_raw(9).to_string(), "#9");
    }
}
