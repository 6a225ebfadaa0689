use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub type VertexId = u64;
pub type RelationId = u64;
pub type TypeId = u64;

pub const NULL_VERTEX_ID: VertexId = 0;
pub const NULL_RELATION_ID: RelationId = 0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl PropertyValue {
    pub fn partial_cmp_value(&self, other: &PropertyValue) -> Option<Ordering> {
        match (self, other) {
            (PropertyValue::Bool(a), PropertyValue::Bool(b)) => a.partial_cmp(b),
            (PropertyValue::Int(a), PropertyValue::Int(b)) => a.partial_cmp(b),
            (PropertyValue::Float(a), PropertyValue::Float(b)) => a.partial_cmp(b),
            (PropertyValue::String(a), PropertyValue::String(b)) => a.partial_cmp(b),
            (PropertyValue::Bytes(a), PropertyValue::Bytes(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// A relation is in exactly one state at any moment; commit only ever
/// processes `New` and `Removed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    New,
    Loaded,
    Modified,
    Removed,
}

impl Lifecycle {
    pub fn is_new(self) -> bool {
        self == Lifecycle::New
    }

    pub fn is_removed(self) -> bool {
        self == Lifecycle::Removed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Out,
    In,
    Both,
}

impl Direction {
    /// Position 0 of a relation is its outgoing endpoint, position 1 the
    /// incoming one.
    pub fn from_position(pos: usize) -> Direction {
        match pos {
            0 => Direction::Out,
            1 => Direction::In,
            other => panic!("relation position out of range: {other}"),
        }
    }

    pub fn covers(self, other: Direction) -> bool {
        self == Direction::Both || self == other
    }
}

/// Index into a transaction's vertex arena. Relations reference their
/// endpoints by slot so the arena owns every vertex exactly once.
pub type VertexSlot = usize;

#[derive(Debug, Clone)]
pub struct TxVertex {
    pub id: VertexId,
    pub label: Option<String>,
    pub lifecycle: Lifecycle,
    pub schema: bool,
}

impl TxVertex {
    pub fn is_new(&self) -> bool {
        self.lifecycle.is_new()
    }

    pub fn has_id(&self) -> bool {
        self.id != NULL_VERTEX_ID
    }
}

#[derive(Debug, Clone)]
pub enum RelationBody {
    Property {
        vertex: VertexSlot,
        value: PropertyValue,
    },
    Edge {
        out: VertexSlot,
        other: VertexSlot,
        payload: Option<PropertyValue>,
    },
}

#[derive(Debug, Clone)]
pub struct Relation {
    pub id: RelationId,
    pub type_id: TypeId,
    pub lifecycle: Lifecycle,
    pub body: RelationBody,
}

impl Relation {
    pub fn new_property(type_id: TypeId, vertex: VertexSlot, value: PropertyValue) -> Self {
        Relation {
            id: NULL_RELATION_ID,
            type_id,
            lifecycle: Lifecycle::New,
            body: RelationBody::Property { vertex, value },
        }
    }

    pub fn new_edge(
        type_id: TypeId,
        out: VertexSlot,
        other: VertexSlot,
        payload: Option<PropertyValue>,
    ) -> Self {
        Relation {
            id: NULL_RELATION_ID,
            type_id,
            lifecycle: Lifecycle::New,
            body: RelationBody::Edge {
                out,
                other,
                payload,
            },
        }
    }

    /// Number of vertex positions: 1 for a property, 2 for an edge.
    pub fn arity(&self) -> usize {
        match self.body {
            RelationBody::Property { .. } => 1,
            RelationBody::Edge { .. } => 2,
        }
    }

    pub fn vertex_slot(&self, pos: usize) -> VertexSlot {
        match (&self.body, pos) {
            (RelationBody::Property { vertex, .. }, 0) => *vertex,
            (RelationBody::Edge { out, .. }, 0) => *out,
            (RelationBody::Edge { other, .. }, 1) => *other,
            _ => panic!("relation position out of range: {pos}"),
        }
    }

    pub fn is_property(&self) -> bool {
        matches!(self.body, RelationBody::Property { .. })
    }

    pub fn is_edge(&self) -> bool {
        matches!(self.body, RelationBody::Edge { .. })
    }

    pub fn is_loop(&self) -> bool {
        match self.body {
            RelationBody::Edge { out, other, .. } => out == other,
            RelationBody::Property { .. } => false,
        }
    }

    pub fn property_value(&self) -> Option<&PropertyValue> {
        match &self.body {
            RelationBody::Property { value, .. } => Some(value),
            RelationBody::Edge { payload, .. } => payload.as_ref(),
        }
    }

    pub fn has_id(&self) -> bool {
        self.id != NULL_RELATION_ID
    }
}
