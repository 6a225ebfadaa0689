use std::collections::HashMap;

use crate::db::ids::schema_vertex_id;
use crate::error::{GraphError, Result};
use crate::model::{Direction, TypeId};

/// Id of the synthetic type marking that a vertex exists. Every registered
/// vertex carries one entry under it, which is what global key scans filter
/// on.
pub const VERTEX_EXISTS_TYPE: TypeId = schema_vertex_id(1);
/// Id of the system property holding a schema vertex's name.
pub const SCHEMA_NAME_TYPE: TypeId = schema_vertex_id(2);
/// Composite index backing name-to-schema-vertex lookups.
pub const SCHEMA_NAME_INDEX: TypeId = schema_vertex_id(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Multiplicity {
    Many2One,
    One2Many,
    One2One,
    Simple,
    Multi,
}

impl Multiplicity {
    /// Whether at most one relation of this multiplicity may exist in the
    /// given direction.
    pub fn is_unique(self, dir: Direction) -> bool {
        match self {
            Multiplicity::Many2One => dir == Direction::Out,
            Multiplicity::One2Many => dir == Direction::In,
            Multiplicity::One2One => dir == Direction::Out || dir == Direction::In,
            Multiplicity::Simple | Multiplicity::Multi => false,
        }
    }

    pub fn from_cardinality(cardinality: Cardinality) -> Multiplicity {
        match cardinality {
            Cardinality::Single => Multiplicity::Many2One,
            Cardinality::Set | Cardinality::List => Multiplicity::Multi,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Single,
    Set,
    List,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyModifier {
    Default,
    Lock,
    Fork,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaStatus {
    Enabled,
    Installed,
    Disabled,
    Registered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    EdgeLabel,
    PropertyKey,
}

/// An alternate sort order of a relation type, mirrored on every write under
/// its own column prefix.
#[derive(Debug, Clone)]
pub struct RelationIndexView {
    pub id: TypeId,
    pub direction: Direction,
    pub status: SchemaStatus,
}

#[derive(Debug, Clone)]
pub struct RelationTypeDef {
    pub id: TypeId,
    pub name: String,
    pub kind: TypeKind,
    pub multiplicity: Multiplicity,
    pub cardinality: Cardinality,
    pub consistency: ConsistencyModifier,
    pub directionality: Direction,
    pub ttl_secs: Option<u32>,
    pub status: SchemaStatus,
    pub system_base: bool,
    pub index_views: Vec<RelationIndexView>,
}

impl RelationTypeDef {
    pub fn edge_label(id: TypeId, name: impl Into<String>, multiplicity: Multiplicity) -> Self {
        RelationTypeDef {
            id,
            name: name.into(),
            kind: TypeKind::EdgeLabel,
            multiplicity,
            cardinality: Cardinality::Single,
            consistency: ConsistencyModifier::Default,
            directionality: Direction::Both,
            ttl_secs: None,
            status: SchemaStatus::Enabled,
            system_base: false,
            index_views: Vec::new(),
        }
    }

    pub fn property_key(id: TypeId, name: impl Into<String>, cardinality: Cardinality) -> Self {
        RelationTypeDef {
            id,
            name: name.into(),
            kind: TypeKind::PropertyKey,
            multiplicity: Multiplicity::from_cardinality(cardinality),
            cardinality,
            consistency: ConsistencyModifier::Default,
            directionality: Direction::Out,
            ttl_secs: None,
            status: SchemaStatus::Enabled,
            system_base: false,
            index_views: Vec::new(),
        }
    }

    pub fn with_consistency(mut self, consistency: ConsistencyModifier) -> Self {
        self.consistency = consistency;
        self
    }

    pub fn with_ttl(mut self, ttl_secs: u32) -> Self {
        self.ttl_secs = Some(ttl_secs);
        self
    }

    pub fn with_index_view(mut self, view: RelationIndexView) -> Self {
        self.index_views.push(view);
        self
    }

    /// All write views of this type: the canonical base entry first, then
    /// every relation index.
    pub fn views(&self) -> impl Iterator<Item = RelationIndexView> + '_ {
        std::iter::once(RelationIndexView {
            id: self.id,
            direction: self.directionality,
            status: self.status,
        })
        .chain(self.index_views.iter().cloned())
    }

    pub fn positive_ttl(&self) -> Option<u32> {
        self.ttl_secs.filter(|ttl| *ttl > 0)
    }
}

#[derive(Debug, Clone)]
pub struct CompositeIndexDef {
    pub id: TypeId,
    pub name: String,
    pub status: SchemaStatus,
    pub consistency: ConsistencyModifier,
    pub cardinality: Cardinality,
    pub key_ids: Vec<TypeId>,
}

#[derive(Debug, Clone)]
pub struct MixedIndexDef {
    pub name: String,
    /// Name of the external search backend maintaining this index.
    pub backing_index: String,
    /// Document collection within the backend.
    pub store_name: String,
    /// Indexed keys and the document field each maps to.
    pub keys: Vec<(TypeId, String)>,
}

impl MixedIndexDef {
    pub fn field_for(&self, type_id: TypeId) -> Option<&str> {
        self.keys
            .iter()
            .find(|(id, _)| *id == type_id)
            .map(|(_, field)| field.as_str())
    }
}

/// In-memory catalog of relation types and index definitions. System types
/// are preloaded so the engine can classify schema mutations without a
/// store round-trip.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    types: HashMap<TypeId, RelationTypeDef>,
    names: HashMap<String, TypeId>,
    composite: Vec<CompositeIndexDef>,
    mixed: Vec<MixedIndexDef>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        let mut registry = SchemaRegistry::default();

        let mut vertex_exists =
            RelationTypeDef::property_key(VERTEX_EXISTS_TYPE, "~exists", Cardinality::Single);
        vertex_exists.system_base = true;
        registry.register_type(vertex_exists);

        let mut schema_name =
            RelationTypeDef::property_key(SCHEMA_NAME_TYPE, "~schemaname", Cardinality::Single)
                .with_consistency(ConsistencyModifier::Lock);
        schema_name.system_base = true;
        registry.register_type(schema_name);

        registry.register_composite_index(CompositeIndexDef {
            id: SCHEMA_NAME_INDEX,
            name: "~schemaname".into(),
            status: SchemaStatus::Enabled,
            consistency: ConsistencyModifier::Lock,
            cardinality: Cardinality::Single,
            key_ids: vec![SCHEMA_NAME_TYPE],
        });

        registry
    }

    pub fn register_type(&mut self, def: RelationTypeDef) {
        self.names.insert(def.name.clone(), def.id);
        self.types.insert(def.id, def);
    }

    pub fn register_composite_index(&mut self, def: CompositeIndexDef) {
        self.composite.push(def);
    }

    pub fn register_mixed_index(&mut self, def: MixedIndexDef) {
        self.mixed.push(def);
    }

    pub fn get(&self, id: TypeId) -> Result<&RelationTypeDef> {
        self.types
            .get(&id)
            .ok_or_else(|| GraphError::InvalidArgument(format!("unknown relation type: {id}")))
    }

    pub fn type_id_by_name(&self, name: &str) -> Option<TypeId> {
        self.names.get(name).copied()
    }

    pub fn composite_indexes(&self) -> &[CompositeIndexDef] {
        &self.composite
    }

    pub fn mixed_indexes(&self) -> &[MixedIndexDef] {
        &self.mixed
    }
}
