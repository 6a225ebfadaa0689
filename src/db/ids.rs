use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::error::{GraphError, Result};
use crate::model::{Relation, RelationId, TxVertex, TypeId, VertexId};
use crate::storage::StaticBuffer;

// The 64-bit id space is split by its two top bits: user vertices sit in the
// low range so callers may bring their own small ids, schema vertices and
// relations each get a dedicated high range.
pub const SCHEMA_ID_BASE: u64 = 1 << 61;
pub const RELATION_ID_BASE: u64 = 1 << 62;

/// Schema ids below this payload are reserved for system types.
pub const SYSTEM_TYPE_MAX: u64 = 4096;

pub const VERTEX_KEY_LEN: usize = 8;
pub const MIN_VERTEX_KEY: [u8; VERTEX_KEY_LEN] = [0x00; VERTEX_KEY_LEN];
pub const MAX_VERTEX_KEY: [u8; VERTEX_KEY_LEN] = [0xff; VERTEX_KEY_LEN];

/// Builds the id of a schema vertex from its payload.
pub const fn schema_vertex_id(payload: u64) -> TypeId {
    SCHEMA_ID_BASE | payload
}

fn relation_id(payload: u64) -> RelationId {
    RELATION_ID_BASE | payload
}

/// Classification queries over assigned ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdInspector;

impl IdInspector {
    pub fn is_user_vertex_id(&self, id: u64) -> bool {
        id > 0 && id < SCHEMA_ID_BASE
    }

    pub fn is_schema_vertex_id(&self, id: u64) -> bool {
        id >= SCHEMA_ID_BASE && id < RELATION_ID_BASE
    }

    pub fn is_vertex_id(&self, id: u64) -> bool {
        self.is_user_vertex_id(id) || self.is_schema_vertex_id(id)
    }

    pub fn is_relation_id(&self, id: u64) -> bool {
        id >= RELATION_ID_BASE
    }

    pub fn is_system_type_id(&self, id: u64) -> bool {
        self.is_schema_vertex_id(id) && (id - SCHEMA_ID_BASE) < SYSTEM_TYPE_MAX
    }
}

/// Maps vertex ids to storage keys and back. The transformation is
/// byte-reversible: `key_vertex(vertex_key(v)) == v` for every positive v,
/// and big-endian order keeps the key space sorted by id.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdManager;

impl IdManager {
    pub fn inspector(&self) -> IdInspector {
        IdInspector
    }

    pub fn vertex_key(&self, id: VertexId) -> StaticBuffer {
        id.to_be_bytes().to_vec()
    }

    pub fn key_vertex(&self, key: &[u8]) -> Result<VertexId> {
        let bytes: [u8; VERTEX_KEY_LEN] = key
            .try_into()
            .map_err(|_| GraphError::Corruption(format!("vertex key has {} bytes", key.len())))?;
        Ok(u64::from_be_bytes(bytes))
    }
}

/// Hands out permanent ids. Vertex and relation counters are independent;
/// schema ids start above the reserved system-type payloads.
#[derive(Debug)]
pub struct IdAssigner {
    manager: IdManager,
    next_vertex: AtomicU64,
    next_schema: AtomicU64,
    next_relation: AtomicU64,
}

impl IdAssigner {
    pub fn new() -> Self {
        IdAssigner {
            manager: IdManager,
            next_vertex: AtomicU64::new(1),
            next_schema: AtomicU64::new(SYSTEM_TYPE_MAX),
            next_relation: AtomicU64::new(1),
        }
    }

    pub fn manager(&self) -> IdManager {
        self.manager
    }

    pub fn next_vertex_id(&self, schema: bool) -> VertexId {
        if schema {
            schema_vertex_id(self.next_schema.fetch_add(1, Ordering::Relaxed))
        } else {
            self.next_vertex.fetch_add(1, Ordering::Relaxed)
        }
    }

    pub fn next_relation_id(&self) -> RelationId {
        relation_id(self.next_relation.fetch_add(1, Ordering::Relaxed))
    }

    pub fn assign_relation(&self, relation: &mut Relation) {
        if !relation.has_id() {
            relation.id = self.next_relation_id();
        }
    }

    pub fn assign_vertex(&self, vertex: &mut TxVertex) {
        if !vertex.has_id() {
            vertex.id = self.next_vertex_id(vertex.schema);
        }
    }

    /// Batched assignment over a transaction's NEW relations and the
    /// vertices they touch.
    pub fn assign_relations<'a>(
        &self,
        vertices: &mut [TxVertex],
        relations: impl Iterator<Item = &'a mut Relation>,
    ) {
        for vertex in vertices.iter_mut() {
            if vertex.lifecycle.is_new() {
                self.assign_vertex(vertex);
            }
        }
        for relation in relations {
            self.assign_relation(relation);
        }
    }

    /// Reserves the id space at or above `id` so externally supplied vertex
    /// ids never collide with later assignments.
    pub fn claim_vertex_id(&self, id: VertexId) {
        self.next_vertex.fetch_max(id + 1, Ordering::Relaxed);
    }

    pub fn close(&self) {
        debug!(
            vertices = self.next_vertex.load(Ordering::Relaxed) - 1,
            relations = self.next_relation.load(Ordering::Relaxed) - 1,
            "id assigner closed"
        );
    }
}

impl Default for IdAssigner {
    fn default() -> Self {
        Self::new()
    }
}
