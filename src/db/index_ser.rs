use siphasher::sip::SipHasher13;
use std::collections::BTreeMap;
use std::hash::Hasher;

use crate::db::transaction::TxData;
use crate::error::Result;
use crate::model::{PropertyValue, Relation, TypeId, VertexSlot};
use crate::schema::{Cardinality, ConsistencyModifier, SchemaRegistry, SchemaStatus};
use crate::storage::ser;
use crate::storage::{Entry, MutationKind, StaticBuffer};

/// One derived secondary-index mutation. `ttl_secs` carries the owning
/// relation type's TTL; whether it lands on the entry is the commit
/// engine's call.
#[derive(Debug, Clone)]
pub struct IndexUpdate {
    pub kind: MutationKind,
    pub element_new: bool,
    pub element_removed: bool,
    pub is_schema: bool,
    pub ttl_secs: Option<u32>,
    pub target: IndexTarget,
}

#[derive(Debug, Clone)]
pub enum IndexTarget {
    Composite {
        index_id: TypeId,
        consistency: ConsistencyModifier,
        cardinality: Cardinality,
        key: StaticBuffer,
        entry: Entry,
    },
    Mixed {
        backing_index: String,
        store: String,
        doc_id: String,
        field: String,
        value: PropertyValue,
    },
}

impl IndexUpdate {
    pub fn is_composite(&self) -> bool {
        matches!(self.target, IndexTarget::Composite { .. })
    }

    pub fn is_addition(&self) -> bool {
        self.kind == MutationKind::Addition
    }

    pub fn is_deletion(&self) -> bool {
        self.kind == MutationKind::Deletion
    }
}

/// Deterministic bucket for a composite index key tuple.
fn index_key_hash(index_id: TypeId, tuple: &[u8]) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(0, 0);
    hasher.write(&index_id.to_be_bytes());
    hasher.write(tuple);
    hasher.finish()
}

/// Derives composite- and mixed-index updates from mutated relations.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexSerializer;

impl IndexSerializer {
    /// Updates derived directly from one relation: mixed indexes registered
    /// over an edge label index the edge's payload under the relation's own
    /// document.
    pub fn updates_for_relation(
        &self,
        schema: &SchemaRegistry,
        data: &TxData,
        relation: &Relation,
    ) -> Result<Vec<IndexUpdate>> {
        let mut updates = Vec::new();
        if !relation.is_edge() {
            return Ok(updates);
        }
        let Some(payload) = relation.property_value() else {
            return Ok(updates);
        };
        let rel_type = schema.get(relation.type_id)?;
        let vertex0 = data.vertex(relation.vertex_slot(0));
        for mixed in schema.mixed_indexes() {
            let Some(field) = mixed.field_for(relation.type_id) else {
                continue;
            };
            updates.push(IndexUpdate {
                kind: kind_of(relation),
                element_new: relation.lifecycle.is_new(),
                element_removed: relation.lifecycle.is_removed(),
                is_schema: rel_type.system_base && vertex0.schema,
                ttl_secs: rel_type.positive_ttl(),
                target: IndexTarget::Mixed {
                    backing_index: mixed.backing_index.clone(),
                    store: mixed.store_name.clone(),
                    doc_id: relation.id.to_string(),
                    field: field.to_string(),
                    value: payload.clone(),
                },
            });
        }
        Ok(updates)
    }

    /// Updates derived from a vertex and the property relations mutated on
    /// it within the transaction.
    pub fn updates_for_vertex(
        &self,
        schema: &SchemaRegistry,
        data: &TxData,
        vertex: VertexSlot,
        mutated: &[&Relation],
    ) -> Result<Vec<IndexUpdate>> {
        let owner = data.vertex(vertex);
        let mut updates = Vec::new();

        // Mixed indexes take one field mutation per property.
        for relation in mutated {
            debug_assert!(relation.is_property());
            let Some(value) = relation.property_value() else {
                continue;
            };
            let rel_type = schema.get(relation.type_id)?;
            for mixed in schema.mixed_indexes() {
                let Some(field) = mixed.field_for(relation.type_id) else {
                    continue;
                };
                updates.push(IndexUpdate {
                    kind: kind_of(relation),
                    element_new: owner.is_new(),
                    element_removed: owner.lifecycle.is_removed(),
                    is_schema: rel_type.system_base && owner.schema,
                    ttl_secs: rel_type.positive_ttl(),
                    target: IndexTarget::Mixed {
                        backing_index: mixed.backing_index.clone(),
                        store: mixed.store_name.clone(),
                        doc_id: owner.id.to_string(),
                        field: field.to_string(),
                        value: value.clone(),
                    },
                });
            }
        }

        // Composite indexes need the full key tuple of matching kind.
        for kind in [MutationKind::Deletion, MutationKind::Addition] {
            let mut by_key: BTreeMap<TypeId, Vec<&Relation>> = BTreeMap::new();
            for relation in mutated {
                if kind_of(relation) == kind {
                    by_key.entry(relation.type_id).or_default().push(relation);
                }
            }
            if by_key.is_empty() {
                continue;
            }
            for index in schema.composite_indexes() {
                if index.status == SchemaStatus::Disabled {
                    continue;
                }
                if !index.key_ids.iter().all(|key| by_key.contains_key(key)) {
                    continue;
                }
                // A multi-valued key (SET/LIST cardinality) yields one
                // update per mutated value, so removing a single LIST value
                // costs exactly one deletion.
                let per_value = if index.key_ids.len() == 1 {
                    by_key[&index.key_ids[0]].clone()
                } else {
                    vec![by_key[&index.key_ids[0]][0]]
                };
                for first in per_value {
                    let mut tuple = Vec::new();
                    let mut schema_update = owner.schema;
                    let mut ttls = Vec::new();
                    for key_id in &index.key_ids {
                        let relation = if *key_id == first.type_id {
                            first
                        } else {
                            by_key[key_id][0]
                        };
                        ser::write_varlong(&mut tuple, *key_id);
                        if let Some(value) = relation.property_value() {
                            ser::write_property_value(&mut tuple, value);
                        }
                        let rel_type = schema.get(*key_id)?;
                        schema_update &= rel_type.system_base;
                        ttls.push(rel_type.positive_ttl());
                    }
                    let ttl_secs = match ttls.as_slice() {
                        [] => None,
                        [first_ttl, rest @ ..] if rest.iter().all(|ttl| ttl == first_ttl) => {
                            *first_ttl
                        }
                        _ => None,
                    };

                    let mut key = Vec::with_capacity(16);
                    ser::write_u64(&mut key, index.id);
                    ser::write_u64(&mut key, index_key_hash(index.id, &tuple));

                    let mut column = tuple;
                    ser::write_varlong(&mut column, owner.id);

                    updates.push(IndexUpdate {
                        kind,
                        element_new: owner.is_new(),
                        element_removed: owner.lifecycle.is_removed(),
                        is_schema: schema_update,
                        ttl_secs,
                        target: IndexTarget::Composite {
                            index_id: index.id,
                            consistency: index.consistency,
                            cardinality: index.cardinality,
                            key,
                            entry: Entry::new(column, Vec::new()),
                        },
                    });
                }
            }
        }

        Ok(updates)
    }
}

fn kind_of(relation: &Relation) -> MutationKind {
    if relation.lifecycle.is_removed() {
        MutationKind::Deletion
    } else {
        MutationKind::Addition
    }
}
