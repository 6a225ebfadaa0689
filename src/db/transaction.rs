use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::db::config::TransactionConfig;
use crate::db::core::GraphDB;
use crate::error::{GraphError, Result};
use crate::model::{
    Lifecycle, PropertyValue, Relation, RelationId, TxVertex, TypeId, VertexId, VertexSlot,
};
use crate::schema::{SCHEMA_NAME_TYPE, TypeKind, VERTEX_EXISTS_TYPE};
use crate::storage::tx::BackendTransaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    RolledBack,
}

/// The transaction's mutation set: a vertex arena addressed by slot, plus
/// the added and removed relations referencing it. Owning every vertex in
/// one place keeps relation back-references as plain indices and makes
/// rollback a bulk drop.
pub struct TxData {
    pub(crate) session_id: u64,
    pub(crate) config: TransactionConfig,
    pub(crate) vertices: Vec<TxVertex>,
    pub(crate) added: Vec<Relation>,
    pub(crate) removed: Vec<Relation>,
}

impl TxData {
    pub(crate) fn new(session_id: u64, config: TransactionConfig) -> Self {
        TxData {
            session_id,
            config,
            vertices: Vec::new(),
            added: Vec::new(),
            removed: Vec::new(),
        }
    }

    pub(crate) fn vertex(&self, slot: VertexSlot) -> &TxVertex {
        &self.vertices[slot]
    }

    #[cfg(test)]
    pub(crate) fn new_for_tests() -> Self {
        TxData::new(0, TransactionConfig::default())
    }

    #[cfg(test)]
    pub(crate) fn push_vertex(&mut self, vertex: TxVertex) -> VertexSlot {
        self.vertices.push(vertex);
        self.vertices.len() - 1
    }
}

/// A user transaction against one [`GraphDB`]. Mutations accumulate in
/// memory; [`commit`](Self::commit) is the terminal write.
pub struct GraphTransaction<'db> {
    db: &'db GraphDB,
    state: TxState,
    mutator: Option<BackendTransaction>,
    data: TxData,
    start_time: Instant,
}

impl<'db> GraphTransaction<'db> {
    pub(crate) fn new(
        db: &'db GraphDB,
        session_id: u64,
        config: TransactionConfig,
        mutator: BackendTransaction,
    ) -> Self {
        debug!(tx_id = session_id, "transaction started");
        GraphTransaction {
            db,
            state: TxState::Active,
            mutator: Some(mutator),
            data: TxData::new(session_id, config),
            start_time: Instant::now(),
        }
    }

    pub fn id(&self) -> u64 {
        self.data.session_id
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.data.config
    }

    // ---- vertices --------------------------------------------------------

    /// Adds a bare vertex to the arena without an existence marker; it will
    /// not show up in global scans until one is written.
    pub fn new_vertex(&mut self) -> VertexSlot {
        self.push_vertex(None, false)
    }

    /// Adds a vertex together with its existence entry, the form global key
    /// scans enumerate.
    pub fn create_vertex(&mut self) -> VertexSlot {
        let slot = self.push_vertex(None, false);
        let mut existence = Relation::new_property(VERTEX_EXISTS_TYPE, slot, PropertyValue::Bool(true));
        self.assign_relation_id_eagerly(&mut existence);
        self.data.added.push(existence);
        slot
    }

    /// Adds a schema vertex carrying its name as a system property. The
    /// resulting relations are schema mutations and commit through the
    /// schema path.
    pub fn new_schema_vertex(&mut self, name: impl Into<String>) -> VertexSlot {
        let name = name.into();
        let slot = self.push_vertex(Some(name.clone()), true);
        let mut naming =
            Relation::new_property(SCHEMA_NAME_TYPE, slot, PropertyValue::String(name));
        self.assign_relation_id_eagerly(&mut naming);
        self.data.added.push(naming);
        slot
    }

    /// References a vertex that already exists in storage.
    pub fn load_vertex(&mut self, id: VertexId) -> Result<VertexSlot> {
        if id == 0 {
            return Err(GraphError::InvalidArgument(
                "vertex id must be positive".into(),
            ));
        }
        let schema = self.db.id_manager().inspector().is_schema_vertex_id(id);
        self.data.vertices.push(TxVertex {
            id,
            label: None,
            lifecycle: Lifecycle::Loaded,
            schema,
        });
        Ok(self.data.vertices.len() - 1)
    }

    /// Sets an explicit id on a NEW vertex. Only permitted when the graph
    /// was opened with vertex-id setting enabled.
    pub fn set_vertex_id(&mut self, slot: VertexSlot, id: VertexId) -> Result<()> {
        if !self.db.config().allow_setting_vertex_id {
            return Err(GraphError::IllegalState(
                "setting vertex ids is disabled for this graph".into(),
            ));
        }
        if id == 0 {
            return Err(GraphError::InvalidArgument(
                "vertex id must be positive".into(),
            ));
        }
        let vertex = self
            .data
            .vertices
            .get_mut(slot)
            .ok_or_else(|| GraphError::InvalidArgument(format!("unknown vertex slot: {slot}")))?;
        if !vertex.is_new() {
            return Err(GraphError::IllegalState(
                "only NEW vertices may receive an explicit id".into(),
            ));
        }
        vertex.id = id;
        self.db.id_assigner().claim_vertex_id(id);
        Ok(())
    }

    fn push_vertex(&mut self, label: Option<String>, schema: bool) -> VertexSlot {
        let id = if self.data.config.assign_ids_immediately {
            self.db.id_assigner().next_vertex_id(schema)
        } else {
            0
        };
        self.data.vertices.push(TxVertex {
            id,
            label,
            lifecycle: Lifecycle::New,
            schema,
        });
        self.data.vertices.len() - 1
    }

    // ---- relations -------------------------------------------------------

    pub fn add_property(
        &mut self,
        vertex: VertexSlot,
        type_id: TypeId,
        value: PropertyValue,
    ) -> Result<()> {
        self.check_slot(vertex)?;
        self.check_type(type_id, TypeKind::PropertyKey)?;
        let mut relation = Relation::new_property(type_id, vertex, value);
        self.assign_relation_id_eagerly(&mut relation);
        self.data.added.push(relation);
        Ok(())
    }

    pub fn add_edge(
        &mut self,
        out: VertexSlot,
        other: VertexSlot,
        type_id: TypeId,
        payload: Option<PropertyValue>,
    ) -> Result<()> {
        self.check_slot(out)?;
        self.check_slot(other)?;
        self.check_type(type_id, TypeKind::EdgeLabel)?;
        let mut relation = Relation::new_edge(type_id, out, other, payload);
        self.assign_relation_id_eagerly(&mut relation);
        self.data.added.push(relation);
        Ok(())
    }

    /// Records the removal of a property loaded from storage. The caller
    /// supplies the permanent relation id and the stored value.
    pub fn remove_property(
        &mut self,
        vertex: VertexSlot,
        type_id: TypeId,
        value: PropertyValue,
        relation_id: RelationId,
    ) -> Result<()> {
        self.check_slot(vertex)?;
        self.check_type(type_id, TypeKind::PropertyKey)?;
        self.check_relation_id(relation_id)?;
        let mut relation = Relation::new_property(type_id, vertex, value);
        relation.id = relation_id;
        relation.lifecycle = Lifecycle::Removed;
        self.data.removed.push(relation);
        Ok(())
    }

    pub fn remove_edge(
        &mut self,
        out: VertexSlot,
        other: VertexSlot,
        type_id: TypeId,
        payload: Option<PropertyValue>,
        relation_id: RelationId,
    ) -> Result<()> {
        self.check_slot(out)?;
        self.check_slot(other)?;
        self.check_type(type_id, TypeKind::EdgeLabel)?;
        self.check_relation_id(relation_id)?;
        let mut relation = Relation::new_edge(type_id, out, other, payload);
        relation.id = relation_id;
        relation.lifecycle = Lifecycle::Removed;
        self.data.removed.push(relation);
        Ok(())
    }

    /// Resolves a relation type by name through the shared schema cache.
    pub fn type_id(&self, name: &str) -> Result<TypeId> {
        self.db
            .schema_cache()
            .schema_by_name(name)?
            .ok_or_else(|| GraphError::InvalidArgument(format!("unknown relation type: {name}")))
    }

    pub fn added_count(&self) -> usize {
        self.data.added.len()
    }

    pub fn removed_count(&self) -> usize {
        self.data.removed.len()
    }

    pub fn vertex_id(&self, slot: VertexSlot) -> Option<VertexId> {
        self.data
            .vertices
            .get(slot)
            .filter(|vertex| vertex.has_id())
            .map(|vertex| vertex.id)
    }

    // ---- terminal operations --------------------------------------------

    pub fn commit(mut self) -> Result<()> {
        self.ensure_active()?;
        let mut mutator = self
            .mutator
            .take()
            .expect("active transaction holds its mutator");
        let added = self.data.added.len();
        let removed = self.data.removed.len();

        let result = self.db.commit_relations(&mut self.data, &mut mutator);
        self.db.close_transaction(self.data.session_id);
        match result {
            Ok(()) => {
                self.state = TxState::Committed;
                info!(
                    tx_id = self.data.session_id,
                    added,
                    removed,
                    duration_ms = self.start_time.elapsed().as_millis() as u64,
                    "transaction committed"
                );
                Ok(())
            }
            Err(err) => {
                // Index-only failures leave primary storage durable; the
                // transaction still surfaces the error.
                self.state = if err.requires_rollback() {
                    TxState::RolledBack
                } else {
                    TxState::Committed
                };
                error!(tx_id = self.data.session_id, error = %err, "transaction commit failed");
                Err(err)
            }
        }
    }

    pub fn rollback(mut self) -> Result<()> {
        self.ensure_active()?;
        let mut mutator = self
            .mutator
            .take()
            .expect("active transaction holds its mutator");
        let result = mutator.rollback();
        self.db.close_transaction(self.data.session_id);
        self.db.record_rollback();
        self.state = TxState::RolledBack;
        warn!(tx_id = self.data.session_id, "transaction rolled back");
        result
    }

    // ---- helpers ---------------------------------------------------------

    fn assign_relation_id_eagerly(&self, relation: &mut Relation) {
        if self.data.config.assign_ids_immediately {
            self.db.id_assigner().assign_relation(relation);
        }
    }

    fn check_slot(&self, slot: VertexSlot) -> Result<()> {
        if slot >= self.data.vertices.len() {
            return Err(GraphError::InvalidArgument(format!(
                "unknown vertex slot: {slot}"
            )));
        }
        Ok(())
    }

    fn check_type(&self, type_id: TypeId, expected: TypeKind) -> Result<()> {
        let def = self.db.schema().get(type_id)?;
        if def.kind != expected {
            return Err(GraphError::InvalidArgument(format!(
                "relation type {} is not a {:?}",
                def.name, expected
            )));
        }
        Ok(())
    }

    fn check_relation_id(&self, relation_id: RelationId) -> Result<()> {
        if relation_id == 0 {
            return Err(GraphError::InvalidArgument(
                "removed relations must carry their permanent id".into(),
            ));
        }
        Ok(())
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state != TxState::Active {
            return Err(GraphError::IllegalState(
                "transaction is no longer active".into(),
            ));
        }
        Ok(())
    }
}

impl<'db> Drop for GraphTransaction<'db> {
    fn drop(&mut self) {
        if self.state == TxState::Active {
            if let Some(mut mutator) = self.mutator.take() {
                let _ = mutator.rollback();
            }
            self.db.close_transaction(self.data.session_id);
            if !std::thread::panicking() {
                panic!(
                    "transaction {} dropped without commit or rollback",
                    self.data.session_id
                );
            }
        }
    }
}
