use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error};

use crate::db::core::GraphDB;
use crate::db::index_ser::{IndexTarget, IndexUpdate};
use crate::db::transaction::TxData;
use crate::db::txlog::{LogTxStatus, TransactionLogHeader, TriggerLogWriter};
use crate::error::{GraphError, Result};
use crate::model::{Direction, Relation, VertexId, VertexSlot};
use crate::schema::{Cardinality, ConsistencyModifier, Multiplicity, RelationTypeDef, SchemaStatus};
use crate::storage::tx::BackendTransaction;
use crate::storage::LockClaim;

/// Whether writing `relation` at position `pos` must claim an edge lock:
/// only LOCK-consistency types, and only where the multiplicity makes the
/// written cell unique in that direction (SIMPLE locks the out-position to
/// forbid duplicate edges).
pub fn acquire_relation_lock(ty: &RelationTypeDef, pos: usize, acquire_locks: bool) -> bool {
    acquire_locks
        && ty.consistency == ConsistencyModifier::Lock
        && (ty.multiplicity.is_unique(Direction::from_position(pos))
            || (pos == 0 && ty.multiplicity == Multiplicity::Simple))
}

/// Composite-index lock predicate. LIST cardinality never locks: each value
/// owns a distinct cell, so writers cannot conflict.
pub fn acquire_index_lock(
    consistency: ConsistencyModifier,
    cardinality: Cardinality,
    acquire_locks: bool,
) -> bool {
    acquire_locks && consistency == ConsistencyModifier::Lock && cardinality != Cardinality::List
}

/// Relation subset a prepare pass operates on. Schema mutations are those
/// whose type is a system base type attached to a schema vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommitFilter {
    All,
    SchemaOnly,
    NoSchema,
}

impl CommitFilter {
    fn matches(self, db: &GraphDB, data: &TxData, relation: &Relation) -> bool {
        match self {
            CommitFilter::All => true,
            CommitFilter::SchemaOnly => is_schema_relation(db, data, relation),
            CommitFilter::NoSchema => !is_schema_relation(db, data, relation),
        }
    }
}

fn is_schema_relation(db: &GraphDB, data: &TxData, relation: &Relation) -> bool {
    let system_base = db
        .schema()
        .get(relation.type_id)
        .map(|def| def.system_base)
        .unwrap_or(false);
    system_base && data.vertex(relation.vertex_slot(0)).schema
}

/// Loop check against resolved vertex ids: two slots loaded with the same
/// stored vertex still form a loop.
fn is_loop(data: &TxData, relation: &Relation) -> bool {
    relation.arity() == 2
        && data.vertex(relation.vertex_slot(0)).id == data.vertex(relation.vertex_slot(1)).id
}

impl GraphDB {
    /// Pure preparation pass: collects per-vertex mutations and index
    /// updates for every relation passing `filter`, claims the locks the
    /// consistency model demands, and queues everything on `mutator`.
    /// Nothing is flushed. Returns whether any primary mutation was queued.
    pub(crate) fn prepare_commit(
        &self,
        data: &TxData,
        mutator: &mut BackendTransaction,
        filter: CommitFilter,
        acquire_locks: bool,
    ) -> Result<bool> {
        let schema = self.schema();
        let edge_ser = self.edge_serializer();
        let mut mutations: BTreeMap<VertexId, Vec<&Relation>> = BTreeMap::new();
        let mut mutated_properties: BTreeMap<VertexSlot, Vec<&Relation>> = BTreeMap::new();
        let mut index_updates: Vec<IndexUpdate> = Vec::new();

        // 1) Deleted relations: record mutations, claim edge locks on the
        // full entry so the held value is revalidated at commit.
        for del in data
            .removed
            .iter()
            .filter(|relation| filter.matches(self, data, relation))
        {
            if !del.lifecycle.is_removed() {
                return Err(GraphError::IllegalState(
                    "deleted relation is not in REMOVED state".into(),
                ));
            }
            let ty = schema.get(del.type_id)?;
            for pos in 0..del.arity() {
                let vertex = data.vertex(del.vertex_slot(pos));
                if pos == 0 || !is_loop(data, del) {
                    if del.is_property() {
                        mutated_properties
                            .entry(del.vertex_slot(pos))
                            .or_default()
                            .push(del);
                    }
                    ensure_vertex_id(vertex.id)?;
                    mutations.entry(vertex.id).or_default().push(del);
                }
                if acquire_relation_lock(ty, pos, acquire_locks) {
                    let entry = edge_ser.write_relation(del, pos, data)?;
                    mutator.acquire_edge_lock(
                        &self.id_manager().vertex_key(vertex.id),
                        &LockClaim::Entry(entry),
                    )?;
                }
            }
            index_updates.extend(self.index_serializer().updates_for_relation(schema, data, del)?);
        }

        // 2) Added relations: same walk; locks are claimed on the column
        // alone, and only when the owning vertex pre-exists, so concurrent
        // appends of distinct columns stay possible.
        for add in data
            .added
            .iter()
            .filter(|relation| filter.matches(self, data, relation))
        {
            if !add.lifecycle.is_new() {
                return Err(GraphError::IllegalState(
                    "added relation is not in NEW state".into(),
                ));
            }
            let ty = schema.get(add.type_id)?;
            for pos in 0..add.arity() {
                let vertex = data.vertex(add.vertex_slot(pos));
                if pos == 0 || !is_loop(data, add) {
                    if add.is_property() {
                        mutated_properties
                            .entry(add.vertex_slot(pos))
                            .or_default()
                            .push(add);
                    }
                    ensure_vertex_id(vertex.id)?;
                    mutations.entry(vertex.id).or_default().push(add);
                }
                if !vertex.is_new() && acquire_relation_lock(ty, pos, acquire_locks) {
                    let entry = edge_ser.write_relation(add, pos, data)?;
                    mutator.acquire_edge_lock(
                        &self.id_manager().vertex_key(vertex.id),
                        &LockClaim::Column(entry.column),
                    )?;
                }
            }
            index_updates.extend(self.index_serializer().updates_for_relation(schema, data, add)?);
        }

        // 3) Per-vertex index updates derived from the mutated properties.
        for (slot, properties) in &mutated_properties {
            index_updates.extend(self.index_serializer().updates_for_vertex(
                schema,
                data,
                *slot,
                properties,
            )?);
        }

        // TTL is entry metadata on composite additions only; deletions
        // never carry it.
        for update in index_updates.iter_mut() {
            if !update.is_addition() {
                continue;
            }
            if let (Some(ttl), IndexTarget::Composite { entry, .. }) =
                (update.ttl_secs, &mut update.target)
            {
                entry.ttl_secs = Some(ttl);
            }
        }

        // 4) Composite-index locks: all deletions before all additions.
        for update in &index_updates {
            if !update.is_deletion() {
                continue;
            }
            if let IndexTarget::Composite {
                consistency,
                cardinality,
                key,
                entry,
                ..
            } = &update.target
            {
                if acquire_index_lock(*consistency, *cardinality, acquire_locks) {
                    mutator.acquire_index_lock(key, &LockClaim::Entry(entry.clone()))?;
                }
            }
        }
        for update in &index_updates {
            if !update.is_addition() {
                continue;
            }
            if let IndexTarget::Composite {
                consistency,
                cardinality,
                key,
                entry,
                ..
            } = &update.target
            {
                if acquire_index_lock(*consistency, *cardinality, acquire_locks) {
                    mutator.acquire_index_lock(key, &LockClaim::Column(entry.column.clone()))?;
                }
            }
        }

        // 5) Primary mutations, grouped per vertex, one entry per enabled
        // relation-index view whose directionality covers the position.
        // Loops emit exactly once, at position 0.
        for (vertex_id, relations) in &mutations {
            ensure_vertex_id(*vertex_id)?;
            let mut additions = Vec::with_capacity(relations.len());
            let mut deletions = Vec::with_capacity(relations.len().max(10) / 10);
            for relation in relations {
                let base = schema.get(relation.type_id)?;
                for view in base.views() {
                    if view.status == SchemaStatus::Disabled {
                        continue;
                    }
                    for pos in 0..relation.arity() {
                        if pos == 1 && is_loop(data, relation) {
                            continue;
                        }
                        if !view.direction.covers(Direction::from_position(pos)) {
                            continue;
                        }
                        if data.vertex(relation.vertex_slot(pos)).id != *vertex_id {
                            continue;
                        }
                        let entry = edge_ser.write_relation_as(relation, view.id, pos, data)?;
                        if relation.lifecycle.is_removed() {
                            deletions.push(entry);
                        } else {
                            additions.push(entry);
                        }
                    }
                }
            }
            mutator.mutate_edges(self.id_manager().vertex_key(*vertex_id), additions, deletions);
        }

        // 6) Index mutations: composite entries to the index store, mixed
        // entries to their backing sub-transaction with lifecycle hints.
        for update in &index_updates {
            match &update.target {
                IndexTarget::Composite { key, entry, .. } => {
                    if update.is_addition() {
                        mutator.mutate_index(key.clone(), vec![entry.clone()], Vec::new());
                    } else {
                        mutator.mutate_index(key.clone(), Vec::new(), vec![entry.clone()]);
                    }
                }
                IndexTarget::Mixed {
                    backing_index,
                    store,
                    doc_id,
                    field,
                    value,
                } => {
                    let itx = mutator.index_transaction(backing_index)?;
                    if update.is_addition() {
                        itx.add(store, doc_id, field, value.clone(), update.element_new);
                    } else {
                        itx.delete(store, doc_id, field, value.clone(), update.element_removed);
                    }
                }
            }
        }

        Ok(!mutations.is_empty())
    }

    /// Commits the transaction's mutation set: stamps the commit time,
    /// assigns permanent ids, splits schema from data where the backend
    /// lacks transactional isolation, and flushes with the contractual
    /// ordering (storage before indexes, trailer always written).
    pub(crate) fn commit_relations(
        &self,
        data: &mut TxData,
        mutator: &mut BackendTransaction,
    ) -> Result<()> {
        debug!(
            added = data.added.len(),
            removed = data.removed.len(),
            "saving transaction"
        );

        // 1. Finalize timestamp and log id.
        if !data.config.has_commit_time() {
            data.config.commit_time = Some(self.config().timestamps.now_micros());
        }
        let commit_time = data.config.commit_time.expect("commit time stamped");
        let commit_id = self.next_commit_id();

        // 2. Assign permanent ids.
        if !data.config.assign_ids_immediately {
            self.assign_ids(data);
        }
        self.verify_ids(data)?;

        let result = self.flush(data, mutator, commit_id, commit_time);
        match result {
            Ok(()) => {
                let (edge_locks, index_locks) = mutator.lock_counts();
                self.with_metrics(|metrics| metrics.record_commit(edge_locks, index_locks));
                Ok(())
            }
            Err(err) if err.requires_rollback() => {
                error!(tx_id = commit_id, error = %err, "commit failed, rolling back");
                self.with_metrics(|metrics| {
                    metrics.record_commit_failure();
                    metrics.record_rollback();
                });
                if let Err(rollback_err) = mutator.rollback() {
                    error!(tx_id = commit_id, error = %rollback_err, "rollback after failed commit also failed");
                }
                Err(err)
            }
            Err(err) => {
                // Index failures: primary storage is durable, nothing to
                // roll back.
                self.with_metrics(|metrics| metrics.record_commit_failure());
                Err(err)
            }
        }
    }

    fn assign_ids(&self, data: &mut TxData) {
        self.id_assigner()
            .assign_relations(&mut data.vertices, data.added.iter_mut());
    }

    fn verify_ids(&self, data: &TxData) -> Result<()> {
        for relation in data.added.iter().chain(data.removed.iter()) {
            if !relation.has_id() {
                return Err(GraphError::IllegalState(
                    "relation reached commit without a permanent id".into(),
                ));
            }
            for pos in 0..relation.arity() {
                ensure_vertex_id(data.vertex(relation.vertex_slot(pos)).id)?;
            }
        }
        Ok(())
    }

    fn flush(
        &self,
        data: &TxData,
        mutator: &mut BackendTransaction,
        commit_id: u64,
        commit_time: i64,
    ) -> Result<()> {
        let acquire_locks = data.config.acquire_locks;
        let has_tx_isolation = self.backend().features().has_tx_isolation;
        let log_transactions = self.config().log_transactions && !data.config.batch_loading;
        let tx_log = log_transactions.then(|| Arc::clone(self.backend().tx_log()));
        let header = TransactionLogHeader::new(commit_id, commit_time);

        let has_schema = data
            .removed
            .iter()
            .chain(data.added.iter())
            .any(|relation| is_schema_relation(self, data, relation));
        if has_schema && (data.config.batch_loading || !acquire_locks) {
            return Err(GraphError::IllegalState(
                "schema mutations require acquired locks and no batch loading".into(),
            ));
        }

        // 3.1 On storage without transactional isolation, schema mutations
        // flush through their own backend transaction so they are durable
        // before and independently of the data mutations.
        if has_schema && !has_tx_isolation {
            let mut schema_mutator = self.backend().begin_transaction();
            let prepared: Result<()> = (|| {
                self.prepare_commit(data, &mut schema_mutator, CommitFilter::SchemaOnly, acquire_locks)?;
                if let Some(log) = &tx_log {
                    let mut payload =
                        header.serialize_header(LogTxStatus::PreflushSystem, Some(&data.config));
                    schema_mutator.log_mutations(&mut payload);
                    log.append(Some(&header.log_key()), &payload)?;
                }
                Ok(())
            })();
            if let Err(err) = prepared {
                let _ = schema_mutator.rollback();
                return Err(err);
            }

            let mut status = LogTxStatus::SuccessSystem;
            let commit_result = schema_mutator.commit();
            if commit_result.is_err() {
                status = LogTxStatus::FailureSystem;
                error!(tx_id = commit_id, "schema commit failed");
            }
            let trailer_result = match &tx_log {
                Some(log) => log.append(
                    Some(&header.log_key()),
                    &header.serialize_header(status, None),
                ),
                None => Ok(()),
            };
            match (commit_result, trailer_result) {
                (Err(primary), Err(trailer)) => {
                    return Err(GraphError::TrailerShadow {
                        primary: Box::new(primary),
                        trailer: Box::new(trailer),
                    })
                }
                (Err(primary), Ok(())) => return Err(primary),
                (Ok(()), Err(trailer)) => return Err(trailer),
                (Ok(()), Ok(())) => {}
            }
            self.with_metrics(|metrics| metrics.record_schema_flush());
        }

        // Main flush. With transactional isolation the schema mutations
        // ride along; otherwise they were persisted above.
        let filter = if has_tx_isolation {
            CommitFilter::All
        } else {
            CommitFilter::NoSchema
        };
        let has_mutations = self.prepare_commit(data, mutator, filter, acquire_locks)?;
        if !has_mutations {
            return mutator.commit();
        }

        if let Some(log) = &tx_log {
            let mut payload = header.serialize_header(LogTxStatus::Precommit, Some(&data.config));
            mutator.log_mutations(&mut payload);
            log.append(Some(&header.log_key()), &payload)?;
        }

        let mut status = LogTxStatus::Success;
        let mut storage_success = false;
        let mut trigger_success = false;
        let mut index_failures: BTreeMap<String, GraphError> = BTreeMap::new();

        let primary: Result<()> = (|| {
            // Storage first; a failure aborts immediately (partial
            // persistence is possible and recorded in the trailer).
            if let Err(err) = mutator.commit_storage() {
                status = LogTxStatus::Failure;
                error!(tx_id = commit_id, error = %err, "storage commit failed");
                return Err(err);
            }
            storage_success = true;

            // Indexes second; failures are collected, never aborted on.
            index_failures = mutator.commit_indexes();
            if !index_failures.is_empty() {
                status = LogTxStatus::Failure;
                for (index, err) in &index_failures {
                    error!(tx_id = commit_id, index = %index, error = %err, "index commit failed");
                }
            }

            // Trigger log third; best effort.
            if let Some(identifier) = &data.config.log_identifier {
                match self.append_trigger_log(identifier, data, &header) {
                    Ok(()) => trigger_success = true,
                    Err(err) => {
                        error!(tx_id = commit_id, log = %identifier, error = %err, "trigger log append failed");
                        self.with_metrics(|metrics| metrics.record_trigger_log_failure());
                    }
                }
            }
            Ok(())
        })();

        // The trailer is written no matter how the flush went; it is the
        // system of record for post-crash reconciliation.
        let trailer_result = match &tx_log {
            Some(log) => {
                let failing: Vec<&str> = index_failures.keys().map(String::as_str).collect();
                let payload =
                    header.serialize_trailer(status, storage_success, trigger_success, &failing);
                log.append(Some(&header.log_key()), &payload)
            }
            None => Ok(()),
        };

        if !index_failures.is_empty() {
            self.with_metrics(|metrics| metrics.record_index_failures(index_failures.len() as u64));
        }
        match (primary, trailer_result) {
            (Err(primary), Err(trailer)) => Err(GraphError::TrailerShadow {
                primary: Box::new(primary),
                trailer: Box::new(trailer),
            }),
            (Err(primary), Ok(())) => Err(primary),
            (Ok(()), Err(trailer)) => Err(trailer),
            (Ok(()), Ok(())) => {
                if index_failures.is_empty() {
                    Ok(())
                } else {
                    Err(GraphError::Index(
                        index_failures
                            .into_iter()
                            .map(|(name, err)| (name, err.to_string()))
                            .collect(),
                    ))
                }
            }
        }
    }

    fn append_trigger_log(
        &self,
        identifier: &str,
        data: &TxData,
        header: &TransactionLogHeader,
    ) -> Result<()> {
        let log = self.backend().trigger_log(identifier);
        let mut writer =
            TriggerLogWriter::new(header, data.added.len() + data.removed.len());
        for list in [&data.added, &data.removed] {
            writer.begin_relation_list(list.len());
            for relation in list.iter() {
                let vertex0 = data.vertex(relation.vertex_slot(0));
                let entry = self.edge_serializer().write_relation(relation, 0, data)?;
                writer.relation(vertex0.id, &entry);
            }
        }
        log.append(None, &writer.finish())
            .map_err(|err| GraphError::TriggerLog(err.to_string()))
    }
}

fn ensure_vertex_id(id: VertexId) -> Result<()> {
    if id == 0 {
        return Err(GraphError::IllegalState(
            "vertex reached commit without a positive id".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ids::schema_vertex_id;

    fn lock_type(multiplicity: Multiplicity) -> RelationTypeDef {
        RelationTypeDef::edge_label(schema_vertex_id(5000), "t", multiplicity)
            .with_consistency(ConsistencyModifier::Lock)
    }

    #[test]
    fn relation_lock_predicate_truth_table() {
        let many2one = lock_type(Multiplicity::Many2One);
        assert!(acquire_relation_lock(&many2one, 0, true));
        assert!(!acquire_relation_lock(&many2one, 1, true));
        assert!(!acquire_relation_lock(&many2one, 0, false));

        let one2many = lock_type(Multiplicity::One2Many);
        assert!(!acquire_relation_lock(&one2many, 0, true));
        assert!(acquire_relation_lock(&one2many, 1, true));

        let simple = lock_type(Multiplicity::Simple);
        assert!(acquire_relation_lock(&simple, 0, true));
        assert!(!acquire_relation_lock(&simple, 1, true));

        let multi = lock_type(Multiplicity::Multi);
        assert!(!acquire_relation_lock(&multi, 0, true));
        assert!(!acquire_relation_lock(&multi, 1, true));

        let unlocked = RelationTypeDef::edge_label(schema_vertex_id(5001), "u", Multiplicity::One2One);
        assert!(!acquire_relation_lock(&unlocked, 0, true));
    }

    #[test]
    fn index_lock_predicate_excludes_list_cardinality() {
        assert!(acquire_index_lock(
            ConsistencyModifier::Lock,
            Cardinality::Single,
            true
        ));
        assert!(acquire_index_lock(
            ConsistencyModifier::Lock,
            Cardinality::Set,
            true
        ));
        assert!(!acquire_index_lock(
            ConsistencyModifier::Lock,
            Cardinality::List,
            true
        ));
        assert!(!acquire_index_lock(
            ConsistencyModifier::Default,
            Cardinality::Single,
            true
        ));
        assert!(!acquire_index_lock(
            ConsistencyModifier::Lock,
            Cardinality::Single,
            false
        ));
    }
}
