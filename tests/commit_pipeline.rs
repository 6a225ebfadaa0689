use std::sync::Arc;

use arbor::db::ids::schema_vertex_id;
use arbor::db::txlog::{decode_log_record, DecodedLogRecord, LogTxStatus};
use arbor::storage::backend::MemoryBackendParts;
use arbor::storage::memory::{BackendEvent, MemoryLogStore, MemoryMixedIndex, StoreRole};
use arbor::storage::LogStore;
use arbor::{
    Backend, Cardinality, CompositeIndexDef, ConsistencyModifier, GraphConfig, GraphDB,
    GraphError, MixedIndexDef, Multiplicity, PropertyValue, RelationTypeDef, SchemaRegistry,
    SchemaStatus, StoreFeatures, TransactionConfig,
};

const NAME_KEY: u64 = schema_vertex_id(5000);
const TAGS_KEY: u64 = schema_vertex_id(5001);
const EXPIRES_KEY: u64 = schema_vertex_id(5002);
const SEARCH_KEY: u64 = schema_vertex_id(5003);
const EDGE_LOCKED: u64 = schema_vertex_id(5010);
const EDGE_MULTI: u64 = schema_vertex_id(5011);
const EDGE_VIEWED: u64 = schema_vertex_id(5012);
const VIEW_ENABLED: u64 = schema_vertex_id(5013);
const VIEW_DISABLED: u64 = schema_vertex_id(5014);
const TAGS_INDEX: u64 = schema_vertex_id(6000);
const EXPIRES_INDEX: u64 = schema_vertex_id(6001);

fn build_schema() -> SchemaRegistry {
    let mut schema = SchemaRegistry::new();
    schema.register_type(RelationTypeDef::property_key(
        NAME_KEY,
        "name",
        Cardinality::Single,
    ));
    schema.register_type(RelationTypeDef::property_key(
        TAGS_KEY,
        "tags",
        Cardinality::Set,
    ));
    schema.register_type(
        RelationTypeDef::property_key(EXPIRES_KEY, "session", Cardinality::Single).with_ttl(3600),
    );
    schema.register_type(RelationTypeDef::property_key(
        SEARCH_KEY,
        "bio",
        Cardinality::Single,
    ));
    schema.register_type(
        RelationTypeDef::edge_label(EDGE_LOCKED, "owns", Multiplicity::Many2One)
            .with_consistency(ConsistencyModifier::Lock),
    );
    schema.register_type(RelationTypeDef::edge_label(
        EDGE_MULTI,
        "links",
        Multiplicity::Multi,
    ));
    schema.register_type(
        RelationTypeDef::edge_label(EDGE_VIEWED, "follows", Multiplicity::Multi)
            .with_index_view(arbor::schema::RelationIndexView {
                id: VIEW_ENABLED,
                direction: arbor::Direction::Out,
                status: SchemaStatus::Enabled,
            })
            .with_index_view(arbor::schema::RelationIndexView {
                id: VIEW_DISABLED,
                direction: arbor::Direction::Out,
                status: SchemaStatus::Disabled,
            }),
    );
    schema.register_composite_index(CompositeIndexDef {
        id: TAGS_INDEX,
        name: "byTags".into(),
        status: SchemaStatus::Enabled,
        consistency: ConsistencyModifier::Lock,
        cardinality: Cardinality::Set,
        key_ids: vec![TAGS_KEY],
    });
    schema.register_composite_index(CompositeIndexDef {
        id: EXPIRES_INDEX,
        name: "bySession".into(),
        status: SchemaStatus::Enabled,
        consistency: ConsistencyModifier::Default,
        cardinality: Cardinality::Single,
        key_ids: vec![EXPIRES_KEY],
    });
    schema.register_mixed_index(MixedIndexDef {
        name: "search".into(),
        backing_index: "idx_text".into(),
        store_name: "vertex".into(),
        keys: vec![(SEARCH_KEY, "bio".into())],
    });
    schema
}

struct TestGraph {
    db: GraphDB,
    parts: MemoryBackendParts,
    mixed: Vec<Arc<MemoryMixedIndex>>,
}

fn isolated() -> StoreFeatures {
    StoreFeatures {
        has_tx_isolation: true,
        has_ordered_scan: true,
        has_unordered_scan: true,
        is_distributed: false,
        is_key_ordered: true,
    }
}

fn non_isolated() -> StoreFeatures {
    StoreFeatures {
        has_tx_isolation: false,
        has_ordered_scan: true,
        has_unordered_scan: true,
        is_distributed: true,
        is_key_ordered: true,
    }
}

fn open_graph(features: StoreFeatures, instance: &str) -> TestGraph {
    let (parts, mixed) = Backend::in_memory_with_mixed(features, &["idx_text"]);
    let config = GraphConfig::new(instance)
        .with_transaction_log()
        .with_vertex_id_setting();
    let db = GraphDB::open(
        config,
        Arc::clone(&parts.backend),
        Arc::new(build_schema()),
    )
    .expect("open graph");
    TestGraph { db, parts, mixed }
}

fn vertex_key(id: u64) -> Vec<u8> {
    id.to_be_bytes().to_vec()
}

fn log_statuses(parts: &MemoryBackendParts) -> Vec<LogTxStatus> {
    parts
        .tx_log
        .records()
        .iter()
        .map(|record| decode_log_record(&record.payload).expect("decode record").status)
        .collect()
}

fn decoded_records(parts: &MemoryBackendParts) -> Vec<DecodedLogRecord> {
    parts
        .tx_log
        .records()
        .iter()
        .map(|record| decode_log_record(&record.payload).expect("decode record"))
        .collect()
}

fn edge_mutations(events: &[BackendEvent]) -> Vec<(Vec<u8>, usize, usize)> {
    events
        .iter()
        .filter_map(|event| match event {
            BackendEvent::Mutation {
                role: StoreRole::Edge,
                key,
                additions,
                deletions,
            } => Some((key.clone(), additions.len(), deletions.len())),
            _ => None,
        })
        .collect()
}

/// Every PRECOMMIT record must be closed by exactly one SUCCESS or FAILURE
/// trailer for the same transaction.
fn assert_trailers_well_formed(parts: &MemoryBackendParts) {
    let records = decoded_records(parts);
    for record in records
        .iter()
        .filter(|record| record.status == LogTxStatus::Precommit)
    {
        let trailers = records
            .iter()
            .filter(|candidate| {
                candidate.tx_id == record.tx_id
                    && matches!(candidate.status, LogTxStatus::Success | LogTxStatus::Failure)
            })
            .count();
        assert_eq!(trailers, 1, "tx {} has {} trailers", record.tx_id, trailers);
    }
}

// S1: one property on a NEW vertex, no indexes involved, isolated backend.
#[test]
fn s1_single_property_on_new_vertex() {
    let graph = open_graph(isolated(), "s1");
    let mut tx = graph.db.new_transaction(TransactionConfig::default()).expect("tx");
    let v = tx.new_vertex();
    tx.set_vertex_id(v, 10).expect("set id");
    let name_key = tx.type_id("name").expect("resolve type by name");
    assert_eq!(name_key, NAME_KEY);
    tx.add_property(v, name_key, PropertyValue::String("a".into()))
        .expect("add property");
    tx.commit().expect("commit");

    let events = graph.parts.recorder.snapshot();
    let locks: Vec<_> = events
        .iter()
        .filter(|event| matches!(event, BackendEvent::Lock { .. }))
        .collect();
    assert!(locks.is_empty(), "NEW vertex must not take edge locks");

    let mutations = edge_mutations(&events);
    assert_eq!(mutations, vec![(vertex_key(10), 1, 0)]);
    assert!(!events.iter().any(|event| matches!(
        event,
        BackendEvent::Mutation {
            role: StoreRole::Index,
            ..
        } | BackendEvent::MixedMutation { .. }
    )));

    assert_eq!(
        log_statuses(&graph.parts),
        vec![LogTxStatus::Precommit, LogTxStatus::Success]
    );
    graph.db.shutdown().expect("shutdown");
}

// S2: MANY2ONE edge with LOCK consistency on a pre-existing out-vertex takes
// a column-only lock at position 0 and none at position 1.
#[test]
fn s2_locked_edge_takes_column_lock_on_out_vertex() {
    let graph = open_graph(isolated(), "s2");
    let mut tx = graph.db.new_transaction(TransactionConfig::default()).expect("tx");
    let u = tx.load_vertex(10).expect("load u");
    let v = tx.load_vertex(20).expect("load v");
    tx.add_edge(u, v, EDGE_LOCKED, None).expect("add edge");
    tx.commit().expect("commit");

    let events = graph.parts.recorder.snapshot();
    let locks: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            BackendEvent::Lock {
                role: StoreRole::Edge,
                key,
                with_value,
                ..
            } => Some((key.clone(), *with_value)),
            _ => None,
        })
        .collect();
    assert_eq!(locks.len(), 1);
    assert_eq!(locks[0].0, vertex_key(10));
    assert!(!locks[0].1, "addition locks claim the column only");

    let mutations = edge_mutations(&events);
    assert_eq!(
        mutations,
        vec![(vertex_key(10), 1, 0), (vertex_key(20), 1, 0)]
    );
    assert!(!events.iter().any(|event| matches!(
        event,
        BackendEvent::Mutation {
            role: StoreRole::Index,
            ..
        }
    )));
    assert_eq!(
        log_statuses(&graph.parts),
        vec![LogTxStatus::Precommit, LogTxStatus::Success]
    );
    graph.db.shutdown().expect("shutdown");
}

// S3: removing an indexed SET property acquires the composite-index
// deletion lock before any addition lock.
#[test]
fn s3_index_deletion_locks_precede_addition_locks() {
    let graph = open_graph(isolated(), "s3");
    let mut tx = graph.db.new_transaction(TransactionConfig::default()).expect("tx");
    let v = tx.load_vertex(5).expect("load");
    tx.remove_property(v, TAGS_KEY, PropertyValue::String("old".into()), 999)
        .expect("remove property");
    tx.add_property(v, TAGS_KEY, PropertyValue::String("new".into()))
        .expect("add property");
    tx.commit().expect("commit");

    let events = graph.parts.recorder.snapshot();
    let index_locks: Vec<bool> = events
        .iter()
        .filter_map(|event| match event {
            BackendEvent::Lock {
                role: StoreRole::Index,
                with_value,
                ..
            } => Some(*with_value),
            _ => None,
        })
        .collect();
    assert_eq!(index_locks.len(), 2);
    let first_addition = index_locks
        .iter()
        .position(|with_value| !with_value)
        .expect("addition lock");
    let last_deletion = index_locks
        .iter()
        .rposition(|with_value| *with_value)
        .expect("deletion lock");
    assert!(
        last_deletion < first_addition,
        "every deletion lock must precede every addition lock: {index_locks:?}"
    );

    let mutations = edge_mutations(&events);
    assert_eq!(mutations, vec![(vertex_key(5), 1, 1)]);

    let index_deletions: usize = events
        .iter()
        .filter_map(|event| match event {
            BackendEvent::Mutation {
                role: StoreRole::Index,
                deletions,
                ..
            } => Some(deletions.len()),
            _ => None,
        })
        .sum();
    assert_eq!(index_deletions, 1);
    graph.db.shutdown().expect("shutdown");
}

// S4: a self-loop emits exactly one mutation entry under its vertex.
#[test]
fn s4_loop_edge_emits_one_entry() {
    let graph = open_graph(isolated(), "s4");
    let mut tx = graph.db.new_transaction(TransactionConfig::default()).expect("tx");
    let v = tx.new_vertex();
    tx.set_vertex_id(v, 7).expect("set id");
    tx.add_edge(v, v, EDGE_MULTI, None).expect("add loop");
    tx.commit().expect("commit");

    let mutations = edge_mutations(&graph.parts.recorder.snapshot());
    assert_eq!(mutations, vec![(vertex_key(7), 1, 0)]);
    assert_eq!(graph.parts.edge_store.entry_count(&vertex_key(7)), 1);
    graph.db.shutdown().expect("shutdown");
}

// S5: on a non-isolated backend the schema sub-commit flushes, and logs,
// strictly before the data commit.
#[test]
fn s5_schema_split_orders_log_records() {
    let graph = open_graph(non_isolated(), "s5");
    let mut tx = graph.db.new_transaction(TransactionConfig::default()).expect("tx");
    tx.new_schema_vertex("person");
    let data_vertex = tx.load_vertex(10).expect("load");
    tx.add_property(data_vertex, NAME_KEY, PropertyValue::String("a".into()))
        .expect("add property");
    tx.commit().expect("commit");

    assert_eq!(
        log_statuses(&graph.parts),
        vec![
            LogTxStatus::PreflushSystem,
            LogTxStatus::SuccessSystem,
            LogTxStatus::Precommit,
            LogTxStatus::Success,
        ]
    );

    // The schema vertex's primary mutation must land before the data one.
    let mutations = edge_mutations(&graph.parts.recorder.snapshot());
    assert_eq!(mutations.len(), 2);
    assert!(
        mutations[0].0 > vertex_key(u64::MAX >> 3),
        "first flushed key should be the schema vertex"
    );
    assert_eq!(mutations[1].0, vertex_key(10));
    assert_trailers_well_formed(&graph.parts);
    graph.db.shutdown().expect("shutdown");
}

// S6: a failing mixed index leaves primary storage durable, produces a
// FAILURE trailer naming the index, and surfaces without a rollback.
#[test]
fn s6_mixed_index_failure_is_not_rolled_back() {
    let graph = open_graph(isolated(), "s6");
    graph.mixed[0].set_fail(true);
    let audit_log = Arc::new(MemoryLogStore::new("audit"));
    graph
        .parts
        .backend
        .register_trigger_log("audit", Arc::clone(&audit_log) as Arc<dyn LogStore>);

    let mut tx = graph
        .db
        .new_transaction(TransactionConfig::default().with_log_identifier("audit"))
        .expect("tx");
    let v = tx.load_vertex(10).expect("load");
    tx.add_property(v, SEARCH_KEY, PropertyValue::String("text".into()))
        .expect("add property");
    let err = tx.commit().expect_err("mixed index failure");

    match &err {
        GraphError::Index(failures) => {
            assert_eq!(failures.keys().collect::<Vec<_>>(), vec!["idx_text"]);
        }
        other => panic!("expected index failure, got {other:?}"),
    }

    // Primary storage kept the entry.
    assert_eq!(graph.parts.edge_store.entry_count(&vertex_key(10)), 1);

    let records = decoded_records(&graph.parts);
    let trailer = records.last().expect("trailer");
    assert_eq!(trailer.status, LogTxStatus::Failure);
    assert_eq!(trailer.storage_success, Some(true));
    assert_eq!(trailer.trigger_success, Some(true));
    assert_eq!(trailer.failed_indexes, vec!["idx_text"]);

    assert_eq!(audit_log.records().len(), 1);
    assert_trailers_well_formed(&graph.parts);

    let metrics = graph.db.metrics();
    assert_eq!(metrics.transactions_rolled_back, 0);
    assert_eq!(metrics.index_mutation_failures, 1);
    graph.db.shutdown().expect("shutdown");
}

// Invariant 4: commit_storage precedes every mixed-index commit.
#[test]
fn storage_flush_precedes_index_flush() {
    let graph = open_graph(isolated(), "phase-order");
    let mut tx = graph.db.new_transaction(TransactionConfig::default()).expect("tx");
    let v = tx.load_vertex(10).expect("load");
    tx.add_property(v, SEARCH_KEY, PropertyValue::String("text".into()))
        .expect("add property");
    tx.commit().expect("commit");

    let events = graph.parts.recorder.snapshot();
    let first_storage = events
        .iter()
        .position(|event| matches!(event, BackendEvent::StorageApplied { .. }))
        .expect("storage applied");
    let first_mixed = events
        .iter()
        .position(|event| matches!(event, BackendEvent::MixedMutation { .. }))
        .expect("mixed mutation");
    assert!(first_storage < first_mixed);

    let doc = graph.mixed[0].document("vertex", "10").expect("document");
    assert_eq!(
        serde_json::to_value(doc.get("bio").expect("field")).expect("json"),
        serde_json::json!({"String": "text"})
    );
    graph.db.shutdown().expect("shutdown");
}

// Invariant 6: TTL metadata lands on composite-index additions only.
#[test]
fn ttl_attaches_to_composite_additions_only() {
    let graph = open_graph(isolated(), "ttl");
    let mut tx = graph.db.new_transaction(TransactionConfig::default()).expect("tx");
    let v = tx.load_vertex(11).expect("load");
    tx.remove_property(v, EXPIRES_KEY, PropertyValue::String("stale".into()), 998)
        .expect("remove property");
    tx.add_property(v, EXPIRES_KEY, PropertyValue::String("fresh".into()))
        .expect("add property");
    tx.commit().expect("commit");

    let events = graph.parts.recorder.snapshot();
    let mut addition_ttls = Vec::new();
    let mut deletion_ttls = Vec::new();
    for event in &events {
        if let BackendEvent::Mutation {
            role: StoreRole::Index,
            additions,
            deletions,
            ..
        } = event
        {
            addition_ttls.extend(additions.iter().map(|entry| entry.ttl_secs));
            deletion_ttls.extend(deletions.iter().map(|entry| entry.ttl_secs));
        }
    }
    assert_eq!(addition_ttls, vec![Some(3600)]);
    assert_eq!(deletion_ttls, vec![None]);

    // Primary entries never carry the TTL; only composite index ones do.
    for event in &events {
        if let BackendEvent::Mutation {
            role: StoreRole::Edge,
            additions,
            ..
        } = event
        {
            assert!(additions.iter().all(|entry| entry.ttl_secs.is_none()));
        }
    }
    graph.db.shutdown().expect("shutdown");
}

// Invariant 7: DISABLED relation-index views write nothing; enabled ones
// mirror the base entry.
#[test]
fn disabled_relation_index_views_write_nothing() {
    let graph = open_graph(isolated(), "views");
    let mut tx = graph.db.new_transaction(TransactionConfig::default()).expect("tx");
    let u = tx.load_vertex(30).expect("load");
    let v = tx.load_vertex(31).expect("load");
    tx.add_edge(u, v, EDGE_VIEWED, None).expect("add edge");
    tx.commit().expect("commit");

    // Position 0 under key 30 is covered by the base view (BOTH) and the
    // enabled OUT view; the disabled view contributes nothing. Position 1
    // under key 31 is covered by the base view alone.
    let mutations = edge_mutations(&graph.parts.recorder.snapshot());
    assert_eq!(
        mutations,
        vec![(vertex_key(30), 2, 0), (vertex_key(31), 1, 0)]
    );
    graph.db.shutdown().expect("shutdown");
}

// Storage failures roll the transaction back and close the log with a
// FAILURE trailer recording that storage did not survive.
#[test]
fn storage_failure_rolls_back_and_records_trailer() {
    let graph = open_graph(isolated(), "storage-failure");
    graph.parts.edge_store.set_fail_mutations(true);
    let mut tx = graph.db.new_transaction(TransactionConfig::default()).expect("tx");
    let v = tx.load_vertex(10).expect("load");
    tx.add_property(v, NAME_KEY, PropertyValue::String("a".into()))
        .expect("add property");
    let err = tx.commit().expect_err("storage failure");
    assert!(matches!(err, GraphError::Storage { .. }));

    let records = decoded_records(&graph.parts);
    let trailer = records.last().expect("trailer");
    assert_eq!(trailer.status, LogTxStatus::Failure);
    assert_eq!(trailer.storage_success, Some(false));
    assert_eq!(trailer.trigger_success, Some(false));
    assert!(trailer.failed_indexes.is_empty());

    let metrics = graph.db.metrics();
    assert_eq!(metrics.transactions_rolled_back, 1);
    assert_eq!(metrics.commit_failures, 1);
    graph.db.shutdown().expect("shutdown");
}

// A trailer append failing after a primary failure surfaces both causes.
#[test]
fn trailer_failure_after_commit_failure_chains_both() {
    let graph = open_graph(isolated(), "trailer-shadow");
    graph.parts.edge_store.set_fail_mutations(true);
    // First append (PRECOMMIT) succeeds, the trailer append fails.
    graph.parts.tx_log.set_fail_after(1);

    let mut tx = graph.db.new_transaction(TransactionConfig::default()).expect("tx");
    let v = tx.load_vertex(10).expect("load");
    tx.add_property(v, NAME_KEY, PropertyValue::String("a".into()))
        .expect("add property");
    let err = tx.commit().expect_err("double failure");
    match err {
        GraphError::TrailerShadow { primary, trailer } => {
            assert!(matches!(*primary, GraphError::Storage { .. }));
            assert!(matches!(*trailer, GraphError::Storage { .. }));
        }
        other => panic!("expected chained trailer failure, got {other:?}"),
    }
    graph.db.shutdown().expect("shutdown");
}

// Schema mutations demand locks and forbid batch loading.
#[test]
fn schema_mutations_require_consistent_configuration() {
    let graph = open_graph(non_isolated(), "schema-consistency");
    let mut config = TransactionConfig::default();
    config.acquire_locks = false;
    let mut tx = graph.db.new_transaction(config).expect("tx");
    tx.new_schema_vertex("person");
    let err = tx.commit().expect_err("schema without locks");
    assert!(matches!(err, GraphError::IllegalState(_)));

    // Nothing reached the stores or the log.
    assert!(edge_mutations(&graph.parts.recorder.snapshot()).is_empty());
    assert!(graph.parts.tx_log.records().is_empty());
    graph.db.shutdown().expect("shutdown");
}

// Global scans enumerate exactly the registered vertices, preferring
// unordered scans and falling back to ordered ones.
#[test]
fn vertex_scan_uses_existence_entries() {
    for features in [
        isolated(),
        StoreFeatures {
            has_tx_isolation: true,
            has_ordered_scan: true,
            has_unordered_scan: false,
            is_distributed: false,
            is_key_ordered: true,
        },
    ] {
        let graph = open_graph(features, "scan");
        let mut config = TransactionConfig::default();
        config.assign_ids_immediately = true;
        let mut tx = graph.db.new_transaction(config).expect("tx");
        let a = tx.create_vertex();
        let b = tx.create_vertex();
        let a_id = tx.vertex_id(a).expect("a id");
        let b_id = tx.vertex_id(b).expect("b id");
        // A bare vertex with a property but no existence entry stays
        // invisible to scans.
        let c = tx.load_vertex(500).expect("load");
        tx.add_property(c, NAME_KEY, PropertyValue::String("x".into()))
            .expect("add property");
        tx.commit().expect("commit");

        let reader = graph.parts.backend.begin_transaction();
        let mut ids = graph.db.get_vertex_ids(&reader).expect("scan");
        ids.sort_unstable();
        let mut expected = vec![a_id, b_id];
        expected.sort_unstable();
        assert_eq!(ids, expected);
        graph.db.shutdown().expect("shutdown");
    }
}

#[test]
fn vertex_scan_requires_scan_support() {
    let graph = open_graph(
        StoreFeatures {
            has_tx_isolation: true,
            has_ordered_scan: false,
            has_unordered_scan: false,
            is_distributed: false,
            is_key_ordered: false,
        },
        "no-scan",
    );
    let reader = graph.parts.backend.begin_transaction();
    assert!(matches!(
        graph.db.get_vertex_ids(&reader),
        Err(GraphError::UnsupportedFeature(_))
    ));
    graph.db.shutdown().expect("shutdown");
}

#[test]
fn edge_queries_reject_non_positive_ids() {
    let graph = open_graph(isolated(), "edge-query");
    let reader = graph.parts.backend.begin_transaction();
    let slice = graph.db.vertex_existence_query().clone();
    assert!(matches!(
        graph.db.edge_query(0, &slice, &reader),
        Err(GraphError::InvalidArgument(_))
    ));
    assert!(matches!(
        graph.db.edge_multi_query(&[10, 0], &slice, &reader),
        Err(GraphError::InvalidArgument(_))
    ));
    graph.db.shutdown().expect("shutdown");
}

#[test]
fn duplicate_instance_ids_cannot_open_twice() {
    let (parts, _mixed) = Backend::in_memory_with_mixed(isolated(), &[]);
    let schema = Arc::new(build_schema());
    let first = GraphDB::open(
        GraphConfig::new("shared"),
        Arc::clone(&parts.backend),
        Arc::clone(&schema),
    )
    .expect("first open");
    let second = GraphDB::open(
        GraphConfig::new("shared"),
        Arc::clone(&parts.backend),
        Arc::clone(&schema),
    );
    assert!(matches!(second, Err(GraphError::AlreadyOpen(_))));

    first.shutdown().expect("shutdown");
    // Shutdown releases the registration; the id may be reused.
    let third = GraphDB::open(GraphConfig::new("shared"), parts.backend, schema)
        .expect("open after shutdown");
    third.shutdown().expect("shutdown");
    third.shutdown().expect("idempotent shutdown");
}

#[test]
fn transactions_cannot_start_after_shutdown() {
    let graph = open_graph(isolated(), "closed");
    graph.db.shutdown().expect("shutdown");
    assert!(matches!(
        graph.db.new_transaction(TransactionConfig::default()),
        Err(GraphError::IllegalState(_))
    ));
}
