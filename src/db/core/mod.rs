mod commit;

pub use commit::{acquire_index_lock, acquire_relation_lock};

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::config::{GraphConfig, TransactionConfig};
use crate::db::edge_ser::EdgeSerializer;
use crate::db::ids::{IdAssigner, IdManager, MAX_VERTEX_KEY, MIN_VERTEX_KEY};
use crate::db::index_ser::IndexSerializer;
use crate::db::metrics::CommitMetrics;
use crate::db::schema_cache::{SchemaCache, SchemaRetriever};
use crate::db::transaction::GraphTransaction;
use crate::error::{GraphError, Result};
use crate::model::{Direction, TypeId, VertexId};
use crate::schema::SchemaRegistry;
use crate::storage::backend::Backend;
use crate::storage::tx::BackendTransaction;
use crate::storage::{EntryList, KeyRange, KeySliceQuery, SliceQuery};

/// The graph database engine: owns the backend handles, the serializers,
/// and the commit pipeline. One instance per unique instance id.
pub struct GraphDB {
    config: GraphConfig,
    backend: Arc<Backend>,
    schema: Arc<SchemaRegistry>,
    id_manager: IdManager,
    id_assigner: IdAssigner,
    edge_serializer: EdgeSerializer,
    index_serializer: IndexSerializer,
    schema_cache: SchemaCache,
    vertex_existence_query: SliceQuery,
    tx_counter: AtomicU64,
    session_counter: AtomicU64,
    open_txs: DashMap<u64, ()>,
    is_open: AtomicBool,
    metrics: Mutex<CommitMetrics>,
}

impl GraphDB {
    /// Registers this instance with the backend and wires the engine.
    /// Fails with [`GraphError::AlreadyOpen`] when another graph with the
    /// same instance id is live.
    pub fn open(
        config: GraphConfig,
        backend: Arc<Backend>,
        schema: Arc<SchemaRegistry>,
    ) -> Result<Self> {
        let registration_time = config.timestamps.now_micros();
        backend.register_instance(&config.unique_instance_id, registration_time)?;

        let id_assigner = IdAssigner::new();
        let id_manager = id_assigner.manager();
        let edge_serializer = EdgeSerializer;
        let vertex_existence_query = edge_serializer.vertex_existence_query();
        let retriever = Arc::new(StoreRetriever {
            schema: Arc::clone(&schema),
            backend: Arc::clone(&backend),
            edge_serializer,
            id_manager,
        });

        info!(
            instance = %config.unique_instance_id,
            log_transactions = config.log_transactions,
            "graph opened"
        );
        Ok(GraphDB {
            config,
            backend,
            schema,
            id_manager,
            id_assigner,
            edge_serializer,
            index_serializer: IndexSerializer,
            schema_cache: SchemaCache::new(retriever),
            vertex_existence_query,
            tx_counter: AtomicU64::new(0),
            session_counter: AtomicU64::new(0),
            open_txs: DashMap::new(),
            is_open: AtomicBool::new(true),
            metrics: Mutex::new(CommitMetrics::default()),
        })
    }

    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }

    /// Unregisters the instance and releases engine resources. Idempotent.
    pub fn shutdown(&self) -> Result<()> {
        if !self.is_open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let open = self.open_txs.len();
        if open > 0 {
            warn!(open_transactions = open, "shutting down with open transactions");
        }
        self.backend
            .unregister_instance(&self.config.unique_instance_id);
        self.id_assigner.close();
        self.backend.close();
        self.schema_cache.clear();
        info!(instance = %self.config.unique_instance_id, "graph shut down");
        Ok(())
    }

    // ---- transactions ----------------------------------------------------

    pub fn new_transaction(&self, config: TransactionConfig) -> Result<GraphTransaction<'_>> {
        if !self.is_open() {
            return Err(GraphError::IllegalState("graph has been shut down".into()));
        }
        let session_id = self.session_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let mutator = self.backend.begin_transaction();
        self.open_txs.insert(session_id, ());
        Ok(GraphTransaction::new(self, session_id, config, mutator))
    }

    pub(crate) fn close_transaction(&self, session_id: u64) {
        self.open_txs.remove(&session_id);
    }

    pub fn open_transaction_count(&self) -> usize {
        self.open_txs.len()
    }

    // ---- global reads ----------------------------------------------------

    /// Enumerates vertex ids by scanning the primary store for keys holding
    /// an existence entry. Prefers an unordered scan; falls back to an
    /// ordered scan over the whole key range.
    pub fn get_vertex_ids(&self, tx: &BackendTransaction) -> Result<Vec<VertexId>> {
        let features = self.backend.features();
        let keys = if features.has_unordered_scan {
            tx.edge_store_keys(&self.vertex_existence_query, None)?
        } else if features.has_ordered_scan {
            let range = KeyRange {
                start: MIN_VERTEX_KEY.to_vec(),
                end: MAX_VERTEX_KEY.to_vec(),
            };
            tx.edge_store_keys(&self.vertex_existence_query, Some(&range))?
        } else {
            return Err(GraphError::UnsupportedFeature(
                "the storage backend supports neither ordered nor unordered key scans",
            ));
        };
        keys.iter()
            .map(|key| self.id_manager.key_vertex(key))
            .collect()
    }

    pub fn edge_query(
        &self,
        vertex_id: VertexId,
        slice: &SliceQuery,
        tx: &BackendTransaction,
    ) -> Result<EntryList> {
        if vertex_id == 0 {
            return Err(GraphError::InvalidArgument(
                "vertex id must be positive".into(),
            ));
        }
        tx.edge_store_query(&KeySliceQuery::new(
            self.id_manager.vertex_key(vertex_id),
            slice.clone(),
        ))
    }

    pub fn edge_multi_query(
        &self,
        vertex_ids: &[VertexId],
        slice: &SliceQuery,
        tx: &BackendTransaction,
    ) -> Result<Vec<EntryList>> {
        if vertex_ids.is_empty() {
            return Err(GraphError::InvalidArgument(
                "at least one vertex id is required".into(),
            ));
        }
        let mut keys = Vec::with_capacity(vertex_ids.len());
        for id in vertex_ids {
            if *id == 0 {
                return Err(GraphError::InvalidArgument(
                    "vertex id must be positive".into(),
                ));
            }
            keys.push(self.id_manager.vertex_key(*id));
        }
        let mut by_key = tx.edge_store_multi_query(&keys, slice)?;
        Ok(keys
            .iter()
            .map(|key| by_key.remove(key).unwrap_or_default())
            .collect())
    }

    // ---- accessors -------------------------------------------------------

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    pub fn schema_cache(&self) -> &SchemaCache {
        &self.schema_cache
    }

    pub fn id_manager(&self) -> IdManager {
        self.id_manager
    }

    pub(crate) fn id_assigner(&self) -> &IdAssigner {
        &self.id_assigner
    }

    pub(crate) fn edge_serializer(&self) -> EdgeSerializer {
        self.edge_serializer
    }

    pub(crate) fn index_serializer(&self) -> IndexSerializer {
        self.index_serializer
    }

    pub fn vertex_existence_query(&self) -> &SliceQuery {
        &self.vertex_existence_query
    }

    pub fn metrics(&self) -> CommitMetrics {
        self.metrics.lock().clone()
    }

    pub(crate) fn next_commit_id(&self) -> u64 {
        self.tx_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn with_metrics(&self, update: impl FnOnce(&mut CommitMetrics)) {
        update(&mut self.metrics.lock());
    }

    pub(crate) fn record_rollback(&self) {
        self.metrics.lock().record_rollback();
    }
}

impl Drop for GraphDB {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

/// Schema lookups backed by the catalog for names and the edge store for
/// adjacency, memoized by the engine's [`SchemaCache`].
struct StoreRetriever {
    schema: Arc<SchemaRegistry>,
    backend: Arc<Backend>,
    edge_serializer: EdgeSerializer,
    id_manager: IdManager,
}

impl SchemaRetriever for StoreRetriever {
    fn schema_by_name(&self, name: &str) -> Result<Option<u64>> {
        Ok(self.schema.type_id_by_name(name))
    }

    fn schema_relations(
        &self,
        schema_id: u64,
        type_id: TypeId,
        direction: Direction,
    ) -> Result<EntryList> {
        let tx = self.backend.begin_transaction();
        tx.edge_store_query(&KeySliceQuery::new(
            self.id_manager.vertex_key(schema_id),
            self.edge_serializer.slice_query(type_id, direction),
        ))
    }
}
