use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::error::{GraphError, Result};
use crate::storage::memory::{MemoryLogStore, MemoryMixedIndex, MemoryStore, Recorder, StoreRole};
use crate::storage::tx::BackendTransaction;
use crate::storage::{KeyColumnValueStore, LogStore, MixedIndexBackend, StoreFeatures};

/// Bundle of the stores one graph writes through: the primary edge store,
/// the composite-index store sharing its key-column-value semantics, the
/// mixed-index backends, and the log stores.
pub struct Backend {
    edge_store: Arc<dyn KeyColumnValueStore>,
    index_store: Arc<dyn KeyColumnValueStore>,
    mixed: BTreeMap<String, Arc<dyn MixedIndexBackend>>,
    tx_log: Arc<dyn LogStore>,
    trigger_logs: RwLock<HashMap<String, Arc<dyn LogStore>>>,
    features: StoreFeatures,
    // Registered instance ids with their registration timestamps; one graph
    // per id at a time, process-wide semantics shared with the cluster.
    instances: Mutex<HashMap<String, i64>>,
    next_tx_id: AtomicU64,
}

impl Backend {
    pub fn new(
        edge_store: Arc<dyn KeyColumnValueStore>,
        index_store: Arc<dyn KeyColumnValueStore>,
        tx_log: Arc<dyn LogStore>,
        features: StoreFeatures,
    ) -> Self {
        Backend {
            edge_store,
            index_store,
            mixed: BTreeMap::new(),
            tx_log,
            trigger_logs: RwLock::new(HashMap::new()),
            features,
            instances: Mutex::new(HashMap::new()),
            next_tx_id: AtomicU64::new(1),
        }
    }

    pub fn with_mixed_index(mut self, backend: Arc<dyn MixedIndexBackend>) -> Self {
        self.mixed.insert(backend.name().to_string(), backend);
        self
    }

    pub fn features(&self) -> StoreFeatures {
        self.features
    }

    pub fn edge_store(&self) -> &Arc<dyn KeyColumnValueStore> {
        &self.edge_store
    }

    pub fn index_store(&self) -> &Arc<dyn KeyColumnValueStore> {
        &self.index_store
    }

    pub fn tx_log(&self) -> &Arc<dyn LogStore> {
        &self.tx_log
    }

    /// Audit streams are created on first use and retained for the life of
    /// the backend.
    pub fn trigger_log(&self, identifier: &str) -> Arc<dyn LogStore> {
        if let Some(log) = self.trigger_logs.read().get(identifier) {
            return Arc::clone(log);
        }
        let mut logs = self.trigger_logs.write();
        Arc::clone(
            logs.entry(identifier.to_string())
                .or_insert_with(|| Arc::new(MemoryLogStore::new(format!("trigger-{identifier}")))),
        )
    }

    pub fn register_trigger_log(&self, identifier: &str, log: Arc<dyn LogStore>) {
        self.trigger_logs.write().insert(identifier.to_string(), log);
    }

    pub fn register_instance(&self, instance_id: &str, registration_time: i64) -> Result<()> {
        let mut instances = self.instances.lock();
        if instances.contains_key(instance_id) {
            return Err(GraphError::AlreadyOpen(instance_id.to_string()));
        }
        instances.insert(instance_id.to_string(), registration_time);
        debug!(instance = instance_id, "instance registered");
        Ok(())
    }

    pub fn unregister_instance(&self, instance_id: &str) {
        self.instances.lock().remove(instance_id);
        debug!(instance = instance_id, "instance unregistered");
    }

    /// Releases backend-held resources. The memory stores have nothing to
    /// flush; on-demand trigger logs are dropped.
    pub fn close(&self) {
        self.trigger_logs.write().clear();
        debug!("backend closed");
    }

    pub fn begin_transaction(&self) -> BackendTransaction {
        let holder = self.next_tx_id.fetch_add(1, Ordering::Relaxed);
        BackendTransaction::new(
            holder,
            Arc::clone(&self.edge_store),
            Arc::clone(&self.index_store),
            self.mixed.clone(),
        )
    }
}

/// Fully wired in-memory backend plus the handles tests poke at.
pub struct MemoryBackendParts {
    pub backend: Arc<Backend>,
    pub recorder: Arc<Recorder>,
    pub edge_store: Arc<MemoryStore>,
    pub index_store: Arc<MemoryStore>,
    pub tx_log: Arc<MemoryLogStore>,
}

impl Backend {
    pub fn in_memory(features: StoreFeatures) -> MemoryBackendParts {
        let (parts, _) = Backend::in_memory_with_mixed(features, &[]);
        parts
    }

    pub fn in_memory_with_mixed(
        features: StoreFeatures,
        mixed_names: &[&str],
    ) -> (MemoryBackendParts, Vec<Arc<MemoryMixedIndex>>) {
        let recorder = Recorder::new();
        let edge_store = Arc::new(MemoryStore::new(
            "edgestore",
            StoreRole::Edge,
            Arc::clone(&recorder),
        ));
        let index_store = Arc::new(MemoryStore::new(
            "graphindex",
            StoreRole::Index,
            Arc::clone(&recorder),
        ));
        let tx_log = Arc::new(MemoryLogStore::new("txlog"));
        let mut backend = Backend::new(
            Arc::clone(&edge_store) as Arc<dyn KeyColumnValueStore>,
            Arc::clone(&index_store) as Arc<dyn KeyColumnValueStore>,
            Arc::clone(&tx_log) as Arc<dyn LogStore>,
            features,
        );
        let mut handles = Vec::new();
        for name in mixed_names {
            let mixed = Arc::new(MemoryMixedIndex::new(*name, Arc::clone(&recorder)));
            handles.push(Arc::clone(&mixed));
            backend = backend.with_mixed_index(mixed as Arc<dyn MixedIndexBackend>);
        }
        (
            MemoryBackendParts {
                backend: Arc::new(backend),
                recorder,
                edge_store,
                index_store,
                tx_log,
            },
            handles,
        )
    }
}
