use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{GraphError, Result};
use crate::model::PropertyValue;
use crate::storage::ser;
use crate::storage::{
    Entry, EntryList, KeyColumnValueStore, KeyMutations, KeyRange, KeySliceQuery, LockClaim,
    MixedIndexBackend, MixedIndexOp, MutationKind, SliceQuery, StaticBuffer,
};

/// Buffered handle onto one mixed-index backend within a transaction.
pub struct IndexTransaction {
    backend: Arc<dyn MixedIndexBackend>,
    ops: Vec<MixedIndexOp>,
}

impl IndexTransaction {
    fn new(backend: Arc<dyn MixedIndexBackend>) -> Self {
        IndexTransaction {
            backend,
            ops: Vec::new(),
        }
    }

    pub fn add(
        &mut self,
        store: &str,
        doc_id: &str,
        field: &str,
        value: PropertyValue,
        is_new: bool,
    ) {
        self.ops.push(MixedIndexOp {
            store: store.to_string(),
            doc_id: doc_id.to_string(),
            field: field.to_string(),
            value,
            kind: MutationKind::Addition,
            hint: is_new,
        });
    }

    pub fn delete(
        &mut self,
        store: &str,
        doc_id: &str,
        field: &str,
        value: PropertyValue,
        is_removed: bool,
    ) {
        self.ops.push(MixedIndexOp {
            store: store.to_string(),
            doc_id: doc_id.to_string(),
            field: field.to_string(),
            value,
            kind: MutationKind::Deletion,
            hint: is_removed,
        });
    }

    fn commit(&mut self) -> Result<()> {
        let ops = std::mem::take(&mut self.ops);
        self.backend.apply(&ops)
    }
}

/// Unified write handle over the primary store, the composite-index store,
/// the mixed-index sub-transactions, and lock acquisition.
///
/// Mutations queue in insertion order and hit the stores only at
/// [`commit_storage`](Self::commit_storage); `commit_storage` always
/// precedes [`commit_indexes`](Self::commit_indexes).
pub struct BackendTransaction {
    holder: u64,
    edge_store: Arc<dyn KeyColumnValueStore>,
    index_store: Arc<dyn KeyColumnValueStore>,
    mixed: BTreeMap<String, Arc<dyn MixedIndexBackend>>,
    edge_mutations: Vec<KeyMutations>,
    index_mutations: Vec<KeyMutations>,
    index_txs: BTreeMap<String, IndexTransaction>,
    edge_locks: u64,
    index_locks: u64,
}

impl BackendTransaction {
    pub(crate) fn new(
        holder: u64,
        edge_store: Arc<dyn KeyColumnValueStore>,
        index_store: Arc<dyn KeyColumnValueStore>,
        mixed: BTreeMap<String, Arc<dyn MixedIndexBackend>>,
    ) -> Self {
        BackendTransaction {
            holder,
            edge_store,
            index_store,
            mixed,
            edge_mutations: Vec::new(),
            index_mutations: Vec::new(),
            index_txs: BTreeMap::new(),
            edge_locks: 0,
            index_locks: 0,
        }
    }

    pub fn holder_id(&self) -> u64 {
        self.holder
    }

    pub fn lock_counts(&self) -> (u64, u64) {
        (self.edge_locks, self.index_locks)
    }

    // ---- reads -----------------------------------------------------------

    pub fn edge_store_query(&self, query: &KeySliceQuery) -> Result<EntryList> {
        self.edge_store.slice_query(query)
    }

    pub fn edge_store_multi_query(
        &self,
        keys: &[StaticBuffer],
        slice: &SliceQuery,
    ) -> Result<BTreeMap<StaticBuffer, EntryList>> {
        self.edge_store.multi_slice_query(keys, slice)
    }

    pub fn edge_store_keys(
        &self,
        slice: &SliceQuery,
        range: Option<&KeyRange>,
    ) -> Result<Vec<StaticBuffer>> {
        self.edge_store.scan_keys(slice, range)
    }

    // ---- writes ----------------------------------------------------------

    pub fn mutate_edges(&mut self, key: StaticBuffer, additions: Vec<Entry>, deletions: Vec<Entry>) {
        self.edge_mutations.push(KeyMutations {
            key,
            additions,
            deletions,
        });
    }

    pub fn mutate_index(&mut self, key: StaticBuffer, additions: Vec<Entry>, deletions: Vec<Entry>) {
        self.index_mutations.push(KeyMutations {
            key,
            additions,
            deletions,
        });
    }

    pub fn acquire_edge_lock(&mut self, key: &StaticBuffer, claim: &LockClaim) -> Result<()> {
        self.edge_locks += 1;
        self.edge_store.acquire_lock(self.holder, key, claim)
    }

    pub fn acquire_index_lock(&mut self, key: &StaticBuffer, claim: &LockClaim) -> Result<()> {
        self.index_locks += 1;
        self.index_store.acquire_lock(self.holder, key, claim)
    }

    pub fn index_transaction(&mut self, backing_index: &str) -> Result<&mut IndexTransaction> {
        if !self.index_txs.contains_key(backing_index) {
            let backend = self.mixed.get(backing_index).cloned().ok_or_else(|| {
                GraphError::InvalidArgument(format!("unknown mixed index backend: {backing_index}"))
            })?;
            self.index_txs
                .insert(backing_index.to_string(), IndexTransaction::new(backend));
        }
        Ok(self
            .index_txs
            .get_mut(backing_index)
            .expect("index transaction just inserted"))
    }

    pub fn has_queued_mutations(&self) -> bool {
        !self.edge_mutations.is_empty()
            || !self.index_mutations.is_empty()
            || self.index_txs.values().any(|itx| !itx.ops.is_empty())
    }

    // ---- commit ----------------------------------------------------------

    /// Flushes queued key-column-value mutations. Lock verification happens
    /// here, so a lost claim surfaces as a storage error at commit time.
    pub fn commit_storage(&mut self) -> Result<()> {
        let edge_batch = std::mem::take(&mut self.edge_mutations);
        let index_batch = std::mem::take(&mut self.index_mutations);
        let applied = self
            .edge_store
            .apply_mutations(self.holder, &edge_batch)
            .and_then(|()| self.index_store.apply_mutations(self.holder, &index_batch));
        match applied {
            Ok(()) => {
                self.release_locks();
                debug!(
                    tx_id = self.holder,
                    edge_keys = edge_batch.len(),
                    index_keys = index_batch.len(),
                    "storage mutations flushed"
                );
                Ok(())
            }
            Err(err @ GraphError::Lock(_)) => Err(GraphError::Storage {
                message: "lock verification failed during storage commit".into(),
                source: Some(Box::new(err)),
            }),
            Err(err) => Err(err),
        }
    }

    /// Flushes every mixed-index sub-transaction, collecting failures per
    /// backing index. Never aborts: primary storage is already durable when
    /// this runs.
    pub fn commit_indexes(&mut self) -> BTreeMap<String, GraphError> {
        let mut failures = BTreeMap::new();
        for (name, itx) in self.index_txs.iter_mut() {
            if let Err(err) = itx.commit() {
                failures.insert(name.clone(), err);
            }
        }
        self.index_txs.clear();
        failures
    }

    /// Commits everything at once; used when the engine queued no primary
    /// mutations itself.
    pub fn commit(&mut self) -> Result<()> {
        self.commit_storage()?;
        let failures = self.commit_indexes();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(GraphError::Index(
                failures
                    .into_iter()
                    .map(|(name, err)| (name, err.to_string()))
                    .collect(),
            ))
        }
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.edge_mutations.clear();
        self.index_mutations.clear();
        self.index_txs.clear();
        self.release_locks();
        warn!(tx_id = self.holder, "backend transaction rolled back");
        Ok(())
    }

    fn release_locks(&self) {
        self.edge_store.release_locks(self.holder);
        self.index_store.release_locks(self.holder);
    }

    /// Serializes the queued key-column-value mutations; the payload of
    /// PREFLUSH/PRECOMMIT transaction-log records.
    pub fn log_mutations(&self, out: &mut Vec<u8>) {
        for batch in [&self.edge_mutations, &self.index_mutations] {
            ser::write_varlong(out, batch.len() as u64);
            for mutation in batch.iter() {
                ser::write_bytes(out, &mutation.key);
                write_entries(out, &mutation.additions);
                write_entries(out, &mutation.deletions);
            }
        }
    }
}

fn write_entries(out: &mut Vec<u8>, entries: &[Entry]) {
    ser::write_varlong(out, entries.len() as u64);
    for entry in entries {
        ser::write_bytes(out, &entry.column);
        ser::write_bytes(out, &entry.value);
    }
}
