//! In-process storage backend.
//!
//! Implements the store contracts over ordered maps so the engine can run
//! without an external cluster. Every backend call is also appended to a
//! shared [`Recorder`], which is how the commit pipeline's ordering
//! guarantees (lock order, storage-before-indexes, schema-before-data) are
//! observed from the outside.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{GraphError, Result};
use crate::model::PropertyValue;
use crate::storage::{
    Entry, EntryList, KeyColumnValueStore, KeyMutations, KeyRange, KeySliceQuery, LockClaim,
    LogStore, MixedIndexBackend, MixedIndexOp, MutationKind, SliceQuery, StaticBuffer,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreRole {
    Edge,
    Index,
}

#[derive(Debug, Clone)]
pub enum BackendEvent {
    Lock {
        role: StoreRole,
        key: StaticBuffer,
        column: StaticBuffer,
        with_value: bool,
    },
    Mutation {
        role: StoreRole,
        key: StaticBuffer,
        additions: Vec<Entry>,
        deletions: Vec<Entry>,
    },
    StorageApplied {
        role: StoreRole,
        holder: u64,
        keys: usize,
    },
    MixedMutation {
        index: String,
        op: MixedIndexOp,
    },
    MixedCommitted {
        index: String,
        ok: bool,
    },
}

/// Shared, ordered trace of backend calls.
#[derive(Debug, Default)]
pub struct Recorder {
    events: Mutex<Vec<BackendEvent>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Recorder::default())
    }

    pub fn record(&self, event: BackendEvent) {
        self.events.lock().push(event);
    }

    pub fn snapshot(&self) -> Vec<BackendEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

type ColumnMap = BTreeMap<StaticBuffer, (StaticBuffer, Option<u32>)>;

struct LockTable {
    // Holder plus the cell value observed at acquisition; a change between
    // acquisition and commit is a lost update.
    claims: HashMap<(StaticBuffer, StaticBuffer), (u64, Option<StaticBuffer>)>,
}

pub struct MemoryStore {
    name: String,
    role: StoreRole,
    rows: RwLock<BTreeMap<StaticBuffer, ColumnMap>>,
    locks: Mutex<LockTable>,
    recorder: Arc<Recorder>,
    fail_mutations: AtomicBool,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>, role: StoreRole, recorder: Arc<Recorder>) -> Self {
        MemoryStore {
            name: name.into(),
            role,
            rows: RwLock::new(BTreeMap::new()),
            locks: Mutex::new(LockTable {
                claims: HashMap::new(),
            }),
            recorder,
            fail_mutations: AtomicBool::new(false),
        }
    }

    /// Makes the next `apply_mutations` calls fail, for exercising the
    /// commit failure paths.
    pub fn set_fail_mutations(&self, fail: bool) {
        self.fail_mutations.store(fail, Ordering::SeqCst);
    }

    pub fn entry_count(&self, key: &StaticBuffer) -> usize {
        self.rows.read().get(key).map_or(0, ColumnMap::len)
    }

    pub fn get(&self, key: &StaticBuffer, column: &StaticBuffer) -> Option<(StaticBuffer, Option<u32>)> {
        self.rows.read().get(key)?.get(column).cloned()
    }

    fn verify_claims(&self, holder: u64) -> Result<()> {
        let rows = self.rows.read();
        let locks = self.locks.lock();
        for ((key, column), (owner, observed)) in locks.claims.iter() {
            if *owner != holder {
                continue;
            }
            let current = rows
                .get(key)
                .and_then(|columns| columns.get(column))
                .map(|(value, _)| value);
            if current != observed.as_ref() {
                return Err(GraphError::Lock(format!(
                    "value changed under lock on store {}",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

impl KeyColumnValueStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn slice_query(&self, query: &KeySliceQuery) -> Result<EntryList> {
        let rows = self.rows.read();
        let Some(columns) = rows.get(&query.key) else {
            return Ok(Vec::new());
        };
        let mut entries = Vec::new();
        for (column, (value, ttl)) in
            columns.range(query.slice.start.clone()..query.slice.end.clone())
        {
            if let Some(limit) = query.slice.limit {
                if entries.len() >= limit {
                    break;
                }
            }
            entries.push(Entry {
                column: column.clone(),
                value: value.clone(),
                ttl_secs: *ttl,
            });
        }
        Ok(entries)
    }

    fn multi_slice_query(
        &self,
        keys: &[StaticBuffer],
        slice: &SliceQuery,
    ) -> Result<BTreeMap<StaticBuffer, EntryList>> {
        let mut result = BTreeMap::new();
        for key in keys {
            let entries = self.slice_query(&KeySliceQuery::new(key.clone(), slice.clone()))?;
            result.insert(key.clone(), entries);
        }
        Ok(result)
    }

    fn scan_keys(&self, slice: &SliceQuery, range: Option<&KeyRange>) -> Result<Vec<StaticBuffer>> {
        let rows = self.rows.read();
        let mut keys = Vec::new();
        for (key, columns) in rows.iter() {
            if let Some(range) = range {
                if key < &range.start || key >= &range.end {
                    continue;
                }
            }
            let has_match = columns
                .range(slice.start.clone()..slice.end.clone())
                .next()
                .is_some();
            if has_match {
                keys.push(key.clone());
            }
        }
        Ok(keys)
    }

    fn acquire_lock(&self, holder: u64, key: &StaticBuffer, claim: &LockClaim) -> Result<()> {
        let observed = self
            .rows
            .read()
            .get(key)
            .and_then(|columns| columns.get(claim.column()))
            .map(|(value, _)| value.clone());
        let mut locks = self.locks.lock();
        let cell = (key.clone(), claim.column().clone());
        if let Some((owner, _)) = locks.claims.get(&cell) {
            if *owner != holder {
                return Err(GraphError::Lock(format!(
                    "cell already locked by transaction {owner} on store {}",
                    self.name
                )));
            }
        }
        locks.claims.insert(cell, (holder, observed));
        self.recorder.record(BackendEvent::Lock {
            role: self.role,
            key: key.clone(),
            column: claim.column().clone(),
            with_value: claim.expected_value().is_some(),
        });
        Ok(())
    }

    fn apply_mutations(&self, holder: u64, batch: &[KeyMutations]) -> Result<()> {
        if self.fail_mutations.load(Ordering::SeqCst) {
            return Err(GraphError::storage(format!(
                "injected mutation failure on store {}",
                self.name
            )));
        }
        self.verify_claims(holder)?;

        let mut rows = self.rows.write();
        for mutation in batch {
            let columns = rows.entry(mutation.key.clone()).or_default();
            for deletion in &mutation.deletions {
                columns.remove(&deletion.column);
            }
            for addition in &mutation.additions {
                columns.insert(
                    addition.column.clone(),
                    (addition.value.clone(), addition.ttl_secs),
                );
            }
            if columns.is_empty() {
                rows.remove(&mutation.key);
            }
            self.recorder.record(BackendEvent::Mutation {
                role: self.role,
                key: mutation.key.clone(),
                additions: mutation.additions.clone(),
                deletions: mutation.deletions.clone(),
            });
        }
        self.recorder.record(BackendEvent::StorageApplied {
            role: self.role,
            holder,
            keys: batch.len(),
        });
        Ok(())
    }

    fn release_locks(&self, holder: u64) {
        let mut locks = self.locks.lock();
        locks.claims.retain(|_, (owner, _)| *owner != holder);
    }
}

type DocKey = (String, String);

pub struct MemoryMixedIndex {
    name: String,
    docs: Mutex<HashMap<DocKey, HashMap<String, PropertyValue>>>,
    recorder: Arc<Recorder>,
    fail: AtomicBool,
}

impl MemoryMixedIndex {
    pub fn new(name: impl Into<String>, recorder: Arc<Recorder>) -> Self {
        MemoryMixedIndex {
            name: name.into(),
            docs: Mutex::new(HashMap::new()),
            recorder,
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn document(&self, store: &str, doc_id: &str) -> Option<HashMap<String, PropertyValue>> {
        self.docs
            .lock()
            .get(&(store.to_string(), doc_id.to_string()))
            .cloned()
    }
}

impl MixedIndexBackend for MemoryMixedIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, ops: &[MixedIndexOp]) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            self.recorder.record(BackendEvent::MixedCommitted {
                index: self.name.clone(),
                ok: false,
            });
            return Err(GraphError::storage(format!(
                "injected failure on mixed index {}",
                self.name
            )));
        }
        let mut docs = self.docs.lock();
        for op in ops {
            let doc_key = (op.store.clone(), op.doc_id.clone());
            match op.kind {
                MutationKind::Addition => {
                    docs.entry(doc_key)
                        .or_default()
                        .insert(op.field.clone(), op.value.clone());
                }
                MutationKind::Deletion => {
                    if let Some(fields) = docs.get_mut(&doc_key) {
                        fields.remove(&op.field);
                        // A removed element drops its whole document; a field
                        // deletion on a live element keeps the rest.
                        if fields.is_empty() || op.hint {
                            docs.remove(&doc_key);
                        }
                    }
                }
            }
            self.recorder.record(BackendEvent::MixedMutation {
                index: self.name.clone(),
                op: op.clone(),
            });
        }
        self.recorder.record(BackendEvent::MixedCommitted {
            index: self.name.clone(),
            ok: true,
        });
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct LogRecord {
    pub key: Option<StaticBuffer>,
    pub payload: Vec<u8>,
}

pub struct MemoryLogStore {
    name: String,
    records: Mutex<Vec<LogRecord>>,
    fail: AtomicBool,
    remaining_ok: Mutex<Option<u32>>,
}

impl MemoryLogStore {
    pub fn new(name: impl Into<String>) -> Self {
        MemoryLogStore {
            name: name.into(),
            records: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            remaining_ok: Mutex::new(None),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Lets the next `n` appends through, then fails. Exercises trailer
    /// failures that follow a successful header append.
    pub fn set_fail_after(&self, n: u32) {
        *self.remaining_ok.lock() = Some(n);
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }
}

impl LogStore for MemoryLogStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn append(&self, key: Option<&StaticBuffer>, payload: &[u8]) -> Result<()> {
        let exhausted = {
            let mut remaining = self.remaining_ok.lock();
            match remaining.as_mut() {
                Some(0) => true,
                Some(count) => {
                    *count -= 1;
                    false
                }
                None => false,
            }
        };
        if exhausted || self.fail.load(Ordering::SeqCst) {
            return Err(GraphError::storage(format!(
                "injected append failure on log {}",
                self.name
            )));
        }
        self.records.lock().push(LogRecord {
            key: key.cloned(),
            payload: payload.to_vec(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        MemoryStore::new("edgestore", StoreRole::Edge, Recorder::new())
    }

    fn mutation(key: &[u8], additions: Vec<Entry>, deletions: Vec<Entry>) -> KeyMutations {
        KeyMutations {
            key: key.to_vec(),
            additions,
            deletions,
        }
    }

    #[test]
    fn slice_query_respects_bounds_and_limit() {
        let store = store();
        let additions = vec![
            Entry::new(vec![1, 1], vec![10]),
            Entry::new(vec![1, 2], vec![11]),
            Entry::new(vec![2, 1], vec![12]),
        ];
        store
            .apply_mutations(1, &[mutation(b"k", additions, Vec::new())])
            .expect("apply");

        let slice = SliceQuery::new(vec![1], vec![2]);
        let entries = store
            .slice_query(&KeySliceQuery::new(b"k".to_vec(), slice.clone()))
            .expect("query");
        assert_eq!(entries.len(), 2);

        let limited = store
            .slice_query(&KeySliceQuery::new(b"k".to_vec(), slice.with_limit(1)))
            .expect("query");
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].column, vec![1, 1]);
    }

    #[test]
    fn conflicting_lock_is_rejected() {
        let store = store();
        let claim = LockClaim::Column(vec![9]);
        store.acquire_lock(1, &b"k".to_vec(), &claim).expect("first claim");
        assert!(matches!(
            store.acquire_lock(2, &b"k".to_vec(), &claim),
            Err(GraphError::Lock(_))
        ));
        store.release_locks(1);
        store.acquire_lock(2, &b"k".to_vec(), &claim).expect("after release");
    }

    #[test]
    fn locked_cell_change_is_detected_at_apply() {
        let store = store();
        let entry = Entry::new(vec![5], vec![1]);
        store
            .apply_mutations(1, &[mutation(b"k", vec![entry.clone()], Vec::new())])
            .expect("seed");

        store
            .acquire_lock(2, &b"k".to_vec(), &LockClaim::Entry(entry.clone()))
            .expect("claim");
        // Another writer changes the cell out from under the claim.
        store
            .apply_mutations(3, &[mutation(b"k", vec![Entry::new(vec![5], vec![2])], Vec::new())])
            .expect("interleaved write");
        assert!(matches!(
            store.apply_mutations(2, &[mutation(b"k", Vec::new(), vec![entry])]),
            Err(GraphError::Lock(_))
        ));
    }

    #[test]
    fn lock_on_absent_cell_holds_while_unwritten() {
        let store = store();
        let entry = Entry::new(vec![5], vec![1]);
        store
            .acquire_lock(2, &b"k".to_vec(), &LockClaim::Entry(entry.clone()))
            .expect("claim on absent cell");
        store
            .apply_mutations(2, &[mutation(b"k", Vec::new(), vec![entry])])
            .expect("deletion of absent cell commits");
    }

    #[test]
    fn scan_keys_filters_by_slice_and_range() {
        let store = store();
        store
            .apply_mutations(
                1,
                &[
                    mutation(&[0, 0, 0, 0, 0, 0, 0, 1], vec![Entry::new(vec![1, 1], vec![])], Vec::new()),
                    mutation(&[0, 0, 0, 0, 0, 0, 0, 2], vec![Entry::new(vec![9, 9], vec![])], Vec::new()),
                ],
            )
            .expect("seed");

        let slice = SliceQuery::new(vec![1], vec![2]);
        let keys = store.scan_keys(&slice, None).expect("scan");
        assert_eq!(keys, vec![vec![0, 0, 0, 0, 0, 0, 0, 1]]);

        let range = KeyRange {
            start: vec![0, 0, 0, 0, 0, 0, 0, 2],
            end: vec![0xff; 8],
        };
        let keys = store.scan_keys(&slice, Some(&range)).expect("scan");
        assert!(keys.is_empty());
    }

    #[test]
    fn mixed_index_upserts_and_deletes_fields() {
        let index = MemoryMixedIndex::new("idx_text", Recorder::new());
        index
            .apply(&[MixedIndexOp {
                store: "vertex".into(),
                doc_id: "10".into(),
                field: "name".into(),
                value: PropertyValue::String("a".into()),
                kind: MutationKind::Addition,
                hint: true,
            }])
            .expect("add");
        assert!(index.document("vertex", "10").is_some());

        index
            .apply(&[MixedIndexOp {
                store: "vertex".into(),
                doc_id: "10".into(),
                field: "name".into(),
                value: PropertyValue::String("a".into()),
                kind: MutationKind::Deletion,
                hint: true,
            }])
            .expect("delete");
        assert!(index.document("vertex", "10").is_none());
    }
}
