//! Storage abstractions the commit engine writes through.
//!
//! The engine never talks to a concrete backend directly: a primary
//! key-column-value store, zero or more mixed (search) index backends, and
//! append-only log stores are consumed behind the traits defined here. The
//! [`memory`] module provides a conforming in-process implementation.

pub mod backend;
pub mod memory;
pub mod ser;
pub mod tx;

use std::collections::BTreeMap;

use crate::error::Result;
use crate::model::PropertyValue;

/// Opaque byte key/column/value buffer.
pub type StaticBuffer = Vec<u8>;

/// A single column/value cell under some key. `ttl_secs` is carried as entry
/// metadata and only ever set on additions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub column: StaticBuffer,
    pub value: StaticBuffer,
    pub ttl_secs: Option<u32>,
}

impl Entry {
    pub fn new(column: StaticBuffer, value: StaticBuffer) -> Self {
        Entry {
            column,
            value,
            ttl_secs: None,
        }
    }
}

pub type EntryList = Vec<Entry>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Addition,
    Deletion,
}

/// Half-open column range `[start, end)` within one key, optionally limited
/// to the first `limit` entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceQuery {
    pub start: StaticBuffer,
    pub end: StaticBuffer,
    pub limit: Option<usize>,
}

impl SliceQuery {
    pub fn new(start: StaticBuffer, end: StaticBuffer) -> Self {
        SliceQuery {
            start,
            end,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn contains(&self, column: &[u8]) -> bool {
        column >= self.start.as_slice() && column < self.end.as_slice()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySliceQuery {
    pub key: StaticBuffer,
    pub slice: SliceQuery,
}

impl KeySliceQuery {
    pub fn new(key: StaticBuffer, slice: SliceQuery) -> Self {
        KeySliceQuery { key, slice }
    }
}

/// Half-open key range `[start, end)` for ordered scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub start: StaticBuffer,
    pub end: StaticBuffer,
}

/// Queued additions and deletions for one key, applied in insertion order.
#[derive(Debug, Clone)]
pub struct KeyMutations {
    pub key: StaticBuffer,
    pub additions: Vec<Entry>,
    pub deletions: Vec<Entry>,
}

/// Optimistic claim on a `(key, column)` cell. Deletions claim the full
/// entry so the held value can be re-verified at commit; additions claim the
/// column alone, permitting concurrent appends of distinct columns.
#[derive(Debug, Clone)]
pub enum LockClaim {
    Entry(Entry),
    Column(StaticBuffer),
}

impl LockClaim {
    pub fn column(&self) -> &StaticBuffer {
        match self {
            LockClaim::Entry(entry) => &entry.column,
            LockClaim::Column(column) => column,
        }
    }

    pub fn expected_value(&self) -> Option<&StaticBuffer> {
        match self {
            LockClaim::Entry(entry) => Some(&entry.value),
            LockClaim::Column(_) => None,
        }
    }
}

/// Capability flags of a backend, fixed at open time.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreFeatures {
    pub has_tx_isolation: bool,
    pub has_ordered_scan: bool,
    pub has_unordered_scan: bool,
    pub is_distributed: bool,
    pub is_key_ordered: bool,
}

/// Primary key-column-value store contract: slice reads, key scans,
/// per-(key, column) optimistic locks, and batched mutation application.
pub trait KeyColumnValueStore: Send + Sync {
    fn name(&self) -> &str;

    fn slice_query(&self, query: &KeySliceQuery) -> Result<EntryList>;

    fn multi_slice_query(
        &self,
        keys: &[StaticBuffer],
        slice: &SliceQuery,
    ) -> Result<BTreeMap<StaticBuffer, EntryList>>;

    /// Keys owning at least one column inside `slice`. `range` restricts the
    /// scan to an ordered key interval; `None` asks for an unordered scan.
    fn scan_keys(&self, slice: &SliceQuery, range: Option<&KeyRange>) -> Result<Vec<StaticBuffer>>;

    fn acquire_lock(&self, holder: u64, key: &StaticBuffer, claim: &LockClaim) -> Result<()>;

    fn apply_mutations(&self, holder: u64, batch: &[KeyMutations]) -> Result<()>;

    fn release_locks(&self, holder: u64);
}

/// One queued document mutation against a mixed-index backend. `hint` tells
/// the backend whether the owning element was NEW (additions, allowing a
/// plain upsert) or REMOVED (deletions, allowing full document removal).
#[derive(Debug, Clone)]
pub struct MixedIndexOp {
    pub store: String,
    pub doc_id: String,
    pub field: String,
    pub value: PropertyValue,
    pub kind: MutationKind,
    pub hint: bool,
}

/// External search backend maintaining a mixed index. Lock-free; failures
/// are reported per commit and never roll back primary storage.
pub trait MixedIndexBackend: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, ops: &[MixedIndexOp]) -> Result<()>;
}

/// Append-only log with at-least-once semantics. Transaction-log records are
/// keyed; trigger-log records are not.
pub trait LogStore: Send + Sync {
    fn name(&self) -> &str;

    fn append(&self, key: Option<&StaticBuffer>, payload: &[u8]) -> Result<()>;
}
