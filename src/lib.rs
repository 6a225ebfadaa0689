//! Transactional commit engine for a distributed graph database.
//!
//! The engine turns a transaction's in-memory relation additions and
//! deletions into physical key/column/value mutations, claims the optimistic
//! locks the configured consistency model requires, coordinates the flush
//! across a primary store and secondary index backends, and closes every
//! commit with a write-ahead transaction-log record sufficient for
//! post-crash reconciliation.

pub mod db;
pub mod error;
pub mod model;
pub mod schema;
pub mod storage;

pub use crate::db::{
    CommitMetrics, GraphConfig, GraphDB, GraphTransaction, TransactionConfig, TxState,
};
pub use crate::error::{GraphError, Result};
pub use crate::model::{
    Direction, Lifecycle, PropertyValue, Relation, RelationId, TypeId, VertexId,
};
pub use crate::schema::{
    Cardinality, CompositeIndexDef, ConsistencyModifier, MixedIndexDef, Multiplicity,
    RelationTypeDef, SchemaRegistry, SchemaStatus,
};
pub use crate::storage::backend::Backend;
pub use crate::storage::StoreFeatures;
