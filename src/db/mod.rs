mod config;
mod core;
mod metrics;
mod schema_cache;
mod transaction;

pub mod edge_ser;
pub mod ids;
pub mod index_ser;
pub mod txlog;

pub use config::{FixedClock, GraphConfig, SystemClock, TimestampProvider, TransactionConfig};
pub use self::core::{acquire_index_lock, acquire_relation_lock, GraphDB};
pub use metrics::CommitMetrics;
pub use schema_cache::{SchemaCache, SchemaRetriever};
pub use transaction::{GraphTransaction, TxState};
