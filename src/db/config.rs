use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of commit timestamps. The engine only assumes the values are
/// monotonically increasing; provider units are microseconds.
pub trait TimestampProvider: Send + Sync {
    fn now_micros(&self) -> i64;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl TimestampProvider for SystemClock {
    fn now_micros(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_micros() as i64)
            .unwrap_or(0)
    }
}

/// Fixed clock for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl TimestampProvider for FixedClock {
    fn now_micros(&self) -> i64 {
        self.0
    }
}

#[derive(Clone)]
pub struct GraphConfig {
    pub unique_instance_id: String,
    pub log_transactions: bool,
    pub allow_setting_vertex_id: bool,
    pub timestamps: Arc<dyn TimestampProvider>,
}

impl GraphConfig {
    pub fn new(unique_instance_id: impl Into<String>) -> Self {
        GraphConfig {
            unique_instance_id: unique_instance_id.into(),
            log_transactions: false,
            allow_setting_vertex_id: false,
            timestamps: Arc::new(SystemClock),
        }
    }

    pub fn with_transaction_log(mut self) -> Self {
        self.log_transactions = true;
        self
    }

    pub fn with_vertex_id_setting(mut self) -> Self {
        self.allow_setting_vertex_id = true;
        self
    }

    pub fn with_timestamps(mut self, timestamps: Arc<dyn TimestampProvider>) -> Self {
        self.timestamps = timestamps;
        self
    }
}

impl fmt::Debug for GraphConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphConfig")
            .field("unique_instance_id", &self.unique_instance_id)
            .field("log_transactions", &self.log_transactions)
            .field("allow_setting_vertex_id", &self.allow_setting_vertex_id)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionConfig {
    pub acquire_locks: bool,
    pub batch_loading: bool,
    pub assign_ids_immediately: bool,
    pub log_identifier: Option<String>,
    /// Commit timestamp in provider units; stamped by the engine when unset.
    pub commit_time: Option<i64>,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        TransactionConfig {
            acquire_locks: true,
            batch_loading: false,
            assign_ids_immediately: false,
            log_identifier: None,
            commit_time: None,
        }
    }
}

impl TransactionConfig {
    /// Bulk-ingest preset: no locks, no per-relation consistency work.
    pub fn batch_loading() -> Self {
        TransactionConfig {
            acquire_locks: false,
            batch_loading: true,
            assign_ids_immediately: true,
            log_identifier: None,
            commit_time: None,
        }
    }

    pub fn with_log_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.log_identifier = Some(identifier.into());
        self
    }

    pub fn has_commit_time(&self) -> bool {
        self.commit_time.is_some()
    }
}
