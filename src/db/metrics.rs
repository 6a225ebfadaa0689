use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitMetrics {
    pub transactions_committed: u64,
    pub transactions_rolled_back: u64,
    pub commit_failures: u64,
    pub schema_flushes: u64,
    pub edge_locks_acquired: u64,
    pub index_locks_acquired: u64,
    pub index_mutation_failures: u64,
    pub trigger_log_failures: u64,
}

impl CommitMetrics {
    pub fn record_commit(&mut self, edge_locks: u64, index_locks: u64) {
        self.transactions_committed += 1;
        self.edge_locks_acquired += edge_locks;
        self.index_locks_acquired += index_locks;
    }

    pub fn record_rollback(&mut self) {
        self.transactions_rolled_back += 1;
    }

    pub fn record_commit_failure(&mut self) {
        self.commit_failures += 1;
    }

    pub fn record_schema_flush(&mut self) {
        self.schema_flushes += 1;
    }

    pub fn record_index_failures(&mut self, count: u64) {
        self.index_mutation_failures += count;
    }

    pub fn record_trigger_log_failure(&mut self) {
        self.trigger_log_failures += 1;
    }

    pub fn commit_success_rate(&self) -> f64 {
        let total = self.transactions_committed + self.commit_failures;
        if total == 0 {
            0.0
        } else {
            self.transactions_committed as f64 / total as f64
        }
    }
}
