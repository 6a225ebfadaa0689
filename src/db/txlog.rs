use crate::db::config::TransactionConfig;
use crate::error::{GraphError, Result};
use crate::storage::ser::{self, Cursor};
use crate::storage::{Entry, StaticBuffer};

/// Phases a transaction-log record can carry. `*_System` statuses frame the
/// schema sub-commit on backends without transactional isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTxStatus {
    PreflushSystem,
    SuccessSystem,
    FailureSystem,
    Precommit,
    Success,
    Failure,
}

impl LogTxStatus {
    pub fn as_byte(self) -> u8 {
        match self {
            LogTxStatus::PreflushSystem => 1,
            LogTxStatus::SuccessSystem => 2,
            LogTxStatus::FailureSystem => 3,
            LogTxStatus::Precommit => 4,
            LogTxStatus::Success => 5,
            LogTxStatus::Failure => 6,
        }
    }

    pub fn from_byte(byte: u8) -> Result<LogTxStatus> {
        match byte {
            1 => Ok(LogTxStatus::PreflushSystem),
            2 => Ok(LogTxStatus::SuccessSystem),
            3 => Ok(LogTxStatus::FailureSystem),
            4 => Ok(LogTxStatus::Precommit),
            5 => Ok(LogTxStatus::Success),
            6 => Ok(LogTxStatus::Failure),
            other => Err(GraphError::Corruption(format!(
                "unknown transaction log status: {other}"
            ))),
        }
    }

    pub fn is_trailer(self) -> bool {
        matches!(
            self,
            LogTxStatus::SuccessSystem
                | LogTxStatus::FailureSystem
                | LogTxStatus::Success
                | LogTxStatus::Failure
        )
    }
}

const CONFIG_ACQUIRE_LOCKS: u8 = 1 << 0;
const CONFIG_BATCH_LOADING: u8 = 1 << 1;
const CONFIG_ASSIGN_IDS: u8 = 1 << 2;
const CONFIG_HAS_LOG_ID: u8 = 1 << 3;

/// Recovery-log record framing: every record for a transaction shares this
/// header and is keyed by the 8-byte big-endian transaction id.
#[derive(Debug, Clone, Copy)]
pub struct TransactionLogHeader {
    pub tx_id: u64,
    pub commit_time: i64,
}

impl TransactionLogHeader {
    pub fn new(tx_id: u64, commit_time: i64) -> Self {
        TransactionLogHeader { tx_id, commit_time }
    }

    pub fn log_key(&self) -> StaticBuffer {
        self.tx_id.to_be_bytes().to_vec()
    }

    /// Header layout: tx id (varlong), commit time (i64, provider units),
    /// status byte, then the optional transaction configuration.
    pub fn serialize_header(
        &self,
        status: LogTxStatus,
        config: Option<&TransactionConfig>,
    ) -> Vec<u8> {
        let mut out = Vec::with_capacity(20);
        ser::write_varlong(&mut out, self.tx_id);
        ser::write_i64(&mut out, self.commit_time);
        out.push(status.as_byte());
        if let Some(config) = config {
            let mut flags = 0u8;
            if config.acquire_locks {
                flags |= CONFIG_ACQUIRE_LOCKS;
            }
            if config.batch_loading {
                flags |= CONFIG_BATCH_LOADING;
            }
            if config.assign_ids_immediately {
                flags |= CONFIG_ASSIGN_IDS;
            }
            if config.log_identifier.is_some() {
                flags |= CONFIG_HAS_LOG_ID;
            }
            out.push(flags);
            if let Some(identifier) = &config.log_identifier {
                ser::write_string(&mut out, identifier);
            }
        }
        out
    }

    /// Closing record. A FAILURE trailer carries enough detail for
    /// post-crash reconciliation: which side of the commit survived and
    /// which index backends did not.
    pub fn serialize_trailer(
        &self,
        status: LogTxStatus,
        storage_success: bool,
        trigger_success: bool,
        failed_indexes: &[&str],
    ) -> Vec<u8> {
        let mut out = self.serialize_header(status, None);
        if status == LogTxStatus::Failure {
            ser::write_bool(&mut out, storage_success);
            ser::write_bool(&mut out, trigger_success);
            ser::write_varlong(&mut out, failed_indexes.len() as u64);
            for index in failed_indexes {
                debug_assert!(!index.is_empty());
                ser::write_string(&mut out, index);
            }
        }
        out
    }
}

/// Decoded transaction-log record, used by recovery tooling and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLogRecord {
    pub tx_id: u64,
    pub commit_time: i64,
    pub status: LogTxStatus,
    pub storage_success: Option<bool>,
    pub trigger_success: Option<bool>,
    pub failed_indexes: Vec<String>,
}

pub fn decode_log_record(payload: &[u8]) -> Result<DecodedLogRecord> {
    let mut cursor = Cursor::new(payload);
    let tx_id = cursor.read_varlong()?;
    let commit_time = cursor.read_i64()?;
    let status = LogTxStatus::from_byte(cursor.read_u8()?)?;
    let mut record = DecodedLogRecord {
        tx_id,
        commit_time,
        status,
        storage_success: None,
        trigger_success: None,
        failed_indexes: Vec::new(),
    };
    if status == LogTxStatus::Failure && cursor.remaining() > 0 {
        record.storage_success = Some(cursor.read_bool()?);
        record.trigger_success = Some(cursor.read_bool()?);
        let count = cursor.read_varlong()?;
        for _ in 0..count {
            record.failed_indexes.push(cursor.read_string()?);
        }
    }
    Ok(record)
}

/// Trigger/audit-log framing: commit time, tx id, then each relation list as
/// a varlong count followed by `(vertex0 id, position-0 entry)` pairs.
pub struct TriggerLogWriter {
    out: Vec<u8>,
}

impl TriggerLogWriter {
    pub fn new(header: &TransactionLogHeader, capacity_hint: usize) -> Self {
        let mut out = Vec::with_capacity(20 + capacity_hint * 40);
        ser::write_i64(&mut out, header.commit_time);
        ser::write_varlong(&mut out, header.tx_id);
        TriggerLogWriter { out }
    }

    pub fn begin_relation_list(&mut self, count: usize) {
        ser::write_varlong(&mut self.out, count as u64);
    }

    pub fn relation(&mut self, vertex0_id: u64, entry: &Entry) {
        ser::write_varlong(&mut self.out, vertex0_id);
        ser::write_bytes(&mut self.out, &entry.column);
        ser::write_bytes(&mut self.out, &entry.value);
    }

    pub fn finish(self) -> Vec<u8> {
        self.out
    }
}
