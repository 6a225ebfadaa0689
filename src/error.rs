use std::collections::BTreeMap;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<GraphError>>,
    },
    #[error("lock acquisition failed: {0}")]
    Lock(String),
    #[error("index backends failed: {}", failure_names(.0))]
    Index(BTreeMap<String, String>),
    #[error("trigger log append failed: {0}")]
    TriggerLog(String),
    #[error("commit failed ({primary}); transaction log trailer write also failed")]
    TrailerShadow {
        primary: Box<GraphError>,
        #[source]
        trailer: Box<GraphError>,
    },
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("corruption detected: {0}")]
    Corruption(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("illegal state: {0}")]
    IllegalState(String),
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(&'static str),
    #[error("an instance with id [{0}] is already open; forced shutdown may be required")]
    AlreadyOpen(String),
}

impl GraphError {
    pub fn storage(message: impl Into<String>) -> Self {
        GraphError::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Index failures leave primary storage durable, so they are the one
    /// error class that must not trigger a rollback.
    pub fn requires_rollback(&self) -> bool {
        !matches!(self, GraphError::Index(_))
    }
}

fn failure_names(failures: &BTreeMap<String, String>) -> String {
    failures
        .keys()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
