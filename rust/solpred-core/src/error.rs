// rust/solpred-core/src/error.rs

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoaderError {

    #[error("Cannot read shard '{path}': {message}")]
    ShardOpen {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Sample '{key}' failed to decode{}: {message}", field_suffix(.field))]
    Decode {
        key: String,
        field: Option<String>,
        message: String,
    },

    #[error("Sample '{key}' image stack mismatch: {message}")]
    Stack {
        key: String,
        message: String,
    },

    #[error("Decode worker {worker} panicked: {message}")]
    Worker {
        worker: usize,
        message: String,
    },

    #[error("Batch assembly error: {message}")]
    Batch {
        message: String,
    },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Storage error at '{path}': {message}")]
    Storage {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, LoaderError>;

fn field_suffix(field: &Option<String>) -> String {
    match field {
        Some(name) => format!(" (field '{name}')"),
        None => String::new(),
    }
}

// Convenience constructors
impl LoaderError {

    pub fn shard_open(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ShardOpen {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn shard_open_with_source(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::ShardOpen {
            path: path.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Re-labels a storage failure as a failure to open `shard`.
    pub fn into_shard_open(self, shard: impl Into<PathBuf>) -> Self {
        match self {
            Self::Storage { message, source, .. } => Self::ShardOpen {
                path: shard.into(),
                message,
                source,
            },
            err @ Self::ShardOpen { .. } => err,
            other => Self::shard_open(shard, other.to_string()),
        }
    }

    pub fn decode(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            key: key.into(),
            field: None,
            message: message.into(),
        }
    }

    pub fn decode_field(
        key: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Decode {
            key: key.into(),
            field: Some(field.into()),
            message: message.into(),
        }
    }

    pub fn stack(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Stack {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn worker_panicked(worker: usize, message: impl Into<String>) -> Self {
        Self::Worker {
            worker,
            message: message.into(),
        }
    }

    pub fn batch(message: impl Into<String>) -> Self {
        Self::Batch {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn storage(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn storage_with_source(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Whether this error concerns a single malformed sample rather than the pass.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }
}
