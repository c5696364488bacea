//! Error types for the persisted heartbeat state

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for heartbeat state operations
pub type StateResult<T> = Result<T, StateError>;

#[derive(Error, Debug)]
pub enum StateError {
    /// The state file exists but does not hold an epoch-seconds integer
    #[error("Invalid heartbeat state in {path}: {content:?}")]
    Parse { path: PathBuf, content: String },

    /// IO error wrapper
    #[error("Heartbeat state IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
