use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse JSON at {path}: {source}")]
    JsonParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize task for {path}: {source}")]
    JsonSerialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid session key '{key}': {reason}")]
    InvalidSessionKey { key: String, reason: &'static str },

    #[error("{path} has unsupported store version {found}; expected 1")]
    UnsupportedVersion { path: PathBuf, found: u32 },

    #[error("{path} belongs to session '{found}', expected '{expected}'")]
    SessionKeyMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("{path} has invalid RFC3339 timestamp in field '{field}': {value}")]
    InvalidTimestamp {
        path: PathBuf,
        field: &'static str,
        value: String,
    },

    #[error("{path} contains a duplicate command id '{id}'")]
    DuplicateCommandId { path: PathBuf, id: String },

    #[error("{path} has result '{result_id}' referencing command '{command_id}' outside its entry")]
    DanglingResult {
        path: PathBuf,
        result_id: String,
        command_id: String,
    },

    #[error("{path} has an outcome for result '{found}' attached to result '{result_id}'")]
    MismatchedOutcome {
        path: PathBuf,
        result_id: String,
        found: String,
    },

    #[error("{path} has a stopped task without a resume context")]
    MissingStoppedContext { path: PathBuf },

    #[error("{path} has a {state} task without a proposed command")]
    MissingProposal { path: PathBuf, state: &'static str },
}

impl SessionStoreError {
    #[must_use]
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn json_parse(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::JsonParse {
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn json_serialize(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::JsonSerialize {
            path: path.into(),
            source,
        }
    }

    /// Errors caused by the stored bytes rather than by the filesystem.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        !matches!(
            self,
            Self::Io { .. } | Self::JsonSerialize { .. } | Self::InvalidSessionKey { .. }
        )
    }
}
