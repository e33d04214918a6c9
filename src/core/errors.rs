//! QBJ-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, QbjError>;

/// Top-level error type for the question bank janitor.
#[derive(Debug, Error)]
pub enum QbjError {
    #[error("[QBJ-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[QBJ-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[QBJ-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[QBJ-1101] invalid scope: {details}")]
    InvalidScope { details: String },

    #[error("[QBJ-1102] context not found: {details}")]
    ContextNotFound { details: String },

    #[error("[QBJ-2001] question {question_id} could not be deleted: {details}")]
    DeleteFailed { question_id: i64, details: String },

    #[error("[QBJ-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[QBJ-2102] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[QBJ-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl QbjError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "QBJ-1001",
            Self::MissingConfig { .. } => "QBJ-1002",
            Self::ConfigParse { .. } => "QBJ-1003",
            Self::InvalidScope { .. } => "QBJ-1101",
            Self::ContextNotFound { .. } => "QBJ-1102",
            Self::DeleteFailed { .. } => "QBJ-2001",
            Self::Serialization { .. } => "QBJ-2101",
            Self::Sql { .. } => "QBJ-2102",
            Self::Io { .. } => "QBJ-3002",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Sql { .. } | Self::DeleteFailed { .. })
    }

    /// Whether the error stems from caller input rather than the store.
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. }
                | Self::MissingConfig { .. }
                | Self::ConfigParse { .. }
                | Self::InvalidScope { .. }
                | Self::ContextNotFound { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for QbjError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for QbjError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for QbjError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
