use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::embedding::{EmbeddingError, LexicalIndexError, VectorIndexError};
use crate::generation::BackendError;
use crate::search::SearchError;
use crate::storage::StoreError;

/// Main error type for Mailsage
#[derive(Error, Debug)]
pub enum MailsageError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// Embedding or vector index unavailable while retrieving
    #[error("Retrieval failed: {0}")]
    Retrieval(String),

    /// Embedding errors
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    /// Vector index errors
    #[error(transparent)]
    VectorIndex(#[from] VectorIndexError),

    /// Lexical index errors
    #[error(transparent)]
    LexicalIndex(#[from] LexicalIndexError),

    /// Search errors
    #[error(transparent)]
    Search(#[from] SearchError),

    /// Store (system of record) errors
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Generation backend errors
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A non-fatal fallback taken while serving a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum Degradation {
    /// LLM classification unavailable; the pattern table was used
    Classification(String),
    /// HyDE or sub-query generation unavailable
    Enrichment(String),
    /// Fast-path store aggregate failed; fell through to retrieval
    Aggregate(String),
}

impl Degradation {
    pub fn reason(&self) -> &str {
        match self {
            Degradation::Classification(r) | Degradation::Enrichment(r) | Degradation::Aggregate(r) => r,
        }
    }
}

/// Machine-readable error category surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    RetrievalFailure,
    BackendCredentialMissing,
    BackendRateLimited,
    BackendContextExceeded,
    BackendAuthFailed,
    BackendFailure,
    StoreFailure,
    InvalidRequest,
    Config,
    Io,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RetrievalFailure => "retrieval_failure",
            ErrorKind::BackendCredentialMissing => "backend_credential_missing",
            ErrorKind::BackendRateLimited => "backend_rate_limited",
            ErrorKind::BackendContextExceeded => "backend_context_exceeded",
            ErrorKind::BackendAuthFailed => "backend_auth_failed",
            ErrorKind::BackendFailure => "backend_failure",
            ErrorKind::StoreFailure => "store_failure",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Config => "config",
            ErrorKind::Io => "io",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl MailsageError {
    /// Machine-readable category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            MailsageError::Config(_)
            | MailsageError::ConfigValidation { .. }
            | MailsageError::ConfigNotFound { .. }
            | MailsageError::InvalidConfigValue { .. }
            | MailsageError::Toml(_)
            | MailsageError::TomlSerialization(_) => ErrorKind::Config,
            MailsageError::Retrieval(_)
            | MailsageError::Embedding(_)
            | MailsageError::VectorIndex(_)
            | MailsageError::LexicalIndex(_) => ErrorKind::RetrievalFailure,
            MailsageError::Search(e) => e.kind(),
            MailsageError::Store(_) => ErrorKind::StoreFailure,
            MailsageError::Backend(e) => e.kind(),
            MailsageError::Io { .. } => ErrorKind::Io,
            MailsageError::Json { .. } | MailsageError::Other(_) => ErrorKind::Internal,
        }
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for Mailsage operations
pub type Result<T> = std::result::Result<T, MailsageError>;
