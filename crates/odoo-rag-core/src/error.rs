//! Error taxonomy for the indexing and answering pipeline.
//!
//! Only [`ScanError::UnreadableRoot`] is fatal to a run. Every other error
//! is recoverable: the offending directory, declaration, or document is
//! skipped (and reported) while the rest of the work continues.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures while discovering modules under the scan root.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("cannot read module root {path}: {source}")]
    UnreadableRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("module {module}: malformed manifest {path}: {reason}")]
    MalformedManifest {
        module: String,
        path: PathBuf,
        reason: String,
    },
    #[error("module {module}: cannot read {path}: {source}")]
    Io {
        module: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures while extracting structural facts from one declaration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("{path}:{line}: malformed declaration: {reason}")]
    MalformedDeclaration {
        path: String,
        line: usize,
        reason: String,
    },
    #[error("{path}:{line}: {name} is part of an inheritance cycle ({chain})")]
    InheritanceCycle {
        name: String,
        path: String,
        line: usize,
        chain: String,
    },
}

impl ExtractionError {
    pub fn malformed(path: &str, line: usize, reason: impl Into<String>) -> Self {
        ExtractionError::MalformedDeclaration {
            path: path.to_string(),
            line,
            reason: reason.into(),
        }
    }
}

/// Failures at the embedding / vector-store boundary.
#[derive(Debug, Clone, Error)]
pub enum IndexServiceError {
    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout {
        operation: String,
        after: Duration,
    },
    #[error("{operation} failed: {message}")]
    Service { operation: String, message: String },
    #[error("index storage error: {0}")]
    Storage(String),
    #[error("embedding dimension mismatch: index holds {expected}-d vectors, got {actual}-d")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("document {id} ({title}): {source}")]
    Document {
        id: String,
        title: String,
        #[source]
        source: Box<IndexServiceError>,
    },
}

impl IndexServiceError {
    pub fn service(operation: impl Into<String>, message: impl ToString) -> Self {
        IndexServiceError::Service {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub fn storage(err: impl ToString) -> Self {
        IndexServiceError::Storage(err.to_string())
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            IndexServiceError::Timeout { .. } => true,
            IndexServiceError::Document { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

/// Failures at the text-generation boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("generation with {model} timed out after {}s", .after.as_secs())]
    Timeout { model: String, after: Duration },
    #[error("generation with {model} failed: {message}")]
    Service { model: String, message: String },
    #[error("generation is not configured: {0}")]
    NotConfigured(String),
}

/// Errors surfaced by an answering session. Neither variant ends the session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("retrieval failed: {0}")]
    Retrieval(#[from] IndexServiceError),
    /// Retrieval succeeded; the prompt is kept so the question can be retried.
    #[error("{0} (context preserved, retry to send it again)")]
    Generation(#[from] GenerationError),
    #[error("nothing to retry")]
    NothingToRetry,
}
