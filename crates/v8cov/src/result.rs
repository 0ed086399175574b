//! Result and error types for v8cov.

use thiserror::Error;

/// Result type for v8cov operations
pub type CovResult<T> = Result<T, CovError>;

/// Errors that can occur while processing coverage
#[derive(Debug, Error)]
pub enum CovError {
    /// Source map could not be read or decoded
    #[error("Source map error for {path}: {message}")]
    SourceMap {
        /// Map location (file path or script url)
        path: String,
        /// Error message
        message: String,
    },

    /// Script code could not be parsed
    #[error("Failed to parse {url}: {message}")]
    Parse {
        /// Script url
        url: String,
        /// Error message
        message: String,
    },

    /// A pool worker died while running a task
    #[error("Worker {worker_id} crashed: {message}")]
    WorkerCrashed {
        /// Worker identifier
        worker_id: usize,
        /// Panic payload or failure description
        message: String,
    },

    /// A pool worker thread could not be started
    #[error("Failed to spawn worker: {message}")]
    WorkerSpawn {
        /// Error message
        message: String,
    },

    /// The pool was terminated before the task produced a result
    #[error("Worker pool has been terminated")]
    PoolTerminated,

    /// Invalid exclude/include pattern
    #[error("Invalid pattern {pattern}: {message}")]
    InvalidPattern {
        /// Pattern text
        pattern: String,
        /// Error message
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Coverage collector failure
    #[error("Collector {name} failed: {message}")]
    Collector {
        /// Collector name
        name: String,
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CovError {
    /// Create a source map error
    #[must_use]
    pub fn source_map(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SourceMap {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a parse error
    #[must_use]
    pub fn parse(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create an invalid pattern error
    #[must_use]
    pub fn invalid_pattern(pattern: impl Into<String>, message: impl ToString) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a collector error
    #[must_use]
    pub fn collector(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Collector {
            name: name.into(),
            message: message.into(),
        }
    }
}
