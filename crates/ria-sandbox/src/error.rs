//! Error types for the sandbox
//!
//! These are infrastructure failures. Faults of the executed code itself
//! are not errors; they are reported inside `ExecutionResult`.

use std::path::PathBuf;

/// Sandbox infrastructure failure
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Isolated context could not be started
    #[error("failed to launch sandbox: {0}")]
    Launch(String),

    /// Job workspace could not be prepared or read back
    #[error("sandbox workspace error at {path}: {source}")]
    Workspace {
        /// Path being prepared
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Input mount does not exist or is not a directory
    #[error("input mount is not a directory: {0}")]
    InvalidInput(PathBuf),

    /// Executor is shutting down
    #[error("sandbox executor closed")]
    Closed,

    /// Screening rule pattern does not compile
    #[error("invalid screening rule '{id}': {source}")]
    InvalidRule {
        /// Rule identifier
        id: String,
        /// Regex compile error
        #[source]
        source: regex::Error,
    },
}

impl SandboxError {
    /// Create workspace error for path
    pub fn workspace(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Workspace {
            path: path.into(),
            source,
        }
    }
}
