//! Error types for RIA Core
//!
//! Pipeline failures never surface as these errors: a run always ends in a
//! `Response` or an `AbortReport`. `CoreError` covers construction,
//! configuration and dataset preparation.

use crate::state_machine::Stage;
use ria_sandbox::SandboxError;
use std::path::PathBuf;

/// Main core error type
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Configuration could not be loaded or is invalid
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Sandbox component could not be built
    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    /// Dataset could not be described
    #[error("dataset error: {0}")]
    Dataset(String),

    /// Orchestrator attempted a transition the state machine forbids
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition {
        /// Current stage
        from: Stage,
        /// Requested stage
        to: Stage,
    },
}

impl CoreError {
    /// Create dataset error
    #[inline]
    pub fn dataset(message: impl Into<String>) -> Self {
        Self::Dataset(message.into())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Config text is not valid TOML for the schema
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Offending key
        field: &'static str,
        /// What is wrong
        reason: String,
    },
}

impl ConfigError {
    /// Create out-of-range error
    #[inline]
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
