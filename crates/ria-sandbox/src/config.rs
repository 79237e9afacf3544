//! Sandbox configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Executor limits shared by all sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Simultaneous executions across all sessions; excess requests queue
    pub max_parallel_executions: usize,
    /// Wall-clock budget per execution
    pub execution_timeout_seconds: u64,
    /// Captured stdout/stderr beyond this many bytes is dropped
    pub max_output_bytes: usize,
    /// Output files larger than this are not collected
    pub max_artifact_bytes: u64,
    /// Container runtime settings
    pub container: ContainerConfig,
}

impl SandboxConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With concurrency ceiling
    #[inline]
    #[must_use]
    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel_executions = max;
        self
    }

    /// With per-execution timeout
    #[inline]
    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.execution_timeout_seconds = secs;
        self
    }

    /// Per-execution timeout
    #[inline]
    #[must_use]
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_seconds)
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_parallel_executions: 5,
            execution_timeout_seconds: 30,
            max_output_bytes: 64 * 1024,
            max_artifact_bytes: 5 * 1024 * 1024,
            container: ContainerConfig::default(),
        }
    }
}

/// Container runtime invocation settings
///
/// Ceilings are passed as runtime flags; the executed code cannot change
/// them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Runtime binary (docker, podman)
    pub runtime: String,
    /// Image with the analysis interpreter and libraries
    pub image: String,
    /// Interpreter command; the script path is appended
    pub interpreter: Vec<String>,
    /// Memory ceiling in MB (swap disabled)
    pub memory_mb: u64,
    /// CPU ceiling in cores
    pub cpus: f32,
    /// Maximum processes/threads inside the container
    pub pids_limit: u32,
    /// Size of the scratch tmpfs in MB
    pub tmpfs_mb: u64,
    /// Unprivileged uid:gid inside the container
    pub user: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            runtime: "docker".to_string(),
            image: "ria-executor:latest".to_string(),
            interpreter: vec!["python".to_string(), "-I".to_string()],
            memory_mb: 512,
            cpus: 1.0,
            pids_limit: 64,
            tmpfs_mb: 64,
            user: "65534:65534".to_string(),
        }
    }
}
