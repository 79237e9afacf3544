//! Execution outcome types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// What kind of file the code left in the output mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Rendered chart image
    Chart,
    /// Tabular export
    Table,
    /// Anything else
    Other,
}

impl ArtifactKind {
    /// Classify by file extension
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match ext.as_str() {
            "png" | "jpg" | "jpeg" | "svg" | "gif" | "webp" => Self::Chart,
            "csv" | "tsv" | "json" | "parquet" | "xlsx" | "html" => Self::Table,
            _ => Self::Other,
        }
    }
}

/// File collected from the output mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// File name inside the output mount
    pub name: String,
    /// Classification
    pub kind: ArtifactKind,
    /// File content
    #[serde(skip)]
    pub bytes: Vec<u8>,
    /// Content size in bytes
    pub size: u64,
}

/// Ceiling that was breached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceLimit {
    /// Execution timeout
    WallClock,
    /// Memory ceiling (killed by the runtime)
    Memory,
}

/// Fault class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Timeout or resource ceiling breach
    ResourceExceeded,
    /// Code exited non-zero
    RuntimeFault,
}

impl FaultKind {
    /// Stable name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResourceExceeded => "resource_exceeded",
            Self::RuntimeFault => "runtime_fault",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fault of the executed code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxFault {
    /// Fault class
    pub kind: FaultKind,
    /// Breached ceiling, for `ResourceExceeded`
    pub limit: Option<ResourceLimit>,
    /// Diagnostic text (captured stderr for runtime faults)
    pub message: String,
}

impl SandboxFault {
    /// Ceiling breach
    #[inline]
    #[must_use]
    pub fn resource_exceeded(limit: ResourceLimit, message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::ResourceExceeded,
            limit: Some(limit),
            message: message.into(),
        }
    }

    /// Non-zero exit
    #[inline]
    #[must_use]
    pub fn runtime(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::RuntimeFault,
            limit: None,
            message: message.into(),
        }
    }
}

/// Outcome of one sandbox run
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Files found in the output mount (empty unless the run succeeded)
    pub artifacts: Vec<Artifact>,
    /// Process exit code, if it exited normally
    pub exit_status: Option<i32>,
    /// Set when the code did not complete successfully
    pub fault: Option<SandboxFault>,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// Whether the run completed without a fault
    #[inline]
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.fault.is_none()
    }

    /// Fault class, if any
    #[inline]
    #[must_use]
    pub fn fault_kind(&self) -> Option<FaultKind> {
        self.fault.as_ref().map(|f| f.kind)
    }

    /// Artifacts of one kind
    pub fn artifacts_of(&self, kind: ArtifactKind) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter().filter(move |a| a.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_kind_by_extension() {
        assert_eq!(ArtifactKind::from_path(Path::new("chart.PNG")), ArtifactKind::Chart);
        assert_eq!(ArtifactKind::from_path(Path::new("by_region.csv")), ArtifactKind::Table);
        assert_eq!(ArtifactKind::from_path(Path::new("notes.txt")), ArtifactKind::Other);
        assert_eq!(ArtifactKind::from_path(Path::new("noext")), ArtifactKind::Other);
    }

    #[test]
    fn fault_helpers() {
        let result = ExecutionResult {
            fault: Some(SandboxFault::resource_exceeded(ResourceLimit::WallClock, "timeout")),
            ..Default::default()
        };
        assert!(!result.succeeded());
        assert_eq!(result.fault_kind(), Some(FaultKind::ResourceExceeded));
        assert_eq!(FaultKind::RuntimeFault.to_string(), "runtime_fault");
    }
}
