//! RIA Sandbox
//!
//! Everything between generated code and the host:
//! - **SecurityScreener**: static checks on user queries and generated code
//! - **SandboxExecutor**: bounded, isolated, disposable execution
//! - **Launcher**: how an isolated context is started and torn down
//!
//! # Example
//!
//! ```rust,ignore
//! use ria_sandbox::{ContainerLauncher, ExecutionRequest, SandboxConfig, SandboxExecutor};
//!
//! # async fn example() -> Result<(), ria_sandbox::SandboxError> {
//! let config = SandboxConfig::default();
//! let executor = SandboxExecutor::new(ContainerLauncher::new(config.container.clone()), config);
//!
//! let result = executor
//!     .execute(ExecutionRequest::new("print(1 + 1)", "/srv/datasets/sales"))
//!     .await?;
//! assert_eq!(result.stdout.trim(), "2");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod executor;
pub mod launcher;
pub mod result;
pub mod screen;

// Re-exports
pub use config::{ContainerConfig, SandboxConfig};
pub use error::SandboxError;
pub use executor::{CodeExecutor, ExecutionRequest, SandboxExecutor};
pub use launcher::{ContainerLauncher, ExitDisposition, JobSpec, Launcher};
#[cfg(any(test, feature = "unconfined"))]
pub use launcher::UnconfinedLauncher;
pub use result::{Artifact, ArtifactKind, ExecutionResult, FaultKind, ResourceLimit, SandboxFault};
pub use screen::{Rejection, RuleSpec, ScreenerConfig, SecurityScreener, ThreatCategory, Verdict};

/// Mount point of the read-only dataset inside the sandbox
pub const DATA_MOUNT: &str = "/data";

/// Mount point of the writable artifact directory inside the sandbox
pub const OUTPUT_MOUNT: &str = "/output";

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
