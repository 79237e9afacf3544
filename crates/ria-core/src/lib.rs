//! RIA Core
//!
//! Turns a natural-language question about a dataset into executed,
//! validated analysis code and a business-readable answer.
//!
//! # Overview
//!
//! - **Orchestrator**: bounded state machine sequencing the agents
//! - **Agents**: classifier, planner, generator, optimizer, validator,
//!   summarizer, insight and explanation
//! - **SessionState**: everything a run produced, returned on success and
//!   on abort
//! - **Trace**: typed event log per session, broadcast to observers
//!
//! # Example
//!
//! ```rust,ignore
//! use ria_core::{Dataset, Orchestrator, PipelineConfig};
//!
//! let config = PipelineConfig::load("ria.toml")?;
//! let orchestrator = Orchestrator::new(config, provider, embedder, executor)?;
//!
//! match orchestrator.run("Total revenue by region in 2023?", &dataset).await {
//!     Ok(response) => println!("{}", response.answer.summary),
//!     Err(report) => eprintln!("{} after {} attempts", report, report.state.attempt_count),
//! }
//! ```

#![warn(missing_docs)]

pub mod agents;
pub mod config;
pub mod dataset;
pub mod error;
pub mod orchestrator;
pub mod state;
pub mod state_machine;
pub mod trace;

// Re-exports
pub use config::PipelineConfig;
pub use dataset::{ColumnInfo, DataEngine, Dataset, DatasetSchema};
pub use error::{ConfigError, CoreError};
pub use orchestrator::{AnswerCache, Orchestrator};
pub use state::{
    AbortKind, AbortReport, Classification, CodeAttempt, ExpectedShape, FinalAnswer, QueryKind, Response,
    RetryReason, SessionState, StageTiming, ValidationVerdict,
};
pub use state_machine::Stage;
pub use trace::{TraceBus, TraceEvent, TraceKind};

pub use ria_cache::DataFingerprint;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
