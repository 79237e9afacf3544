//! Testing utilities for RIA workspace
//!
//! Scripted stand-ins for the external collaborators, with call counters,
//! plus dataset and execution-result fixtures.

#![allow(missing_docs)]

mod executor;
mod fixtures;
mod provider;

pub use executor::{ExecStep, ScriptedExecutor};
pub use fixtures::{
    chart_result, fast_config, memory_fault, runtime_fault, sales_dataset, sales_schema, table_result, text_result,
    timeout_fault, FixtureEngine,
};
pub use provider::{HashEmbedder, Reply, ScriptedProvider};

use ria_core::{Orchestrator, PipelineConfig};
use std::sync::Arc;

/// Orchestrator wired to scripted collaborators
pub fn setup_orchestrator(
    config: PipelineConfig,
    provider: &Arc<ScriptedProvider>,
    embedder: &Arc<HashEmbedder>,
    executor: &Arc<ScriptedExecutor>,
) -> Orchestrator {
    Orchestrator::new(config, provider.clone(), embedder.clone(), executor.clone()).unwrap()
}
