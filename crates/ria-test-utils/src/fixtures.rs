use ria_core::{ColumnInfo, CoreError, DataEngine, Dataset, DatasetSchema, PipelineConfig};
use ria_sandbox::{Artifact, ArtifactKind, ExecutionResult, ResourceLimit, SandboxConfig, SandboxFault};
use std::path::Path;
use std::time::Duration;

/// Retail sales table description
pub fn sales_schema() -> DatasetSchema {
    DatasetSchema {
        table: "sales".to_string(),
        columns: vec![
            ColumnInfo::new("order_date", "datetime64[ns]"),
            ColumnInfo::new("region", "object"),
            ColumnInfo::new("product", "object"),
            ColumnInfo::new("units", "int64"),
            ColumnInfo::new("revenue", "float64").with_nulls(2),
        ],
        row_count: 1_200,
        duplicate_rows: 0,
        sample: vec![
            vec!["2023-01-03".into(), "north".into(), "widget".into(), "4".into(), "39.96".into()],
            vec!["2023-01-03".into(), "south".into(), "gadget".into(), "1".into(), "24.50".into()],
        ],
    }
}

/// Dataset over `sales_schema` (the directory is never read by scripted executors)
pub fn sales_dataset() -> Dataset {
    Dataset::new("/srv/datasets/sales", sales_schema())
}

/// Engine describing every directory with a fixed schema
#[derive(Debug, Clone)]
pub struct FixtureEngine(pub DatasetSchema);

#[async_trait::async_trait]
impl DataEngine for FixtureEngine {
    async fn schema(&self, _dir: &Path) -> Result<DatasetSchema, CoreError> {
        Ok(self.0.clone())
    }
}

/// Short budgets suitable for tests
pub fn fast_config() -> PipelineConfig {
    PipelineConfig::new()
        .with_max_attempts(3)
        .with_run_timeout(Duration::from_secs(10))
        .with_provider_timeout(Duration::from_secs(2))
        .with_retry_backoff(Duration::from_millis(10))
        .with_sandbox(SandboxConfig::new().with_timeout_secs(5))
}

pub fn text_result(stdout: &str) -> ExecutionResult {
    ExecutionResult {
        stdout: format!("{stdout}\n"),
        exit_status: Some(0),
        duration_ms: 120,
        ..Default::default()
    }
}

pub fn chart_result(stdout: &str) -> ExecutionResult {
    let mut result = text_result(stdout);
    result.artifacts.push(Artifact {
        name: "chart.png".to_string(),
        kind: ArtifactKind::Chart,
        bytes: b"\x89PNG".to_vec(),
        size: 4,
    });
    result
}

pub fn table_result(rows: &[&str]) -> ExecutionResult {
    text_result(&rows.join("\n"))
}

pub fn runtime_fault(stderr: &str) -> ExecutionResult {
    ExecutionResult {
        stderr: stderr.to_string(),
        exit_status: Some(1),
        fault: Some(SandboxFault::runtime(stderr)),
        duration_ms: 80,
        ..Default::default()
    }
}

pub fn timeout_fault() -> ExecutionResult {
    ExecutionResult {
        fault: Some(SandboxFault::resource_exceeded(
            ResourceLimit::WallClock,
            "execution exceeded 5s",
        )),
        duration_ms: 5_000,
        ..Default::default()
    }
}

pub fn memory_fault() -> ExecutionResult {
    ExecutionResult {
        exit_status: Some(137),
        fault: Some(SandboxFault::resource_exceeded(ResourceLimit::Memory, "killed: memory ceiling")),
        duration_ms: 900,
        ..Default::default()
    }
}
