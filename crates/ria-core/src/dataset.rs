//! Dataset handle
//!
//! The orchestrator never reads data itself. A `DataEngine` describes a
//! dataset directory (schema, row count, a small sample); the directory is
//! what the sandbox mounts read-only. The fingerprint is derived from that
//! description, so re-uploading identical data keeps its cache partition.

use crate::error::CoreError;
use ria_cache::DataFingerprint;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Rows of sample data hashed into the fingerprint
pub const FINGERPRINT_SAMPLE_ROWS: usize = 20;

/// Column description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name
    pub name: String,
    /// Engine-reported type name
    pub dtype: String,
    /// Number of missing values
    pub null_count: u64,
}

impl ColumnInfo {
    /// Create column without missing values
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, dtype: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dtype: dtype.into(),
            null_count: 0,
        }
    }

    /// With missing value count
    #[inline]
    #[must_use]
    pub fn with_nulls(mut self, nulls: u64) -> Self {
        self.null_count = nulls;
        self
    }
}

/// What the pipeline knows about a dataset
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DatasetSchema {
    /// Table name as seen by generated code (file stem)
    pub table: String,
    /// Columns in order
    pub columns: Vec<ColumnInfo>,
    /// Total rows
    pub row_count: u64,
    /// Fully duplicated rows
    pub duplicate_rows: u64,
    /// First rows, stringified
    pub sample: Vec<Vec<String>>,
}

impl DatasetSchema {
    /// Whether there is anything to analyse
    #[inline]
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.row_count > 0 && !self.columns.is_empty()
    }

    /// Data quality notes attached to answers
    #[must_use]
    pub fn anomalies(&self) -> Vec<String> {
        let mut notes = Vec::new();

        let missing: Vec<&str> = self
            .columns
            .iter()
            .filter(|c| c.null_count > 0)
            .map(|c| c.name.as_str())
            .collect();
        if !missing.is_empty() {
            notes.push(format!(
                "Missing data detected in {} columns: {}",
                missing.len(),
                missing.join(", ")
            ));
        }

        if self.duplicate_rows > 0 {
            notes.push(format!("{} duplicate rows detected", self.duplicate_rows));
        }

        notes
    }

    /// Schema text given to the language model
    #[must_use]
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Table `{}` ({} rows)", self.table, self.row_count);
        for column in &self.columns {
            let _ = write!(out, "- {}: {}", column.name, column.dtype);
            if column.null_count > 0 {
                let _ = write!(out, " ({} missing)", column.null_count);
            }
            out.push('\n');
        }
        if !self.sample.is_empty() {
            out.push_str("Sample rows:\n");
            for row in self.sample.iter().take(5) {
                let _ = writeln!(out, "  {}", row.join(" | "));
            }
        }
        out
    }

    /// Content-derived fingerprint
    ///
    /// blake3 over the table name, columns, row count and the first
    /// `FINGERPRINT_SAMPLE_ROWS` sample rows. Fields are length-prefixed so
    /// adjacent values cannot run together.
    #[must_use]
    pub fn fingerprint(&self) -> DataFingerprint {
        let mut hasher = blake3::Hasher::new();
        let mut field = |bytes: &[u8]| {
            hasher.update(&(bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        };

        field(self.table.as_bytes());
        for column in &self.columns {
            field(column.name.as_bytes());
            field(column.dtype.as_bytes());
        }
        field(&self.row_count.to_le_bytes());
        for row in self.sample.iter().take(FINGERPRINT_SAMPLE_ROWS) {
            for value in row {
                field(value.as_bytes());
            }
            field(b"\n");
        }

        DataFingerprint::new(hasher.finalize().to_hex().to_string())
    }
}

/// Describes datasets stored in a directory
#[async_trait::async_trait]
pub trait DataEngine: Send + Sync {
    /// Describe the dataset in `dir`
    async fn schema(&self, dir: &Path) -> Result<DatasetSchema, CoreError>;

    /// Fingerprint the dataset in `dir`
    async fn fingerprint(&self, dir: &Path) -> Result<DataFingerprint, CoreError> {
        Ok(self.schema(dir).await?.fingerprint())
    }
}

/// Dataset a run is asked about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    input_dir: PathBuf,
    schema: DatasetSchema,
    fingerprint: DataFingerprint,
}

impl Dataset {
    /// Wrap an already-described dataset directory
    #[must_use]
    pub fn new(input_dir: impl Into<PathBuf>, schema: DatasetSchema) -> Self {
        let fingerprint = schema.fingerprint();
        Self {
            input_dir: input_dir.into(),
            schema,
            fingerprint,
        }
    }

    /// Describe a directory through an engine
    pub async fn open(engine: &dyn DataEngine, dir: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(CoreError::dataset(format!("{} is not a directory", dir.display())));
        }
        let schema = engine.schema(&dir).await?;
        Ok(Self::new(dir, schema))
    }

    /// Host directory mounted read-only into the sandbox
    #[inline]
    #[must_use]
    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    /// Dataset description
    #[inline]
    #[must_use]
    pub fn schema(&self) -> &DatasetSchema {
        &self.schema
    }

    /// Cache partition key
    #[inline]
    #[must_use]
    pub fn fingerprint(&self) -> &DataFingerprint {
        &self.fingerprint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> DatasetSchema {
        DatasetSchema {
            table: "sales".to_string(),
            columns: vec![
                ColumnInfo::new("region", "object"),
                ColumnInfo::new("revenue", "float64").with_nulls(3),
            ],
            row_count: 100,
            duplicate_rows: 0,
            sample: vec![vec!["north".to_string(), "10.5".to_string()]],
        }
    }

    #[test]
    fn fingerprint_is_stable_and_content_sensitive() {
        let a = schema();
        assert_eq!(a.fingerprint(), schema().fingerprint());
        assert_eq!(a.fingerprint().as_str().len(), 64);

        let mut more_rows = schema();
        more_rows.row_count = 101;
        assert_ne!(a.fingerprint(), more_rows.fingerprint());

        let mut other_sample = schema();
        other_sample.sample[0][1] = "11.0".to_string();
        assert_ne!(a.fingerprint(), other_sample.fingerprint());
    }

    #[test]
    fn fingerprint_fields_do_not_run_together() {
        let mut a = schema();
        a.columns = vec![ColumnInfo::new("ab", "c")];
        let mut b = schema();
        b.columns = vec![ColumnInfo::new("a", "bc")];
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn null_counts_do_not_change_fingerprint() {
        let mut cleaned = schema();
        cleaned.columns[1].null_count = 0;
        assert_eq!(schema().fingerprint(), cleaned.fingerprint());
    }

    #[test]
    fn anomaly_notes() {
        let mut s = schema();
        s.duplicate_rows = 4;
        let notes = s.anomalies();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0], "Missing data detected in 1 columns: revenue");
        assert_eq!(notes[1], "4 duplicate rows detected");
    }

    #[test]
    fn usability() {
        assert!(schema().is_usable());

        let mut no_rows = schema();
        no_rows.row_count = 0;
        assert!(!no_rows.is_usable());

        assert!(!DatasetSchema::default().is_usable());
    }

    #[test]
    fn describe_lists_columns() {
        let text = schema().describe();
        assert!(text.starts_with("Table `sales` (100 rows)"));
        assert!(text.contains("- revenue: float64 (3 missing)"));
        assert!(text.contains("north | 10.5"));
    }

    struct FixedEngine;

    #[async_trait::async_trait]
    impl DataEngine for FixedEngine {
        async fn schema(&self, _dir: &Path) -> Result<DatasetSchema, CoreError> {
            Ok(schema())
        }
    }

    #[tokio::test]
    async fn open_through_engine() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = Dataset::open(&FixedEngine, dir.path()).await.unwrap();
        assert_eq!(dataset.fingerprint(), &schema().fingerprint());
        assert_eq!(
            FixedEngine.fingerprint(dir.path()).await.unwrap(),
            dataset.fingerprint().clone()
        );

        let err = Dataset::open(&FixedEngine, dir.path().join("missing")).await.unwrap_err();
        assert!(matches!(err, CoreError::Dataset(_)));
    }
}
