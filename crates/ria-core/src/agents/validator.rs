//! Result validator
//!
//! Checks, in order:
//! 1. dataset usable (rows and columns present), else abort
//! 2. sandbox fault: retry, or abort if the same fault was seen before
//! 3. explicit `UNANSWERABLE:` marker in stdout: abort
//! 4. output shape against the classification: retry
//! 5. numeric sanity (non-finite values, empty result set): retry

use super::generator::UNANSWERABLE_MARKER;
use crate::dataset::DatasetSchema;
use crate::state::{AbortKind, Classification, ExpectedShape, RetryReason, ValidationVerdict};
use once_cell::sync::Lazy;
use regex::Regex;
use ria_sandbox::{ArtifactKind, ExecutionResult, FaultKind, ResourceLimit, SandboxFault};
use serde::{Deserialize, Serialize};

static HEX_ADDRESS: Lazy<Regex> = Lazy::new(|| Regex::new(r"0x[0-9a-fA-F]+").expect("valid regex"));
static PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[^\s"']*/[^\s"']*"#).expect("valid regex"));
static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid regex"));
static NON_FINITE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(^|[^a-z0-9_.])[-+]?(nan|inf|infinity)($|[^a-z0-9_])").expect("valid regex"));

/// Identity of a fault, used to detect a repeat across attempts
///
/// Resource faults are identified by the breached ceiling. Runtime faults
/// by the last non-empty stderr line with addresses, paths and numbers
/// masked and whitespace collapsed, so the same exception raised from a
/// different line or with a different value still counts as a repeat.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaultSignature {
    /// Fault class
    pub kind: FaultKind,
    /// Normalized identity text
    pub key: String,
}

impl FaultSignature {
    /// Signature of a resource ceiling breach
    #[must_use]
    pub fn resource(limit: ResourceLimit) -> Self {
        let key = match limit {
            ResourceLimit::WallClock => "wall_clock",
            ResourceLimit::Memory => "memory",
        };
        Self {
            kind: FaultKind::ResourceExceeded,
            key: key.to_string(),
        }
    }

    /// Signature of any sandbox fault
    #[must_use]
    pub fn of(fault: &SandboxFault) -> Self {
        match (fault.kind, fault.limit) {
            (FaultKind::ResourceExceeded, Some(limit)) => Self::resource(limit),
            (kind, _) => Self {
                kind,
                key: normalize_stderr(&fault.message),
            },
        }
    }
}

/// Masked last non-empty line of stderr
#[must_use]
pub fn normalize_stderr(stderr: &str) -> String {
    let last = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
    let masked = HEX_ADDRESS.replace_all(last, "ADDR");
    let masked = PATH.replace_all(&masked, "PATH");
    let masked = NUMBER.replace_all(&masked, "N");
    masked.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Validator bound to one dataset
#[derive(Debug, Clone, Copy)]
pub struct Validator {
    usable: bool,
    rows: u64,
    columns: usize,
}

impl Validator {
    /// Create validator for a dataset
    #[must_use]
    pub fn new(schema: &DatasetSchema) -> Self {
        Self {
            usable: schema.is_usable(),
            rows: schema.row_count,
            columns: schema.columns.len(),
        }
    }

    /// Judge an execution result
    #[must_use]
    pub fn validate(
        &self,
        result: &ExecutionResult,
        classification: &Classification,
        fault_history: &[FaultSignature],
    ) -> ValidationVerdict {
        if !self.usable {
            return ValidationVerdict::Abort {
                kind: AbortKind::DataUnusable,
                detail: format!("dataset has {} rows and {} columns", self.rows, self.columns),
            };
        }

        if let Some(fault) = &result.fault {
            let signature = FaultSignature::of(fault);
            let detail = fault_detail(fault, &result.stderr);
            if fault_history.contains(&signature) {
                return ValidationVerdict::Abort {
                    kind: AbortKind::from_fault(fault.kind),
                    detail: format!("repeated fault: {detail}"),
                };
            }
            return ValidationVerdict::Retry(RetryReason::Fault { signature, detail });
        }

        if let Some(line) = result
            .stdout
            .lines()
            .map(str::trim)
            .find(|l| l.starts_with(UNANSWERABLE_MARKER))
        {
            let reason = line[UNANSWERABLE_MARKER.len()..].trim();
            return ValidationVerdict::Abort {
                kind: AbortKind::Unanswerable,
                detail: reason.to_string(),
            };
        }

        let expected = classification.kind.expected_shape();
        if !has_shape(result, expected) {
            return ValidationVerdict::Retry(RetryReason::ShapeMismatch { expected });
        }

        if is_empty_result(result) {
            return ValidationVerdict::Retry(RetryReason::EmptyResult);
        }
        if NON_FINITE.is_match(&result.stdout) {
            return ValidationVerdict::Retry(RetryReason::NonFiniteResult);
        }

        ValidationVerdict::Accepted
    }
}

fn fault_detail(fault: &SandboxFault, stderr: &str) -> String {
    let source = if fault.message.trim().is_empty() { stderr } else { &fault.message };
    let tail: Vec<&str> = source.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = tail.len().saturating_sub(3);
    tail[start..].join("\n")
}

fn has_shape(result: &ExecutionResult, expected: ExpectedShape) -> bool {
    let printed_lines = result.stdout.lines().filter(|l| !l.trim().is_empty()).count();
    match expected {
        ExpectedShape::Any => true,
        ExpectedShape::NonEmptyOutput => printed_lines > 0 || !result.artifacts.is_empty(),
        ExpectedShape::Chart => result.artifacts_of(ArtifactKind::Chart).next().is_some(),
        ExpectedShape::Tabular => {
            result.artifacts_of(ArtifactKind::Table).next().is_some() || printed_lines >= 2
        }
    }
}

fn is_empty_result(result: &ExecutionResult) -> bool {
    let out = result.stdout.trim();
    if out.is_empty() {
        return result.artifacts.is_empty();
    }
    out == "[]" || out == "{}" || out.starts_with("Empty DataFrame") || out.starts_with("Series([], ")
}
