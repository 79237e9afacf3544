//! Session state and verdict types
//!
//! `SessionState` is the single record threaded through one run. It is
//! owned by exactly one orchestrator run and handed back to the caller in
//! the `Response` or `AbortReport`.

use crate::agents::validator::FaultSignature;
use crate::state_machine::Stage;
use crate::trace::TraceEvent;
use chrono::{DateTime, Utc};
use ria_cache::DataFingerprint;
use ria_sandbox::{Artifact, ExecutionResult, FaultKind, Rejection, Verdict};
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Intent of a question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    /// Single figure or short description
    Descriptive,
    /// Chart requested
    Visual,
    /// Side-by-side comparison
    Comparative,
    /// Multi-step analysis
    Complex,
}

impl QueryKind {
    /// Every kind, in classifier preference order
    pub const ALL: [QueryKind; 4] = [Self::Descriptive, Self::Visual, Self::Comparative, Self::Complex];

    /// Stable name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Descriptive => "descriptive",
            Self::Visual => "visual",
            Self::Comparative => "comparative",
            Self::Complex => "complex",
        }
    }

    /// Output shape a correct answer must have
    #[must_use]
    pub fn expected_shape(&self) -> ExpectedShape {
        match self {
            Self::Descriptive => ExpectedShape::NonEmptyOutput,
            Self::Visual => ExpectedShape::Chart,
            Self::Comparative => ExpectedShape::Tabular,
            Self::Complex => ExpectedShape::Any,
        }
    }

    /// Whether the planner runs for this kind
    #[inline]
    #[must_use]
    pub fn needs_plan(&self) -> bool {
        matches!(self, Self::Comparative | Self::Complex)
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Required output shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedShape {
    /// Something printed
    NonEmptyOutput,
    /// A chart artifact
    Chart,
    /// A table artifact or multi-line printed table
    Tabular,
    /// Any successful output
    Any,
}

impl ExpectedShape {
    /// Human description used in retry feedback
    #[must_use]
    pub fn describe(&self) -> &'static str {
        match self {
            Self::NonEmptyOutput => "printed output answering the question",
            Self::Chart => "a chart image saved under /output",
            Self::Tabular => "a comparison table (printed, or saved under /output)",
            Self::Any => "any output",
        }
    }
}

/// Classifier output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Intent
    pub kind: QueryKind,
    /// Confidence in [0, 1]; 0 means the fallback was used
    pub confidence: f32,
}

impl Classification {
    /// Create classification, clamping confidence into [0, 1]
    #[must_use]
    pub fn new(kind: QueryKind, confidence: f32) -> Self {
        let confidence = if confidence.is_finite() { confidence.clamp(0.0, 1.0) } else { 0.0 };
        Self { kind, confidence }
    }

    /// Fallback used when classification fails
    #[must_use]
    pub fn fallback() -> Self {
        Self::new(QueryKind::Descriptive, 0.0)
    }
}

/// One generated code attempt; never modified once pushed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeAttempt {
    /// 1-based attempt number
    pub number: u32,
    /// Extracted code; `None` when generation failed
    pub code: Option<String>,
    /// Prose that preceded the code in the completion
    pub rationale: String,
    /// Why the previous attempt was retried
    pub feedback: Option<RetryReason>,
    /// When the attempt was produced
    pub generated_at: DateTime<Utc>,
}

/// Why an attempt is retried
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RetryReason {
    /// Code faulted in the sandbox
    Fault {
        /// Identity used to detect repeats
        signature: FaultSignature,
        /// Tail of stderr or the fault message
        detail: String,
    },
    /// Output did not have the expected shape
    ShapeMismatch {
        /// What was required
        expected: ExpectedShape,
    },
    /// Output contained NaN or infinity
    NonFiniteResult,
    /// Output was an empty result set
    EmptyResult,
    /// Screener rejected the code
    SecurityRejected {
        /// Matched rule
        rejection: Rejection,
    },
    /// Provider failed to produce a completion
    ProviderFailed {
        /// Provider error category
        category: String,
        /// Error text
        detail: String,
    },
    /// Completion contained no code
    EmptyGeneration,
}

impl RetryReason {
    /// Feedback text for the next generation prompt
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Fault { signature, detail } => {
                format!("The previous code failed ({}): {}", signature.kind, detail)
            }
            Self::ShapeMismatch { expected } => {
                format!("The previous code did not produce {}.", expected.describe())
            }
            Self::NonFiniteResult => {
                "The previous result contained NaN or infinite values; handle missing data and division by zero.".to_string()
            }
            Self::EmptyResult => {
                "The previous code produced an empty result; check filters and column names.".to_string()
            }
            Self::SecurityRejected { rejection } => format!(
                "The previous code was rejected by the security screen ({}: {}). Use only pandas/numpy/matplotlib, read from /data and write to /output.",
                rejection.category, rejection.excerpt
            ),
            Self::ProviderFailed { category, .. } => {
                format!("The previous generation failed ({category}).")
            }
            Self::EmptyGeneration => "The previous reply contained no code.".to_string(),
        }
    }

    /// Abort kind used when attempts run out on this reason
    #[must_use]
    pub fn exhausted_kind(&self) -> AbortKind {
        match self {
            Self::Fault { signature, .. } => AbortKind::from_fault(signature.kind),
            Self::ShapeMismatch { .. } => AbortKind::ShapeMismatch,
            Self::NonFiniteResult => AbortKind::NonFiniteResult,
            Self::EmptyResult => AbortKind::EmptyResult,
            Self::SecurityRejected { .. } => AbortKind::Security,
            Self::ProviderFailed { .. } | Self::EmptyGeneration => AbortKind::Provider,
        }
    }
}

/// Why a run aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortKind {
    /// Query or code rejected by the screener
    Security,
    /// Run budget expired
    Timeout,
    /// Output never had the expected shape
    ShapeMismatch,
    /// Sandbox ceiling breached
    ResourceExceeded,
    /// Code kept failing
    RuntimeFault,
    /// Result set kept coming back empty
    EmptyResult,
    /// Result kept containing non-finite values
    NonFiniteResult,
    /// Code reported the question cannot be answered from the data
    Unanswerable,
    /// Dataset has no rows or no columns
    DataUnusable,
    /// Language model unavailable for a mandatory stage
    Provider,
    /// Sandbox could not be launched
    SandboxUnavailable,
    /// Orchestrator bug (illegal transition)
    Internal,
}

impl AbortKind {
    /// Stable name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::Timeout => "timeout",
            Self::ShapeMismatch => "shape_mismatch",
            Self::ResourceExceeded => "resource_exceeded",
            Self::RuntimeFault => "runtime_fault",
            Self::EmptyResult => "empty_result",
            Self::NonFiniteResult => "non_finite_result",
            Self::Unanswerable => "unanswerable",
            Self::DataUnusable => "data_unusable",
            Self::Provider => "provider",
            Self::SandboxUnavailable => "sandbox_unavailable",
            Self::Internal => "internal",
        }
    }

    /// Abort kind for a sandbox fault class
    #[must_use]
    pub fn from_fault(kind: FaultKind) -> Self {
        match kind {
            FaultKind::ResourceExceeded => Self::ResourceExceeded,
            FaultKind::RuntimeFault => Self::RuntimeFault,
        }
    }
}

impl fmt::Display for AbortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validator output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ValidationVerdict {
    /// Result answers the question
    Accepted,
    /// Generate again with feedback
    Retry(RetryReason),
    /// Stop now
    Abort {
        /// Abort class
        kind: AbortKind,
        /// Explanation
        detail: String,
    },
}

/// Time spent in one stage visit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTiming {
    /// Stage
    pub stage: Stage,
    /// Wall-clock milliseconds
    pub elapsed_ms: u64,
}

/// Answer produced by an accepted run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalAnswer {
    /// Business-readable answer
    pub summary: String,
    /// Follow-up questions
    pub insights: Vec<String>,
    /// Plain-language walkthrough of the code
    pub explanation: Option<String>,
    /// Code that produced the result
    pub code: String,
    /// Printed output of the code
    pub stdout: String,
    /// Charts and tables produced
    pub artifacts: Vec<Artifact>,
    /// Data quality notes
    pub anomalies: Vec<String>,
    /// Optimizer suggestions for the accepted code
    pub optimization_notes: Vec<String>,
}

/// Everything known about one run
#[derive(Debug, Clone, Serialize)]
pub struct SessionState {
    /// Session identifier
    pub session_id: Ulid,
    /// Original question
    pub query: String,
    /// Dataset partition key
    pub data_fingerprint: DataFingerprint,
    /// Current stage
    pub stage: Stage,
    /// Set once by the classifier
    pub classification: Option<Classification>,
    /// Multi-step plan, if the planner produced one
    pub plan: Option<Vec<String>>,
    /// Append-only attempts
    pub code_history: Vec<CodeAttempt>,
    /// Optimizer notes for the current attempt
    pub optimization_notes: Vec<String>,
    /// Screener verdict for the current attempt
    pub security_verdict: Option<Verdict>,
    /// Most recent sandbox result
    pub execution_result: Option<ExecutionResult>,
    /// Most recent validator verdict
    pub validation_verdict: Option<ValidationVerdict>,
    /// Signatures of faults seen so far
    pub fault_history: Vec<FaultSignature>,
    /// Number of Generate entries
    pub attempt_count: u32,
    /// Set iff the run reached Accept
    pub final_answer: Option<FinalAnswer>,
    /// Typed event log
    pub trace: Vec<TraceEvent>,
    /// Per-stage timings
    pub stage_timings: Vec<StageTiming>,
}

impl SessionState {
    /// Fresh state for a question about a dataset
    #[must_use]
    pub fn new(query: impl Into<String>, data_fingerprint: DataFingerprint) -> Self {
        Self {
            session_id: Ulid::new(),
            query: query.into(),
            data_fingerprint,
            stage: Stage::Intake,
            classification: None,
            plan: None,
            code_history: Vec::new(),
            optimization_notes: Vec::new(),
            security_verdict: None,
            execution_result: None,
            validation_verdict: None,
            fault_history: Vec::new(),
            attempt_count: 0,
            final_answer: None,
            trace: Vec::new(),
            stage_timings: Vec::new(),
        }
    }

    /// Code of the most recent attempt that produced any
    #[must_use]
    pub fn last_code(&self) -> Option<&str> {
        self.code_history.iter().rev().find_map(|a| a.code.as_deref())
    }

    /// Total milliseconds recorded for a stage
    #[must_use]
    pub fn time_in(&self, stage: Stage) -> u64 {
        self.stage_timings
            .iter()
            .filter(|t| t.stage == stage)
            .map(|t| t.elapsed_ms)
            .sum()
    }
}

/// Successful run
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    /// The answer
    pub answer: FinalAnswer,
    /// Similarity of the cache entry that served this answer
    pub cache_similarity: Option<f32>,
    /// Final session state
    pub state: SessionState,
}

impl Response {
    /// Whether the answer came from the cache
    #[inline]
    #[must_use]
    pub fn from_cache(&self) -> bool {
        self.cache_similarity.is_some()
    }
}

/// Failed run with the partial state kept for diagnosis
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[error("run aborted ({kind}): {detail}")]
pub struct AbortReport {
    /// Abort class
    pub kind: AbortKind,
    /// Explanation
    pub detail: String,
    /// State at the moment of abort
    pub state: SessionState,
}
