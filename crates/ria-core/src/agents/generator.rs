//! Analysis code generator

use super::Llm;
use crate::dataset::DatasetSchema;
use crate::state::{Classification, RetryReason};
use once_cell::sync::Lazy;
use regex::Regex;
use ria_provider::{CompletionRequest, ProviderError, Role};
use ria_sandbox::{DATA_MOUNT, OUTPUT_MOUNT};

/// Marker generated code prints when the data cannot answer the question
pub const UNANSWERABLE_MARKER: &str = "UNANSWERABLE:";

static FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[ \t]*(?:python|py)?[ \t]*\r?\n(.*?)```").expect("valid regex"));

/// Line starts that mark the beginning of unfenced code
const CODE_STARTS: &[&str] = &["import ", "from ", "def ", "class ", "try:", "@"];

/// Everything the generator sees for one attempt
#[derive(Debug, Clone, Copy)]
pub struct GenerationInput<'a> {
    /// User question
    pub query: &'a str,
    /// Dataset description
    pub schema: &'a DatasetSchema,
    /// Intent
    pub classification: &'a Classification,
    /// Planner steps
    pub plan: Option<&'a [String]>,
    /// Why the previous attempt was rejected
    pub feedback: Option<&'a RetryReason>,
    /// Code of the previous attempt
    pub previous_code: Option<&'a str>,
}

/// Code and the reasoning that preceded it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedCode {
    /// Code to run
    pub code: String,
    /// Prose before the code
    pub rationale: String,
}

/// Generation failure; both consume an attempt
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// Provider call failed
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Reply contained no code
    #[error("completion contained no code")]
    Empty,
}

impl GenerationError {
    /// Feedback recorded on the next attempt
    #[must_use]
    pub fn retry_reason(&self) -> RetryReason {
        match self {
            Self::Provider(e) => RetryReason::ProviderFailed {
                category: e.category().to_string(),
                detail: e.to_string(),
            },
            Self::Empty => RetryReason::EmptyGeneration,
        }
    }
}

/// Ask for analysis code
pub async fn generate(llm: Llm<'_>, input: GenerationInput<'_>) -> Result<GeneratedCode, GenerationError> {
    let mut request = CompletionRequest::new(Role::Generator, prompt(input))
        .with_context("question", input.query)
        .with_context("schema", input.schema.describe())
        .with_context("category", input.classification.kind.as_str());

    if let Some(plan) = input.plan {
        request = request.with_context("plan", plan.join("\n"));
    }
    if let Some(feedback) = input.feedback {
        request = request.with_context("feedback", feedback.describe());
    }
    if let Some(code) = input.previous_code {
        request = request.with_context("previous_code", code);
    }

    let reply = llm.ask(request).await?;
    extract_code(&reply).ok_or(GenerationError::Empty)
}

fn prompt(input: GenerationInput<'_>) -> String {
    let shape = input.classification.kind.expected_shape();
    format!(
        "Write Python (pandas) code that answers the question.\n\
         The dataset files are in {DATA_MOUNT} (read-only); table `{table}` is {DATA_MOUNT}/{table}.csv.\n\
         Save any chart or table files under {OUTPUT_MOUNT}; nothing else is writable.\n\
         No network access, no subprocesses, no eval/exec.\n\
         The result must be {shape}. Print the final numbers.\n\
         If the data cannot answer the question, print `{UNANSWERABLE_MARKER} <reason>` and stop.\n\
         Explain your approach briefly, then give the code in a ```python block.",
        table = input.schema.table,
        shape = shape.describe(),
    )
}

/// Split a completion into code and rationale
///
/// A fenced block wins; otherwise code starts at the first line that looks
/// like Python (`import`, `from`, `def`, `class`, `try:`, decorator).
#[must_use]
pub fn extract_code(reply: &str) -> Option<GeneratedCode> {
    if let Some(captures) = FENCE.captures(reply) {
        let whole = captures.get(0)?;
        let code = captures.get(1)?.as_str().trim();
        if code.is_empty() {
            return None;
        }
        return Some(GeneratedCode {
            code: code.to_string(),
            rationale: reply[..whole.start()].trim().to_string(),
        });
    }

    let mut offset = 0;
    for line in reply.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if CODE_STARTS.iter().any(|start| trimmed.starts_with(start)) {
            let code = reply[offset..].trim();
            return Some(GeneratedCode {
                code: code.to_string(),
                rationale: reply[..offset].trim().to_string(),
            });
        }
        offset += line.len();
    }
    None
}
