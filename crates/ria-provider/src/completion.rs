//! Completion provider contract

use crate::error::ProviderError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline role on whose behalf a completion is requested
///
/// Backends may route roles to different models; the pipeline never
/// inspects which backend served a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Query intent classification
    Classifier,
    /// Multi-step planning for compound questions
    Planner,
    /// Analysis code generation
    Generator,
    /// Business-readable answer
    Summarizer,
    /// Follow-up question suggestions
    Insight,
    /// Plain-language code walkthrough
    Explainer,
}

impl Role {
    /// Stable lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classifier => "classifier",
            Self::Planner => "planner",
            Self::Generator => "generator",
            Self::Summarizer => "summarizer",
            Self::Insight => "insight",
            Self::Explainer => "explainer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single completion call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    /// Requesting role
    pub role: Role,
    /// Instruction text
    pub prompt: String,
    /// Supporting context (schema, prior failures, results)
    pub context: Vec<(String, String)>,
}

impl CompletionRequest {
    /// Create request with empty context
    #[inline]
    #[must_use]
    pub fn new(role: Role, prompt: impl Into<String>) -> Self {
        Self {
            role,
            prompt: prompt.into(),
            context: Vec::new(),
        }
    }

    /// Attach a named context block
    #[inline]
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.push((key.into(), value.into()));
        self
    }

    /// Look up a context block by name
    #[must_use]
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Text generation backend
#[async_trait::async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Generate text for the request
    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError>;
}
