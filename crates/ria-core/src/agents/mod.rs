//! Pipeline agents
//!
//! Each agent is a function from part of the session state to a delta.
//! Agents that talk to the language model do so through `Llm`, which
//! enforces the per-call timeout. None of them touch `SessionState`
//! directly; the orchestrator applies their output.

pub mod classifier;
pub mod explainer;
pub mod generator;
pub mod insight;
pub mod optimizer;
pub mod planner;
pub mod summarizer;
pub mod validator;

use ria_provider::{CompletionProvider, CompletionRequest, ProviderError};
use std::time::{Duration, Instant};

/// Completion provider with a per-call timeout
#[derive(Clone, Copy)]
pub struct Llm<'a> {
    provider: &'a dyn CompletionProvider,
    timeout: Duration,
}

impl<'a> Llm<'a> {
    /// Wrap a provider
    #[inline]
    #[must_use]
    pub fn new(provider: &'a dyn CompletionProvider, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Request a completion, failing with `Timeout` past the budget
    pub async fn ask(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        let role = request.role;
        let started = Instant::now();
        let result = match tokio::time::timeout(self.timeout, self.provider.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            }),
        };

        match &result {
            Ok(text) => tracing::debug!(%role, chars = text.len(), "completion received"),
            Err(e) => tracing::warn!(%role, category = e.category(), "completion failed: {}", e),
        }
        result
    }
}

impl std::fmt::Debug for Llm<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Llm").field("timeout", &self.timeout).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ria_provider::Role;

    struct Slow;

    #[async_trait::async_trait]
    impl CompletionProvider for Slow {
        async fn complete(&self, _request: CompletionRequest) -> Result<String, ProviderError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("late".to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out() {
        let llm = Llm::new(&Slow, Duration::from_secs(2));
        let err = llm
            .ask(CompletionRequest::new(Role::Summarizer, "summarize"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Timeout { .. }));
    }
}
