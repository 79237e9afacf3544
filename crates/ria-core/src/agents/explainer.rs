//! Plain-language code walkthrough

use super::Llm;
use ria_provider::{CompletionRequest, ProviderError, Role};

const PROMPT: &str = "Explain in a few sentences, for a non-programmer, what this analysis \
code does to answer the question. Mention filters, groupings and calculations.";

/// Explain the accepted code
pub async fn explain(llm: Llm<'_>, query: &str, code: &str) -> Result<String, ProviderError> {
    let request = CompletionRequest::new(Role::Explainer, PROMPT)
        .with_context("question", query)
        .with_context("code", code);

    let reply = llm.ask(request).await?;
    let reply = reply.trim();
    if reply.is_empty() {
        return Err(ProviderError::InvalidResponse("empty explanation".to_string()));
    }
    Ok(reply.to_string())
}
