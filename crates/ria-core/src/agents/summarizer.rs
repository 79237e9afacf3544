//! Business-readable answer

use super::Llm;
use crate::state::Classification;
use ria_provider::{CompletionRequest, ProviderError, Role};
use ria_sandbox::ExecutionResult;

/// Longest stdout excerpt sent to the model
pub const MAX_RESULT_CHARS: usize = 4000;

const PROMPT: &str = "Answer the user's question in plain business language using only the \
analysis output provided. Lead with the direct answer, cite the key figures, and mention any \
charts or tables that were produced. Do not describe the code.";

/// Summarize an accepted result
pub async fn summarize(
    llm: Llm<'_>,
    query: &str,
    classification: &Classification,
    result: &ExecutionResult,
) -> Result<String, ProviderError> {
    let artifacts = result
        .artifacts
        .iter()
        .map(|a| a.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    let request = CompletionRequest::new(Role::Summarizer, PROMPT)
        .with_context("question", query)
        .with_context("category", classification.kind.as_str())
        .with_context("output", excerpt(&result.stdout, MAX_RESULT_CHARS))
        .with_context("artifacts", artifacts);

    let summary = llm.ask(request).await?;
    let summary = summary.trim();
    if summary.is_empty() {
        return Err(ProviderError::InvalidResponse("empty summary".to_string()));
    }
    Ok(summary.to_string())
}

/// At most `max` characters of `text`, cut on a char boundary
#[must_use]
pub fn excerpt(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}\n[truncated]", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_respects_char_boundaries() {
        assert_eq!(excerpt("héllo", 10), "héllo");
        assert_eq!(excerpt("héllo", 2), "hé\n[truncated]");
    }
}
