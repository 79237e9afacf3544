//! Follow-up question suggestions

use super::Llm;
use ria_provider::{CompletionRequest, ProviderError, Role};

/// Suggestions kept per answer
pub const MAX_INSIGHTS: usize = 3;

const PROMPT: &str = "Based on the question and its answer, suggest 3 short follow-up \
questions the user could ask next about this dataset, one per line.";

/// Suggest follow-up questions
pub async fn suggest(llm: Llm<'_>, query: &str, summary: &str) -> Result<Vec<String>, ProviderError> {
    let request = CompletionRequest::new(Role::Insight, PROMPT)
        .with_context("question", query)
        .with_context("answer", summary);

    let reply = llm.ask(request).await?;
    Ok(parse_suggestions(&reply))
}

/// Non-empty lines without list markers, at most `MAX_INSIGHTS`
#[must_use]
pub fn parse_suggestions(reply: &str) -> Vec<String> {
    reply
        .lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '.' | ')' | '-' | '*' | '•'))
                .trim()
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .take(MAX_INSIGHTS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markers_and_caps() {
        let reply = "1. Which region grew fastest?\n- What about Q3?\n\n* Top products?\n4. Extra?";
        assert_eq!(
            parse_suggestions(reply),
            vec!["Which region grew fastest?", "What about Q3?", "Top products?"]
        );
    }
}
