//! Query intent classifier

use super::Llm;
use crate::dataset::DatasetSchema;
use crate::state::{Classification, QueryKind};
use once_cell::sync::Lazy;
use regex::Regex;
use ria_provider::{CompletionRequest, Role};

/// Confidence assumed when the reply names a kind but no score
pub const DEFAULT_CONFIDENCE: f32 = 0.5;

static CONFIDENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)confidence\W{0,3}([01](?:\.\d+)?)").expect("valid regex"));

const PROMPT: &str = "Classify the user's data question into exactly one category:\n\
- descriptive: a single figure, total, average or short description\n\
- visual: the user wants a chart or plot\n\
- comparative: comparing groups, periods or segments\n\
- complex: multi-step analysis, trends with conditions, or forecasting\n\
Reply with the category name followed by `confidence: <0..1>`.";

/// Decide the intent of a question
///
/// Never fails: a provider error or an unparseable reply yields
/// `Classification::fallback()`.
pub async fn classify(llm: Llm<'_>, query: &str, schema: &DatasetSchema) -> Classification {
    let request = CompletionRequest::new(Role::Classifier, PROMPT)
        .with_context("question", query)
        .with_context("schema", schema.describe());

    match llm.ask(request).await {
        Ok(reply) => parse_reply(&reply).unwrap_or_else(|| {
            tracing::warn!("unparseable classification reply, using fallback");
            Classification::fallback()
        }),
        Err(_) => Classification::fallback(),
    }
}

/// Extract the earliest category named in a reply
#[must_use]
pub fn parse_reply(reply: &str) -> Option<Classification> {
    let lower = reply.to_lowercase();
    let kind = QueryKind::ALL
        .iter()
        .filter_map(|kind| lower.find(kind.as_str()).map(|pos| (pos, *kind)))
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, kind)| kind)?;

    let confidence = CONFIDENCE
        .captures(reply)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f32>().ok())
        .unwrap_or(DEFAULT_CONFIDENCE);

    Some(Classification::new(kind, confidence))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kind_and_confidence() {
        let c = parse_reply("visual\nconfidence: 0.93").unwrap();
        assert_eq!(c.kind, QueryKind::Visual);
        assert!((c.confidence - 0.93).abs() < 1e-6);
    }

    #[test]
    fn earliest_mention_wins() {
        let c = parse_reply("Comparative (not descriptive)").unwrap();
        assert_eq!(c.kind, QueryKind::Comparative);
        assert!((c.confidence - DEFAULT_CONFIDENCE).abs() < 1e-6);
    }

    #[test]
    fn unknown_reply_is_none() {
        assert!(parse_reply("I am not sure").is_none());
    }
}
