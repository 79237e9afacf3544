//! Multi-step planner for comparative and complex questions

use super::Llm;
use crate::dataset::DatasetSchema;
use crate::state::Classification;
use ria_provider::{CompletionRequest, ProviderError, Role};

/// Reply meaning the question needs no decomposition
pub const SINGLE_STEP: &str = "SINGLE_STEP";

/// Most steps kept from a plan
pub const MAX_STEPS: usize = 6;

const PROMPT: &str = "Break the question into the analysis steps needed to answer it, \
one per line, numbered. If a single computation answers it, reply SINGLE_STEP.";

/// Ask for a plan; `Ok(None)` means a single step suffices
pub async fn plan(
    llm: Llm<'_>,
    query: &str,
    classification: &Classification,
    schema: &DatasetSchema,
) -> Result<Option<Vec<String>>, ProviderError> {
    let request = CompletionRequest::new(Role::Planner, PROMPT)
        .with_context("question", query)
        .with_context("category", classification.kind.as_str())
        .with_context("schema", schema.describe());

    let reply = llm.ask(request).await?;
    Ok(parse_plan(&reply))
}

/// Steps from a planner reply
#[must_use]
pub fn parse_plan(reply: &str) -> Option<Vec<String>> {
    if reply.trim().is_empty() || reply.contains(SINGLE_STEP) {
        return None;
    }

    let steps: Vec<String> = reply
        .lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '.' | ')' | '-' | '*'))
                .trim()
                .to_string()
        })
        .filter(|step| !step.is_empty())
        .take(MAX_STEPS)
        .collect();

    // one step is no plan
    (steps.len() > 1).then_some(steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_lines_become_steps() {
        let steps = parse_plan("1. Filter 2023 rows\n2) Group by region\n\n- Compare totals").unwrap();
        assert_eq!(steps, vec!["Filter 2023 rows", "Group by region", "Compare totals"]);
    }

    #[test]
    fn single_step_marker_means_no_plan() {
        assert!(parse_plan("SINGLE_STEP").is_none());
        assert!(parse_plan("1. Sum revenue").is_none());
        assert!(parse_plan("  ").is_none());
    }

    #[test]
    fn long_plans_are_capped() {
        let reply = (1..=10).map(|i| format!("{i}. step {i}")).collect::<Vec<_>>().join("\n");
        assert_eq!(parse_plan(&reply).unwrap().len(), MAX_STEPS);
    }
}
