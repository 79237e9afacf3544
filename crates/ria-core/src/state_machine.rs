//! Pipeline stages and legal transitions
//!
//! The orchestrator moves one session through these stages. Every move is
//! checked against `allowed_transitions`; `Abort` is reachable from every
//! non-terminal stage so the run budget can end a session anywhere.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Query screen and cache lookup
    Intake,
    /// Intent classification
    Classify,
    /// Multi-step planning (comparative/complex only)
    Plan,
    /// Code generation; one attempt per entry
    Generate,
    /// Advisory performance review of the code
    Optimize,
    /// Security screen of the code
    Screen,
    /// Sandbox execution
    Execute,
    /// Result validation
    Validate,
    /// Business-readable answer
    Summarize,
    /// Insights and explanation
    Enrich,
    /// Terminal success
    Accept,
    /// Terminal failure
    Abort,
}

impl Stage {
    /// Stable name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::Classify => "classify",
            Self::Plan => "plan",
            Self::Generate => "generate",
            Self::Optimize => "optimize",
            Self::Screen => "screen",
            Self::Execute => "execute",
            Self::Validate => "validate",
            Self::Summarize => "summarize",
            Self::Enrich => "enrich",
            Self::Accept => "accept",
            Self::Abort => "abort",
        }
    }

    /// Whether the session is over
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accept | Self::Abort)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stages reachable from `from`
#[must_use]
pub fn allowed_transitions(from: Stage) -> Vec<Stage> {
    use Stage::*;
    match from {
        Intake => vec![Classify, Accept, Abort],
        Classify => vec![Plan, Generate, Abort],
        Plan => vec![Generate, Abort],
        // Generate -> Generate: failed generation consumes an attempt
        Generate => vec![Optimize, Generate, Abort],
        Optimize => vec![Screen, Abort],
        Screen => vec![Execute, Generate, Abort],
        Execute => vec![Validate, Abort],
        Validate => vec![Generate, Summarize, Abort],
        Summarize => vec![Enrich, Abort],
        Enrich => vec![Accept, Abort],
        Accept => vec![],
        Abort => vec![],
    }
}

/// Check a transition
pub fn validate_transition(from: Stage, to: Stage) -> Result<(), CoreError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(CoreError::IllegalTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALL: [Stage; 12] = [
        Stage::Intake,
        Stage::Classify,
        Stage::Plan,
        Stage::Generate,
        Stage::Optimize,
        Stage::Screen,
        Stage::Execute,
        Stage::Validate,
        Stage::Summarize,
        Stage::Enrich,
        Stage::Accept,
        Stage::Abort,
    ];

    fn any_stage() -> impl Strategy<Value = Stage> {
        prop::sample::select(ALL.to_vec())
    }

    #[test]
    fn happy_path_is_legal() {
        let path = [
            Stage::Intake,
            Stage::Classify,
            Stage::Plan,
            Stage::Generate,
            Stage::Optimize,
            Stage::Screen,
            Stage::Execute,
            Stage::Validate,
            Stage::Summarize,
            Stage::Enrich,
            Stage::Accept,
        ];
        for pair in path.windows(2) {
            assert!(validate_transition(pair[0], pair[1]).is_ok(), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn retry_edges_only_lead_to_generate() {
        assert!(validate_transition(Stage::Validate, Stage::Generate).is_ok());
        assert!(validate_transition(Stage::Screen, Stage::Generate).is_ok());
        assert!(validate_transition(Stage::Validate, Stage::Execute).is_err());
        assert!(validate_transition(Stage::Screen, Stage::Summarize).is_err());
    }

    #[test]
    fn screen_is_the_only_way_into_execute() {
        for from in ALL {
            let ok = validate_transition(from, Stage::Execute).is_ok();
            assert_eq!(ok, from == Stage::Screen, "{from} -> execute");
        }
    }

    #[test]
    fn cache_hit_accepts_from_intake() {
        assert!(validate_transition(Stage::Intake, Stage::Accept).is_ok());
    }

    proptest! {
        #[test]
        fn terminal_states_have_no_exits(from in any_stage(), to in any_stage()) {
            if from.is_terminal() {
                prop_assert!(validate_transition(from, to).is_err());
            }
        }

        #[test]
        fn abort_reachable_from_any_live_stage(from in any_stage()) {
            if !from.is_terminal() {
                prop_assert!(validate_transition(from, Stage::Abort).is_ok());
            }
        }
    }
}
