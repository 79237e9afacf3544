//! Typed trace of a run
//!
//! Every step a session takes is recorded as a `TraceEvent`: appended to the
//! session's own log and published on a broadcast bus so observers (a UI,
//! an audit sink) can follow runs live. Diagnostic logging goes through
//! `tracing` separately.

use crate::state::{AbortKind, Classification, ValidationVerdict};
use crate::state_machine::Stage;
use chrono::{DateTime, Utc};
use ria_sandbox::{FaultKind, Verdict};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use ulid::Ulid;

/// Default broadcast buffer; slow subscribers lag rather than block runs
pub const DEFAULT_TRACE_CAPACITY: usize = 1024;

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceKind {
    /// Stage entered
    StageEntered,
    /// Stage left
    StageCompleted {
        /// Time spent
        elapsed_ms: u64,
    },
    /// Raw query screened
    QueryScreened {
        /// Outcome
        verdict: Verdict,
    },
    /// Answer served from the cache
    CacheHit {
        /// Similarity of the matched entry
        similarity: f32,
    },
    /// Nothing cached for this question
    CacheMiss,
    /// Intent decided
    Classified {
        /// Result
        classification: Classification,
    },
    /// Planner produced steps
    Planned {
        /// Steps in order
        steps: Vec<String>,
    },
    /// Planner decided a single step suffices
    PlanSkipped,
    /// Code produced for an attempt
    CodeGenerated {
        /// Attempt number
        attempt: u32,
        /// Reasoning preceding the code
        rationale: String,
    },
    /// Generation produced no code
    GenerationFailed {
        /// Attempt number
        attempt: u32,
        /// Why
        reason: String,
    },
    /// Optimizer suggestions
    Optimized {
        /// Attempt number
        attempt: u32,
        /// Suggestions (possibly none)
        notes: Vec<String>,
    },
    /// Code screened
    CodeScreened {
        /// Attempt number
        attempt: u32,
        /// Outcome
        verdict: Verdict,
    },
    /// Sandbox run finished
    Executed {
        /// Attempt number
        attempt: u32,
        /// Exit code
        exit_status: Option<i32>,
        /// Fault class
        fault: Option<FaultKind>,
        /// Sandbox wall-clock time
        duration_ms: u64,
    },
    /// Result judged
    Validated {
        /// Attempt number
        attempt: u32,
        /// Outcome
        verdict: ValidationVerdict,
    },
    /// Optional stage failed; the run continues without it
    Degraded {
        /// Which output is missing
        component: String,
        /// Why
        reason: String,
    },
    /// Answer written to the cache
    AnswerCached,
    /// Terminal success
    Accepted,
    /// Terminal failure
    Aborted {
        /// Abort class
        kind: AbortKind,
        /// Explanation
        detail: String,
    },
}

/// One trace record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Session the event belongs to
    pub session: Ulid,
    /// Position in the session's log, from 0
    pub seq: u64,
    /// Wall-clock time
    pub at: DateTime<Utc>,
    /// Stage the session was in
    pub stage: Stage,
    /// Payload
    pub kind: TraceKind,
}

/// Broadcast channel shared by all runs of an orchestrator
#[derive(Debug, Clone)]
pub struct TraceBus {
    sender: broadcast::Sender<TraceEvent>,
}

impl TraceBus {
    /// Create bus with a subscriber buffer
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Observe events of every subsequent run
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TraceEvent> {
        self.sender.subscribe()
    }

    /// Publish an event; dropped when nobody listens
    pub fn publish(&self, event: &TraceEvent) {
        let _ = self.sender.send(event.clone());
    }
}

impl Default for TraceBus {
    fn default() -> Self {
        Self::new(DEFAULT_TRACE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(seq: u64) -> TraceEvent {
        TraceEvent {
            session: Ulid::new(),
            seq,
            at: Utc::now(),
            stage: Stage::Intake,
            kind: TraceKind::CacheMiss,
        }
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = TraceBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(&event(0));
        bus.publish(&event(1));

        assert_eq!(rx.recv().await.unwrap().seq, 0);
        assert_eq!(rx.recv().await.unwrap().seq, 1);
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        TraceBus::default().publish(&event(0));
    }

    #[test]
    fn events_serialize_with_tag() {
        let json = serde_json::to_value(event(3)).unwrap();
        assert_eq!(json["kind"]["event"], "cache_miss");
        assert_eq!(json["stage"], "intake");
    }
}
