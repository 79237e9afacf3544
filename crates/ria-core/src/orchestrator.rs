//! Pipeline orchestrator
//!
//! Drives one session per question through the stage machine:
//!
//! ```text
//! Intake -> Classify -> [Plan] -> Generate -> Optimize -> Screen -> Execute -> Validate
//!                                    ^                       |                   |
//!                                    +------- retry ---------+-------------------+
//! Validate -> Summarize -> Enrich -> Accept        (any stage) -> Abort
//! ```
//!
//! Retries are bounded by `max_attempts`: every Generate entry is one
//! attempt. The whole run is bounded by `run_timeout_seconds`; when it
//! expires the in-flight stage future is dropped, which kills a running
//! sandbox. Session state lives outside that future, so the abort report
//! still carries the trace and code history.

use crate::agents::generator::{GenerationError, GenerationInput};
use crate::agents::validator::{FaultSignature, Validator};
use crate::agents::{classifier, explainer, generator, insight, optimizer, planner, summarizer, Llm};
use crate::config::PipelineConfig;
use crate::dataset::Dataset;
use crate::error::CoreError;
use crate::state::{
    AbortKind, AbortReport, Classification, CodeAttempt, FinalAnswer, Response, RetryReason, SessionState,
    StageTiming, ValidationVerdict,
};
use crate::state_machine::{validate_transition, Stage};
use crate::trace::{TraceBus, TraceEvent, TraceKind};
use chrono::Utc;
use ria_cache::{DataFingerprint, SemanticCache};
use ria_provider::{CompletionProvider, EmbeddingProvider};
use ria_sandbox::{CodeExecutor, ExecutionRequest, ExecutionResult, SecurityScreener, Verdict};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Cache of accepted answers
pub type AnswerCache = SemanticCache<FinalAnswer>;

/// Question-to-answer orchestrator
///
/// Cheap to share behind an `Arc`; concurrent runs only share the cache,
/// the executor's limiter and the trace bus.
pub struct Orchestrator {
    config: PipelineConfig,
    provider: Arc<dyn CompletionProvider>,
    executor: Arc<dyn CodeExecutor>,
    cache: Arc<AnswerCache>,
    screener: Arc<SecurityScreener>,
    bus: TraceBus,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

/// Why `drive` stopped early
#[derive(Debug)]
struct Halt {
    kind: AbortKind,
    detail: String,
}

impl Halt {
    fn new(kind: AbortKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl From<CoreError> for Halt {
    fn from(e: CoreError) -> Self {
        Self::new(AbortKind::Internal, e.to_string())
    }
}

/// Successful end of `drive`
struct Outcome {
    answer: FinalAnswer,
    similarity: Option<f32>,
}

/// One run's private state plus its trace plumbing
struct Session<'a> {
    state: SessionState,
    bus: &'a TraceBus,
    stage_started: Instant,
}

impl<'a> Session<'a> {
    fn new(query: &str, fingerprint: DataFingerprint, bus: &'a TraceBus) -> Self {
        let mut session = Self {
            state: SessionState::new(query, fingerprint),
            bus,
            stage_started: Instant::now(),
        };
        session.record(TraceKind::StageEntered);
        session
    }

    fn record(&mut self, kind: TraceKind) {
        let event = TraceEvent {
            session: self.state.session_id,
            seq: self.state.trace.len() as u64,
            at: Utc::now(),
            stage: self.state.stage,
            kind,
        };
        self.bus.publish(&event);
        self.state.trace.push(event);
    }

    fn enter(&mut self, to: Stage) -> Result<(), CoreError> {
        let from = self.state.stage;
        validate_transition(from, to)?;

        let elapsed_ms = u64::try_from(self.stage_started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.state.stage_timings.push(StageTiming {
            stage: from,
            elapsed_ms,
        });
        self.record(TraceKind::StageCompleted { elapsed_ms });

        tracing::debug!(session = %self.state.session_id, %from, %to, "stage transition");
        self.state.stage = to;
        self.stage_started = Instant::now();
        self.record(TraceKind::StageEntered);
        Ok(())
    }

    fn degrade(&mut self, component: &str, reason: impl ToString) {
        let reason = reason.to_string();
        tracing::warn!(session = %self.state.session_id, component, "optional stage degraded: {}", reason);
        self.record(TraceKind::Degraded {
            component: component.to_string(),
            reason,
        });
    }

    fn into_response(self, outcome: Outcome) -> Response {
        tracing::info!(
            session = %self.state.session_id,
            attempts = self.state.attempt_count,
            cached = outcome.similarity.is_some(),
            execute_ms = self.state.time_in(Stage::Execute),
            "run accepted"
        );
        Response {
            answer: outcome.answer,
            cache_similarity: outcome.similarity,
            state: self.state,
        }
    }

    fn into_abort(mut self, halt: Halt) -> AbortReport {
        if !self.state.stage.is_terminal() {
            let _ = self.enter(Stage::Abort);
        }
        self.record(TraceKind::Aborted {
            kind: halt.kind,
            detail: halt.detail.clone(),
        });
        tracing::warn!(
            session = %self.state.session_id,
            kind = %halt.kind,
            attempts = self.state.attempt_count,
            "run aborted: {}",
            halt.detail
        );
        AbortReport {
            kind: halt.kind,
            detail: halt.detail,
            state: self.state,
        }
    }
}

impl Orchestrator {
    /// Create orchestrator with its own answer cache
    ///
    /// # Errors
    /// - `CoreError::Config` if the configuration is invalid
    /// - `CoreError::Sandbox` if a screener rule does not compile
    pub fn new(
        config: PipelineConfig,
        provider: Arc<dyn CompletionProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        executor: Arc<dyn CodeExecutor>,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        let screener = SecurityScreener::new(&config.screener)?;
        let cache = Arc::new(SemanticCache::new(&config.cache, embedder));

        Ok(Self {
            config,
            provider,
            executor,
            cache,
            screener: Arc::new(screener),
            bus: TraceBus::default(),
        })
    }

    /// Share an existing answer cache
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<AnswerCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Answer cache
    #[inline]
    #[must_use]
    pub fn cache(&self) -> &Arc<AnswerCache> {
        &self.cache
    }

    /// Security screener
    #[inline]
    #[must_use]
    pub fn screener(&self) -> &SecurityScreener {
        &self.screener
    }

    /// Observe trace events of all subsequent runs
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TraceEvent> {
        self.bus.subscribe()
    }

    /// Answer a question about a dataset
    ///
    /// Always terminates within the run budget, in `Ok` (Accept) or `Err`
    /// (Abort). Both carry the final session state.
    pub async fn run(&self, query: &str, dataset: &Dataset) -> Result<Response, AbortReport> {
        let mut session = Session::new(query, dataset.fingerprint().clone(), &self.bus);
        tracing::info!(
            session = %session.state.session_id,
            fingerprint = %dataset.fingerprint(),
            "run started"
        );

        let budget = self.config.run_timeout();
        let outcome = match tokio::time::timeout(budget, self.drive(&mut session, dataset)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Halt::new(
                AbortKind::Timeout,
                format!("run exceeded {}s budget", budget.as_secs()),
            )),
        };

        match outcome {
            Ok(outcome) => Ok(session.into_response(outcome)),
            Err(halt) => Err(session.into_abort(halt)),
        }
    }

    async fn drive(&self, s: &mut Session<'_>, dataset: &Dataset) -> Result<Outcome, Halt> {
        let llm = Llm::new(self.provider.as_ref(), self.config.provider_timeout());
        let query = s.state.query.clone();
        let schema = dataset.schema();

        // Intake: identical input is never retried, so a rejection is final
        let verdict = self.screener.screen_query(&query);
        s.record(TraceKind::QueryScreened { verdict: verdict.clone() });
        if let Verdict::Rejected(r) = verdict {
            return Err(Halt::new(
                AbortKind::Security,
                format!("query rejected: {} ({})", r.category, r.rule),
            ));
        }

        if let Some(hit) = self.cache.lookup(&query, dataset.fingerprint()).await {
            s.record(TraceKind::CacheHit { similarity: hit.similarity });
            s.state.final_answer = Some(hit.answer.clone());
            s.enter(Stage::Accept)?;
            s.record(TraceKind::Accepted);
            return Ok(Outcome {
                answer: hit.answer,
                similarity: Some(hit.similarity),
            });
        }
        s.record(TraceKind::CacheMiss);

        s.enter(Stage::Classify)?;
        let classification = classifier::classify(llm, &query, schema).await;
        s.state.classification = Some(classification);
        s.record(TraceKind::Classified { classification });

        if classification.kind.needs_plan() {
            s.enter(Stage::Plan)?;
            match planner::plan(llm, &query, &classification, schema).await {
                Ok(Some(steps)) => {
                    s.record(TraceKind::Planned { steps: steps.clone() });
                    s.state.plan = Some(steps);
                }
                Ok(None) => s.record(TraceKind::PlanSkipped),
                Err(e) => s.degrade("plan", e),
            }
        }

        let (code, result) = self.attempt_loop(s, llm, &query, dataset, &classification).await?;

        s.enter(Stage::Summarize)?;
        let summary = self.summarize(llm, &query, &classification, &result).await?;

        s.enter(Stage::Enrich)?;
        let (insights, explanation) = futures::join!(
            insight::suggest(llm, &query, &summary),
            explainer::explain(llm, &query, &code),
        );
        let insights = insights.unwrap_or_else(|e| {
            s.degrade("insights", e);
            Vec::new()
        });
        let explanation = match explanation {
            Ok(text) => Some(text),
            Err(e) => {
                s.degrade("explanation", e);
                None
            }
        };

        let answer = FinalAnswer {
            summary,
            insights,
            explanation,
            code: code.clone(),
            stdout: result.stdout.clone(),
            artifacts: result.artifacts.clone(),
            anomalies: schema.anomalies(),
            optimization_notes: s.state.optimization_notes.clone(),
        };

        match self
            .cache
            .store(&query, dataset.fingerprint().clone(), answer.clone(), code)
            .await
        {
            Ok(()) => s.record(TraceKind::AnswerCached),
            Err(e) => s.degrade("cache", e),
        }

        s.state.final_answer = Some(answer.clone());
        s.enter(Stage::Accept)?;
        s.record(TraceKind::Accepted);
        Ok(Outcome {
            answer,
            similarity: None,
        })
    }

    /// Generate -> Optimize -> Screen -> Execute -> Validate until accepted
    async fn attempt_loop(
        &self,
        s: &mut Session<'_>,
        llm: Llm<'_>,
        query: &str,
        dataset: &Dataset,
        classification: &Classification,
    ) -> Result<(String, ExecutionResult), Halt> {
        let max = self.config.max_attempts;
        let validator = Validator::new(dataset.schema());
        let mut feedback: Option<RetryReason> = None;

        loop {
            s.enter(Stage::Generate)?;
            // attempt_count only moves together with code_history
            let attempt = s.state.attempt_count + 1;
            s.state.optimization_notes.clear();
            s.state.security_verdict = None;

            let input = GenerationInput {
                query,
                schema: dataset.schema(),
                classification,
                plan: s.state.plan.as_deref(),
                feedback: feedback.as_ref(),
                previous_code: s.state.last_code(),
            };
            let generated = match generator::generate(llm, input).await {
                Ok(generated) => generated,
                Err(e) => {
                    s.state.attempt_count = attempt;
                    s.state.code_history.push(CodeAttempt {
                        number: attempt,
                        code: None,
                        rationale: String::new(),
                        feedback: feedback.take(),
                        generated_at: Utc::now(),
                    });
                    s.record(TraceKind::GenerationFailed {
                        attempt,
                        reason: e.to_string(),
                    });
                    if attempt >= max {
                        return Err(Halt::new(
                            AbortKind::Provider,
                            format!("no code after {max} attempts: {e}"),
                        ));
                    }
                    if matches!(&e, GenerationError::Provider(p) if p.is_transient()) {
                        tokio::time::sleep(self.config.retry_backoff()).await;
                    }
                    feedback = Some(e.retry_reason());
                    continue;
                }
            };

            s.state.attempt_count = attempt;
            s.state.code_history.push(CodeAttempt {
                number: attempt,
                code: Some(generated.code.clone()),
                rationale: generated.rationale.clone(),
                feedback: feedback.take(),
                generated_at: Utc::now(),
            });
            s.record(TraceKind::CodeGenerated {
                attempt,
                rationale: generated.rationale,
            });
            let code = generated.code;

            s.enter(Stage::Optimize)?;
            let notes = optimizer::review(&code);
            s.record(TraceKind::Optimized {
                attempt,
                notes: notes.clone(),
            });
            s.state.optimization_notes = notes;

            s.enter(Stage::Screen)?;
            let verdict = self.screener.screen_code(&code);
            s.state.security_verdict = Some(verdict.clone());
            s.record(TraceKind::CodeScreened {
                attempt,
                verdict: verdict.clone(),
            });
            if let Verdict::Rejected(rejection) = verdict {
                if attempt >= max {
                    return Err(Halt::new(
                        AbortKind::Security,
                        format!("code rejected on attempt {attempt}: {} ({})", rejection.category, rejection.rule),
                    ));
                }
                feedback = Some(RetryReason::SecurityRejected { rejection });
                continue;
            }

            s.enter(Stage::Execute)?;
            let request = ExecutionRequest::new(code.clone(), dataset.input_dir())
                .with_timeout(self.config.sandbox.execution_timeout());
            let result = self
                .executor
                .execute(request)
                .await
                .map_err(|e| Halt::new(AbortKind::SandboxUnavailable, e.to_string()))?;
            s.record(TraceKind::Executed {
                attempt,
                exit_status: result.exit_status,
                fault: result.fault_kind(),
                duration_ms: result.duration_ms,
            });
            s.state.execution_result = Some(result.clone());

            s.enter(Stage::Validate)?;
            let verdict = validator.validate(&result, classification, &s.state.fault_history);
            s.state.validation_verdict = Some(verdict.clone());
            s.record(TraceKind::Validated {
                attempt,
                verdict: verdict.clone(),
            });
            if let Some(fault) = &result.fault {
                let signature = FaultSignature::of(fault);
                if !s.state.fault_history.contains(&signature) {
                    s.state.fault_history.push(signature);
                }
            }

            match verdict {
                ValidationVerdict::Accepted => return Ok((code, result)),
                ValidationVerdict::Abort { kind, detail } => return Err(Halt::new(kind, detail)),
                ValidationVerdict::Retry(reason) => {
                    if attempt >= max {
                        return Err(Halt::new(
                            reason.exhausted_kind(),
                            format!("gave up after {max} attempts: {}", reason.describe()),
                        ));
                    }
                    tracing::info!(session = %s.state.session_id, attempt, "retrying: {}", reason.describe());
                    feedback = Some(reason);
                }
            }
        }
    }

    /// Mandatory summary, retried up to `max_attempts` times
    async fn summarize(
        &self,
        llm: Llm<'_>,
        query: &str,
        classification: &Classification,
        result: &ExecutionResult,
    ) -> Result<String, Halt> {
        let max = self.config.max_attempts;
        let mut last_error = None;

        for call in 1..=max {
            match summarizer::summarize(llm, query, classification, result).await {
                Ok(summary) => return Ok(summary),
                Err(e) => {
                    if call < max && e.is_transient() {
                        tokio::time::sleep(self.config.retry_backoff()).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        let detail = last_error.map_or_else(|| "no summary".to_string(), |e| e.to_string());
        Err(Halt::new(
            AbortKind::Provider,
            format!("summarizer failed {max} times: {detail}"),
        ))
    }
}
