//! Properties that hold for any sequence of sandbox outcomes

use proptest::prelude::*;
use ria_core::{AbortKind, Stage, TraceKind};
use ria_provider::Role;
use ria_sandbox::ExecutionResult;
use ria_test_utils::{
    fast_config, memory_fault, runtime_fault, sales_dataset, setup_orchestrator, text_result, timeout_fault, ExecStep,
    HashEmbedder, Reply, ScriptedExecutor, ScriptedProvider,
};
use std::sync::Arc;
use std::time::Duration;

fn outcome(choice: u8, index: usize) -> ExecutionResult {
    match choice % 5 {
        0 => text_result("Total revenue: 1234.5"),
        1 => runtime_fault(&format!("ValueError: bad value in step {index}")),
        2 => timeout_fault(),
        3 => memory_fault(),
        _ => text_result(""),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn attempts_are_bounded_and_recorded(
        max_attempts in 1u32..=4,
        choices in proptest::collection::vec(any::<u8>(), 1..6),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();

        let mut executor = ScriptedExecutor::returning(text_result("Total revenue: 1234.5"));
        for (i, choice) in choices.iter().enumerate() {
            executor = executor.then(ExecStep::Return(outcome(*choice, i)));
        }
        let provider = Arc::new(ScriptedProvider::new());
        let embedder = Arc::new(HashEmbedder::default());
        let executor = Arc::new(executor);
        let orchestrator = setup_orchestrator(
            fast_config().with_max_attempts(max_attempts),
            &provider,
            &embedder,
            &executor,
        );

        let outcome = runtime.block_on(orchestrator.run("What is the total revenue?", &sales_dataset()));
        let state = match &outcome {
            Ok(response) => &response.state,
            Err(report) => &report.state,
        };

        prop_assert!(state.attempt_count >= 1);
        prop_assert!(state.attempt_count <= max_attempts);
        prop_assert_eq!(state.code_history.len(), state.attempt_count as usize);
        prop_assert_eq!(executor.calls(), state.attempt_count as usize);
        for (i, attempt) in state.code_history.iter().enumerate() {
            prop_assert_eq!(attempt.number as usize, i + 1);
        }

        let mut signatures = state.fault_history.clone();
        signatures.dedup();
        prop_assert_eq!(signatures.len(), state.fault_history.len());

        match outcome {
            Ok(response) => {
                prop_assert_eq!(response.state.stage, Stage::Accept);
                prop_assert_eq!(response.state.final_answer.as_ref(), Some(&response.answer));
            }
            Err(report) => {
                prop_assert_eq!(report.state.stage, Stage::Abort);
                prop_assert!(report.state.final_answer.is_none());
                prop_assert!(report.kind != AbortKind::Internal);
                let last = report.state.trace.last().map(|e| e.kind.clone());
                let is_aborted = matches!(last, Some(TraceKind::Aborted { .. }));
                prop_assert!(is_aborted);
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn budget_expiry_during_generation_keeps_history_consistent() {
    let provider = Arc::new(ScriptedProvider::new().with_default(Role::Generator, Reply::Hang));
    let embedder = Arc::new(HashEmbedder::default());
    let executor = Arc::new(ScriptedExecutor::new());
    let config = fast_config()
        .with_run_timeout(Duration::from_secs(5))
        .with_provider_timeout(Duration::from_secs(30));
    let orchestrator = setup_orchestrator(config, &provider, &embedder, &executor);

    let report = orchestrator
        .run("What is the total revenue?", &sales_dataset())
        .await
        .unwrap_err();

    assert_eq!(report.kind, AbortKind::Timeout);
    assert_eq!(report.state.attempt_count, 0);
    assert_eq!(report.state.code_history.len(), report.state.attempt_count as usize);
    assert_eq!(executor.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn budget_expiry_after_a_failed_generation_counts_it_once() {
    let provider = Arc::new(
        ScriptedProvider::new()
            .with_reply(Role::Generator, Reply::text("no code block here"))
            .with_default(Role::Generator, Reply::Hang),
    );
    let embedder = Arc::new(HashEmbedder::default());
    let executor = Arc::new(ScriptedExecutor::new());
    let config = fast_config()
        .with_run_timeout(Duration::from_secs(5))
        .with_provider_timeout(Duration::from_secs(30));
    let orchestrator = setup_orchestrator(config, &provider, &embedder, &executor);

    let report = orchestrator
        .run("What is the total revenue?", &sales_dataset())
        .await
        .unwrap_err();

    assert_eq!(report.kind, AbortKind::Timeout);
    assert_eq!(report.state.attempt_count, 1);
    assert_eq!(report.state.code_history.len(), 1);
    assert!(report.state.code_history[0].code.is_none());
}
