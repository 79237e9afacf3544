use parking_lot::Mutex;
use ria_sandbox::{CodeExecutor, ExecutionRequest, ExecutionResult, SandboxError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One scripted execution outcome
#[derive(Debug, Clone)]
pub enum ExecStep {
    Return(ExecutionResult),
    /// Sandbox could not be launched
    LaunchFailure(String),
    /// Sleep, then return
    Delay(Duration, ExecutionResult),
    /// Never completes; dropping it marks the executor as cancelled
    Hang,
}

/// Executor replaying scripted results
#[derive(Debug)]
pub struct ScriptedExecutor {
    steps: Mutex<VecDeque<ExecStep>>,
    default: Mutex<ExecStep>,
    codes: Mutex<Vec<String>>,
    calls: AtomicUsize,
    cancelled: Arc<AtomicBool>,
}

impl Default for ScriptedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedExecutor {
    /// Executor printing a descriptive answer by default
    pub fn new() -> Self {
        Self::returning(crate::text_result("Total revenue: 1234.5"))
    }

    /// Executor whose default outcome is `result`
    pub fn returning(result: ExecutionResult) -> Self {
        Self::with_default(ExecStep::Return(result))
    }

    pub fn with_default(step: ExecStep) -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            default: Mutex::new(step),
            codes: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Queue an outcome ahead of the default
    pub fn then(self, step: ExecStep) -> Self {
        self.steps.lock().push_back(step);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Code of every execution, in order
    pub fn codes(&self) -> Vec<String> {
        self.codes.lock().clone()
    }

    /// Whether a hanging execution was dropped
    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

struct CancelFlag(Arc<AtomicBool>);

impl Drop for CancelFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl CodeExecutor for ScriptedExecutor {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, SandboxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.codes.lock().push(request.code);

        let queued = self.steps.lock().pop_front();
        let step = match queued {
            Some(step) => step,
            None => self.default.lock().clone(),
        };

        match step {
            ExecStep::Return(result) => Ok(result),
            ExecStep::LaunchFailure(message) => Err(SandboxError::Launch(message)),
            ExecStep::Delay(delay, result) => {
                tokio::time::sleep(delay).await;
                Ok(result)
            }
            ExecStep::Hang => {
                let _flag = CancelFlag(Arc::clone(&self.cancelled));
                std::future::pending().await
            }
        }
    }
}
