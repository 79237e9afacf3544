//! Bounded sandbox executor
//!
//! Every execution gets a fresh temporary workspace (script + output
//! mount) that is deleted when the execution finishes or is dropped. A
//! shared semaphore caps simultaneous executions; callers beyond the cap
//! wait for a permit instead of failing.

use crate::config::SandboxConfig;
use crate::error::SandboxError;
use crate::launcher::{ExitDisposition, JobSpec, Launcher};
use crate::result::{Artifact, ArtifactKind, ExecutionResult, ResourceLimit, SandboxFault};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Semaphore;
use ulid::Ulid;

/// How long to wait for output pipes after the process exits
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Code execution contract consumed by the orchestrator
#[async_trait::async_trait]
pub trait CodeExecutor: Send + Sync {
    /// Run code against a dataset mount
    ///
    /// Faults of the code are reported in the result; `Err` means the
    /// sandbox itself could not be used.
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, SandboxError>;
}

/// One execution request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    /// Source code to run
    pub code: String,
    /// Host directory mounted read-only as the dataset
    pub input_dir: PathBuf,
    /// Overrides the configured timeout
    pub timeout: Option<Duration>,
}

impl ExecutionRequest {
    /// Create request with the configured timeout
    #[inline]
    #[must_use]
    pub fn new(code: impl Into<String>, input_dir: impl Into<PathBuf>) -> Self {
        Self {
            code: code.into(),
            input_dir: input_dir.into(),
            timeout: None,
        }
    }

    /// With explicit timeout
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Sandbox executor
#[derive(Debug)]
pub struct SandboxExecutor<L> {
    launcher: L,
    limiter: Arc<Semaphore>,
    config: SandboxConfig,
}

impl<L: Launcher> SandboxExecutor<L> {
    /// Create executor
    #[must_use]
    pub fn new(launcher: L, config: SandboxConfig) -> Self {
        Self {
            launcher,
            limiter: Arc::new(Semaphore::new(config.max_parallel_executions.max(1))),
            config,
        }
    }

    /// Executions that could start right now without queueing
    #[inline]
    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.limiter.available_permits()
    }

    /// Get configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Run code in a fresh isolated context
    ///
    /// # Errors
    /// - `SandboxError::InvalidInput` if the input mount is not a directory
    /// - `SandboxError::Workspace` if the job workspace cannot be prepared
    /// - `SandboxError::Launch` if the isolated context cannot be started
    pub async fn run(&self, request: ExecutionRequest) -> Result<ExecutionResult, SandboxError> {
        if !request.input_dir.is_dir() {
            return Err(SandboxError::InvalidInput(request.input_dir));
        }

        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| SandboxError::Closed)?;

        let workspace = tempfile::Builder::new()
            .prefix("ria-job-")
            .tempdir()
            .map_err(|e| SandboxError::workspace(std::env::temp_dir(), e))?;
        let job = prepare_job(workspace.path(), &request)?;

        let timeout = request
            .timeout
            .unwrap_or_else(|| self.config.execution_timeout());

        tracing::info!(job = %job.name, timeout_ms = timeout.as_millis() as u64, "sandbox execution starting");
        let started = Instant::now();

        let mut child = self
            .launcher
            .command(&job)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SandboxError::Launch(e.to_string()))?;

        // Dropping this future mid-run must still tear the context down
        let mut guard = TerminateGuard::new(&self.launcher, &job);

        let cap = self.config.max_output_bytes;
        let stdout = child.stdout.take().map(|s| tokio::spawn(read_capped(s, cap)));
        let stderr = child.stderr.take().map(|s| tokio::spawn(read_capped(s, cap)));

        let waited = tokio::time::timeout(timeout, child.wait()).await;

        let status = match waited {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => return Err(SandboxError::Launch(e.to_string())),
            Err(_) => {
                tracing::warn!(job = %job.name, "sandbox execution timed out");
                let _ = child.start_kill();
                self.launcher.terminate(&job);
                let _ = child.wait().await;
                None
            }
        };
        guard.disarm();

        let stdout = join_output(stdout).await;
        let stderr = join_output(stderr).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let mut result = ExecutionResult {
            stdout,
            stderr,
            artifacts: Vec::new(),
            exit_status: status.and_then(|s| s.code()),
            fault: None,
            duration_ms,
        };

        let Some(status) = status else {
            result.fault = Some(SandboxFault::resource_exceeded(
                ResourceLimit::WallClock,
                format!("execution exceeded {}s", timeout.as_secs_f64()),
            ));
            return Ok(result);
        };

        match self.launcher.classify_exit(status, &result.stderr) {
            ExitDisposition::Success => {
                result.artifacts = collect_artifacts(&job.output_dir, self.config.max_artifact_bytes).await?;
                tracing::info!(job = %job.name, duration_ms, artifacts = result.artifacts.len(), "sandbox execution succeeded");
            }
            ExitDisposition::Failed(code) => {
                tracing::info!(job = %job.name, code, "sandbox execution failed");
                let message = if result.stderr.trim().is_empty() {
                    format!("exited with status {code}")
                } else {
                    result.stderr.trim().to_string()
                };
                result.fault = Some(SandboxFault::runtime(message));
            }
            ExitDisposition::MemoryKilled => {
                tracing::warn!(job = %job.name, "sandbox execution killed by resource ceiling");
                result.fault = Some(SandboxFault::resource_exceeded(
                    ResourceLimit::Memory,
                    "killed after exceeding the memory ceiling",
                ));
            }
            ExitDisposition::LaunchFailed(code) => {
                return Err(SandboxError::Launch(format!(
                    "runtime exited with {code}: {}",
                    result.stderr.trim()
                )));
            }
        }

        Ok(result)
    }
}

#[async_trait::async_trait]
impl<L: Launcher> CodeExecutor for SandboxExecutor<L> {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, SandboxError> {
        self.run(request).await
    }
}

/// Write the script and create the output mount
fn prepare_job(root: &Path, request: &ExecutionRequest) -> Result<JobSpec, SandboxError> {
    let script = root.join("script.py");
    std::fs::write(&script, &request.code).map_err(|e| SandboxError::workspace(&script, e))?;

    let output_dir = root.join("output");
    std::fs::create_dir(&output_dir).map_err(|e| SandboxError::workspace(&output_dir, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // Container user is unprivileged and not the host owner
        std::fs::set_permissions(&output_dir, std::fs::Permissions::from_mode(0o777))
            .map_err(|e| SandboxError::workspace(&output_dir, e))?;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o444))
            .map_err(|e| SandboxError::workspace(&script, e))?;
    }

    let input_dir = request
        .input_dir
        .canonicalize()
        .map_err(|e| SandboxError::workspace(&request.input_dir, e))?;

    Ok(JobSpec {
        name: format!("ria-{}", Ulid::new().to_string().to_lowercase()),
        script,
        input_dir,
        output_dir,
        workdir: root.to_path_buf(),
    })
}

/// Read a stream to the end, keeping at most `cap` bytes
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, cap: usize) -> String {
    let mut kept = Vec::new();
    let mut buf = [0u8; 8192];
    let mut truncated = false;

    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = cap.saturating_sub(kept.len());
                if room < n {
                    truncated = true;
                }
                kept.extend_from_slice(&buf[..n.min(room)]);
            }
        }
    }

    let mut text = String::from_utf8_lossy(&kept).into_owned();
    if truncated {
        text.push_str("\n[output truncated]");
    }
    text
}

/// Wait briefly for a reader to drain
///
/// Background processes left behind by the code may keep a pipe open
/// after the main process is gone.
async fn join_output(handle: Option<tokio::task::JoinHandle<String>>) -> String {
    let Some(mut handle) = handle else {
        return String::new();
    };
    match tokio::time::timeout(OUTPUT_DRAIN_GRACE, &mut handle).await {
        Ok(Ok(text)) => text,
        _ => {
            handle.abort();
            String::new()
        }
    }
}

/// Collect regular files from the output mount
///
/// Symlinks and directories are ignored so the code cannot point the host
/// at files outside the mount.
async fn collect_artifacts(dir: &Path, max_bytes: u64) -> Result<Vec<Artifact>, SandboxError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| SandboxError::workspace(dir, e))?;
    let mut artifacts = Vec::new();

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| SandboxError::workspace(dir, e))?
    {
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| SandboxError::workspace(entry.path(), e))?;
        if !file_type.is_file() {
            tracing::debug!(path = %entry.path().display(), "skipping non-regular output entry");
            continue;
        }

        let path = entry.path();
        let size = entry
            .metadata()
            .await
            .map_err(|e| SandboxError::workspace(&path, e))?
            .len();
        if size > max_bytes {
            tracing::warn!(path = %path.display(), size, "skipping oversized artifact");
            continue;
        }

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| SandboxError::workspace(&path, e))?;
        artifacts.push(Artifact {
            name: entry.file_name().to_string_lossy().into_owned(),
            kind: ArtifactKind::from_path(&path),
            bytes,
            size,
        });
    }

    artifacts.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(artifacts)
}

/// Calls `Launcher::terminate` if dropped while armed
struct TerminateGuard<'a, L: Launcher> {
    launcher: &'a L,
    job: &'a JobSpec,
    armed: bool,
}

impl<'a, L: Launcher> TerminateGuard<'a, L> {
    fn new(launcher: &'a L, job: &'a JobSpec) -> Self {
        Self {
            launcher,
            job,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<L: Launcher> Drop for TerminateGuard<'_, L> {
    fn drop(&mut self) {
        if self.armed {
            self.launcher.terminate(self.job);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::UnconfinedLauncher;
    use crate::result::FaultKind;
    use pretty_assertions::assert_eq;

    fn executor(max_parallel: usize) -> SandboxExecutor<UnconfinedLauncher> {
        let config = SandboxConfig::new()
            .with_max_parallel(max_parallel)
            .with_timeout_secs(5);
        SandboxExecutor::new(UnconfinedLauncher::new(["sh"]), config)
    }

    fn input_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sales.csv"), "region,amount\nnorth,10\nsouth,5\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn successful_run_captures_stdout() {
        let input = input_dir();
        let result = executor(1)
            .run(ExecutionRequest::new("echo total=15", input.path()))
            .await
            .unwrap();

        assert!(result.succeeded());
        assert_eq!(result.stdout.trim(), "total=15");
        assert_eq!(result.exit_status, Some(0));
    }

    #[tokio::test]
    async fn reads_input_mount() {
        let input = input_dir();
        let result = executor(1)
            .run(ExecutionRequest::new("wc -l < \"$DATA_DIR/sales.csv\"", input.path()))
            .await
            .unwrap();

        assert_eq!(result.stdout.trim(), "3");
    }

    #[tokio::test]
    async fn non_zero_exit_is_runtime_fault_with_stderr() {
        let input = input_dir();
        let result = executor(1)
            .run(ExecutionRequest::new(
                "echo 'KeyError: revenue' >&2; exit 3",
                input.path(),
            ))
            .await
            .unwrap();

        assert_eq!(result.fault_kind(), Some(FaultKind::RuntimeFault));
        assert_eq!(result.exit_status, Some(3));
        assert!(result.fault.unwrap().message.contains("KeyError: revenue"));
    }

    #[tokio::test]
    async fn timeout_is_resource_exceeded() {
        let input = input_dir();
        let request = ExecutionRequest::new("sleep 10", input.path())
            .with_timeout(Duration::from_millis(300));

        let started = Instant::now();
        let result = executor(1).run(request).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        let fault = result.fault.unwrap();
        assert_eq!(fault.kind, FaultKind::ResourceExceeded);
        assert_eq!(fault.limit, Some(ResourceLimit::WallClock));
    }

    #[tokio::test]
    async fn collects_artifacts_from_output_mount_only() {
        let input = input_dir();
        let code = r#"
printf 'png' > "$OUTPUT_DIR/chart.png"
printf 'a,b' > "$OUTPUT_DIR/table.csv"
ln -s "$DATA_DIR/sales.csv" "$OUTPUT_DIR/leak.csv"
mkdir "$OUTPUT_DIR/nested"
echo done
"#;
        let result = executor(1)
            .run(ExecutionRequest::new(code, input.path()))
            .await
            .unwrap();

        let names: Vec<_> = result.artifacts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["chart.png", "table.csv"]);
        assert_eq!(result.artifacts_of(ArtifactKind::Chart).count(), 1);
        assert_eq!(result.artifacts[0].bytes, b"png");
    }

    #[tokio::test]
    async fn faulted_run_returns_no_artifacts() {
        let input = input_dir();
        let code = "printf 'png' > \"$OUTPUT_DIR/chart.png\"; exit 1";
        let result = executor(1)
            .run(ExecutionRequest::new(code, input.path()))
            .await
            .unwrap();

        assert!(!result.succeeded());
        assert!(result.artifacts.is_empty());
    }

    #[tokio::test]
    async fn output_is_capped() {
        let input = input_dir();
        let config = SandboxConfig {
            max_output_bytes: 16,
            ..SandboxConfig::default()
        };
        let executor = SandboxExecutor::new(UnconfinedLauncher::new(["sh"]), config);

        let result = executor
            .run(ExecutionRequest::new("yes x | head -n 1000", input.path()))
            .await
            .unwrap();

        assert!(result.stdout.ends_with("[output truncated]"));
        assert!(result.stdout.len() < 64);
    }

    #[tokio::test]
    async fn each_run_gets_a_fresh_output_mount() {
        let input = input_dir();
        let executor = executor(1);

        executor
            .run(ExecutionRequest::new("printf x > \"$OUTPUT_DIR/left.txt\"", input.path()))
            .await
            .unwrap();
        let second = executor
            .run(ExecutionRequest::new("ls \"$OUTPUT_DIR\"", input.path()))
            .await
            .unwrap();

        assert_eq!(second.stdout.trim(), "");
        assert!(second.artifacts.is_empty());
    }

    #[tokio::test]
    async fn missing_input_mount_is_rejected() {
        let result = executor(1)
            .run(ExecutionRequest::new("echo hi", "/definitely/not/here"))
            .await;
        assert!(matches!(result, Err(SandboxError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn excess_requests_queue_behind_the_ceiling() {
        let input = input_dir();
        let executor = Arc::new(executor(1));

        let started = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..2 {
            let executor = Arc::clone(&executor);
            let path = input.path().to_path_buf();
            handles.push(tokio::spawn(async move {
                executor.run(ExecutionRequest::new("sleep 0.3", path)).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().unwrap().succeeded());
        }

        assert!(started.elapsed() >= Duration::from_millis(600));
        assert_eq!(executor.available_slots(), 1);
    }

    #[tokio::test]
    async fn host_environment_is_not_visible() {
        std::env::set_var("RIA_HOST_CREDENTIAL", "secret");
        let input = input_dir();
        let result = executor(1)
            .run(ExecutionRequest::new("echo \"[$RIA_HOST_CREDENTIAL]\"", input.path()))
            .await
            .unwrap();

        assert_eq!(result.stdout.trim(), "[]");
    }
}
