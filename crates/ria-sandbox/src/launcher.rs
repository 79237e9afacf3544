//! Isolation launchers
//!
//! A launcher turns a prepared job workspace into a process command and
//! knows how to hard-kill what it started. The executor owns timing,
//! capture and artifact collection; the launcher owns isolation.

use crate::config::ContainerConfig;
use crate::{DATA_MOUNT, OUTPUT_MOUNT};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::thread;
use tokio::process::Command;

/// Host-side description of one execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    /// Unique job name (also the container name)
    pub name: String,
    /// Script file on the host
    pub script: PathBuf,
    /// Dataset directory on the host (mounted read-only)
    pub input_dir: PathBuf,
    /// Fresh artifact directory on the host (mounted writable)
    pub output_dir: PathBuf,
    /// Job workspace root on the host
    pub workdir: PathBuf,
}

/// How a finished process should be interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDisposition {
    /// Code ran to completion
    Success,
    /// Code exited with an error
    Failed(i32),
    /// Runtime killed the code for exceeding memory
    MemoryKilled,
    /// The isolated context itself never ran the code
    LaunchFailed(i32),
}

/// Starts and stops isolated execution contexts
pub trait Launcher: Send + Sync {
    /// Build the command that runs the job
    fn command(&self, job: &JobSpec) -> Command;

    /// Hard-kill whatever the job started
    ///
    /// Called on timeout and when an in-flight execution is dropped. Must
    /// not block.
    fn terminate(&self, job: &JobSpec);

    /// Interpret a process exit given what it wrote to stderr
    fn classify_exit(&self, status: ExitStatus, stderr: &str) -> ExitDisposition;
}

/// Stderr fragments only the container runtime itself writes
const RUNTIME_ERROR_MARKERS: &[&str] = &[
    "Error response from daemon",
    "Unable to find image",
    "OCI runtime",
    "Error: crun:",
    "Error: runc:",
    "Error: short-name",
];

/// Container runtime launcher (docker/podman)
///
/// Each job gets a fresh `--rm` container with no network, a read-only
/// root filesystem, dropped capabilities, an unprivileged user and the
/// configured memory/CPU/pid ceilings.
#[derive(Debug, Clone)]
pub struct ContainerLauncher {
    config: ContainerConfig,
}

impl ContainerLauncher {
    /// Script location inside the container
    pub const SCRIPT_PATH: &'static str = "/sandbox/script.py";

    /// Create launcher
    #[inline]
    #[must_use]
    pub fn new(config: ContainerConfig) -> Self {
        Self { config }
    }

    /// Runtime arguments for a job
    #[must_use]
    pub fn run_args(&self, job: &JobSpec) -> Vec<String> {
        let c = &self.config;
        let memory = format!("{}m", c.memory_mb);

        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            job.name.clone(),
            "--network".to_string(),
            "none".to_string(),
            "--read-only".to_string(),
            "--cap-drop".to_string(),
            "ALL".to_string(),
            "--security-opt".to_string(),
            "no-new-privileges".to_string(),
            "--pids-limit".to_string(),
            c.pids_limit.to_string(),
            "--memory".to_string(),
            memory.clone(),
            "--memory-swap".to_string(),
            memory,
            "--cpus".to_string(),
            c.cpus.to_string(),
            "--user".to_string(),
            c.user.clone(),
            "--tmpfs".to_string(),
            format!("/tmp:rw,noexec,size={}m", c.tmpfs_mb),
            "--mount".to_string(),
            format!(
                "type=bind,src={},dst={},readonly",
                job.script.display(),
                Self::SCRIPT_PATH
            ),
            "--mount".to_string(),
            format!(
                "type=bind,src={},dst={},readonly",
                job.input_dir.display(),
                DATA_MOUNT
            ),
            "--mount".to_string(),
            format!("type=bind,src={},dst={}", job.output_dir.display(), OUTPUT_MOUNT),
            "--workdir".to_string(),
            "/sandbox".to_string(),
            "--env".to_string(),
            "HOME=/tmp".to_string(),
            "--env".to_string(),
            "MPLBACKEND=Agg".to_string(),
            c.image.clone(),
        ];
        args.extend(c.interpreter.iter().cloned());
        args.push(Self::SCRIPT_PATH.to_string());
        args
    }
}

impl Launcher for ContainerLauncher {
    fn command(&self, job: &JobSpec) -> Command {
        let mut cmd = Command::new(&self.config.runtime);
        cmd.args(self.run_args(job));

        // The runtime client only needs to find its daemon
        cmd.env_clear();
        for key in ["PATH", "DOCKER_HOST", "XDG_RUNTIME_DIR", "CONTAINER_HOST"] {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }
        cmd.stdin(Stdio::null());
        cmd
    }

    fn terminate(&self, job: &JobSpec) {
        let runtime = self.config.runtime.clone();
        let name = job.name.clone();
        tracing::warn!(container = %name, "force-removing sandbox container");

        thread::spawn(move || {
            let _ = std::process::Command::new(runtime)
                .args(["rm", "--force", &name])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
        });
    }

    fn classify_exit(&self, status: ExitStatus, stderr: &str) -> ExitDisposition {
        match status.code() {
            Some(0) => ExitDisposition::Success,
            // SIGKILL from the OOM killer
            Some(137) => ExitDisposition::MemoryKilled,
            // Runtime could not create or start the container; the script may exit with these too
            Some(code @ (125..=127)) if RUNTIME_ERROR_MARKERS.iter().any(|m| stderr.contains(m)) => {
                ExitDisposition::LaunchFailed(code)
            }
            Some(code) => ExitDisposition::Failed(code),
            None => ExitDisposition::MemoryKilled,
        }
    }
}

/// Plain host-process launcher without isolation
///
/// Runs the interpreter directly with a cleared environment; `DATA_DIR`
/// and `OUTPUT_DIR` point at the mounts. Only for tests and local
/// development.
#[cfg(any(test, feature = "unconfined"))]
#[derive(Debug, Clone)]
pub struct UnconfinedLauncher {
    interpreter: Vec<String>,
}

#[cfg(any(test, feature = "unconfined"))]
impl UnconfinedLauncher {
    /// Create launcher for an interpreter command (e.g. `["sh"]`)
    #[must_use]
    pub fn new<I, S>(interpreter: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            interpreter: interpreter.into_iter().map(Into::into).collect(),
        }
    }
}

#[cfg(any(test, feature = "unconfined"))]
impl Launcher for UnconfinedLauncher {
    fn command(&self, job: &JobSpec) -> Command {
        let (program, args) = match self.interpreter.split_first() {
            Some((program, args)) => (program.as_str(), args),
            None => ("sh", &[][..]),
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(&job.script)
            .current_dir(&job.workdir)
            .env_clear()
            .env("PATH", "/usr/local/bin:/usr/bin:/bin")
            .env("DATA_DIR", &job.input_dir)
            .env("OUTPUT_DIR", &job.output_dir)
            .stdin(Stdio::null());
        cmd
    }

    fn terminate(&self, _job: &JobSpec) {
        // kill_on_drop on the child is sufficient
    }

    fn classify_exit(&self, status: ExitStatus, _stderr: &str) -> ExitDisposition {
        match status.code() {
            Some(0) => ExitDisposition::Success,
            Some(code) => ExitDisposition::Failed(code),
            None => ExitDisposition::MemoryKilled,
        }
    }
}
