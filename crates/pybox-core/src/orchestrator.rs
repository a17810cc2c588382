//! Execution orchestrator
//!
//! One call to [`Orchestrator::execute`] maps to exactly one runner process:
//!
//! 1. validate the request (nothing is created for invalid input)
//! 2. stage a [`ScratchWorkspace`]
//! 3. spawn the runner with explicit limit arguments and a fixed environment
//! 4. wait under the outer deadline (`time_limit + grace_period`)
//! 5. interpret the exit status and decode the result line
//! 6. tear the workspace down, whatever happened in 3-5

use crate::child::{ChildHandle, ChildOutput, WaitOutcome};
use crate::limits::{CgroupLimiter, ResourceLimits};
use crate::protocol::{self, MAX_RESULT_BYTES};
use crate::workspace::ScratchWorkspace;
use crate::{ExecutionRequest, ExecutionResult, OrchestratorConfig, PyboxError, Result};
use nix::sys::signal::Signal;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

/// Longest runner stderr excerpt carried in a crash report
const MAX_CRASH_DETAIL: usize = 4096;

/// Runs submissions in sandbox runner processes
#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: OrchestratorConfig,
}

impl Orchestrator {
    #[must_use]
    pub const fn new(config: OrchestratorConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run `code` with the given stdin and limits
    pub fn run(
        &self,
        code: &str,
        stdin: Option<&str>,
        time_limit: f64,
        memory_limit: Option<u64>,
    ) -> Result<ExecutionResult> {
        let request = ExecutionRequest {
            code: code.to_owned(),
            stdin: stdin.map(str::to_owned),
            time_limit,
            memory_limit,
        };
        self.execute(&request)
    }

    /// Run one request to completion
    pub fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        request.validate()?;

        let limits = self.limits_for(request);
        let workspace = ScratchWorkspace::create(&self.config.scratch_root, &request.code)?;
        let cgroup = self
            .config
            .cgroup_root
            .as_ref()
            .map(|root| root.join(workspace.name()));

        tracing::info!(
            workspace = %workspace.name(),
            code_len = request.code.len(),
            cpu = limits.cpu_seconds,
            memory = limits.memory_bytes,
            "starting execution"
        );

        let outcome = self.supervise(request, &limits, &workspace, cgroup.as_deref());

        if let Some(path) = cgroup {
            if let Err(e) = CgroupLimiter::remove(&path) {
                tracing::warn!(error = %e, "cgroup cleanup failed");
            }
        }
        workspace.close();

        match &outcome {
            Ok(result) => tracing::info!(success = result.success, "execution finished"),
            Err(e) => tracing::warn!(kind = e.kind(), error = %e, "execution failed"),
        }

        outcome
    }

    /// Effective limits for a request under this configuration
    #[must_use]
    pub fn limits_for(&self, request: &ExecutionRequest) -> ResourceLimits {
        ResourceLimits::new(
            request.time_limit,
            request
                .memory_limit
                .unwrap_or(self.config.default_memory_limit),
        )
        .with_file_size_bytes(self.config.file_size_limit)
        .with_max_open_files(self.config.max_open_files)
    }

    /// Wall-clock budget for a request: time limit plus grace period
    #[must_use]
    pub fn outer_deadline(&self, request: &ExecutionRequest) -> Duration {
        Duration::from_secs_f64(request.time_limit) + self.config.grace_period
    }

    fn supervise(
        &self,
        request: &ExecutionRequest,
        limits: &ResourceLimits,
        workspace: &ScratchWorkspace,
        cgroup: Option<&Path>,
    ) -> Result<ExecutionResult> {
        let deadline = self.outer_deadline(request);
        let mut command = self.runner_command(limits, workspace, cgroup);
        let mut child = ChildHandle::spawn(&mut command, request.stdin.as_deref(), MAX_RESULT_BYTES)?;

        match child.wait_with_deadline(deadline)? {
            WaitOutcome::DeadlineExceeded => {
                let status = child.kill_and_reap()?;
                tracing::warn!(pid = child.id(), ?status, ?deadline, "runner exceeded deadline");
                Err(PyboxError::Timeout(deadline))
            }
            WaitOutcome::Exited(_) => interpret(&child.finish()?, limits),
        }
    }

    fn runner_command(
        &self,
        limits: &ResourceLimits,
        workspace: &ScratchWorkspace,
        cgroup: Option<&Path>,
    ) -> Command {
        let mut command = Command::new(&self.config.runner_path);
        command
            .arg(workspace.code_path())
            .arg("--time-limit")
            .arg(limits.cpu_seconds.to_string())
            .arg("--memory-limit")
            .arg(limits.memory_bytes.to_string())
            .arg("--workdir")
            .arg(workspace.workdir())
            .arg("--file-size-limit")
            .arg(limits.file_size_bytes.to_string())
            .arg("--max-open-files")
            .arg(limits.max_open_files.to_string());

        if let Some(path) = cgroup {
            command.arg("--cgroup").arg(path);
        }

        command
            .env_clear()
            .envs(self.config.env.iter().map(|(k, v)| (k, v)))
            .current_dir(workspace.path());
        command
    }
}

/// Turn a terminated runner into a result or an orchestrator error
fn interpret(output: &ChildOutput, limits: &ResourceLimits) -> Result<ExecutionResult> {
    if let Some(signo) = output.status.signal() {
        let signal = Signal::try_from(signo).ok();
        if signal == Some(Signal::SIGXCPU) {
            return Err(PyboxError::Timeout(Duration::from_secs(limits.cpu_seconds)));
        }

        let name = signal.map_or_else(|| format!("signal {signo}"), |s| s.as_str().to_owned());
        let mut detail = format!("runner terminated by {name}");
        let stderr = crash_detail(output);
        if !stderr.is_empty() {
            detail.push_str(": ");
            detail.push_str(&stderr);
        }
        return Err(PyboxError::RunnerCrash(detail));
    }

    if !output.status.success() {
        let stderr = crash_detail(output);
        let detail = if stderr.is_empty() {
            format!(
                "runner exited with status {}",
                output.status.code().unwrap_or(-1)
            )
        } else {
            stderr
        };
        return Err(PyboxError::RunnerCrash(detail));
    }

    if output.stdout.truncated {
        return Err(PyboxError::Protocol(format!(
            "result exceeded {MAX_RESULT_BYTES} bytes"
        )));
    }

    protocol::decode_line(&output.stdout.bytes)
}

fn crash_detail(output: &ChildOutput) -> String {
    let text = output.stderr.text();
    let text = text.trim();
    if text.len() <= MAX_CRASH_DETAIL {
        return text.to_owned();
    }

    let mut end = MAX_CRASH_DETAIL;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
