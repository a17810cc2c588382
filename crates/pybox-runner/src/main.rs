//! pybox-runner - executes one Python submission and reports one JSON line
//!
//! Exit status 0 means a result line was written, whatever the submission
//! did. Any other status means the runner itself failed; the reason is on
//! stderr.

use clap::Parser;
use pybox_core::limits::{CgroupLimiter, RlimitLimiter};
use pybox_core::{ExecutionResult, ResourceLimiter};
use pybox_runner::args::{RunnerArgs, WorkingDirectory};
use pybox_runner::channel::ProtocolChannel;
use pybox_runner::network::DenyNetwork;
use pybox_runner::sandbox::{Sandbox, Script};
use pybox_runner::Result;
use pyo3::Python;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Exit status for a runner malfunction
const MALFUNCTION: u8 = 2;

fn main() -> ExitCode {
    let args = RunnerArgs::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    match run(&args) {
        Ok(result) => {
            tracing::debug!(success = result.success, "result emitted");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("pybox-runner: {e}");
            ExitCode::from(MALFUNCTION)
        }
    }
}

fn run(args: &RunnerArgs) -> Result<ExecutionResult> {
    let channel = ProtocolChannel::claim_stdout()?;

    // Resolve the code file before the working directory changes
    let script = Script::load(&args.code_file)?;
    let _workdir = WorkingDirectory::enter(args.workdir.as_deref())?;

    let cgroup = args.cgroup.clone().map(CgroupLimiter::new);
    let mut limiters: Vec<&dyn ResourceLimiter> = Vec::with_capacity(2);
    if let Some(cgroup) = &cgroup {
        limiters.push(cgroup);
    }
    limiters.push(&RlimitLimiter);

    // The interpreter must be up before the address space ceiling applies
    pyo3::prepare_freethreaded_python();

    Python::with_gil(|py| {
        Ok(Sandbox::new(script, channel)
            .apply_limits(py, &limiters, &args.limits())?
            .disable_network(py, &DenyNetwork)?
            .narrow_path(py)?
            .execute(py)?
            .emit()?
            .finish())
    })
}
