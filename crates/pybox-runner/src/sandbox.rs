//! Ordered setup of the runner process
//!
//! The steps before user code runs are fixed:
//!
//! `Init -> LimitsApplied -> NetworkDisabled -> PathNarrowed -> Executed -> ResultEmitted`
//!
//! Each transition consumes the previous state, so skipping or reordering a
//! step does not compile. Only `Sandbox<PathNarrowed>` can execute code:
//!
//! ```compile_fail
//! use pybox_runner::channel::ProtocolChannel;
//! use pybox_runner::sandbox::{Sandbox, Script};
//!
//! fn run_unrestricted(script: Script) {
//!     let sandbox = Sandbox::new(script, ProtocolChannel::from_writer(Vec::<u8>::new()));
//!     pyo3::Python::with_gil(|py| sandbox.execute(py));
//! }
//! ```

use crate::channel::ProtocolChannel;
use crate::context::ExecutionContext;
use crate::error::{Result, RunnerError};
use crate::network::NetworkPolicy;
use crate::search_path;
use nix::sys::signal::{SigHandler, Signal, signal};
use pybox_core::{ExecutionResult, ResourceLimiter, ResourceLimits};
use pyo3::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

/// Modules the runner needs after the limits are in place.
///
/// Imported up front so the address space ceiling only bounds the submission.
const PRELOADED_MODULES: [&str; 7] = [
    "builtins",
    "io",
    "sys",
    "socket",
    "_socket",
    "traceback",
    "linecache",
];

/// Nothing restricted yet
pub struct Init;
/// Resource ceilings installed
pub struct LimitsApplied;
/// Network entry points replaced
pub struct NetworkDisabled;
/// Module search path restricted
pub struct PathNarrowed;
/// Submission ran, result held
pub struct Executed(ExecutionResult);
/// Result written to the channel
pub struct ResultEmitted(ExecutionResult);

/// Submitted source file, read once before any restriction applies
#[derive(Debug, Clone)]
pub struct Script {
    path: PathBuf,
    dir: PathBuf,
    source: String,
}

impl Script {
    /// Resolve and read the code file
    pub fn load(path: &Path) -> Result<Self> {
        let source_err = |source| RunnerError::Source {
            path: path.to_path_buf(),
            source,
        };

        let path = fs::canonicalize(path).map_err(source_err)?;
        let source = fs::read_to_string(&path).map_err(source_err)?;
        let dir = path
            .parent()
            .map_or_else(|| PathBuf::from("/"), Path::to_path_buf);

        Ok(Self { path, dir, source })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Runner process in setup state `S`
pub struct Sandbox<S> {
    script: Script,
    channel: ProtocolChannel,
    state: S,
}

impl<S> Sandbox<S> {
    fn advance<T>(self, state: T) -> Sandbox<T> {
        Sandbox {
            script: self.script,
            channel: self.channel,
            state,
        }
    }

    #[must_use]
    pub const fn script(&self) -> &Script {
        &self.script
    }
}

impl Sandbox<Init> {
    #[must_use]
    pub const fn new(script: Script, channel: ProtocolChannel) -> Self {
        Self {
            script,
            channel,
            state: Init,
        }
    }

    /// Preload the runner's own modules, then install every limiter in order.
    ///
    /// The first limiter failure aborts the run.
    pub fn apply_limits(
        self,
        py: Python<'_>,
        limiters: &[&dyn ResourceLimiter],
        limits: &ResourceLimits,
    ) -> Result<Sandbox<LimitsApplied>> {
        for module in PRELOADED_MODULES {
            py.import_bound(module)?;
        }

        for limiter in limiters {
            limiter.apply(limits)?;
            tracing::debug!(backend = limiter.name(), "limits installed");
        }

        // Writes past RLIMIT_FSIZE fail with EFBIG instead of killing the process
        // SAFETY: SIG_IGN installs no handler code
        unsafe { signal(Signal::SIGXFSZ, SigHandler::SigIgn) }?;

        Ok(self.advance(LimitsApplied))
    }
}

impl Sandbox<LimitsApplied> {
    pub fn disable_network(
        self,
        py: Python<'_>,
        policy: &dyn NetworkPolicy,
    ) -> Result<Sandbox<NetworkDisabled>> {
        policy.install(py)?;
        tracing::debug!(policy = policy.name(), "network policy installed");
        Ok(self.advance(NetworkDisabled))
    }
}

impl Sandbox<NetworkDisabled> {
    pub fn narrow_path(self, py: Python<'_>) -> Result<Sandbox<PathNarrowed>> {
        search_path::apply(py, self.script.dir())?;
        Ok(self.advance(PathNarrowed))
    }
}

impl Sandbox<PathNarrowed> {
    /// Run the submission; its own failures end up in the held result
    pub fn execute(self, py: Python<'_>) -> Result<Sandbox<Executed>> {
        let context = ExecutionContext::new(py, self.script.path())?;
        let filename = self.script.path().to_string_lossy().into_owned();

        let outcome = context.execute(self.script.source(), &filename);
        tracing::debug!(success = outcome.is_success(), "submission finished");

        let result = outcome.into_result(context.captured_stdout()?, context.captured_stderr()?);
        Ok(self.advance(Executed(result)))
    }
}

impl Sandbox<Executed> {
    #[must_use]
    pub const fn result(&self) -> &ExecutionResult {
        &self.state.0
    }

    pub fn emit(mut self) -> Result<Sandbox<ResultEmitted>> {
        self.channel.emit(&self.state.0)?;
        let Executed(result) = self.state;
        Ok(Sandbox {
            script: self.script,
            channel: self.channel,
            state: ResultEmitted(result),
        })
    }
}

impl Sandbox<ResultEmitted> {
    /// The result that was written
    #[must_use]
    pub fn finish(self) -> ExecutionResult {
        self.state.0
    }
}
