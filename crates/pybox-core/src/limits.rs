//! Resource ceilings for the sandbox runner
//!
//! [`ResourceLimits`] is derived once per request by the orchestrator and
//! passed to the runner on its command line. Inside the runner the limits are
//! enforced through a [`ResourceLimiter`] backend:
//! - [`RlimitLimiter`] - POSIX rlimits, always applied
//! - [`CgroupLimiter`] - optional cgroup v2 group for stronger accounting

use crate::{PyboxError, Result};
use nix::sys::resource::{Resource, getrlimit, setrlimit};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Smallest memory ceiling ever applied, whatever the request says.
///
/// The address space limit covers the embedded interpreter too, so the floor
/// must leave room for it to import what the runner needs.
pub const MIN_MEMORY_BYTES: u64 = 64 * 1024 * 1024;

/// Memory ceiling when none is requested
pub const DEFAULT_MEMORY_BYTES: u64 = 256 * 1024 * 1024;

/// Ceiling on the size of any file the submission writes
pub const DEFAULT_FILE_SIZE_BYTES: u64 = 1024 * 1024;

/// Ceiling on simultaneously open descriptors
pub const DEFAULT_MAX_OPEN_FILES: u64 = 32;

/// Gap between the soft and hard CPU limits, in seconds
pub const CPU_HARD_GAP_SECS: u64 = 1;

/// Limits enforced on one runner process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Soft CPU ceiling in seconds
    pub cpu_seconds: u64,
    /// Address space and data segment ceiling in bytes
    pub memory_bytes: u64,
    /// Largest file the process may create, in bytes
    pub file_size_bytes: u64,
    /// Maximum number of open file descriptors
    pub max_open_files: u64,
}

impl ResourceLimits {
    /// Derive limits from a time limit in seconds and a requested memory size
    #[must_use]
    pub fn new(time_limit_secs: f64, memory_bytes: u64) -> Self {
        Self {
            cpu_seconds: cpu_seconds_for(time_limit_secs),
            memory_bytes: effective_memory(memory_bytes),
            file_size_bytes: DEFAULT_FILE_SIZE_BYTES,
            max_open_files: DEFAULT_MAX_OPEN_FILES,
        }
    }

    #[must_use]
    pub const fn with_file_size_bytes(mut self, bytes: u64) -> Self {
        self.file_size_bytes = bytes;
        self
    }

    #[must_use]
    pub const fn with_max_open_files(mut self, count: u64) -> Self {
        self.max_open_files = count;
        self
    }

    /// Hard CPU ceiling; the kernel sends SIGKILL once it is reached
    #[must_use]
    pub const fn cpu_hard_seconds(&self) -> u64 {
        self.cpu_seconds.saturating_add(CPU_HARD_GAP_SECS)
    }
}

/// Whole CPU seconds granted for a time limit, never less than one
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn cpu_seconds_for(time_limit_secs: f64) -> u64 {
    if time_limit_secs.is_finite() && time_limit_secs >= 1.0 {
        time_limit_secs.floor() as u64
    } else {
        1
    }
}

/// Requested memory floored at [`MIN_MEMORY_BYTES`]
#[must_use]
pub const fn effective_memory(requested: u64) -> u64 {
    if requested < MIN_MEMORY_BYTES {
        MIN_MEMORY_BYTES
    } else {
        requested
    }
}

/// Kind of ceiling a single rlimit setting covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitResource {
    Cpu,
    AddressSpace,
    DataSegment,
    FileSize,
    OpenFiles,
}

impl LimitResource {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cpu => "RLIMIT_CPU",
            Self::AddressSpace => "RLIMIT_AS",
            Self::DataSegment => "RLIMIT_DATA",
            Self::FileSize => "RLIMIT_FSIZE",
            Self::OpenFiles => "RLIMIT_NOFILE",
        }
    }

    const fn as_nix(self) -> Resource {
        match self {
            Self::Cpu => Resource::RLIMIT_CPU,
            Self::AddressSpace => Resource::RLIMIT_AS,
            Self::DataSegment => Resource::RLIMIT_DATA,
            Self::FileSize => Resource::RLIMIT_FSIZE,
            Self::OpenFiles => Resource::RLIMIT_NOFILE,
        }
    }
}

/// One soft/hard pair to install
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RlimitSetting {
    pub resource: LimitResource,
    pub soft: u64,
    pub hard: u64,
}

/// Backend that enforces [`ResourceLimits`] on the current process
pub trait ResourceLimiter {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Apply the limits to the calling process
    fn apply(&self, limits: &ResourceLimits) -> Result<()>;
}

/// POSIX rlimit backend
#[derive(Debug, Clone, Copy, Default)]
pub struct RlimitLimiter;

impl RlimitLimiter {
    /// Settings in the order they are applied.
    ///
    /// CPU and memory come first so no later step can run unbounded.
    #[must_use]
    pub const fn plan(limits: &ResourceLimits) -> [RlimitSetting; 5] {
        [
            RlimitSetting {
                resource: LimitResource::Cpu,
                soft: limits.cpu_seconds,
                hard: limits.cpu_hard_seconds(),
            },
            RlimitSetting {
                resource: LimitResource::AddressSpace,
                soft: limits.memory_bytes,
                hard: limits.memory_bytes,
            },
            RlimitSetting {
                resource: LimitResource::DataSegment,
                soft: limits.memory_bytes,
                hard: limits.memory_bytes,
            },
            RlimitSetting {
                resource: LimitResource::FileSize,
                soft: limits.file_size_bytes,
                hard: limits.file_size_bytes,
            },
            RlimitSetting {
                resource: LimitResource::OpenFiles,
                soft: limits.max_open_files,
                hard: limits.max_open_files,
            },
        ]
    }
}

impl ResourceLimiter for RlimitLimiter {
    fn name(&self) -> &'static str {
        "rlimit"
    }

    fn apply(&self, limits: &ResourceLimits) -> Result<()> {
        for setting in Self::plan(limits) {
            set_rlimit(setting)?;
        }
        tracing::debug!(
            cpu = limits.cpu_seconds,
            memory = limits.memory_bytes,
            fsize = limits.file_size_bytes,
            nofile = limits.max_open_files,
            "rlimits applied"
        );
        Ok(())
    }
}

fn set_rlimit(setting: RlimitSetting) -> Result<()> {
    let resource = setting.resource.as_nix();
    let (_, current_hard) = getrlimit(resource).map_err(|e| {
        PyboxError::Limit(format!("getrlimit({}) failed: {e}", setting.resource.name()))
    })?;

    // An unprivileged process can only lower its hard limit
    let hard = setting.hard.min(current_hard);
    let soft = setting.soft.min(hard);
    if hard < setting.hard {
        tracing::debug!(
            resource = setting.resource.name(),
            requested = setting.hard,
            hard,
            "hard limit clamped to current maximum"
        );
    }

    setrlimit(resource, soft, hard).map_err(|e| {
        PyboxError::Limit(format!("setrlimit({}) failed: {e}", setting.resource.name()))
    })
}

/// Microseconds per cgroup v2 CPU period
const CPU_PERIOD_US: u64 = 100_000;

/// Cap on tasks inside the cgroup
const PIDS_MAX: u64 = 32;

/// cgroup v2 backend.
///
/// The runner creates the group, writes the controller files and then moves
/// itself into it. The directory must live under a delegated, writable cgroup
/// root; the orchestrator removes it with [`CgroupLimiter::remove`] after the
/// runner has been reaped.
#[derive(Debug, Clone)]
pub struct CgroupLimiter {
    path: PathBuf,
}

impl CgroupLimiter {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Controller values written for the given limits, in write order
    #[must_use]
    pub fn controller_values(limits: &ResourceLimits) -> Vec<(&'static str, String)> {
        vec![
            ("memory.max", limits.memory_bytes.to_string()),
            ("memory.swap.max", "0".to_string()),
            ("cpu.max", format!("{CPU_PERIOD_US} {CPU_PERIOD_US}")),
            ("pids.max", PIDS_MAX.to_string()),
        ]
    }

    /// Remove an emptied cgroup directory
    pub fn remove(path: &Path) -> Result<()> {
        match fs::remove_dir(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PyboxError::Limit(format!(
                "failed to remove cgroup {}: {e}",
                path.display()
            ))),
        }
    }

    fn write(&self, file: &str, value: &str) -> Result<()> {
        let target = self.path.join(file);
        fs::write(&target, value).map_err(|e| {
            PyboxError::Limit(format!("failed to write {}: {e}", target.display()))
        })
    }
}

impl ResourceLimiter for CgroupLimiter {
    fn name(&self) -> &'static str {
        "cgroup"
    }

    fn apply(&self, limits: &ResourceLimits) -> Result<()> {
        fs::create_dir_all(&self.path).map_err(|e| {
            PyboxError::Limit(format!(
                "failed to create cgroup {}: {e}",
                self.path.display()
            ))
        })?;

        for (file, value) in Self::controller_values(limits) {
            // swap accounting is not always enabled
            if file == "memory.swap.max" && !self.path.join(file).exists() {
                continue;
            }
            self.write(file, &value)?;
        }

        self.write("cgroup.procs", &std::process::id().to_string())?;
        tracing::debug!(cgroup = %self.path.display(), "joined cgroup");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_is_floored() {
        assert_eq!(effective_memory(0), MIN_MEMORY_BYTES);
        assert_eq!(effective_memory(1024), MIN_MEMORY_BYTES);
        assert_eq!(effective_memory(96 << 20), 96 << 20);
    }

    #[test]
    fn cpu_seconds_never_below_one() {
        assert_eq!(cpu_seconds_for(0.2), 1);
        assert_eq!(cpu_seconds_for(1.0), 1);
        assert_eq!(cpu_seconds_for(2.9), 2);
        assert_eq!(cpu_seconds_for(30.0), 30);
        assert_eq!(cpu_seconds_for(f64::NAN), 1);
    }

    #[test]
    fn plan_orders_cpu_and_memory_first() {
        let limits = ResourceLimits::new(3.0, 64 << 20);
        let plan = RlimitLimiter::plan(&limits);
        let order: Vec<_> = plan.iter().map(|s| s.resource).collect();
        assert_eq!(
            order,
            [
                LimitResource::Cpu,
                LimitResource::AddressSpace,
                LimitResource::DataSegment,
                LimitResource::FileSize,
                LimitResource::OpenFiles,
            ]
        );
        assert_eq!((plan[0].soft, plan[0].hard), (3, 4));
        assert_eq!(plan[1].soft, 64 << 20);
        assert_eq!(plan[3].hard, DEFAULT_FILE_SIZE_BYTES);
        assert_eq!(plan[4].hard, DEFAULT_MAX_OPEN_FILES);
    }

    #[test]
    fn overrides_apply() {
        let limits = ResourceLimits::new(1.0, 0)
            .with_file_size_bytes(4096)
            .with_max_open_files(16);
        assert_eq!(limits.memory_bytes, MIN_MEMORY_BYTES);
        assert_eq!(limits.file_size_bytes, 4096);
        assert_eq!(limits.max_open_files, 16);
    }

    #[test]
    fn cgroup_values_follow_limits() {
        let limits = ResourceLimits::new(1.0, 128 << 20);
        let values = CgroupLimiter::controller_values(&limits);
        assert_eq!(values[0], ("memory.max", (128u64 << 20).to_string()));
        assert!(values.iter().any(|(file, _)| *file == "pids.max"));
    }

    #[test]
    fn removing_missing_cgroup_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        CgroupLimiter::remove(&dir.path().join("gone")).unwrap();
    }
}
