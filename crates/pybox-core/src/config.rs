//! Orchestrator configuration

use crate::limits::{DEFAULT_FILE_SIZE_BYTES, DEFAULT_MAX_OPEN_FILES, DEFAULT_MEMORY_BYTES};
use crate::request::DEFAULT_TIME_LIMIT_SECS;
use crate::{PyboxError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name of the runner binary
pub const RUNNER_BINARY: &str = "pybox-runner";

/// Configuration shared by every invocation of one orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Path to the sandbox runner executable
    pub runner_path: PathBuf,

    /// Directory under which per-invocation workspaces are created
    pub scratch_root: PathBuf,

    /// Time limit in seconds when a request omits one
    pub default_time_limit: f64,

    /// Memory limit in bytes when a request omits one
    pub default_memory_limit: u64,

    /// Extra wall-clock time granted on top of the time limit
    pub grace_period: Duration,

    /// Largest file a submission may write, in bytes
    pub file_size_limit: u64,

    /// Maximum number of open file descriptors in the runner
    pub max_open_files: u64,

    /// Delegated cgroup v2 directory for per-run groups (disabled when unset)
    pub cgroup_root: Option<PathBuf>,

    /// Complete environment of the runner process
    pub env: Vec<(String, String)>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            runner_path: default_runner_path(),
            scratch_root: default_scratch_root(),
            default_time_limit: DEFAULT_TIME_LIMIT_SECS,
            default_memory_limit: DEFAULT_MEMORY_BYTES,
            grace_period: Duration::from_secs(2),
            file_size_limit: DEFAULT_FILE_SIZE_BYTES,
            max_open_files: DEFAULT_MAX_OPEN_FILES,
            cgroup_root: None,
            env: vec![
                ("PATH".into(), "/usr/bin:/bin".into()),
                ("LANG".into(), "C.UTF-8".into()),
                ("PYTHONSAFEPATH".into(), "1".into()),
                ("PYTHONUNBUFFERED".into(), "1".into()),
                ("PYTHONUTF8".into(), "1".into()),
                ("PYTHONDONTWRITEBYTECODE".into(), "1".into()),
            ],
        }
    }
}

impl OrchestratorConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder::default()
    }

    /// Load a JSON config file; absent fields keep their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PyboxError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            PyboxError::Config(format!("invalid config {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that would make every invocation fail
    pub fn validate(&self) -> Result<()> {
        if self.runner_path.as_os_str().is_empty() {
            return Err(PyboxError::Config("runner path is empty".into()));
        }
        if self.scratch_root.as_os_str().is_empty() {
            return Err(PyboxError::Config("scratch root is empty".into()));
        }
        if !self.default_time_limit.is_finite() || self.default_time_limit <= 0.0 {
            return Err(PyboxError::Config(format!(
                "default time limit must be positive, got {}",
                self.default_time_limit
            )));
        }
        if self.max_open_files < 3 {
            return Err(PyboxError::Config(format!(
                "max open files must leave room for stdio, got {}",
                self.max_open_files
            )));
        }
        Ok(())
    }
}

/// Builder for `OrchestratorConfig`
#[derive(Debug, Default)]
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorConfigBuilder {
    #[must_use]
    pub fn runner_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.runner_path = path.into();
        self
    }

    #[must_use]
    pub fn scratch_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.scratch_root = path.into();
        self
    }

    #[must_use]
    pub fn default_time_limit(mut self, secs: f64) -> Self {
        self.config.default_time_limit = secs;
        self
    }

    #[must_use]
    pub fn default_memory_limit(mut self, bytes: u64) -> Self {
        self.config.default_memory_limit = bytes;
        self
    }

    #[must_use]
    pub fn default_memory_limit_mb(self, mb: u64) -> Self {
        self.default_memory_limit(mb * 1024 * 1024)
    }

    #[must_use]
    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.config.grace_period = grace;
        self
    }

    #[must_use]
    pub fn file_size_limit(mut self, bytes: u64) -> Self {
        self.config.file_size_limit = bytes;
        self
    }

    #[must_use]
    pub fn max_open_files(mut self, count: u64) -> Self {
        self.config.max_open_files = count;
        self
    }

    #[must_use]
    pub fn cgroup_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.cgroup_root = Some(path.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.config.env.retain(|(existing, _)| *existing != key);
        self.config.env.push((key, value.into()));
        self
    }

    #[must_use]
    pub fn build(self) -> OrchestratorConfig {
        self.config
    }
}

/// Get default runner path from `PYBOX_RUNNER` env var or next to the current executable
///
/// Returns:
/// - `$PYBOX_RUNNER` if set
/// - `<dir of current exe>/pybox-runner` otherwise
pub fn default_runner_path() -> PathBuf {
    std::env::var_os("PYBOX_RUNNER").map_or_else(
        || {
            std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(|dir| dir.join(RUNNER_BINARY)))
                .unwrap_or_else(|| PathBuf::from(RUNNER_BINARY))
        },
        PathBuf::from,
    )
}

/// Get default scratch root from `PYBOX_SCRATCH_ROOT` env var or the system temp dir
pub fn default_scratch_root() -> PathBuf {
    std::env::var_os("PYBOX_SCRATCH_ROOT")
        .map_or_else(|| std::env::temp_dir().join("pybox"), PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = OrchestratorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.grace_period, Duration::from_secs(2));
        assert_eq!(config.default_memory_limit, 256 * 1024 * 1024);
        assert!(config.env.iter().any(|(k, v)| k == "PYTHONSAFEPATH" && v == "1"));
    }

    #[test]
    fn builder_replaces_env_keys() {
        let config = OrchestratorConfig::builder()
            .env("PATH", "/opt/python/bin")
            .default_memory_limit_mb(64)
            .build();
        let paths: Vec<_> = config.env.iter().filter(|(k, _)| k == "PATH").collect();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].1, "/opt/python/bin");
        assert_eq!(config.default_memory_limit, 64 * 1024 * 1024);
    }

    #[test]
    fn json_file_overrides_selected_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pybox.json");
        std::fs::write(
            &path,
            r#"{"runner_path":"/opt/pybox/pybox-runner","grace_period":{"secs":5,"nanos":0}}"#,
        )
        .unwrap();

        let config = OrchestratorConfig::from_json_file(&path).unwrap();
        assert_eq!(config.runner_path, PathBuf::from("/opt/pybox/pybox-runner"));
        assert_eq!(config.grace_period, Duration::from_secs(5));
        assert_eq!(config.max_open_files, DEFAULT_MAX_OPEN_FILES);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let config = OrchestratorConfig::builder().default_time_limit(0.0).build();
        assert!(matches!(config.validate(), Err(PyboxError::Config(_))));

        let config = OrchestratorConfig::builder().max_open_files(1).build();
        assert!(config.validate().is_err());
    }
}
