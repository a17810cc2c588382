//! Command line of the runner binary and its working directory

use crate::error::{Result, RunnerError};
use clap::Parser;
use pybox_core::ResourceLimits;
use pybox_core::limits::{DEFAULT_FILE_SIZE_BYTES, DEFAULT_MAX_OPEN_FILES, DEFAULT_MEMORY_BYTES};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Runs one Python file under resource limits and prints one JSON result line
#[derive(Parser, Debug, Clone)]
#[command(name = "pybox-runner")]
#[command(version, about)]
pub struct RunnerArgs {
    /// Python source file to execute
    pub code_file: PathBuf,

    /// CPU time limit in seconds
    #[arg(long, default_value_t = 1.0)]
    pub time_limit: f64,

    /// Address space limit in bytes (256 MiB when absent)
    #[arg(long)]
    pub memory_limit: Option<u64>,

    /// Directory to run in; a temporary one is used when absent
    #[arg(long)]
    pub workdir: Option<PathBuf>,

    /// Largest file the code may write, in bytes
    #[arg(long, default_value_t = DEFAULT_FILE_SIZE_BYTES)]
    pub file_size_limit: u64,

    /// Maximum number of open file descriptors
    #[arg(long, default_value_t = DEFAULT_MAX_OPEN_FILES)]
    pub max_open_files: u64,

    /// cgroup v2 directory to create and join before running
    #[arg(long)]
    pub cgroup: Option<PathBuf>,

    /// Log filter for diagnostics written to stderr
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

impl RunnerArgs {
    /// Limits to install before the code runs
    #[must_use]
    pub fn limits(&self) -> ResourceLimits {
        ResourceLimits::new(self.time_limit, self.memory_limit.unwrap_or(DEFAULT_MEMORY_BYTES))
            .with_file_size_bytes(self.file_size_limit)
            .with_max_open_files(self.max_open_files)
    }
}

/// Current directory of the runner for the duration of the run
#[derive(Debug)]
pub struct WorkingDirectory {
    path: PathBuf,
    _temp: Option<TempDir>,
}

impl WorkingDirectory {
    /// Create (if needed) and enter `requested`, or a fresh temporary directory
    pub fn enter(requested: Option<&Path>) -> Result<Self> {
        let (path, temp) = match requested {
            Some(path) => {
                std::fs::create_dir_all(path).map_err(|source| RunnerError::Workdir {
                    path: path.to_path_buf(),
                    source,
                })?;
                (path.to_path_buf(), None)
            }
            None => {
                let temp = tempfile::Builder::new()
                    .prefix("sandbox-")
                    .tempdir()
                    .map_err(|source| RunnerError::Workdir {
                        path: std::env::temp_dir(),
                        source,
                    })?;
                (temp.path().to_path_buf(), Some(temp))
            }
        };

        std::env::set_current_dir(&path).map_err(|source| RunnerError::Workdir {
            path: path.clone(),
            source,
        })?;

        tracing::debug!(workdir = %path.display(), temporary = temp.is_some(), "entered working directory");
        Ok(Self { path, _temp: temp })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
