//! Error types for pybox-runner
//!
//! Every variant is a runner malfunction. Failures of the submitted code are
//! never errors here; they travel inside the emitted result.

use pybox_core::PyboxError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error(transparent)]
    Core(#[from] PyboxError),

    #[error("interpreter error: {0}")]
    Python(#[from] pyo3::PyErr),

    #[error("failed to read source {}: {source}", .path.display())]
    Source {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to enter working directory {}: {source}", .path.display())]
    Workdir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("protocol channel error: {0}")]
    Channel(std::io::Error),

    #[error("signal setup failed: {0}")]
    Signal(#[from] nix::Error),
}

/// Runner result type
pub type Result<T> = std::result::Result<T, RunnerError>;
