//! Error types for pybox-core

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PyboxError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("timeout after {:.1} seconds", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("runner crashed: {0}")]
    RunnerCrash(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("resource limit error: {0}")]
    Limit(String),

    #[error("failed to spawn runner {}: {source}", .path.display())]
    Spawn {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("workspace error at {}: {source}", .path.display())]
    Workspace {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("nix error: {0}")]
    Nix(#[from] nix::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl PyboxError {
    /// Stable machine-readable name of the error kind
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::Timeout(_) => "timeout",
            Self::RunnerCrash(_) => "runner_crash",
            Self::Protocol(_) => "protocol_error",
            Self::Config(_) => "config",
            Self::Limit(_)
            | Self::Spawn { .. }
            | Self::Workspace { .. }
            | Self::Io(_)
            | Self::Nix(_)
            | Self::Json(_) => "internal",
        }
    }

    /// Whether the caller got nothing back because of its own input
    #[must_use]
    pub const fn is_caller_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }
}
