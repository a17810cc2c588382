//! Execution result types

use serde::{Deserialize, Serialize};

/// Outcome of one sandboxed submission.
///
/// `success` describes the submitted code only. Problems with the sandbox
/// itself never show up here; they surface as [`crate::PyboxError`] instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionResult {
    /// Whether the submitted code ran to completion (or exited with status 0)
    pub success: bool,

    /// Everything the code wrote to its standard output
    pub stdout: String,

    /// Everything the code wrote to its standard error
    pub stderr: String,

    /// Human-readable failure cause, present only when `success` is false
    pub error: Option<String>,
}

impl ExecutionResult {
    #[must_use]
    pub fn succeeded(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: stderr.into(),
            error: None,
        }
    }

    #[must_use]
    pub fn failed(
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            stdout: stdout.into(),
            stderr: stderr.into(),
            error: Some(error.into()),
        }
    }

    /// Check that a success carries no error and a failure carries one
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        self.success == self.error.is_none()
    }
}
