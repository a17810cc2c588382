//! Execution requests as handed over by the submission source

use crate::{PyboxError, Result};
use serde::{Deserialize, Serialize};

/// Time limit applied when the submission source does not provide one
pub const DEFAULT_TIME_LIMIT_SECS: f64 = 30.0;

/// One submission to run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Python source text
    pub code: String,

    /// Text fed to the program's standard input
    #[serde(default)]
    pub stdin: Option<String>,

    /// Time limit in seconds
    #[serde(default = "default_time_limit")]
    pub time_limit: f64,

    /// Memory limit in bytes (configured default when absent)
    #[serde(default)]
    pub memory_limit: Option<u64>,
}

const fn default_time_limit() -> f64 {
    DEFAULT_TIME_LIMIT_SECS
}

impl ExecutionRequest {
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            stdin: None,
            time_limit: DEFAULT_TIME_LIMIT_SECS,
            memory_limit: None,
        }
    }

    #[must_use]
    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    #[must_use]
    pub fn with_time_limit(mut self, secs: f64) -> Self {
        self.time_limit = secs;
        self
    }

    #[must_use]
    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Reject requests that must never reach a runner process
    pub fn validate(&self) -> Result<()> {
        if self.code.trim().is_empty() {
            return Err(PyboxError::InvalidInput("code must not be empty".into()));
        }

        if !self.time_limit.is_finite() || self.time_limit <= 0.0 {
            return Err(PyboxError::InvalidInput(format!(
                "time limit must be a positive number of seconds, got {}",
                self.time_limit
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_code_is_rejected() {
        for code in ["", "   ", "\n\t\n"] {
            let err = ExecutionRequest::new(code).validate().unwrap_err();
            assert!(matches!(err, PyboxError::InvalidInput(_)), "{code:?}");
        }
    }

    #[test]
    fn bad_time_limits_are_rejected() {
        for limit in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let request = ExecutionRequest::new("print(1)").with_time_limit(limit);
            assert!(request.validate().is_err(), "{limit}");
        }
    }

    #[test]
    fn missing_fields_take_defaults() {
        let request: ExecutionRequest = serde_json::from_str(r#"{"code":"print(1)"}"#).unwrap();
        assert!(request.stdin.is_none());
        assert!(request.memory_limit.is_none());
        assert!((request.time_limit - DEFAULT_TIME_LIMIT_SECS).abs() < f64::EPSILON);
        request.validate().unwrap();
    }
}
