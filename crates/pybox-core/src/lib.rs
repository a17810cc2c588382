//! # pybox-core
//!
//! Execution orchestrator for untrusted Python submissions.
//!
//! This crate holds everything on the parent side of the sandbox boundary
//! plus the types both sides share:
//! - request validation and resource limit derivation
//! - ephemeral scratch workspaces with guaranteed teardown
//! - an owned child handle with an outer wall-clock deadline
//! - the single-line JSON result protocol spoken by `pybox-runner`

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod child;
pub mod config;
pub mod error;
pub mod limits;
pub mod orchestrator;
pub mod protocol;
pub mod request;
pub mod result;
pub mod workspace;

pub use config::OrchestratorConfig;
pub use error::PyboxError;
pub use limits::{ResourceLimiter, ResourceLimits};
pub use orchestrator::Orchestrator;
pub use request::ExecutionRequest;
pub use result::ExecutionResult;

/// Crate-level result type
pub type Result<T> = std::result::Result<T, PyboxError>;
