//! Error types for the sandbox module.

use crate::config::ConfigError;
use crate::context::ContextError;
use crate::expr::error::EvalError;

use super::capability::Capability;

/// A security policy rejection. Raised before compilation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("policy denied ({category}): {reason}")]
pub struct PolicyDenial {
    pub category: Capability,
    pub reason: String,
}

/// Errors produced by the sandbox layer.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Denied(#[from] PolicyDenial),

    #[error("compile error: {0}")]
    Compile(EvalError),

    #[error("evaluation failed: {0}")]
    Runtime(EvalError),

    #[error("evaluation timed out after {elapsed_ms}ms (limit {limit_ms}ms)")]
    Timeout { elapsed_ms: u64, limit_ms: u64 },

    #[error("all {max} evaluation workers are busy")]
    Overloaded { max: usize },

    #[error("evaluation worker unavailable: {0}")]
    WorkerUnavailable(String),

    #[error("invalid sandbox configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid evaluation context: {0}")]
    Context(#[from] ContextError),
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = std::result::Result<T, SandboxError>;
