//! Structured observability hooks for the evaluation lifecycle.
//!
//! This module provides:
//! - Request-scoped tracing spans via [`EvalSpan`]
//! - Emission functions for lifecycle events: started, denied, finished,
//!   timed out, worker abandoned
//!
//! Expression text is never logged. Events carry a short SHA-256
//! fingerprint of the expression instead, so repeated submissions can be
//! correlated without leaking their contents.

use sha2::{Digest, Sha256};
use tracing::{info, warn};

/// Request-scoped span.
///
/// # Example
///
/// ```ignore
/// let future = sandbox_work().instrument(EvalSpan::span("3f0c…"));
/// // every event inside carries request_id = "3f0c…"
/// ```
pub struct EvalSpan;

impl EvalSpan {
    pub fn span(request_id: &str) -> tracing::Span {
        tracing::info_span!("evalguard.eval", request_id = %request_id)
    }
}

/// First 16 hex characters of the SHA-256 of `expression`.
pub fn expression_fingerprint(expression: &str) -> String {
    let digest = Sha256::digest(expression.as_bytes());
    hex::encode(&digest[..8])
}

/// Emit event: evaluation started.
pub fn emit_evaluation_started(request_id: &str, fingerprint: &str, length: usize, timeout_ms: u64) {
    info!(
        event = "eval.started",
        request_id = %request_id,
        fingerprint = %fingerprint,
        length = length,
        timeout_ms = timeout_ms,
    );
}

/// Emit event: rejected by the security policy (warning level).
pub fn emit_evaluation_denied(request_id: &str, fingerprint: &str, category: &str, reason: &str) {
    warn!(
        event = "eval.denied",
        request_id = %request_id,
        fingerprint = %fingerprint,
        category = %category,
        reason = %reason,
    );
}

/// Emit event: terminal state reached.
pub fn emit_evaluation_finished(request_id: &str, state: &str, duration_ms: u64, success: bool) {
    info!(
        event = "eval.finished",
        request_id = %request_id,
        state = %state,
        duration_ms = duration_ms,
        success = success,
    );
}

/// Emit event: deadline exceeded (warning level).
pub fn emit_evaluation_timed_out(request_id: &str, elapsed_ms: u64, limit_ms: u64) {
    warn!(
        event = "eval.timed_out",
        request_id = %request_id,
        elapsed_ms = elapsed_ms,
        limit_ms = limit_ms,
    );
}

/// Emit event: a worker thread was detached while still running.
pub fn emit_worker_abandoned(worker: &str, limit_ms: u64) {
    warn!(event = "worker.abandoned", worker = %worker, limit_ms = limit_ms);
}
