//! The sandbox facade: one call per request, one response per call.

use std::time::{Duration, Instant};

use tracing::{debug, Instrument};
use uuid::Uuid;

use crate::classify::ErrorClassifier;
use crate::config::SandboxConfig;
use crate::context::EvaluationContext;
use crate::expr::compile;
use crate::format::{FormattedResult, ResultFormatter};
use crate::metrics::METRICS;
use crate::obs::{self, EvalSpan};
use crate::response::{EvalResponse, EvalState};
use crate::sandbox::error::{PolicyDenial, SandboxError, SandboxResult};
use crate::sandbox::execution::TimeoutGuard;
use crate::sandbox::policy::SecurityPolicy;
use crate::sandbox::request::EvalRequest;

/// Validates, compiles, evaluates and formats expressions against a fixed
/// context.
///
/// Cheap to share behind an `Arc`; requests are independent of each other.
#[derive(Debug)]
pub struct ExpressionSandbox {
    config: SandboxConfig,
    policy: SecurityPolicy,
    context: EvaluationContext,
    guard: TimeoutGuard,
    formatter: ResultFormatter,
    classifier: ErrorClassifier,
}

impl ExpressionSandbox {
    pub fn new(config: SandboxConfig, context: EvaluationContext) -> SandboxResult<Self> {
        config.validate()?;
        let policy = SecurityPolicy::from_config(&config.policy)?;
        Ok(Self {
            guard: TimeoutGuard::new(&config.execution),
            formatter: ResultFormatter::new(&config.format),
            classifier: ErrorClassifier::new(&config.errors),
            policy,
            context,
            config,
        })
    }

    /// Replace the policy built from config.
    pub fn with_policy(mut self, policy: SecurityPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn context(&self) -> &EvaluationContext {
        &self.context
    }

    pub fn bindings(&self) -> Vec<String> {
        self.context.names()
    }

    pub fn available_workers(&self) -> usize {
        self.guard.available_workers()
    }

    /// Run only the security policy. Nothing is compiled or evaluated.
    pub fn validate_only(&self, expression: &str) -> Result<(), PolicyDenial> {
        self.policy.validate(expression)
    }

    /// Evaluate one request. Never fails; every outcome is a response.
    pub async fn evaluate(&self, request: EvalRequest) -> EvalResponse {
        let request_id = Uuid::new_v4();
        let span = EvalSpan::span(&request_id.to_string());
        self.respond(request_id, request).instrument(span).await
    }

    /// Response for input that never parsed into a request.
    pub fn reject_malformed(&self, message: impl Into<String>) -> EvalResponse {
        METRICS.inc_evaluations();
        METRICS.inc_failed();
        let err = SandboxError::InvalidRequest(message.into());
        let report = self.classifier.report(&err, false, &[]);
        EvalResponse::failed(Uuid::new_v4(), String::new(), report, 0)
    }

    async fn respond(&self, request_id: Uuid, request: EvalRequest) -> EvalResponse {
        let started = Instant::now();
        let id = request_id.to_string();
        let fingerprint = obs::expression_fingerprint(&request.expression);
        METRICS.inc_evaluations();

        let outcome = self.pipeline(&id, &fingerprint, &request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let response = match outcome {
            Ok(formatted) => {
                METRICS.inc_succeeded();
                EvalResponse::succeeded(request_id, request.expression, formatted, elapsed_ms)
            }
            Err(err) => {
                self.record_failure(&id, &fingerprint, &err);
                let report =
                    self.classifier
                        .report(&err, request.include_stack_trace, &self.context.names());
                EvalResponse::failed(request_id, request.expression, report, elapsed_ms)
            }
        };
        obs::emit_evaluation_finished(&id, response.state.as_str(), elapsed_ms, response.success);
        response
    }

    async fn pipeline(
        &self,
        id: &str,
        fingerprint: &str,
        request: &EvalRequest,
    ) -> SandboxResult<FormattedResult> {
        debug!(state = %EvalState::Submitted);
        let secs = request
            .check(
                self.config.execution.default_timeout_secs,
                self.config.execution.max_timeout_secs,
            )
            .map_err(SandboxError::InvalidRequest)?;
        obs::emit_evaluation_started(
            id,
            fingerprint,
            request.expression.chars().count(),
            secs * 1000,
        );

        self.policy.validate(&request.expression)?;
        debug!(state = %EvalState::Validated);

        let compiled = compile(&request.expression).map_err(SandboxError::Compile)?;
        debug!(state = %EvalState::Compiled);

        debug!(state = %EvalState::Evaluating);
        let hint = request.return_type_hint;
        let mode = request.format;
        let formatter = self.formatter.clone();
        let evaluated = self
            .guard
            .run_with_deadline(&compiled, &self.context, Duration::from_secs(secs), move |value| {
                let value = hint.apply(value)?;
                Ok(formatter.format(&value, mode))
            })
            .await?;
        debug!(elapsed_ms = evaluated.elapsed.as_millis() as u64, "evaluation returned");
        Ok(evaluated.value)
    }

    fn record_failure(&self, id: &str, fingerprint: &str, err: &SandboxError) {
        match err {
            SandboxError::Denied(denial) => {
                METRICS.inc_denied();
                obs::emit_evaluation_denied(
                    id,
                    fingerprint,
                    &denial.category.to_string(),
                    &denial.reason,
                );
            }
            SandboxError::Timeout {
                elapsed_ms,
                limit_ms,
            } => {
                METRICS.inc_timed_out();
                obs::emit_evaluation_timed_out(id, *elapsed_ms, *limit_ms);
            }
            SandboxError::Overloaded { .. } => METRICS.inc_overloaded(),
            _ => METRICS.inc_failed(),
        }
    }
}
