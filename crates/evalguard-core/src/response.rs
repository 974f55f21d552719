//! Evaluation lifecycle state and the response returned for every request.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classify::{ErrorKind, ErrorReport};
use crate::format::{FormattedResult, ResultMetadata};

/// Lifecycle of a single evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalState {
    Submitted,
    Validated,
    Compiled,
    Evaluating,
    Succeeded,
    Denied,
    CompileFailed,
    RuntimeFailed,
    TimedOut,
}

impl EvalState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Denied | Self::CompileFailed | Self::RuntimeFailed | Self::TimedOut
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Validated => "validated",
            Self::Compiled => "compiled",
            Self::Evaluating => "evaluating",
            Self::Succeeded => "succeeded",
            Self::Denied => "denied",
            Self::CompileFailed => "compile_failed",
            Self::RuntimeFailed => "runtime_failed",
            Self::TimedOut => "timed_out",
        }
    }

    /// Terminal state for a failed request.
    pub fn for_error(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Denied | ErrorKind::InvalidRequest => Self::Denied,
            ErrorKind::SyntaxError => Self::CompileFailed,
            ErrorKind::TimedOut => Self::TimedOut,
            _ => Self::RuntimeFailed,
        }
    }
}

impl fmt::Display for EvalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The structured outcome of one request. Exactly one of the result fields
/// or the error fields is populated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalResponse {
    pub request_id: Uuid,
    pub expression: String,
    pub timestamp_ms: i64,
    pub success: bool,
    pub state: EvalState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_type: Option<String>,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResultMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_excerpt: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
}

impl EvalResponse {
    pub fn succeeded(
        request_id: Uuid,
        expression: impl Into<String>,
        formatted: FormattedResult,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            request_id,
            expression: expression.into(),
            timestamp_ms: Utc::now().timestamp_millis(),
            success: true,
            state: EvalState::Succeeded,
            result: Some(formatted.result),
            result_type: Some(formatted.result_type),
            execution_time_ms,
            metadata: Some(formatted.metadata),
            error_kind: None,
            message: None,
            stack_excerpt: None,
            suggestions: None,
        }
    }

    pub fn failed(
        request_id: Uuid,
        expression: impl Into<String>,
        report: ErrorReport,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            request_id,
            expression: expression.into(),
            timestamp_ms: Utc::now().timestamp_millis(),
            success: false,
            state: EvalState::for_error(report.error_kind),
            result: None,
            result_type: None,
            execution_time_ms,
            metadata: None,
            error_kind: Some(report.error_kind),
            message: Some(report.message),
            stack_excerpt: report.stack_excerpt,
            suggestions: Some(report.suggestions),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(EvalState::Succeeded.is_terminal());
        assert!(EvalState::TimedOut.is_terminal());
        assert!(!EvalState::Evaluating.is_terminal());
        assert_eq!(EvalState::for_error(ErrorKind::SyntaxError), EvalState::CompileFailed);
        assert_eq!(EvalState::for_error(ErrorKind::NullReference), EvalState::RuntimeFailed);
    }

    #[test]
    fn test_failed_response_serializes_camel_case() {
        let report = ErrorReport {
            error_kind: ErrorKind::Denied,
            message: "policy denied".into(),
            stack_excerpt: None,
            suggestions: vec!["use bindings".into()],
        };
        let resp = EvalResponse::failed(Uuid::new_v4(), "T(x)", report, 0);
        let json: serde_json::Value = serde_json::from_str(&resp.to_json().unwrap()).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["state"], "denied");
        assert_eq!(json["errorKind"], "Denied");
        assert!(json.get("result").is_none());
        assert!(json.get("stackExcerpt").is_none());
        assert!(json["timestampMs"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_succeeded_response_carries_result() {
        let formatted = FormattedResult {
            result: serde_json::json!(4),
            result_type: "integer".into(),
            metadata: ResultMetadata::default(),
        };
        let resp = EvalResponse::succeeded(Uuid::new_v4(), "2+2", formatted, 3);
        assert!(resp.success);
        assert_eq!(resp.state, EvalState::Succeeded);
        assert_eq!(resp.result, Some(serde_json::json!(4)));
        assert!(resp.error_kind.is_none());
    }
}
