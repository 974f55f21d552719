//! Error classification and suggestions.
//!
//! Typed evaluator errors map straight to an [`ErrorKind`]. Free-form host
//! messages are classified by pattern. Every kind carries a short list of
//! deduplicated hints.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use strsim::levenshtein;

use crate::config::ErrorConfig;
use crate::expr::error::{EvalError, EvalErrorKind, Frame};
use crate::sandbox::error::SandboxError;

/// Taxonomy reported to callers as `errorKind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Denied,
    InvalidRequest,
    SyntaxError,
    UnresolvedBinding,
    MethodNotFound,
    NullReference,
    AccessDenied,
    TypeMismatch,
    TimedOut,
    Overloaded,
    RuntimeError,
}

/// The structured failure returned in place of a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub error_kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_excerpt: Option<Vec<String>>,
    pub suggestions: Vec<String>,
}

/// Message patterns for untyped host failures, checked in order.
fn message_patterns() -> &'static [(Regex, ErrorKind)] {
    static PATTERNS: OnceLock<Vec<(Regex, ErrorKind)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"(?i)(cannot find|unknown|unresolved|no such) (binding|variable|bean|symbol)", ErrorKind::UnresolvedBinding),
            (r"(?i)(method|function) .*(not found|does not exist|cannot be found)|no (method|overload)", ErrorKind::MethodNotFound),
            (r"(?i)\bnull\b.*(reference|pointer|dereference)|null ?pointer|on null|of null", ErrorKind::NullReference),
            (r"(?i)access (is )?denied|not permitted|forbidden|not accessible|illegal access", ErrorKind::AccessDenied),
            (r"(?i)cannot (convert|cast)|type mismatch|expected .* (got|found)", ErrorKind::TypeMismatch),
            (r"(?i)timed? ?out|deadline", ErrorKind::TimedOut),
            (r"(?i)syntax|parse error|unexpected token", ErrorKind::SyntaxError),
        ]
        .into_iter()
        .filter_map(|(pattern, kind)| Regex::new(pattern).ok().map(|re| (re, kind)))
        .collect()
    })
}

/// Classify a free-form message; `RuntimeError` when nothing matches.
pub fn classify_message(message: &str) -> ErrorKind {
    message_patterns()
        .iter()
        .find(|(re, _)| re.is_match(message))
        .map(|(_, kind)| *kind)
        .unwrap_or(ErrorKind::RuntimeError)
}

/// Classification of a typed evaluator error.
pub fn classify_eval_error(err: &EvalError) -> ErrorKind {
    match err.kind {
        EvalErrorKind::Syntax => ErrorKind::SyntaxError,
        EvalErrorKind::UnknownBinding => ErrorKind::UnresolvedBinding,
        EvalErrorKind::UnknownMember | EvalErrorKind::MethodNotFound => ErrorKind::MethodNotFound,
        EvalErrorKind::NullReference => ErrorKind::NullReference,
        EvalErrorKind::AccessDenied => ErrorKind::AccessDenied,
        EvalErrorKind::TypeMismatch => ErrorKind::TypeMismatch,
        EvalErrorKind::Interrupted => ErrorKind::TimedOut,
        EvalErrorKind::Host => classify_message(&err.message),
        EvalErrorKind::DivisionByZero
        | EvalErrorKind::IndexOutOfBounds
        | EvalErrorKind::Overflow
        | EvalErrorKind::LimitExceeded => ErrorKind::RuntimeError,
    }
}

/// Turns sandbox failures into [`ErrorReport`]s.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    stack_namespaces: Vec<String>,
    max_frames: usize,
    max_suggestions: usize,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(&ErrorConfig::default())
    }
}

impl ErrorClassifier {
    pub fn new(config: &ErrorConfig) -> Self {
        Self {
            stack_namespaces: config.stack_namespaces.clone(),
            max_frames: config.max_frames.min(10),
            max_suggestions: config.max_suggestions.min(5),
        }
    }

    pub fn kind_of(&self, err: &SandboxError) -> ErrorKind {
        match err {
            SandboxError::InvalidRequest(_) | SandboxError::Config(_) | SandboxError::Context(_) => {
                ErrorKind::InvalidRequest
            }
            SandboxError::Denied(_) => ErrorKind::Denied,
            SandboxError::Compile(_) => ErrorKind::SyntaxError,
            SandboxError::Runtime(e) => classify_eval_error(e),
            SandboxError::Timeout { .. } => ErrorKind::TimedOut,
            SandboxError::Overloaded { .. } => ErrorKind::Overloaded,
            SandboxError::WorkerUnavailable(_) => ErrorKind::RuntimeError,
        }
    }

    /// Build the report. `bindings` feeds the unresolved-binding hints.
    pub fn report(
        &self,
        err: &SandboxError,
        include_stack_trace: bool,
        bindings: &[String],
    ) -> ErrorReport {
        let kind = self.kind_of(err);
        let eval_error = match err {
            SandboxError::Compile(e) | SandboxError::Runtime(e) => Some(e),
            _ => None,
        };
        let stack_excerpt = if include_stack_trace {
            eval_error.map(|e| self.stack_excerpt(&e.frames))
        } else {
            None
        };
        ErrorReport {
            error_kind: kind,
            message: err.to_string(),
            stack_excerpt,
            suggestions: self.suggestions(kind, err, bindings),
        }
    }

    /// Frames from allow-listed namespaces only, innermost first.
    pub fn stack_excerpt(&self, frames: &[Frame]) -> Vec<String> {
        frames
            .iter()
            .filter(|frame| self.is_host_namespace(&frame.namespace))
            .take(self.max_frames)
            .map(Frame::to_string)
            .collect()
    }

    fn is_host_namespace(&self, namespace: &str) -> bool {
        self.stack_namespaces.iter().any(|prefix| {
            namespace == prefix
                || namespace
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with('.') || rest.starts_with("::"))
        })
    }

    fn suggestions(&self, kind: ErrorKind, err: &SandboxError, bindings: &[String]) -> Vec<String> {
        let mut hints: Vec<String> = Vec::new();
        match kind {
            ErrorKind::Denied => {
                hints.push("The expression matched the security policy and was not evaluated".into());
                hints.push("Use only the exposed bindings; type references, constructors and reflection are blocked".into());
                hints.push("Avoid escape sequences, ';' and template markers".into());
            }
            ErrorKind::InvalidRequest => {
                hints.push("Provide a non-empty expression".into());
                hints.push("Keep timeoutSeconds within 1..60".into());
            }
            ErrorKind::SyntaxError => {
                hints.push("Check that brackets and quotes are balanced".into());
                hints.push("Call methods on a binding, e.g. registry.names()".into());
                hints.push("Quote string literals with single quotes".into());
            }
            ErrorKind::UnresolvedBinding => {
                if let Some(name) = unresolved_name(err) {
                    if let Some(close) = closest(&name, bindings) {
                        hints.push(format!("Did you mean '{close}'?"));
                    }
                }
                hints.push("Check that the binding exists in the evaluation context".into());
                if !bindings.is_empty() {
                    hints.push(format!("Available bindings: {}", bindings.join(", ")));
                }
            }
            ErrorKind::MethodNotFound => {
                hints.push("Verify the method name, its visibility and argument count".into());
                hints.push("Use registry.byName(name) to inspect what a component exposes".into());
            }
            ErrorKind::NullReference => {
                hints.push("Guard against null before navigation with '?.'".into());
                hints.push("Supply a fallback with the elvis operator: value ?: default".into());
            }
            ErrorKind::AccessDenied => {
                hints.push("This member is blocked for every receiver".into());
                hints.push("Use a capability binding instead of reflective access".into());
            }
            ErrorKind::TypeMismatch => {
                hints.push("Check operand types; conditions must be boolean".into());
                hints.push("Convert explicitly, e.g. value.toString()".into());
            }
            ErrorKind::TimedOut => {
                hints.push("Narrow the expression, e.g. filter with .?[...] before projecting".into());
                hints.push("Increase timeoutSeconds (maximum 60)".into());
            }
            ErrorKind::Overloaded => {
                hints.push("All evaluation workers are busy; retry shortly".into());
            }
            ErrorKind::RuntimeError => {
                hints.push("Check the values the expression depends on".into());
                hints.push("Break the expression into smaller parts to locate the failure".into());
            }
        }
        dedup(hints, self.max_suggestions)
    }
}

fn unresolved_name(err: &SandboxError) -> Option<String> {
    let SandboxError::Runtime(e) = err else {
        return None;
    };
    let start = e.message.find('\'')? + 1;
    let len = e.message[start..].find('\'')?;
    Some(e.message[start..start + len].to_string())
}

fn dedup(hints: Vec<String>, max: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(max);
    for hint in hints {
        if out.len() == max {
            break;
        }
        if !out.contains(&hint) {
            out.push(hint);
        }
    }
    out
}

/// Closest binding name within edit distance 2.
fn closest<'b>(name: &str, bindings: &'b [String]) -> Option<&'b str> {
    bindings
        .iter()
        .map(|b| (levenshtein(&name.to_lowercase(), &b.to_lowercase()), b))
        .filter(|(d, _)| *d <= 2)
        .min_by_key(|(d, _)| *d)
        .map(|(_, b)| b.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::capability::Capability;
    use crate::sandbox::error::PolicyDenial;

    fn bindings() -> Vec<String> {
        vec!["clock".into(), "properties".into(), "registry".into()]
    }

    #[test]
    fn test_typed_errors_map_directly() {
        let c = ErrorClassifier::default();
        let err = SandboxError::Runtime(EvalError::null_reference("read property 'x'"));
        assert_eq!(c.kind_of(&err), ErrorKind::NullReference);
        let err = SandboxError::Compile(EvalError::syntax("bad", 0));
        assert_eq!(c.kind_of(&err), ErrorKind::SyntaxError);
        let err = SandboxError::Timeout {
            elapsed_ms: 10,
            limit_ms: 5,
        };
        assert_eq!(c.kind_of(&err), ErrorKind::TimedOut);
    }

    #[test]
    fn test_host_messages_classified_by_pattern() {
        assert_eq!(classify_message("No such bean 'orderSvc'"), ErrorKind::UnresolvedBinding);
        assert_eq!(classify_message("Method foo() cannot be found on type X"), ErrorKind::MethodNotFound);
        assert_eq!(classify_message("Attempted to dereference null reference"), ErrorKind::NullReference);
        assert_eq!(classify_message("Access is denied"), ErrorKind::AccessDenied);
        assert_eq!(classify_message("query timed out"), ErrorKind::TimedOut);
        assert_eq!(classify_message("disk on fire"), ErrorKind::RuntimeError);
    }

    #[test]
    fn test_unresolved_binding_suggests_names() {
        let c = ErrorClassifier::default();
        let err = SandboxError::Runtime(EvalError::unknown_binding("registy"));
        let report = c.report(&err, true, &bindings());
        assert_eq!(report.error_kind, ErrorKind::UnresolvedBinding);
        assert_eq!(report.suggestions[0], "Did you mean 'registry'?");
        assert!(report
            .suggestions
            .iter()
            .any(|s| s.contains("clock, properties, registry")));
        assert!(report.suggestions.len() <= 5);
    }

    #[test]
    fn test_stack_excerpt_filters_namespaces() {
        let c = ErrorClassifier::default();
        let mut err = EvalError::host("boom");
        err = err
            .with_frame("app.orders", "OrderService", "total")
            .with_frame("java.lang", "Thread", "run")
            .with_frame("appliance", "Fridge", "open")
            .with_frame("evalguard.context", "Registry", "byName");
        let report = c.report(&SandboxError::Runtime(err), true, &[]);
        assert_eq!(
            report.stack_excerpt.unwrap(),
            vec![
                "app.orders::OrderService.total".to_string(),
                "evalguard.context::Registry.byName".to_string(),
            ]
        );
    }

    #[test]
    fn test_stack_excerpt_capped_and_optional() {
        let c = ErrorClassifier::default();
        let mut err = EvalError::host("deep");
        for i in 0..20 {
            err = err.with_frame("app", "Layer", &format!("m{i}"));
        }
        let report = c.report(&SandboxError::Runtime(err.clone()), true, &[]);
        assert_eq!(report.stack_excerpt.unwrap().len(), 10);
        let report = c.report(&SandboxError::Runtime(err), false, &[]);
        assert!(report.stack_excerpt.is_none());
    }

    #[test]
    fn test_denied_report() {
        let c = ErrorClassifier::default();
        let err = SandboxError::Denied(PolicyDenial {
            category: Capability::ProcessControl,
            reason: "process control".into(),
        });
        let report = c.report(&err, true, &[]);
        assert_eq!(report.error_kind, ErrorKind::Denied);
        assert!(report.stack_excerpt.is_none());
        assert!(!report.suggestions.is_empty());
    }

    #[test]
    fn test_suggestions_are_deduplicated() {
        let out = dedup(
            vec!["a".into(), "b".into(), "a".into(), "c".into()],
            5,
        );
        assert_eq!(out, vec!["a", "b", "c"]);
        let out = dedup((0..9).map(|i| i.to_string()).collect(), 5);
        assert_eq!(out.len(), 5);
    }

    #[test]
    fn test_closest_binding() {
        assert_eq!(closest("REGISTY", &bindings()), Some("registry"));
        assert_eq!(closest("clok", &bindings()), Some("clock"));
        assert_eq!(closest("zzzzzz", &bindings()), None);
    }
}
