//! Compile and evaluation error types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The kind of failure raised while compiling or evaluating an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalErrorKind {
    /// The expression text could not be tokenized or parsed.
    Syntax,
    /// An identifier does not name any binding.
    UnknownBinding,
    /// A property does not exist on the receiver.
    UnknownMember,
    /// A method does not exist on the receiver, or no overload matches.
    MethodNotFound,
    /// Navigation through a null value without `?.`.
    NullReference,
    /// The operation is recognised but never exposed to expressions.
    AccessDenied,
    /// An operand or result has the wrong type.
    TypeMismatch,
    /// Integer or float division (or modulo) by zero.
    DivisionByZero,
    /// Index outside a list or string.
    IndexOutOfBounds,
    /// Checked integer arithmetic overflowed.
    Overflow,
    /// A size limit (string length, collection size) was exceeded.
    LimitExceeded,
    /// The evaluation was interrupted by its deadline.
    Interrupted,
    /// A host object reported a failure with a free-form message.
    Host,
}

/// One step of the host call chain at which an error surfaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub namespace: String,
    pub type_name: String,
    pub member: String,
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}.{}", self.namespace, self.type_name, self.member)
    }
}

/// An error produced by the compiler or the evaluator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct EvalError {
    pub kind: EvalErrorKind,
    pub message: String,
    /// Character offset in the source, for syntax errors.
    pub position: Option<usize>,
    /// Host frames, innermost first.
    pub frames: Vec<Frame>,
}

impl EvalError {
    pub fn new(kind: EvalErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            position: None,
            frames: Vec::new(),
        }
    }

    pub fn syntax(message: impl Into<String>, position: usize) -> Self {
        Self {
            position: Some(position),
            ..Self::new(EvalErrorKind::Syntax, message)
        }
    }

    pub fn unknown_binding(name: &str) -> Self {
        Self::new(
            EvalErrorKind::UnknownBinding,
            format!("unknown binding '{name}'"),
        )
    }

    pub fn unknown_member(type_name: &str, member: &str) -> Self {
        Self::new(
            EvalErrorKind::UnknownMember,
            format!("property '{member}' not found on {type_name}"),
        )
    }

    pub fn method_not_found(type_name: &str, method: &str) -> Self {
        Self::new(
            EvalErrorKind::MethodNotFound,
            format!("method '{method}' not found on {type_name}"),
        )
    }

    /// No overload of `method` accepts `got` arguments.
    pub fn arity(type_name: &str, method: &str, expected: &str, got: usize) -> Self {
        Self::new(
            EvalErrorKind::MethodNotFound,
            format!("method '{method}' on {type_name} expects {expected} argument(s), got {got}"),
        )
    }

    pub fn null_reference(action: &str) -> Self {
        Self::new(
            EvalErrorKind::NullReference,
            format!("cannot {action} of null"),
        )
    }

    pub fn access_denied(what: &str) -> Self {
        Self::new(
            EvalErrorKind::AccessDenied,
            format!("access denied: '{what}' is not exposed to expressions"),
        )
    }

    pub fn type_mismatch(expected: &str, actual: &str) -> Self {
        Self::new(
            EvalErrorKind::TypeMismatch,
            format!("type mismatch: expected {expected}, got {actual}"),
        )
    }

    pub fn division_by_zero() -> Self {
        Self::new(EvalErrorKind::DivisionByZero, "division by zero")
    }

    pub fn index_out_of_bounds(index: i64, len: usize) -> Self {
        Self::new(
            EvalErrorKind::IndexOutOfBounds,
            format!("index {index} out of bounds for length {len}"),
        )
    }

    pub fn overflow(op: &str) -> Self {
        Self::new(EvalErrorKind::Overflow, format!("integer overflow in {op}"))
    }

    pub fn limit_exceeded(message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::LimitExceeded, message)
    }

    pub fn interrupted() -> Self {
        Self::new(
            EvalErrorKind::Interrupted,
            "evaluation interrupted: deadline exceeded",
        )
    }

    /// A failure reported by a host object, classified later by message.
    pub fn host(message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::Host, message)
    }

    /// Record the host member through which this error propagated.
    pub fn with_frame(mut self, namespace: &str, type_name: &str, member: &str) -> Self {
        self.frames.push(Frame {
            namespace: namespace.to_string(),
            type_name: type_name.to_string(),
            member: member.to_string(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_set_kind_and_message() {
        let err = EvalError::unknown_binding("registy");
        assert_eq!(err.kind, EvalErrorKind::UnknownBinding);
        assert!(err.to_string().contains("registy"));

        let err = EvalError::arity("string", "substring", "1 or 2", 3);
        assert_eq!(err.kind, EvalErrorKind::MethodNotFound);
        assert!(err.message.contains("expects 1 or 2"));

        let err = EvalError::syntax("unexpected ')'", 4);
        assert_eq!(err.position, Some(4));
    }

    #[test]
    fn test_frames_accumulate_innermost_first() {
        let err = EvalError::host("boom")
            .with_frame("app.orders", "OrderService", "pending")
            .with_frame("evalguard.context", "Registry", "byName");
        assert_eq!(err.frames.len(), 2);
        assert_eq!(err.frames[0].to_string(), "app.orders::OrderService.pending");
    }
}
