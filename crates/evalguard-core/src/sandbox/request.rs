//! Evaluation request types and the policy verdict.

use serde::{Deserialize, Serialize};

use crate::expr::error::EvalError;
use crate::expr::value::Value;

use super::capability::Capability;

fn default_true() -> bool {
    true
}

/// A request to evaluate one expression.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EvalRequest {
    pub expression: String,
    /// Falls back to the configured default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub return_type_hint: ReturnTypeHint,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default = "default_true")]
    pub include_stack_trace: bool,
}

impl EvalRequest {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            timeout_seconds: None,
            return_type_hint: ReturnTypeHint::default(),
            format: OutputFormat::default(),
            include_stack_trace: true,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_seconds = Some(secs);
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_hint(mut self, hint: ReturnTypeHint) -> Self {
        self.return_type_hint = hint;
        self
    }

    pub fn without_stack_trace(mut self) -> Self {
        self.include_stack_trace = false;
        self
    }

    /// Check request-level bounds and return the effective timeout in
    /// seconds. Out-of-range timeouts are rejected, not clamped.
    pub fn check(&self, default_secs: u64, max_secs: u64) -> Result<u64, String> {
        if self.expression.trim().is_empty() {
            return Err("expression must not be empty".to_string());
        }
        let secs = self.timeout_seconds.unwrap_or(default_secs);
        if secs == 0 || secs > max_secs {
            return Err(format!(
                "timeoutSeconds must be within 1..={max_secs}, got {secs}"
            ));
        }
        Ok(secs)
    }
}

/// Requested shape of the result value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnTypeHint {
    #[default]
    Auto,
    String,
    Number,
    Boolean,
    Object,
    Collection,
}

impl ReturnTypeHint {
    /// Coerce `value` to the hinted type.
    pub fn apply(self, value: Value) -> Result<Value, EvalError> {
        match self {
            ReturnTypeHint::Auto | ReturnTypeHint::Object => Ok(value),
            ReturnTypeHint::String => match value {
                Value::Null => Ok(Value::Null),
                Value::Str(_) => Ok(value),
                other => Ok(Value::str(other.to_string())),
            },
            ReturnTypeHint::Number => match &value {
                Value::Int(_) | Value::Float(_) | Value::Null => Ok(value),
                Value::Str(s) => {
                    let text = s.trim();
                    if let Ok(n) = text.parse::<i64>() {
                        return Ok(Value::Int(n));
                    }
                    text.parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite())
                        .map(Value::Float)
                        .ok_or_else(|| EvalError::type_mismatch("number", "non-numeric string"))
                }
                other => Err(EvalError::type_mismatch("number", other.type_name())),
            },
            ReturnTypeHint::Boolean => match &value {
                Value::Bool(_) | Value::Null => Ok(value),
                Value::Str(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    _ => Err(EvalError::type_mismatch("boolean", "non-boolean string")),
                },
                other => Err(EvalError::type_mismatch("boolean", other.type_name())),
            },
            ReturnTypeHint::Collection => match &value {
                Value::List(_) | Value::Map(_) | Value::Null => Ok(value),
                Value::Object(object) if object.elements().is_some() => Ok(value),
                other => Err(EvalError::type_mismatch("collection", other.type_name())),
            },
        }
    }
}

/// How the result is rendered in the response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Length-capped display string.
    Raw,
    /// Bounded JSON tree.
    #[default]
    Json,
    /// Size, emptiness and a short sample.
    Descriptive,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(OutputFormat::Raw),
            "json" => Ok(OutputFormat::Json),
            "descriptive" => Ok(OutputFormat::Descriptive),
            other => Err(format!("unknown format '{other}' (raw|json|descriptive)")),
        }
    }
}

impl std::str::FromStr for ReturnTypeHint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(ReturnTypeHint::Auto),
            "string" => Ok(ReturnTypeHint::String),
            "number" => Ok(ReturnTypeHint::Number),
            "boolean" => Ok(ReturnTypeHint::Boolean),
            "object" => Ok(ReturnTypeHint::Object),
            "collection" => Ok(ReturnTypeHint::Collection),
            other => Err(format!(
                "unknown hint '{other}' (auto|string|number|boolean|object|collection)"
            )),
        }
    }
}

/// Outcome of checking an expression against a security policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyVerdict {
    Allowed,
    Denied { category: Capability, reason: String },
}

impl PolicyVerdict {
    /// Returns `true` when the verdict is `Allowed`.
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyVerdict::Allowed)
    }
}
