//! Capabilities: the permission axis for expression evaluation.
//!
//! Two layers meet here. [`Capability`] names the families of host power that
//! the text-level policy refuses outright. [`HostObject`] is the only way a
//! live host object becomes reachable from an expression: it exposes a narrow
//! set of named properties and methods and nothing else, so an expression can
//! never reach a capability that no binding chose to expose.

use serde::{Deserialize, Serialize};

use crate::expr::error::EvalError;
use crate::expr::value::Value;

/// A family of host power that expressions must never reach.
///
/// `Custom(String)` labels operator-supplied denylist patterns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ProcessControl,
    Reflection,
    FileIo,
    ScriptEngine,
    NativeMemory,
    Annotation,
    Obfuscation,
    Length,
    Custom(String),
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::ProcessControl => write!(f, "process_control"),
            Capability::Reflection => write!(f, "reflection"),
            Capability::FileIo => write!(f, "file_io"),
            Capability::ScriptEngine => write!(f, "script_engine"),
            Capability::NativeMemory => write!(f, "native_memory"),
            Capability::Annotation => write!(f, "annotation"),
            Capability::Obfuscation => write!(f, "obfuscation"),
            Capability::Length => write!(f, "length"),
            Capability::Custom(s) => write!(f, "custom({s})"),
        }
    }
}

/// Method names refused at evaluation time on every receiver, whatever the
/// host object claims to support.
pub const DENIED_METHODS: &[&str] = &[
    "getClass",
    "forName",
    "loadClass",
    "newInstance",
    "getMethod",
    "getDeclaredMethod",
    "getDeclaredField",
    "setAccessible",
    "invoke",
    "exec",
    "exit",
    "halt",
    "wait",
    "notify",
    "notifyAll",
    "finalize",
    "clone",
];

/// Property names refused at evaluation time on every receiver.
pub const DENIED_PROPERTIES: &[&str] = &["class", "classLoader", "declaredFields", "declaredMethods"];

/// Whether `member` is refused regardless of the receiver.
pub fn is_denied_member(member: &str) -> bool {
    DENIED_METHODS.contains(&member) || DENIED_PROPERTIES.contains(&member)
}

/// Classification flags reported by the formatter for host objects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectShape {
    pub is_collection: bool,
    pub is_map: bool,
    pub is_array: bool,
    pub is_association: bool,
}

/// A host object exposed to expressions through a binding.
///
/// Implementations decide exactly which members are visible. Everything has a
/// conservative default: no properties, no methods, no elements.
pub trait HostObject: Send + Sync {
    /// Runtime type name, e.g. `OrderController`.
    fn type_name(&self) -> &str;

    /// Declaring namespace, e.g. `app.orders`. Used for stack filtering.
    fn namespace(&self) -> &str {
        "host"
    }

    fn shape(&self) -> ObjectShape {
        ObjectShape::default()
    }

    /// Read a property; `None` means the property does not exist.
    fn property(&self, _name: &str) -> Option<Value> {
        None
    }

    /// Invoke a method.
    fn invoke(&self, method: &str, _args: &[Value]) -> Result<Value, EvalError> {
        Err(EvalError::method_not_found(self.type_name(), method))
    }

    /// Snapshot of the public fields, for formatting.
    fn fields(&self) -> Vec<(String, Value)> {
        Vec::new()
    }

    /// Snapshot of the elements of a collection-shaped object.
    fn elements(&self) -> Option<Vec<Value>> {
        None
    }

    /// Short textual description used by raw output.
    fn describe(&self) -> String {
        format!("{}@{}", self.type_name(), self.namespace())
    }
}

/// Fail unless `args` has exactly `n` entries.
pub fn expect_arity(
    type_name: &str,
    method: &str,
    args: &[Value],
    n: usize,
) -> Result<(), EvalError> {
    if args.len() == n {
        Ok(())
    } else {
        Err(EvalError::arity(type_name, method, &n.to_string(), args.len()))
    }
}

/// Borrow argument `i` as a string.
pub fn str_arg<'v>(method: &str, args: &'v [Value], i: usize) -> Result<&'v str, EvalError> {
    match args.get(i) {
        Some(Value::Str(s)) => Ok(&**s),
        Some(other) => Err(EvalError::type_mismatch(
            &format!("string argument {} to '{method}'", i + 1),
            other.type_name(),
        )),
        None => Err(EvalError::type_mismatch(
            &format!("string argument {} to '{method}'", i + 1),
            "nothing",
        )),
    }
}

/// Read argument `i` as an integer.
pub fn int_arg(method: &str, args: &[Value], i: usize) -> Result<i64, EvalError> {
    match args.get(i) {
        Some(Value::Int(n)) => Ok(*n),
        Some(other) => Err(EvalError::type_mismatch(
            &format!("integer argument {} to '{method}'", i + 1),
            other.type_name(),
        )),
        None => Err(EvalError::type_mismatch(
            &format!("integer argument {} to '{method}'", i + 1),
            "nothing",
        )),
    }
}
