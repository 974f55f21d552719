//! Evaluation context: the named bindings an expression can reach.
//!
//! The host exposes its state through three narrow collaborator traits.
//! Each one is wrapped in a binding object that implements [`HostObject`]
//! with a fixed, read-only method surface. Nothing else in the host is
//! reachable from an expression.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use thiserror::Error;

use crate::expr::error::EvalError;
use crate::expr::value::Value;
use crate::sandbox::capability::{expect_arity, str_arg, HostObject};

/// Names the language itself owns; bindings may not shadow them.
const RESERVED_NAMES: &[&str] = &["true", "false", "null", "in", "this"];

/// Property keys containing any of these fragments are masked on read.
const SENSITIVE_FRAGMENTS: &[&str] = &["password", "secret", "token", "credential"];

/// Replacement text for masked property values.
pub const MASKED: &str = "******";

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Lookup surface over the host's registered components.
pub trait ComponentRegistry: Send + Sync {
    /// Names of every registered component.
    fn names(&self) -> Vec<String>;

    fn by_name(&self, name: &str) -> Option<Value>;

    /// Components whose type name (or one of whose roles) equals `type_name`.
    fn by_type(&self, type_name: &str) -> Vec<Value>;

    fn exists(&self, name: &str) -> bool {
        self.by_name(name).is_some()
    }
}

/// Read-only key/value configuration.
pub trait PropertySource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn keys(&self) -> Vec<String>;
}

/// Read-only handle onto the host's data store.
pub trait DataAccess: Send + Sync {
    fn tables(&self) -> Vec<String>;

    /// Row count of `table`. Errors are free-form host messages.
    fn count(&self, table: &str) -> Result<i64, String>;

    /// Row with primary key `key`, or `Value::Null` when absent.
    fn find(&self, table: &str, key: &Value) -> Result<Value, String>;
}

// ---------------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------------

/// `registry`: `byName`, `byType`, `exists`, `names`.
pub struct RegistryBinding {
    registry: Arc<dyn ComponentRegistry>,
}

impl RegistryBinding {
    pub fn new(registry: Arc<dyn ComponentRegistry>) -> Self {
        Self { registry }
    }
}

impl HostObject for RegistryBinding {
    fn type_name(&self) -> &str {
        "Registry"
    }

    fn namespace(&self) -> &str {
        "evalguard.context"
    }

    fn property(&self, name: &str) -> Option<Value> {
        match name {
            "names" => Some(names_list(self.registry.names())),
            _ => None,
        }
    }

    fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, EvalError> {
        let ty = self.type_name();
        match method {
            "byName" => {
                expect_arity(ty, method, args, 1)?;
                let name = str_arg(method, args, 0)?;
                Ok(self.registry.by_name(name).unwrap_or(Value::Null))
            }
            "byType" => {
                expect_arity(ty, method, args, 1)?;
                let type_name = str_arg(method, args, 0)?;
                Ok(Value::list(self.registry.by_type(type_name)))
            }
            "exists" => {
                expect_arity(ty, method, args, 1)?;
                let name = str_arg(method, args, 0)?;
                Ok(Value::Bool(self.registry.exists(name)))
            }
            "names" => {
                expect_arity(ty, method, args, 0)?;
                Ok(names_list(self.registry.names()))
            }
            _ => Err(EvalError::method_not_found(ty, method)),
        }
    }

    fn describe(&self) -> String {
        format!("Registry({} components)", self.registry.names().len())
    }
}

/// `properties`: `get(key)`, `get(key, default)`, `has(key)`, `keys()`.
pub struct PropertiesBinding {
    source: Arc<dyn PropertySource>,
}

impl PropertiesBinding {
    pub fn new(source: Arc<dyn PropertySource>) -> Self {
        Self { source }
    }

    fn read(&self, key: &str) -> Option<String> {
        let value = self.source.get(key)?;
        if is_sensitive(key) {
            return Some(MASKED.to_string());
        }
        Some(value)
    }
}

impl HostObject for PropertiesBinding {
    fn type_name(&self) -> &str {
        "Properties"
    }

    fn namespace(&self) -> &str {
        "evalguard.context"
    }

    fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, EvalError> {
        let ty = self.type_name();
        match method {
            "get" => match args.len() {
                1 => {
                    let key = str_arg(method, args, 0)?;
                    Ok(self.read(key).map(Value::from).unwrap_or(Value::Null))
                }
                2 => {
                    let key = str_arg(method, args, 0)?;
                    Ok(self
                        .read(key)
                        .map(Value::from)
                        .unwrap_or_else(|| args[1].clone()))
                }
                n => Err(EvalError::arity(ty, method, "1 or 2", n)),
            },
            "has" => {
                expect_arity(ty, method, args, 1)?;
                let key = str_arg(method, args, 0)?;
                Ok(Value::Bool(self.source.get(key).is_some()))
            }
            "keys" => {
                expect_arity(ty, method, args, 0)?;
                Ok(names_list(self.source.keys()))
            }
            _ => Err(EvalError::method_not_found(ty, method)),
        }
    }
}

/// `data`: `tables()`, `count(table)`, `find(table, key)`.
pub struct DataBinding {
    access: Arc<dyn DataAccess>,
}

impl DataBinding {
    pub fn new(access: Arc<dyn DataAccess>) -> Self {
        Self { access }
    }
}

impl HostObject for DataBinding {
    fn type_name(&self) -> &str {
        "DataAccess"
    }

    fn namespace(&self) -> &str {
        "evalguard.context"
    }

    fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, EvalError> {
        let ty = self.type_name();
        match method {
            "tables" => {
                expect_arity(ty, method, args, 0)?;
                Ok(names_list(self.access.tables()))
            }
            "count" => {
                expect_arity(ty, method, args, 1)?;
                let table = str_arg(method, args, 0)?;
                self.access
                    .count(table)
                    .map(Value::Int)
                    .map_err(EvalError::host)
            }
            "find" => {
                expect_arity(ty, method, args, 2)?;
                let table = str_arg(method, args, 0)?;
                self.access.find(table, &args[1]).map_err(EvalError::host)
            }
            _ => Err(EvalError::method_not_found(ty, method)),
        }
    }
}

/// `clock`: wall-clock helpers.
#[derive(Debug, Default)]
pub struct ClockBinding;

impl HostObject for ClockBinding {
    fn type_name(&self) -> &str {
        "Clock"
    }

    fn namespace(&self) -> &str {
        "evalguard.context"
    }

    fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, EvalError> {
        if !matches!(method, "millis" | "epochSeconds" | "iso") {
            return Err(EvalError::method_not_found(self.type_name(), method));
        }
        expect_arity(self.type_name(), method, args, 0)?;
        let now = Utc::now();
        Ok(match method {
            "millis" => Value::Int(now.timestamp_millis()),
            "epochSeconds" => Value::Int(now.timestamp()),
            _ => Value::str(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
        })
    }
}

fn names_list(mut names: Vec<String>) -> Value {
    names.sort();
    Value::list(names.into_iter().map(Value::from).collect())
}

fn is_sensitive(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_FRAGMENTS.iter().any(|f| lower.contains(f))
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Errors raised while assembling a context.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("binding '{0}' is defined more than once")]
    DuplicateBinding(String),

    #[error("binding name '{0}' is not a valid identifier")]
    InvalidName(String),

    #[error("binding name '{0}' is reserved")]
    ReservedName(String),
}

/// The immutable set of bindings visible to expressions.
///
/// Cheap to clone; clones share the same bindings.
#[derive(Clone, Default)]
pub struct EvaluationContext {
    bindings: Arc<BTreeMap<String, Value>>,
}

impl EvaluationContext {
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    /// Binding names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.bindings.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl std::fmt::Debug for EvaluationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationContext")
            .field("bindings", &self.names())
            .finish()
    }
}

/// Builder for [`EvaluationContext`].
///
/// Validation is deferred to [`ContextBuilder::build`], which reports the
/// first offending name.
#[derive(Default)]
pub struct ContextBuilder {
    entries: Vec<(String, Value)>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(self, registry: Arc<dyn ComponentRegistry>) -> Self {
        self.with_binding("registry", Value::object(RegistryBinding::new(registry)))
    }

    pub fn with_properties(self, source: Arc<dyn PropertySource>) -> Self {
        self.with_binding("properties", Value::object(PropertiesBinding::new(source)))
    }

    pub fn with_data_access(self, access: Arc<dyn DataAccess>) -> Self {
        self.with_binding("data", Value::object(DataBinding::new(access)))
    }

    pub fn with_clock(self) -> Self {
        self.with_binding("clock", Value::object(ClockBinding))
    }

    /// Bind an arbitrary value under `name`.
    pub fn with_binding(mut self, name: impl Into<String>, value: Value) -> Self {
        self.entries.push((name.into(), value));
        self
    }

    pub fn build(self) -> Result<EvaluationContext, ContextError> {
        let mut bindings = BTreeMap::new();
        for (name, value) in self.entries {
            if !is_identifier(&name) {
                return Err(ContextError::InvalidName(name));
            }
            if RESERVED_NAMES.contains(&name.as_str()) {
                return Err(ContextError::ReservedName(name));
            }
            if bindings.contains_key(&name) {
                return Err(ContextError::DuplicateBinding(name));
            }
            bindings.insert(name, value);
        }
        Ok(EvaluationContext {
            bindings: Arc::new(bindings),
        })
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{MemoryComponent, MemoryDataAccess, MemoryProperties, MemoryRegistry};

    fn registry() -> Arc<MemoryRegistry> {
        let registry = MemoryRegistry::new();
        registry.register(MemoryComponent::new("orderController", "OrderController").with_role("Controller"));
        registry.register(MemoryComponent::new("userController", "UserController").with_role("Controller"));
        registry.register(MemoryComponent::new("orderRepository", "OrderRepository"));
        Arc::new(registry)
    }

    #[test]
    fn test_builder_rejects_duplicate() {
        let err = EvaluationContext::builder()
            .with_clock()
            .with_binding("clock", Value::Int(1))
            .build()
            .unwrap_err();
        assert_eq!(err, ContextError::DuplicateBinding("clock".into()));
    }

    #[test]
    fn test_builder_rejects_bad_names() {
        let err = ContextBuilder::new()
            .with_binding("9lives", Value::Null)
            .build()
            .unwrap_err();
        assert!(matches!(err, ContextError::InvalidName(_)));

        let err = ContextBuilder::new()
            .with_binding("null", Value::Null)
            .build()
            .unwrap_err();
        assert!(matches!(err, ContextError::ReservedName(_)));
    }

    #[test]
    fn test_registry_binding_surface() {
        let binding = RegistryBinding::new(registry());
        let controllers = binding
            .invoke("byType", &[Value::from("Controller")])
            .unwrap();
        assert_eq!(controllers.collection_len(), Some(2));
        assert_eq!(
            binding.invoke("exists", &[Value::from("nope")]).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            binding.invoke("byName", &[Value::from("nope")]).unwrap(),
            Value::Null
        );
        assert!(binding.invoke("getClass", &[]).is_err());
    }

    #[test]
    fn test_properties_mask_sensitive_values() {
        let props = MemoryProperties::new();
        props.set("db.url", "postgres://db");
        props.set("db.password", "hunter2");
        let binding = PropertiesBinding::new(Arc::new(props));

        assert_eq!(
            binding.invoke("get", &[Value::from("db.password")]).unwrap(),
            Value::from(MASKED)
        );
        assert_eq!(
            binding.invoke("get", &[Value::from("db.url")]).unwrap(),
            Value::from("postgres://db")
        );
        assert_eq!(
            binding
                .invoke("get", &[Value::from("missing"), Value::from("dflt")])
                .unwrap(),
            Value::from("dflt")
        );
    }

    #[test]
    fn test_data_binding_surfaces_host_errors() {
        let data = MemoryDataAccess::new();
        data.insert("orders", 1, Value::map([("id", Value::Int(1))]));
        let binding = DataBinding::new(Arc::new(data));

        assert_eq!(
            binding.invoke("count", &[Value::from("orders")]).unwrap(),
            Value::Int(1)
        );
        let err = binding.invoke("count", &[Value::from("ghosts")]).unwrap_err();
        assert!(err.message.contains("ghosts"));
    }

    #[test]
    fn test_clock_binding() {
        let millis = ClockBinding.invoke("millis", &[]).unwrap();
        assert!(millis.as_int().unwrap() > 0);
        let iso = ClockBinding.invoke("iso", &[]).unwrap();
        assert!(iso.as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_clock_unknown_method_wins_over_arity() {
        let err = ClockBinding.invoke("nope", &[Value::Int(1)]).unwrap_err();
        assert_eq!(err, EvalError::method_not_found("Clock", "nope"));
        let err = ClockBinding.invoke("millis", &[Value::Int(1)]).unwrap_err();
        assert!(err.message.contains("expects 0 argument(s)"));
    }
}
