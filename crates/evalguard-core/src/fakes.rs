//! In-memory fakes for the collaborator traits (testing and demos).
//!
//! Provides `MemoryRegistry`, `MemoryComponent`, `MemoryProperties` and
//! `MemoryDataAccess`. Each counts the calls it receives so tests can assert
//! that a rejected expression never touched the host.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::context::{ComponentRegistry, DataAccess, PropertySource};
use crate::expr::error::EvalError;
use crate::expr::value::Value;
use crate::sandbox::capability::{expect_arity, str_arg, HostObject};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// MemoryComponent
// ---------------------------------------------------------------------------

/// A registered component with mutable fields, readable as properties.
///
/// `getName()`, `getType()`, `get(field)` and `fieldNames()` are always
/// available. `with_failure` makes a method fail with a host message.
#[derive(Debug)]
pub struct MemoryComponent {
    name: String,
    type_name: String,
    namespace: String,
    roles: Vec<String>,
    fields: RwLock<BTreeMap<String, Value>>,
    failures: BTreeMap<String, String>,
    calls: AtomicU64,
}

impl MemoryComponent {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            namespace: "app".to_string(),
            roles: Vec::new(),
            fields: RwLock::new(BTreeMap::new()),
            failures: BTreeMap::new(),
            calls: AtomicU64::new(0),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_field(self, name: impl Into<String>, value: Value) -> Self {
        write(&self.fields).insert(name.into(), value);
        self
    }

    /// Calls to `method` fail with `message` as a host error.
    pub fn with_failure(mut self, method: impl Into<String>, message: impl Into<String>) -> Self {
        self.failures.insert(method.into(), message.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.type_name == role || self.roles.iter().any(|r| r == role)
    }

    pub fn set_field(&self, name: impl Into<String>, value: Value) {
        write(&self.fields).insert(name.into(), value);
    }

    /// Property reads and method calls received so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl HostObject for MemoryComponent {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn property(&self, name: &str) -> Option<Value> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        match name {
            "name" => Some(Value::str(self.name.as_str())),
            _ => read(&self.fields).get(name).cloned(),
        }
    }

    fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, EvalError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(message) = self.failures.get(method) {
            return Err(EvalError::host(message.clone()));
        }
        match method {
            "getName" => {
                expect_arity(&self.type_name, method, args, 0)?;
                Ok(Value::str(self.name.as_str()))
            }
            "getType" => {
                expect_arity(&self.type_name, method, args, 0)?;
                Ok(Value::str(self.type_name.as_str()))
            }
            "get" => {
                expect_arity(&self.type_name, method, args, 1)?;
                let field = str_arg(method, args, 0)?;
                Ok(read(&self.fields).get(field).cloned().unwrap_or(Value::Null))
            }
            "fieldNames" => {
                expect_arity(&self.type_name, method, args, 0)?;
                Ok(Value::list(
                    read(&self.fields).keys().map(|k| Value::str(k.as_str())).collect(),
                ))
            }
            _ => Err(EvalError::method_not_found(&self.type_name, method)),
        }
    }

    fn fields(&self) -> Vec<(String, Value)> {
        let mut out = vec![("name".to_string(), Value::str(self.name.as_str()))];
        out.extend(read(&self.fields).iter().map(|(k, v)| (k.clone(), v.clone())));
        out
    }

    fn describe(&self) -> String {
        format!("{}({})", self.type_name, self.name)
    }
}

// ---------------------------------------------------------------------------
// MemoryRegistry
// ---------------------------------------------------------------------------

/// In-memory component registry. Components can be added while
/// evaluations are running.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    components: RwLock<Vec<Arc<MemoryComponent>>>,
    calls: AtomicU64,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component, replacing any with the same name.
    pub fn register(&self, component: MemoryComponent) -> Arc<MemoryComponent> {
        let component = Arc::new(component);
        let mut components = write(&self.components);
        components.retain(|c| c.name() != component.name());
        components.push(Arc::clone(&component));
        component
    }

    pub fn unregister(&self, name: &str) -> bool {
        let mut components = write(&self.components);
        let before = components.len();
        components.retain(|c| c.name() != name);
        components.len() != before
    }

    pub fn len(&self) -> usize {
        read(&self.components).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Trait calls received so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }
}

fn as_value(component: &Arc<MemoryComponent>) -> Value {
    Value::Object(Arc::clone(component) as Arc<dyn HostObject>)
}

impl ComponentRegistry for MemoryRegistry {
    fn names(&self) -> Vec<String> {
        self.touch();
        read(&self.components)
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    fn by_name(&self, name: &str) -> Option<Value> {
        self.touch();
        read(&self.components)
            .iter()
            .find(|c| c.name() == name)
            .map(as_value)
    }

    fn by_type(&self, type_name: &str) -> Vec<Value> {
        self.touch();
        read(&self.components)
            .iter()
            .filter(|c| c.has_role(type_name))
            .map(as_value)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// MemoryProperties
// ---------------------------------------------------------------------------

/// In-memory property source.
#[derive(Debug, Default)]
pub struct MemoryProperties {
    values: RwLock<BTreeMap<String, String>>,
    calls: AtomicU64,
}

impl MemoryProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        write(&self.values).insert(key.into(), value.into());
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl PropertySource for MemoryProperties {
    fn get(&self, key: &str) -> Option<String> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        read(&self.values).get(key).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        read(&self.values).keys().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// MemoryDataAccess
// ---------------------------------------------------------------------------

/// In-memory tables keyed by integer primary key.
#[derive(Debug, Default)]
pub struct MemoryDataAccess {
    tables: RwLock<BTreeMap<String, BTreeMap<i64, Value>>>,
    calls: AtomicU64,
}

impl MemoryDataAccess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, table: impl Into<String>, key: i64, row: Value) {
        write(&self.tables)
            .entry(table.into())
            .or_default()
            .insert(key, row);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl DataAccess for MemoryDataAccess {
    fn tables(&self) -> Vec<String> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        read(&self.tables).keys().cloned().collect()
    }

    fn count(&self, table: &str) -> Result<i64, String> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        read(&self.tables)
            .get(table)
            .map(|rows| rows.len() as i64)
            .ok_or_else(|| format!("no such table '{table}'"))
    }

    fn find(&self, table: &str, key: &Value) -> Result<Value, String> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let key = key
            .as_int()
            .ok_or_else(|| format!("cannot convert key of type {} to integer", key.type_name()))?;
        read(&self.tables)
            .get(table)
            .ok_or_else(|| format!("no such table '{table}'"))
            .map(|rows| rows.get(&key).cloned().unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_register_replaces_by_name() {
        let registry = MemoryRegistry::new();
        registry.register(MemoryComponent::new("a", "Alpha"));
        registry.register(MemoryComponent::new("a", "Beta"));
        assert_eq!(registry.len(), 1);
        let found = registry.by_name("a").unwrap();
        assert_eq!(found.type_name(), "Beta");
        assert_eq!(registry.calls(), 1);
    }

    #[test]
    fn test_by_type_matches_roles() {
        let registry = MemoryRegistry::new();
        registry.register(MemoryComponent::new("a", "OrderController").with_role("Controller"));
        registry.register(MemoryComponent::new("b", "OrderRepository"));
        assert_eq!(registry.by_type("Controller").len(), 1);
        assert_eq!(registry.by_type("OrderRepository").len(), 1);
        assert!(registry.unregister("b"));
        assert!(registry.by_type("OrderRepository").is_empty());
    }

    #[test]
    fn test_component_fields_are_shared() {
        let registry = MemoryRegistry::new();
        let handle = registry.register(MemoryComponent::new("svc", "Service"));
        let value = registry.by_name("svc").unwrap();
        handle.set_field("pending", Value::Int(3));
        let Value::Object(object) = value else {
            panic!("expected object");
        };
        assert_eq!(object.property("pending"), Some(Value::Int(3)));
        assert_eq!(handle.calls(), 1);
    }

    #[test]
    fn test_component_failure_is_host_error() {
        let c = MemoryComponent::new("svc", "Service").with_failure("sync", "connection refused");
        let err = c.invoke("sync", &[]).unwrap_err();
        assert_eq!(err.message, "connection refused");
    }

    #[test]
    fn test_data_access_missing_table() {
        let data = MemoryDataAccess::new();
        data.insert("orders", 7, Value::Int(1));
        assert_eq!(data.find("orders", &Value::Int(7)).unwrap(), Value::Int(1));
        assert_eq!(data.find("orders", &Value::Int(8)).unwrap(), Value::Null);
        assert!(data.count("ghosts").unwrap_err().contains("ghosts"));
        assert_eq!(data.calls(), 3);
    }
}
