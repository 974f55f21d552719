//! Runtime values.
//!
//! `Value` is a tagged variant over primitives, shared collections and host
//! objects. Lists and maps are shared behind `RwLock`s so that the host can
//! keep mutating its own state while expressions read it; readers take
//! snapshots and never hold a lock across further evaluation.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use crate::sandbox::capability::HostObject;

/// A list shared with (and possibly mutated by) the host.
pub type SharedList = Arc<RwLock<Vec<Value>>>;

/// A string-keyed map shared with (and possibly mutated by) the host.
pub type SharedMap = Arc<RwLock<BTreeMap<String, Value>>>;

/// Maximum structural depth for equality and display.
const MAX_WALK_DEPTH: usize = 32;
/// Maximum elements rendered per collection by `Display`.
const DISPLAY_ITEMS: usize = 50;

/// A runtime value.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    List(SharedList),
    Map(SharedMap),
    Object(Arc<dyn HostObject>),
}

/// Read a shared list, recovering from a poisoned lock.
pub fn read_list(list: &SharedList) -> RwLockReadGuard<'_, Vec<Value>> {
    list.read().unwrap_or_else(PoisonError::into_inner)
}

/// Read a shared map, recovering from a poisoned lock.
pub fn read_map(map: &SharedMap) -> RwLockReadGuard<'_, BTreeMap<String, Value>> {
    map.read().unwrap_or_else(PoisonError::into_inner)
}

impl Value {
    pub fn str(s: impl Into<Arc<str>>) -> Self {
        Value::Str(s.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Arc::new(RwLock::new(items)))
    }

    pub fn map<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let map = entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Value::Map(Arc::new(RwLock::new(map)))
    }

    pub fn object<T: HostObject + 'static>(object: T) -> Self {
        Value::Object(Arc::new(object))
    }

    /// The runtime type name reported to callers (`resultType`).
    pub fn type_name(&self) -> &str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Object(object) => object.type_name(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Primitives pass through every output mode unchanged.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_)
        )
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(&**s),
            _ => None,
        }
    }

    /// Address of the shared allocation, used for cycle detection.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Value::List(list) => Some(Arc::as_ptr(list) as *const () as usize),
            Value::Map(map) => Some(Arc::as_ptr(map) as *const () as usize),
            Value::Object(object) => Some(Arc::as_ptr(object) as *const () as usize),
            _ => None,
        }
    }

    /// Element count for lists, maps and collection-shaped host objects.
    pub fn collection_len(&self) -> Option<usize> {
        match self {
            Value::List(list) => Some(read_list(list).len()),
            Value::Map(map) => Some(read_map(map).len()),
            Value::Object(object) => object.elements().map(|items| items.len()),
            _ => None,
        }
    }

    /// Snapshot of the elements of a list or collection-shaped host object.
    pub fn elements(&self) -> Option<Vec<Value>> {
        match self {
            Value::List(list) => Some(read_list(list).clone()),
            Value::Object(object) => object.elements(),
            _ => None,
        }
    }

    /// Equality with int/float promotion; collections compare structurally.
    pub fn loose_eq(&self, other: &Value) -> bool {
        eq_at(self, other, 0)
    }

    /// Ordering for numbers and strings; `None` when incomparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

fn eq_at(a: &Value, b: &Value, depth: usize) -> bool {
    if let (Some(x), Some(y)) = (a.identity(), b.identity()) {
        if x == y {
            return true;
        }
    }
    if depth >= MAX_WALK_DEPTH {
        return false;
    }
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            a.compare(b) == Some(Ordering::Equal)
        }
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) => {
            let (x, y) = (read_list(x).clone(), read_list(y).clone());
            x.len() == y.len()
                && x.iter()
                    .zip(y.iter())
                    .all(|(l, r)| eq_at(l, r, depth + 1))
        }
        (Value::Map(x), Value::Map(y)) => {
            let (x, y) = (read_map(x).clone(), read_map(y).clone());
            x.len() == y.len()
                && x.iter().all(|(k, l)| match y.get(k) {
                    Some(r) => eq_at(l, r, depth + 1),
                    None => false,
                })
        }
        _ => false,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.loose_eq(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Value::Int(n) => f.debug_tuple("Int").field(n).finish(),
            Value::Float(n) => f.debug_tuple("Float").field(n).finish(),
            Value::Str(s) => f.debug_tuple("Str").field(s).finish(),
            Value::List(list) => write!(f, "List(len={})", read_list(list).len()),
            Value::Map(map) => write!(f, "Map(len={})", read_map(map).len()),
            Value::Object(object) => write!(f, "Object({})", object.type_name()),
        }
    }
}

/// Human-readable, cycle-safe rendering. Top-level strings are unquoted.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            other => {
                let mut out = String::new();
                let mut path = Vec::new();
                render(other, &mut out, &mut path);
                f.write_str(&out)
            }
        }
    }
}

fn render(value: &Value, out: &mut String, path: &mut Vec<usize>) {
    use std::fmt::Write as _;

    if let Some(id) = value.identity() {
        if path.contains(&id) {
            let _ = write!(out, "<cycle: {}>", value.type_name());
            return;
        }
        if path.len() >= MAX_WALK_DEPTH {
            out.push_str("<max depth>");
            return;
        }
    }

    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => {
            let _ = write!(out, "{b}");
        }
        Value::Int(n) => {
            let _ = write!(out, "{n}");
        }
        Value::Float(n) if n.is_finite() && n.fract() == 0.0 => {
            let _ = write!(out, "{n:.1}");
        }
        Value::Float(n) => {
            let _ = write!(out, "{n}");
        }
        Value::Str(s) => {
            let _ = write!(out, "'{s}'");
        }
        Value::List(list) => {
            let items = read_list(list).clone();
            path.push(value.identity().unwrap_or_default());
            out.push('[');
            for (i, item) in items.iter().take(DISPLAY_ITEMS).enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                render(item, out, path);
            }
            if items.len() > DISPLAY_ITEMS {
                let _ = write!(out, ", ... {} more", items.len() - DISPLAY_ITEMS);
            }
            out.push(']');
            path.pop();
        }
        Value::Map(map) => {
            let entries = read_map(map).clone();
            path.push(value.identity().unwrap_or_default());
            out.push('{');
            for (i, (key, item)) in entries.iter().take(DISPLAY_ITEMS).enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{key}: ");
                render(item, out, path);
            }
            if entries.len() > DISPLAY_ITEMS {
                let _ = write!(out, ", ... {} more", entries.len() - DISPLAY_ITEMS);
            }
            out.push('}');
            path.pop();
        }
        Value::Object(object) => out.push_str(&object.describe()),
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::list(items)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Value::Null, Into::into)
    }
}
