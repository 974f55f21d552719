//! Built-in properties and methods on strings, lists and maps.

use crate::sandbox::capability::{expect_arity, int_arg, str_arg, HostObject, ObjectShape};

use super::error::EvalError;
use super::value::{read_list, read_map, Value};

/// One entry of a map, as seen by collection operators.
#[derive(Debug, Clone)]
pub struct MapEntry {
    pub key: String,
    pub value: Value,
}

impl HostObject for MapEntry {
    fn type_name(&self) -> &str {
        "Entry"
    }

    fn namespace(&self) -> &str {
        "evalguard.builtin"
    }

    fn shape(&self) -> ObjectShape {
        ObjectShape {
            is_association: true,
            ..ObjectShape::default()
        }
    }

    fn property(&self, name: &str) -> Option<Value> {
        match name {
            "key" => Some(Value::str(self.key.as_str())),
            "value" => Some(self.value.clone()),
            _ => None,
        }
    }

    fn fields(&self) -> Vec<(String, Value)> {
        vec![
            ("key".to_string(), Value::str(self.key.as_str())),
            ("value".to_string(), self.value.clone()),
        ]
    }

    fn describe(&self) -> String {
        format!("{}={}", self.key, self.value)
    }
}

/// Property-style access (`xs.size`) on built-in values.
pub fn builtin_property(receiver: &Value, name: &str) -> Option<Value> {
    match (receiver, name) {
        (Value::Str(s), "length" | "size") => Some(Value::Int(s.chars().count() as i64)),
        (Value::Str(s), "empty") => Some(Value::Bool(s.is_empty())),
        (Value::List(list), "size" | "length") => Some(Value::Int(read_list(list).len() as i64)),
        (Value::List(list), "empty") => Some(Value::Bool(read_list(list).is_empty())),
        (Value::List(list), "first") => Some(read_list(list).first().cloned().unwrap_or(Value::Null)),
        (Value::List(list), "last") => Some(read_list(list).last().cloned().unwrap_or(Value::Null)),
        (Value::Map(map), "size") => Some(Value::Int(read_map(map).len() as i64)),
        (Value::Map(map), "empty") => Some(Value::Bool(read_map(map).is_empty())),
        _ => None,
    }
}

/// Invoke a built-in method on a string, list or map.
///
/// `max_string_len` bounds every string the call produces.
pub fn call_builtin(
    receiver: &Value,
    method: &str,
    args: &[Value],
    max_string_len: usize,
) -> Result<Value, EvalError> {
    if method == "toString" {
        expect_arity(receiver.type_name(), method, args, 0)?;
        return bounded(receiver.to_string(), max_string_len);
    }
    if method == "equals" {
        expect_arity(receiver.type_name(), method, args, 1)?;
        return Ok(Value::Bool(receiver.loose_eq(&args[0])));
    }
    match receiver {
        Value::Str(s) => string_method(s, method, args, max_string_len),
        Value::List(_) => {
            let items = receiver.elements().unwrap_or_default();
            list_method(&items, method, args, max_string_len)
        }
        Value::Map(map) => {
            let entries = read_map(map).clone();
            map_method(&entries, method, args)
        }
        other => Err(EvalError::method_not_found(other.type_name(), method)),
    }
}

fn bounded(s: String, max: usize) -> Result<Value, EvalError> {
    if s.chars().count() > max {
        return Err(EvalError::limit_exceeded(format!(
            "string result exceeds {max} characters"
        )));
    }
    Ok(Value::str(s))
}

fn string_method(
    s: &str,
    method: &str,
    args: &[Value],
    max_string_len: usize,
) -> Result<Value, EvalError> {
    let ty = "string";
    match method {
        "length" | "size" => {
            expect_arity(ty, method, args, 0)?;
            Ok(Value::Int(s.chars().count() as i64))
        }
        "isEmpty" => {
            expect_arity(ty, method, args, 0)?;
            Ok(Value::Bool(s.is_empty()))
        }
        "toUpperCase" => {
            expect_arity(ty, method, args, 0)?;
            Ok(Value::str(s.to_uppercase()))
        }
        "toLowerCase" => {
            expect_arity(ty, method, args, 0)?;
            Ok(Value::str(s.to_lowercase()))
        }
        "trim" => {
            expect_arity(ty, method, args, 0)?;
            Ok(Value::str(s.trim()))
        }
        "contains" => {
            expect_arity(ty, method, args, 1)?;
            Ok(Value::Bool(s.contains(str_arg(method, args, 0)?)))
        }
        "startsWith" => {
            expect_arity(ty, method, args, 1)?;
            Ok(Value::Bool(s.starts_with(str_arg(method, args, 0)?)))
        }
        "endsWith" => {
            expect_arity(ty, method, args, 1)?;
            Ok(Value::Bool(s.ends_with(str_arg(method, args, 0)?)))
        }
        "indexOf" => {
            expect_arity(ty, method, args, 1)?;
            let needle = str_arg(method, args, 0)?;
            let index = s
                .find(needle)
                .map(|byte| s[..byte].chars().count() as i64)
                .unwrap_or(-1);
            Ok(Value::Int(index))
        }
        "substring" => {
            if args.is_empty() || args.len() > 2 {
                return Err(EvalError::arity(ty, method, "1 or 2", args.len()));
            }
            let chars: Vec<char> = s.chars().collect();
            let start = int_arg(method, args, 0)?;
            let end = if args.len() == 2 {
                int_arg(method, args, 1)?
            } else {
                chars.len() as i64
            };
            if start < 0 || end < start || end as usize > chars.len() {
                return Err(EvalError::index_out_of_bounds(
                    if start < 0 { start } else { end },
                    chars.len(),
                ));
            }
            Ok(Value::str(
                chars[start as usize..end as usize].iter().collect::<String>(),
            ))
        }
        "split" => {
            expect_arity(ty, method, args, 1)?;
            let sep = str_arg(method, args, 0)?;
            if sep.is_empty() {
                return Err(EvalError::type_mismatch("non-empty separator", "empty string"));
            }
            Ok(Value::list(s.split(sep).map(Value::from).collect()))
        }
        "replace" => {
            expect_arity(ty, method, args, 2)?;
            let from = str_arg(method, args, 0)?;
            if from.is_empty() {
                return Err(EvalError::type_mismatch("non-empty pattern", "empty string"));
            }
            let to = str_arg(method, args, 1)?;
            // Bound before allocating: each match may grow the string.
            let matches = s.matches(from).count();
            let projected = s.len() + matches * to.len();
            if projected > max_string_len.saturating_mul(4) {
                return Err(EvalError::limit_exceeded(format!(
                    "string result exceeds {max_string_len} characters"
                )));
            }
            bounded(s.replace(from, to), max_string_len)
        }
        _ => Err(EvalError::method_not_found(ty, method)),
    }
}

fn list_method(
    items: &[Value],
    method: &str,
    args: &[Value],
    max_string_len: usize,
) -> Result<Value, EvalError> {
    let ty = "list";
    match method {
        "size" | "length" => {
            expect_arity(ty, method, args, 0)?;
            Ok(Value::Int(items.len() as i64))
        }
        "isEmpty" => {
            expect_arity(ty, method, args, 0)?;
            Ok(Value::Bool(items.is_empty()))
        }
        "contains" => {
            expect_arity(ty, method, args, 1)?;
            Ok(Value::Bool(items.iter().any(|item| item.loose_eq(&args[0]))))
        }
        "indexOf" => {
            expect_arity(ty, method, args, 1)?;
            let index = items
                .iter()
                .position(|item| item.loose_eq(&args[0]))
                .map(|i| i as i64)
                .unwrap_or(-1);
            Ok(Value::Int(index))
        }
        "get" => {
            expect_arity(ty, method, args, 1)?;
            let index = int_arg(method, args, 0)?;
            index_list(items, index)
        }
        "first" => {
            expect_arity(ty, method, args, 0)?;
            Ok(items.first().cloned().unwrap_or(Value::Null))
        }
        "last" => {
            expect_arity(ty, method, args, 0)?;
            Ok(items.last().cloned().unwrap_or(Value::Null))
        }
        "join" => {
            expect_arity(ty, method, args, 1)?;
            let sep = str_arg(method, args, 0)?;
            let mut out = String::new();
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(sep);
                }
                out.push_str(&item.to_string());
                if out.len() > max_string_len.saturating_mul(4) {
                    break;
                }
            }
            bounded(out, max_string_len)
        }
        _ => Err(EvalError::method_not_found(ty, method)),
    }
}

fn map_method(
    entries: &std::collections::BTreeMap<String, Value>,
    method: &str,
    args: &[Value],
) -> Result<Value, EvalError> {
    let ty = "map";
    match method {
        "size" => {
            expect_arity(ty, method, args, 0)?;
            Ok(Value::Int(entries.len() as i64))
        }
        "isEmpty" => {
            expect_arity(ty, method, args, 0)?;
            Ok(Value::Bool(entries.is_empty()))
        }
        "containsKey" => {
            expect_arity(ty, method, args, 1)?;
            Ok(Value::Bool(entries.contains_key(&map_key(&args[0])?)))
        }
        "containsValue" => {
            expect_arity(ty, method, args, 1)?;
            Ok(Value::Bool(entries.values().any(|v| v.loose_eq(&args[0]))))
        }
        "get" => {
            expect_arity(ty, method, args, 1)?;
            Ok(entries
                .get(&map_key(&args[0])?)
                .cloned()
                .unwrap_or(Value::Null))
        }
        "getOrDefault" => {
            expect_arity(ty, method, args, 2)?;
            Ok(entries
                .get(&map_key(&args[0])?)
                .cloned()
                .unwrap_or_else(|| args[1].clone()))
        }
        "keys" | "keySet" => {
            expect_arity(ty, method, args, 0)?;
            Ok(Value::list(
                entries.keys().map(|k| Value::str(k.as_str())).collect(),
            ))
        }
        "values" => {
            expect_arity(ty, method, args, 0)?;
            Ok(Value::list(entries.values().cloned().collect()))
        }
        _ => Err(EvalError::method_not_found(ty, method)),
    }
}

/// Map keys are strings; integers are accepted and converted.
pub fn map_key(key: &Value) -> Result<String, EvalError> {
    match key {
        Value::Str(s) => Ok(s.to_string()),
        Value::Int(n) => Ok(n.to_string()),
        other => Err(EvalError::type_mismatch("string map key", other.type_name())),
    }
}

/// Index a list; negative indices count from the end.
pub fn index_list(items: &[Value], index: i64) -> Result<Value, EvalError> {
    let len = items.len() as i64;
    let resolved = if index < 0 { len + index } else { index };
    if resolved < 0 || resolved >= len {
        return Err(EvalError::index_out_of_bounds(index, items.len()));
    }
    Ok(items[resolved as usize].clone())
}
