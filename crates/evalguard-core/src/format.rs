//! Result formatting: bounded, cycle-safe rendering of runtime values.
//!
//! Formatting never fails. Host objects are introspected under
//! `catch_unwind`; if anything goes wrong the value falls back to a
//! length-capped string.

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::Serialize;
use serde_json::{json, Map, Number, Value as Json};

use crate::config::FormatConfig;
use crate::expr::value::{read_list, read_map, Value};
use crate::sandbox::request::OutputFormat;

const CYCLE_PREFIX: &str = "<cycle: ";
const MAX_DEPTH_MARKER: &str = "<max depth>";
const UNREPRESENTABLE: &str = "<unrepresentable value>";

/// Size information about the top-level result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_empty: Option<bool>,
    /// Some part of the value was cut to fit the configured bounds.
    pub truncated: bool,
}

/// A rendered result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattedResult {
    pub result: Json,
    pub result_type: String,
    pub metadata: ResultMetadata,
}

/// Renders values in `raw`, `json` or `descriptive` mode.
#[derive(Debug, Clone)]
pub struct ResultFormatter {
    sample_size: usize,
    max_depth: usize,
    max_string_len: usize,
    max_items: usize,
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(&FormatConfig::default())
    }
}

impl ResultFormatter {
    pub fn new(config: &FormatConfig) -> Self {
        Self {
            sample_size: config.sample_size,
            max_depth: config.max_depth,
            max_string_len: config.max_string_len,
            max_items: config.max_items,
        }
    }

    pub fn format(&self, value: &Value, mode: OutputFormat) -> FormattedResult {
        let attempt = catch_unwind(AssertUnwindSafe(|| {
            let mut walker = Walker::new(self);
            let result = match mode {
                OutputFormat::Raw => walker.raw(value),
                OutputFormat::Json => walker.json(value, 0),
                OutputFormat::Descriptive => walker.descriptive(value),
            };
            let size = value.collection_len();
            FormattedResult {
                result,
                result_type: value.type_name().to_string(),
                metadata: ResultMetadata {
                    size,
                    is_empty: size.map(|n| n == 0),
                    truncated: walker.truncated,
                },
            }
        }));
        attempt.unwrap_or_else(|_| self.fallback(value))
    }

    /// Last resort when host introspection panicked.
    fn fallback(&self, value: &Value) -> FormattedResult {
        let text = catch_unwind(AssertUnwindSafe(|| value.to_string()))
            .unwrap_or_else(|_| UNREPRESENTABLE.to_string());
        let result_type = catch_unwind(AssertUnwindSafe(|| value.type_name().to_string()))
            .unwrap_or_else(|_| "unknown".to_string());
        let (text, truncated) = cap(&text, self.max_string_len);
        FormattedResult {
            result: Json::String(text),
            result_type,
            metadata: ResultMetadata {
                truncated,
                ..ResultMetadata::default()
            },
        }
    }
}

fn cap(s: &str, max: usize) -> (String, bool) {
    if s.chars().count() <= max {
        return (s.to_string(), false);
    }
    let mut out: String = s.chars().take(max).collect();
    out.push_str("...");
    (out, true)
}

fn float_json(f: f64) -> Json {
    Number::from_f64(f)
        .map(Json::Number)
        .unwrap_or_else(|| Json::String(f.to_string()))
}

/// One formatting pass: tracks the current path for cycle detection.
struct Walker<'f> {
    fmt: &'f ResultFormatter,
    path: Vec<usize>,
    truncated: bool,
}

impl<'f> Walker<'f> {
    fn new(fmt: &'f ResultFormatter) -> Self {
        Self {
            fmt,
            path: Vec::new(),
            truncated: false,
        }
    }

    fn string(&mut self, s: &str) -> Json {
        let (text, cut) = cap(s, self.fmt.max_string_len);
        self.truncated |= cut;
        Json::String(text)
    }

    fn primitive(&mut self, value: &Value) -> Option<Json> {
        Some(match value {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(n) => json!(n),
            Value::Float(f) => float_json(*f),
            Value::Str(s) => self.string(s),
            _ => return None,
        })
    }

    fn raw(&mut self, value: &Value) -> Json {
        if let Some(p) = self.primitive(value) {
            return p;
        }
        self.string(&value.to_string())
    }

    fn json(&mut self, value: &Value, depth: usize) -> Json {
        if let Some(p) = self.primitive(value) {
            return p;
        }
        let id = value.identity();
        if let Some(id) = id {
            if self.path.contains(&id) {
                return Json::String(format!("{CYCLE_PREFIX}{}>", value.type_name()));
            }
        }
        if depth >= self.fmt.max_depth {
            self.truncated = true;
            return Json::String(MAX_DEPTH_MARKER.to_string());
        }
        if let Some(id) = id {
            self.path.push(id);
        }
        let out = self.container(value, depth);
        if id.is_some() {
            self.path.pop();
        }
        out
    }

    fn container(&mut self, value: &Value, depth: usize) -> Json {
        match value {
            Value::List(list) => {
                let (items, len) = {
                    let guard = read_list(list);
                    let items: Vec<Value> = guard.iter().take(self.fmt.max_items).cloned().collect();
                    (items, guard.len())
                };
                self.truncated |= len > items.len();
                Json::Array(items.iter().map(|v| self.json(v, depth + 1)).collect())
            }
            Value::Map(map) => {
                let (entries, len) = {
                    let guard = read_map(map);
                    let entries: Vec<(String, Value)> = guard
                        .iter()
                        .take(self.fmt.max_items)
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    (entries, guard.len())
                };
                self.truncated |= len > entries.len();
                let mut out = Map::new();
                for (key, item) in entries {
                    let rendered = self.json(&item, depth + 1);
                    out.insert(key, rendered);
                }
                Json::Object(out)
            }
            Value::Object(object) => match object.elements() {
                Some(items) => {
                    self.truncated |= items.len() > self.fmt.max_items;
                    Json::Array(
                        items
                            .iter()
                            .take(self.fmt.max_items)
                            .map(|v| self.json(v, depth + 1))
                            .collect(),
                    )
                }
                None => {
                    let fields = object.fields();
                    if fields.is_empty() {
                        return self.string(&object.describe());
                    }
                    self.truncated |= fields.len() > self.fmt.max_items;
                    let mut out = Map::new();
                    for (key, item) in fields.into_iter().take(self.fmt.max_items) {
                        let rendered = self.json(&item, depth + 1);
                        out.insert(key, rendered);
                    }
                    Json::Object(out)
                }
            },
            other => self.string(&other.to_string()),
        }
    }

    fn descriptive(&mut self, value: &Value) -> Json {
        if let Some(p) = self.primitive(value) {
            return p;
        }
        if let Some(id) = value.identity() {
            self.path.push(id);
        }
        let k = self.fmt.sample_size;
        let mut out = Map::new();
        out.insert("type".into(), json!(value.type_name()));

        let (len, sample) = match value {
            Value::Map(map) => {
                let (entries, len) = {
                    let guard = read_map(map);
                    let entries: Vec<(String, Value)> = guard
                        .iter()
                        .take(k)
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    (entries, guard.len())
                };
                let mut sample = Map::new();
                for (key, item) in entries {
                    let rendered = self.json(&item, 1);
                    sample.insert(key, rendered);
                }
                (Some(len), Json::Object(sample))
            }
            other => match other.elements() {
                Some(items) => {
                    let sample = items.iter().take(k).map(|v| self.json(v, 1)).collect();
                    (Some(items.len()), Json::Array(sample))
                }
                None => (None, Json::Null),
            },
        };

        match len {
            Some(len) => {
                out.insert("size".into(), json!(len));
                out.insert("isEmpty".into(), json!(len == 0));
                out.insert("sample".into(), sample);
                if len > k {
                    self.truncated = true;
                    out.insert("note".into(), json!(format!("Showing first {k} of {len}")));
                }
            }
            None => {
                if let Value::Object(object) = value {
                    let fields = object.fields();
                    if !fields.is_empty() {
                        let mut sample = Map::new();
                        for (key, item) in fields.iter().take(k) {
                            let rendered = self.json(item, 1);
                            sample.insert(key.clone(), rendered);
                        }
                        out.insert("fields".into(), Json::Object(sample));
                    }
                }
            }
        }

        if let Value::Object(object) = value {
            let shape = object.shape();
            out.insert("namespace".into(), json!(object.namespace()));
            out.insert(
                "isCollection".into(),
                json!(shape.is_collection || len.is_some()),
            );
            out.insert("isMap".into(), json!(shape.is_map));
            out.insert("isArray".into(), json!(shape.is_array));
            out.insert("isAssociation".into(), json!(shape.is_association));
        }

        if value.identity().is_some() {
            self.path.pop();
        }
        Json::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::error::EvalError;
    use crate::sandbox::capability::{HostObject, ObjectShape};

    struct Order;

    impl HostObject for Order {
        fn type_name(&self) -> &str {
            "Order"
        }

        fn namespace(&self) -> &str {
            "app.orders"
        }

        fn shape(&self) -> ObjectShape {
            ObjectShape::default()
        }

        fn fields(&self) -> Vec<(String, Value)> {
            vec![("id".into(), Value::Int(7)), ("status".into(), Value::from("open"))]
        }
    }

    struct Exploding;

    impl HostObject for Exploding {
        fn type_name(&self) -> &str {
            "Exploding"
        }

        fn fields(&self) -> Vec<(String, Value)> {
            panic!("introspection failed")
        }

        fn invoke(&self, method: &str, _args: &[Value]) -> Result<Value, EvalError> {
            Err(EvalError::method_not_found(self.type_name(), method))
        }
    }

    struct Batch;

    impl HostObject for Batch {
        fn type_name(&self) -> &str {
            "Batch"
        }

        fn namespace(&self) -> &str {
            "app.jobs"
        }

        fn shape(&self) -> ObjectShape {
            ObjectShape {
                is_collection: true,
                is_array: true,
                ..ObjectShape::default()
            }
        }

        fn elements(&self) -> Option<Vec<Value>> {
            Some((0..8).map(Value::Int).collect())
        }
    }

    fn numbers(n: i64) -> Value {
        Value::list((0..n).map(Value::Int).collect())
    }

    #[test]
    fn test_primitives_pass_through_every_mode() {
        let f = ResultFormatter::default();
        for mode in [OutputFormat::Raw, OutputFormat::Json, OutputFormat::Descriptive] {
            let out = f.format(&Value::Int(4), mode);
            assert_eq!(out.result, json!(4));
            assert_eq!(out.result_type, "integer");
            assert_eq!(f.format(&Value::from("hi"), mode).result, json!("hi"));
            assert_eq!(f.format(&Value::Null, mode).result, Json::Null);
        }
    }

    #[test]
    fn test_large_collection_descriptive() {
        let f = ResultFormatter::default();
        let out = f.format(&numbers(1000), OutputFormat::Descriptive);
        assert_eq!(out.result["size"], json!(1000));
        assert_eq!(out.result["isEmpty"], json!(false));
        assert_eq!(out.result["sample"].as_array().unwrap().len(), 5);
        assert_eq!(out.result["note"], json!("Showing first 5 of 1000"));
        assert_eq!(out.metadata.size, Some(1000));
        assert_eq!(out.metadata.is_empty, Some(false));
        assert!(out.metadata.truncated);
    }

    #[test]
    fn test_small_collection_has_no_note() {
        let f = ResultFormatter::default();
        let out = f.format(&numbers(3), OutputFormat::Descriptive);
        assert_eq!(out.result["size"], json!(3));
        assert!(out.result.get("note").is_none());
        assert!(!out.metadata.truncated);
    }

    #[test]
    fn test_json_mode_caps_items() {
        let f = ResultFormatter::default();
        let out = f.format(&numbers(1000), OutputFormat::Json);
        assert_eq!(out.result.as_array().unwrap().len(), 100);
        assert!(out.metadata.truncated);
    }

    #[test]
    fn test_self_reference_yields_cycle_marker() {
        let list = Value::list(vec![Value::Int(1)]);
        if let Value::List(inner) = &list {
            inner.write().unwrap().push(list.clone());
        }
        let f = ResultFormatter::default();
        let out = f.format(&list, OutputFormat::Json);
        assert_eq!(out.result, json!([1, "<cycle: list>"]));

        let out = f.format(&list, OutputFormat::Descriptive);
        assert_eq!(out.result["sample"][1], json!("<cycle: list>"));

        let raw = f.format(&list, OutputFormat::Raw);
        assert!(raw.result.as_str().unwrap().contains("<cycle: list>"));
    }

    #[test]
    fn test_depth_limit_marker() {
        let mut value = Value::Int(0);
        for _ in 0..10 {
            value = Value::list(vec![value]);
        }
        let f = ResultFormatter::default();
        let out = f.format(&value, OutputFormat::Json);
        assert_eq!(out.result, json!([[[["<max depth>"]]]]));
        assert!(out.metadata.truncated);
    }

    #[test]
    fn test_host_object_descriptive() {
        let f = ResultFormatter::default();
        let out = f.format(&Value::object(Order), OutputFormat::Descriptive);
        assert_eq!(out.result["type"], json!("Order"));
        assert_eq!(out.result["namespace"], json!("app.orders"));
        assert_eq!(out.result["isCollection"], json!(false));
        assert_eq!(out.result["isAssociation"], json!(false));
        assert_eq!(out.result["fields"]["status"], json!("open"));
        assert_eq!(out.result_type, "Order");
    }

    #[test]
    fn test_collection_shaped_host_keeps_shape_flags() {
        let f = ResultFormatter::default();
        let out = f.format(&Value::object(Batch), OutputFormat::Descriptive);
        assert_eq!(out.result["type"], json!("Batch"));
        assert_eq!(out.result["size"], json!(8));
        assert_eq!(out.result["sample"], json!([0, 1, 2, 3, 4]));
        assert_eq!(out.result["namespace"], json!("app.jobs"));
        assert_eq!(out.result["isCollection"], json!(true));
        assert_eq!(out.result["isArray"], json!(true));
        assert_eq!(out.result["isMap"], json!(false));
        assert_eq!(out.result["isAssociation"], json!(false));
    }

    #[test]
    fn test_map_descriptive_samples_entries() {
        let map = Value::map((0..8).map(|i| (format!("k{i}"), Value::Int(i))));
        let f = ResultFormatter::default();
        let out = f.format(&map, OutputFormat::Descriptive);
        assert_eq!(out.result["size"], json!(8));
        assert_eq!(out.result["sample"].as_object().unwrap().len(), 5);
        assert_eq!(out.result["note"], json!("Showing first 5 of 8"));
    }

    #[test]
    fn test_panicking_host_falls_back_to_string() {
        let f = ResultFormatter::default();
        let out = f.format(&Value::object(Exploding), OutputFormat::Json);
        assert_eq!(out.result_type, "Exploding");
        assert!(out.result.is_string());
    }

    #[test]
    fn test_non_finite_float_and_long_string() {
        let f = ResultFormatter::new(&FormatConfig {
            max_string_len: 4,
            ..FormatConfig::default()
        });
        assert_eq!(f.format(&Value::Float(f64::NAN), OutputFormat::Json).result, json!("NaN"));
        let out = f.format(&Value::from("abcdefgh"), OutputFormat::Json);
        assert_eq!(out.result, json!("abcd..."));
        assert!(out.metadata.truncated);
    }
}
