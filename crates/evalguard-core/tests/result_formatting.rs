//! Result formatting through the full request path.

use evalguard_core::{
    EvalRequest, EvaluationContext, ExpressionSandbox, FormatConfig, OutputFormat, SandboxConfig,
    Value,
};
use serde_json::json;

fn sandbox_with(binding: &str, value: Value) -> ExpressionSandbox {
    let context = EvaluationContext::builder()
        .with_binding(binding, value)
        .build()
        .unwrap();
    ExpressionSandbox::new(SandboxConfig::default(), context).unwrap()
}

fn self_referencing_list() -> Value {
    let list = Value::list(vec![Value::Int(1)]);
    if let Value::List(inner) = &list {
        inner.write().unwrap().push(list.clone());
    }
    list
}

#[tokio::test]
async fn test_thousand_elements_descriptive() {
    let sandbox = sandbox_with("events", Value::list((0..1000).map(Value::Int).collect()));
    let resp = sandbox
        .evaluate(EvalRequest::new("events").with_format(OutputFormat::Descriptive))
        .await;
    assert!(resp.success);

    let result = resp.result.unwrap();
    assert_eq!(result["type"], "list");
    assert_eq!(result["size"], 1000);
    assert_eq!(result["isEmpty"], false);
    assert_eq!(result["sample"], json!([0, 1, 2, 3, 4]));
    assert_eq!(result["note"], "Showing first 5 of 1000");

    let metadata = resp.metadata.unwrap();
    assert_eq!(metadata.size, Some(1000));
    assert_eq!(metadata.is_empty, Some(false));
    assert!(metadata.truncated);
}

#[tokio::test]
async fn test_fifty_element_selection_descriptive() {
    let sandbox = sandbox_with("events", Value::list((0..100).map(Value::Int).collect()));
    let resp = sandbox
        .evaluate(
            EvalRequest::new("events.?[#this % 2 == 0]").with_format(OutputFormat::Descriptive),
        )
        .await;
    let result = resp.result.unwrap();
    assert_eq!(result["size"], 50);
    assert_eq!(result["sample"], json!([0, 2, 4, 6, 8]));
}

#[tokio::test]
async fn test_json_mode_caps_items() {
    let sandbox = sandbox_with("events", Value::list((0..1000).map(Value::Int).collect()));
    let resp = sandbox.evaluate(EvalRequest::new("events")).await;
    let items = resp.result.unwrap();
    assert_eq!(items.as_array().unwrap().len(), 100);
    assert!(resp.metadata.unwrap().truncated);
}

#[tokio::test]
async fn test_cycle_is_marked_not_followed() {
    let sandbox = sandbox_with("loop", self_referencing_list());

    let resp = sandbox.evaluate(EvalRequest::new("loop")).await;
    assert!(resp.success);
    assert_eq!(resp.result, Some(json!([1, "<cycle: list>"])));

    let resp = sandbox
        .evaluate(EvalRequest::new("loop").with_format(OutputFormat::Descriptive))
        .await;
    assert_eq!(resp.result.unwrap()["sample"], json!([1, "<cycle: list>"]));

    let resp = sandbox
        .evaluate(EvalRequest::new("loop").with_format(OutputFormat::Raw))
        .await;
    assert!(resp.result.unwrap().as_str().unwrap().contains("<cycle: list>"));
}

#[tokio::test]
async fn test_depth_limit_marks_deep_values() {
    let mut nested = Value::Int(0);
    for _ in 0..10 {
        nested = Value::list(vec![nested]);
    }
    let config = SandboxConfig {
        format: FormatConfig {
            max_depth: 2,
            ..FormatConfig::default()
        },
        ..SandboxConfig::default()
    };
    let context = EvaluationContext::builder()
        .with_binding("deep", nested)
        .build()
        .unwrap();
    let sandbox = ExpressionSandbox::new(config, context).unwrap();

    let resp = sandbox.evaluate(EvalRequest::new("deep")).await;
    assert_eq!(resp.result, Some(json!([["<max depth>"]])));
}

#[tokio::test]
async fn test_long_strings_are_capped() {
    let sandbox = sandbox_with("blob", Value::from("x".repeat(5000)));
    let resp = sandbox.evaluate(EvalRequest::new("blob")).await;
    let text = resp.result.unwrap();
    assert_eq!(text.as_str().unwrap().len(), 1003);
    assert!(resp.metadata.unwrap().truncated);
}
