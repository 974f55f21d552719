//! Request-level scenarios against an in-memory host.

use std::sync::Arc;
use std::time::{Duration, Instant};

use evalguard_core::fakes::{MemoryComponent, MemoryDataAccess, MemoryProperties, MemoryRegistry};
use evalguard_core::{
    ErrorKind, EvalError, EvalRequest, EvalState, EvaluationContext, ExpressionSandbox, HostObject,
    ReturnTypeHint, SandboxConfig, Value,
};
use serde_json::json;

/// Blocks for the requested number of milliseconds.
struct Sleeper;

impl HostObject for Sleeper {
    fn type_name(&self) -> &str {
        "Sleeper"
    }

    fn namespace(&self) -> &str {
        "app.diagnostics"
    }

    fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, EvalError> {
        match method {
            "sleep" => {
                let ms = args.first().and_then(Value::as_int).unwrap_or(0);
                std::thread::sleep(Duration::from_millis(ms as u64));
                Ok(Value::Int(ms))
            }
            _ => Err(EvalError::method_not_found(self.type_name(), method)),
        }
    }
}

/// `range(n)` returns `[0, n)`.
struct Ranges;

impl HostObject for Ranges {
    fn type_name(&self) -> &str {
        "Ranges"
    }

    fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, EvalError> {
        match method {
            "range" => {
                let n = args.first().and_then(Value::as_int).unwrap_or(0);
                Ok(Value::list((0..n).map(Value::Int).collect()))
            }
            _ => Err(EvalError::method_not_found(self.type_name(), method)),
        }
    }
}

fn setup() -> (ExpressionSandbox, Arc<MemoryRegistry>) {
    let registry = Arc::new(MemoryRegistry::new());
    registry.register(
        MemoryComponent::new("orderController", "OrderController")
            .with_namespace("app.orders")
            .with_role("Controller"),
    );
    registry.register(
        MemoryComponent::new("userController", "UserController")
            .with_namespace("app.users")
            .with_role("Controller"),
    );
    registry.register(
        MemoryComponent::new("orderService", "OrderService")
            .with_namespace("app.orders")
            .with_field("pending", Value::Int(3)),
    );

    let properties = Arc::new(MemoryProperties::new());
    properties.set("app.name", "orders");

    let data = Arc::new(MemoryDataAccess::new());
    data.insert(
        "orders",
        1,
        Value::map([("id", Value::Int(1)), ("status", Value::from("open"))]),
    );

    let context = EvaluationContext::builder()
        .with_registry(registry.clone())
        .with_properties(properties)
        .with_data_access(data)
        .with_clock()
        .with_binding("slow", Value::object(Sleeper))
        .build()
        .unwrap();
    let sandbox = ExpressionSandbox::new(SandboxConfig::default(), context).unwrap();
    (sandbox, registry)
}

async fn eval(sandbox: &ExpressionSandbox, expr: &str) -> evalguard_core::EvalResponse {
    sandbox.evaluate(EvalRequest::new(expr)).await
}

// -------------------------------------------------------------------------
// Success paths
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_two_plus_two() {
    let (sandbox, _) = setup();
    let resp = eval(&sandbox, "2+2").await;
    assert!(resp.success);
    assert_eq!(resp.state, EvalState::Succeeded);
    assert_eq!(resp.result, Some(json!(4)));
    assert_eq!(resp.result_type.as_deref(), Some("integer"));
    assert_eq!(resp.expression, "2+2");
    assert!(resp.error_kind.is_none());
}

#[tokio::test]
async fn test_by_type_tracks_live_registry() {
    let (sandbox, registry) = setup();
    let resp = eval(&sandbox, "registry.byType('Controller').size()").await;
    assert_eq!(resp.result, Some(json!(2)));

    registry.register(MemoryComponent::new("adminController", "AdminController").with_role("Controller"));
    let resp = eval(&sandbox, "registry.byType('Controller').size()").await;
    assert_eq!(resp.result, Some(json!(3)));
}

#[tokio::test]
async fn test_projection_and_selection() {
    let (sandbox, _) = setup();
    let resp = eval(&sandbox, "registry.byType('Controller').![name]").await;
    assert_eq!(resp.result, Some(json!(["orderController", "userController"])));

    let resp = eval(&sandbox, "registry.names().?[#this.startsWith('order')]").await;
    assert_eq!(resp.result, Some(json!(["orderController", "orderService"])));

    let resp = eval(&sandbox, "registry.byName('orderService').pending * 2").await;
    assert_eq!(resp.result, Some(json!(6)));
}

#[tokio::test]
async fn test_null_safe_navigation_and_elvis() {
    let (sandbox, _) = setup();
    let resp = eval(&sandbox, "registry.byName('missing')?.name ?: 'none'").await;
    assert_eq!(resp.result, Some(json!("none")));

    let resp = eval(&sandbox, "data.find('orders', 1).status").await;
    assert_eq!(resp.result, Some(json!("open")));
}

#[tokio::test]
async fn test_return_type_hints() {
    let (sandbox, _) = setup();
    let resp = sandbox
        .evaluate(EvalRequest::new("data.count('orders')").with_hint(ReturnTypeHint::String))
        .await;
    assert_eq!(resp.result, Some(json!("1")));
    assert_eq!(resp.result_type.as_deref(), Some("string"));

    let resp = sandbox
        .evaluate(EvalRequest::new("'42'").with_hint(ReturnTypeHint::Number))
        .await;
    assert_eq!(resp.result, Some(json!(42)));

    let resp = sandbox
        .evaluate(EvalRequest::new("2+2").with_hint(ReturnTypeHint::Collection))
        .await;
    assert_eq!(resp.error_kind, Some(ErrorKind::TypeMismatch));
}

// -------------------------------------------------------------------------
// Failure paths
// -------------------------------------------------------------------------

#[tokio::test]
async fn test_unresolved_binding_lists_available() {
    let (sandbox, _) = setup();
    let resp = eval(&sandbox, "registy.names()").await;
    assert_eq!(resp.state, EvalState::RuntimeFailed);
    assert_eq!(resp.error_kind, Some(ErrorKind::UnresolvedBinding));
    let suggestions = resp.suggestions.unwrap();
    assert_eq!(suggestions[0], "Did you mean 'registry'?");
    assert!(suggestions
        .iter()
        .any(|s| s.contains("clock, data, properties, registry, slow")));
}

#[tokio::test]
async fn test_null_reference_without_safe_navigation() {
    let (sandbox, _) = setup();
    let resp = eval(&sandbox, "registry.byName('missing').name").await;
    assert_eq!(resp.error_kind, Some(ErrorKind::NullReference));
    assert!(resp.suggestions.unwrap().iter().any(|s| s.contains("?.")));
}

#[tokio::test]
async fn test_method_not_found() {
    let (sandbox, _) = setup();
    let resp = eval(&sandbox, "registry.byName('orderService').shutdown()").await;
    assert_eq!(resp.error_kind, Some(ErrorKind::MethodNotFound));
    let stack = resp.stack_excerpt.unwrap();
    assert_eq!(stack, vec!["app.orders::OrderService.shutdown".to_string()]);
}

#[tokio::test]
async fn test_host_error_keeps_stack_unless_disabled() {
    let (sandbox, _) = setup();
    let resp = eval(&sandbox, "data.count('ghosts')").await;
    assert_eq!(resp.error_kind, Some(ErrorKind::RuntimeError));
    assert!(resp.message.as_deref().unwrap().contains("ghosts"));
    assert_eq!(
        resp.stack_excerpt.unwrap(),
        vec!["evalguard.context::DataAccess.count".to_string()]
    );

    let resp = sandbox
        .evaluate(EvalRequest::new("data.count('ghosts')").without_stack_trace())
        .await;
    assert!(resp.stack_excerpt.is_none());
}

#[tokio::test]
async fn test_division_by_zero_is_runtime_error() {
    let (sandbox, _) = setup();
    let resp = eval(&sandbox, "1 / 0").await;
    assert_eq!(resp.error_kind, Some(ErrorKind::RuntimeError));
    assert_eq!(resp.state, EvalState::RuntimeFailed);
}

#[tokio::test]
async fn test_collection_growth_is_bounded() {
    let context = EvaluationContext::builder()
        .with_binding("ranges", Value::object(Ranges))
        .build()
        .unwrap();
    let mut config = SandboxConfig::default();
    config.execution.max_collection_len = 1_000;
    config.execution.max_total_elements = 10_000;
    let sandbox = ExpressionSandbox::new(config, context).unwrap();

    let resp = eval(&sandbox, "ranges.range(1000).size()").await;
    assert_eq!(resp.result, Some(json!(1000)));

    let resp = eval(&sandbox, "ranges.range(1001)").await;
    assert_eq!(resp.error_kind, Some(ErrorKind::RuntimeError));
    assert!(resp.message.unwrap().contains("exceeds 1000"));

    let started = Instant::now();
    let resp = eval(&sandbox, "ranges.range(1000).![ranges.range(1000)]").await;
    assert_eq!(resp.state, EvalState::RuntimeFailed);
    assert!(resp.message.unwrap().contains("more than 10000"));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_blocking_expression_times_out() {
    let (sandbox, _) = setup();
    let started = Instant::now();
    let resp = sandbox
        .evaluate(EvalRequest::new("slow.sleep(10000)").with_timeout(1))
        .await;
    assert_eq!(resp.state, EvalState::TimedOut);
    assert_eq!(resp.error_kind, Some(ErrorKind::TimedOut));
    assert!(started.elapsed() < Duration::from_millis(2500));
    assert!(resp.execution_time_ms >= 1000);
}
