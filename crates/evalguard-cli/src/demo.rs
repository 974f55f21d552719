//! A small in-process host for trying the sandbox from the command line.

use std::sync::Arc;
use std::time::Duration;

use evalguard_core::fakes::{MemoryComponent, MemoryDataAccess, MemoryProperties, MemoryRegistry};
use evalguard_core::sandbox::capability::{expect_arity, int_arg};
use evalguard_core::{ContextError, EvalError, EvaluationContext, HostObject, Value};

/// Upper bound for `diagnostics.sleep`.
const MAX_SLEEP_MS: i64 = 120_000;

/// `diagnostics`: helpers for exercising timeouts, failures and cycles.
#[derive(Debug, Default)]
pub struct Diagnostics;

impl HostObject for Diagnostics {
    fn type_name(&self) -> &str {
        "Diagnostics"
    }

    fn namespace(&self) -> &str {
        "app.diagnostics"
    }

    fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, EvalError> {
        let ty = self.type_name();
        match method {
            "sleep" => {
                expect_arity(ty, method, args, 1)?;
                let ms = int_arg(method, args, 0)?.clamp(0, MAX_SLEEP_MS);
                std::thread::sleep(Duration::from_millis(ms as u64));
                Ok(Value::Int(ms))
            }
            "cycle" => {
                expect_arity(ty, method, args, 0)?;
                let list = Value::list(vec![Value::Int(1)]);
                if let Value::List(inner) = &list {
                    inner
                        .write()
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .push(list.clone());
                }
                Ok(list)
            }
            "range" => {
                expect_arity(ty, method, args, 1)?;
                let n = int_arg(method, args, 0)?.clamp(0, 100_000);
                Ok(Value::list((0..n).map(Value::Int).collect()))
            }
            "fail" => {
                expect_arity(ty, method, args, 0)?;
                Err(EvalError::host("diagnostics failure requested"))
            }
            _ => Err(EvalError::method_not_found(ty, method)),
        }
    }
}

/// The demo host: a registry with a few components, properties, an
/// `orders` table, the clock and `diagnostics`.
pub fn context() -> Result<EvaluationContext, ContextError> {
    let registry = MemoryRegistry::new();
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
            .with_role("Service")
            .with_field("pending", Value::Int(3))
            .with_field("region", Value::from("eu-west-1"))
            .with_failure("reconcile", "No such bean 'ledgerClient'"),
    );

    let properties = MemoryProperties::new();
    properties.set("app.name", "orders");
    properties.set("db.url", "postgres://db.internal:5432/orders");
    properties.set("db.password", "not-for-your-eyes");

    let data = MemoryDataAccess::new();
    for (id, status, total) in [(1, "open", 1250), (2, "shipped", 990), (3, "open", 4100)] {
        data.insert(
            "orders",
            id,
            Value::map([
                ("id", Value::Int(id)),
                ("status", Value::from(status)),
                ("total", Value::Int(total)),
            ]),
        );
    }

    EvaluationContext::builder()
        .with_registry(Arc::new(registry))
        .with_properties(Arc::new(properties))
        .with_data_access(Arc::new(data))
        .with_clock()
        .with_binding("diagnostics", Value::object(Diagnostics))
        .build()
}
