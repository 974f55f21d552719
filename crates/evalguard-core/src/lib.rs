//! evalguard core library
//!
//! Sandboxed evaluation of operator-supplied expressions against a live
//! service: a text-level security policy, a capability-scoped interpreter,
//! deadline-bounded workers, bounded result formatting and classified errors.

pub mod classify;
pub mod config;
pub mod context;
pub mod expr;
pub mod fakes;
pub mod format;
pub mod metrics;
pub mod obs;
pub mod response;
pub mod sandbox;
pub mod service;
pub mod telemetry;

pub use classify::{ErrorClassifier, ErrorKind, ErrorReport};
pub use config::{
    ConfigError, ErrorConfig, ExecutionConfig, FormatConfig, PolicyConfig, SandboxConfig,
};
pub use context::{
    ComponentRegistry, ContextBuilder, ContextError, DataAccess, EvaluationContext, PropertySource,
};
pub use expr::{compile, CompiledExpression, EvalError, EvalErrorKind, Value};
pub use format::{FormattedResult, ResultFormatter, ResultMetadata};
pub use metrics::METRICS;
pub use response::{EvalResponse, EvalState};
pub use sandbox::{
    Capability, EvalRequest, HostObject, ObjectShape, OutputFormat, PolicyDenial, PolicyVerdict,
    ReturnTypeHint, SandboxError, SandboxResult, SecurityPolicy, TimeoutGuard,
};
pub use service::ExpressionSandbox;
pub use telemetry::init_tracing;
