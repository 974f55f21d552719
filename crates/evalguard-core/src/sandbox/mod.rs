//! Sandbox: policy-checked, deadline-bounded expression evaluation.
//!
//! A text-level denylist rejects dangerous-looking expressions before they
//! are compiled. The capability layer ([`capability::HostObject`]) decides
//! what a compiled expression can actually reach. Execution controls run each
//! evaluation on a bounded pool of detachable workers.
//!
//! # Modules
//!
//! - [`capability`] - `Capability` families, the `HostObject` trait
//! - [`request`]    - `EvalRequest`, `ReturnTypeHint`, `OutputFormat`, `PolicyVerdict`
//! - [`policy`]     - `DenyRule`, `SecurityPolicy`
//! - [`engine`]     - `validate_expression()` (first-match, fail-closed)
//! - [`execution`]  - `TimeoutGuard::run_with_deadline()`
//! - [`error`]      - `PolicyDenial`, `SandboxError` / `SandboxResult`

pub mod capability;
pub mod engine;
pub mod error;
pub mod execution;
pub mod policy;
pub mod request;

pub use capability::{Capability, HostObject, ObjectShape};
pub use engine::validate_expression;
pub use error::{PolicyDenial, SandboxError, SandboxResult};
pub use execution::{Evaluated, TimeoutGuard};
pub use policy::{DenyRule, SecurityPolicy};
pub use request::{EvalRequest, OutputFormat, PolicyVerdict, ReturnTypeHint};
