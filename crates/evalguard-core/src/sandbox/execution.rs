//! Execution controls: bounded worker pool and wall-clock deadline.
//!
//! Each evaluation runs on its own OS thread so that the caller can detach
//! from it. The caller waits on a oneshot channel under a deadline; on expiry
//! it raises the interrupt flag, returns `Timeout` and leaves the worker to
//! stop at its next interruption check. The worker owns its semaphore permit,
//! so an abandoned worker keeps occupying a slot until it actually exits.
//!
//! Whatever the caller does with the value afterwards (hint coercion,
//! formatting) is passed in as `finish` and runs on the worker too, so host
//! code is never reached from the caller's task.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, Semaphore};
use tracing::debug;

use crate::config::ExecutionConfig;
use crate::context::EvaluationContext;
use crate::expr::error::EvalError;
use crate::expr::evaluator::{EvalLimits, Evaluator};
use crate::expr::value::Value;
use crate::expr::CompiledExpression;
use crate::metrics::METRICS;
use crate::obs;

use super::error::{SandboxError, SandboxResult};

/// A successful evaluation and how long it took.
#[derive(Debug, Clone)]
pub struct Evaluated<T = Value> {
    pub value: T,
    pub elapsed: Duration,
}

/// Runs compiled expressions on dedicated workers under a deadline.
#[derive(Debug)]
pub struct TimeoutGuard {
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    queue_when_busy: bool,
    stack_bytes: usize,
    limits: EvalLimits,
    spawned: AtomicU64,
}

impl TimeoutGuard {
    pub fn new(config: &ExecutionConfig) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.max_concurrent)),
            max_concurrent: config.max_concurrent,
            queue_when_busy: config.queue_when_busy,
            stack_bytes: config.worker_stack_bytes,
            limits: EvalLimits {
                max_string_len: config.max_string_len,
                max_collection_len: config.max_collection_len,
                max_total_elements: config.max_total_elements,
            },
            spawned: AtomicU64::new(0),
        }
    }

    /// Workers that could start right now.
    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Evaluate `compiled` against `context` and pass the value through
    /// `finish`, returning no later than `timeout` plus scheduling overhead.
    ///
    /// Time spent waiting for a free worker counts against `timeout`. A panic
    /// in either step comes back as a runtime error.
    pub async fn run_with_deadline<T, F>(
        &self,
        compiled: &CompiledExpression,
        context: &EvaluationContext,
        timeout: Duration,
        finish: F,
    ) -> SandboxResult<Evaluated<T>>
    where
        T: Send + 'static,
        F: FnOnce(Value) -> Result<T, EvalError> + Send + 'static,
    {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + timeout;
        let limit_ms = timeout.as_millis() as u64;
        let timed_out = |started: Instant| SandboxError::Timeout {
            elapsed_ms: started.elapsed().as_millis() as u64,
            limit_ms,
        };

        let permit = if self.queue_when_busy {
            match tokio::time::timeout_at(deadline, self.permits.clone().acquire_owned()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => {
                    return Err(SandboxError::WorkerUnavailable(
                        "worker pool is closed".to_string(),
                    ))
                }
                Err(_) => {
                    debug!(limit_ms, "deadline passed while waiting for a worker");
                    return Err(timed_out(started));
                }
            }
        } else {
            self.permits
                .clone()
                .try_acquire_owned()
                .map_err(|_| SandboxError::Overloaded {
                    max: self.max_concurrent,
                })?
        };

        let seq = self.spawned.fetch_add(1, Ordering::Relaxed);
        let worker_name = format!("evalguard-worker-{seq}");
        let interrupt = Arc::new(AtomicBool::new(false));
        let (tx, rx) = oneshot::channel();

        let worker_interrupt = Arc::clone(&interrupt);
        let worker_compiled = compiled.clone();
        let worker_context = context.clone();
        let limits = self.limits;
        let thread_name = worker_name.clone();
        std::thread::Builder::new()
            .name(thread_name.clone())
            .stack_size(self.stack_bytes)
            .spawn(move || {
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    let value = Evaluator::new(&worker_context, &worker_interrupt)
                        .with_limits(limits)
                        .evaluate(&worker_compiled)?;
                    finish(value)
                }))
                .unwrap_or_else(|payload| {
                    Err(EvalError::host(format!(
                        "evaluation panicked: {}",
                        panic_message(payload.as_ref())
                    )))
                });
                drop(permit);
                if worker_interrupt.load(Ordering::Relaxed) {
                    debug!(worker = %thread_name, "abandoned worker exiting");
                }
                // The caller is gone after a timeout; dropping the result is fine.
                let _ = tx.send(outcome);
            })
            .map_err(|e| SandboxError::WorkerUnavailable(e.to_string()))?;

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(Ok(value))) => Ok(Evaluated {
                value,
                elapsed: started.elapsed(),
            }),
            Ok(Ok(Err(err))) => Err(SandboxError::Runtime(err)),
            Ok(Err(_)) => Err(SandboxError::WorkerUnavailable(
                "worker exited without a result".to_string(),
            )),
            Err(_) => {
                interrupt.store(true, Ordering::Relaxed);
                obs::emit_worker_abandoned(&worker_name, limit_ms);
                METRICS.inc_abandoned_workers();
                Err(timed_out(started))
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::compile;
    use crate::expr::error::EvalErrorKind;
    use crate::sandbox::capability::HostObject;

    /// Sleeps for the requested number of milliseconds.
    struct Sleeper;

    impl HostObject for Sleeper {
        fn type_name(&self) -> &str {
            "Sleeper"
        }

        fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, EvalError> {
            match method {
                "sleep" => {
                    let ms = args.first().and_then(Value::as_int).unwrap_or(0);
                    std::thread::sleep(Duration::from_millis(ms as u64));
                    Ok(Value::Bool(true))
                }
                "boom" => panic!("host blew up"),
                _ => Err(EvalError::method_not_found(self.type_name(), method)),
            }
        }
    }

    fn context() -> EvaluationContext {
        EvaluationContext::builder()
            .with_binding("slow", Value::object(Sleeper))
            .with_binding(
                "ticks",
                Value::list((0..1000).map(Value::Int).collect()),
            )
            .build()
            .unwrap()
    }

    fn guard(max_concurrent: usize, queue_when_busy: bool) -> TimeoutGuard {
        TimeoutGuard::new(&ExecutionConfig {
            max_concurrent,
            queue_when_busy,
            ..ExecutionConfig::default()
        })
    }

    #[tokio::test]
    async fn test_success_records_elapsed() {
        let guard = guard(2, true);
        let compiled = compile("2+2").unwrap();
        let done = guard
            .run_with_deadline(&compiled, &context(), Duration::from_secs(1), Ok)
            .await
            .unwrap();
        assert_eq!(done.value, Value::Int(4));
        assert!(done.elapsed < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_runtime_error_is_returned() {
        let guard = guard(2, true);
        let compiled = compile("missing.x").unwrap();
        let err = guard
            .run_with_deadline(&compiled, &context(), Duration::from_secs(1), Ok)
            .await
            .unwrap_err();
        match err {
            SandboxError::Runtime(e) => assert_eq!(e.kind, EvalErrorKind::UnknownBinding),
            other => panic!("expected Runtime, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_blocking_host_call_times_out() {
        let guard = guard(2, true);
        let compiled = compile("slow.sleep(3000)").unwrap();
        let started = Instant::now();
        let err = guard
            .run_with_deadline(&compiled, &context(), Duration::from_millis(200), Ok)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Timeout { limit_ms: 200, .. }));
        assert!(started.elapsed() < Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_interrupt_releases_worker() {
        let guard = guard(1, true);
        let compiled = compile("ticks.?[slow.sleep(10)]").unwrap();
        let err = guard
            .run_with_deadline(&compiled, &context(), Duration::from_millis(100), Ok)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Timeout { .. }));

        // The worker notices the interrupt within one iteration.
        let mut freed = false;
        for _ in 0..100 {
            if guard.available_workers() == 1 {
                freed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(freed, "abandoned worker never released its permit");
    }

    #[tokio::test]
    async fn test_fail_fast_when_busy() {
        let guard = Arc::new(guard(1, false));
        let busy = Arc::clone(&guard);
        let slow = tokio::spawn(async move {
            let compiled = compile("slow.sleep(300)").unwrap();
            busy.run_with_deadline(&compiled, &context(), Duration::from_secs(2), Ok)
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let compiled = compile("1").unwrap();
        let err = guard
            .run_with_deadline(&compiled, &context(), Duration::from_secs(1), Ok)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Overloaded { max: 1 }));
        assert!(slow.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_queue_wait_consumes_budget() {
        let guard = Arc::new(guard(1, true));
        let busy = Arc::clone(&guard);
        let slow = tokio::spawn(async move {
            let compiled = compile("slow.sleep(500)").unwrap();
            busy.run_with_deadline(&compiled, &context(), Duration::from_secs(2), Ok)
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let compiled = compile("1").unwrap();
        let err = guard
            .run_with_deadline(&compiled, &context(), Duration::from_millis(100), Ok)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Timeout { .. }));
        assert!(slow.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_worker_panic_is_contained() {
        let guard = guard(1, true);
        let compiled = compile("slow.boom()").unwrap();
        let err = guard
            .run_with_deadline(&compiled, &context(), Duration::from_secs(1), Ok)
            .await
            .unwrap_err();
        match err {
            SandboxError::Runtime(e) => assert!(e.message.contains("host blew up")),
            other => panic!("expected Runtime, got {:?}", other),
        }
        assert_eq!(guard.available_workers(), 1);
    }

    #[tokio::test]
    async fn test_finish_runs_on_worker_under_guard() {
        let guard = guard(1, true);
        let compiled = compile("2+2").unwrap();
        let done = guard
            .run_with_deadline(&compiled, &context(), Duration::from_secs(1), |v| {
                Ok(v.to_string())
            })
            .await
            .unwrap();
        assert_eq!(done.value, "4");

        let err = guard
            .run_with_deadline(&compiled, &context(), Duration::from_secs(1), |_| -> Result<(), EvalError> {
                panic!("finish blew up")
            })
            .await
            .unwrap_err();
        match err {
            SandboxError::Runtime(e) => assert!(e.message.contains("finish blew up")),
            other => panic!("expected Runtime, got {:?}", other),
        }

        let started = Instant::now();
        let err = guard
            .run_with_deadline(&compiled, &context(), Duration::from_millis(200), |v| {
                std::thread::sleep(Duration::from_millis(1500));
                Ok(v)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_millis(1000));
    }
}
