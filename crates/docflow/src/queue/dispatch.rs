use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError};
use serde_json::Value;
use tracing::{error, info, info_span, warn};

use crate::error::{ExecutionError, QueueError};
use crate::queue::response::TaskResponse;
use crate::queue::task::{RetryPolicy, TaskContext, TaskExecutor, TaskMessage};

/// Outcome of delivering one message to its executor.
#[derive(Debug)]
pub enum Dispatch {
    Completed(TaskResponse),
    /// The attempt failed and should be delivered again after `delay`.
    Retry { message: TaskMessage, delay: Duration },
    /// No attempts remain, or the failure cannot change on retry.
    Failed(TaskResponse),
    Rejected(QueueError),
}

/// Routes messages to executors by task name and applies the retry policy.
pub struct Dispatcher {
    executors: HashMap<&'static str, Arc<dyn TaskExecutor>>,
    policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            executors: HashMap::new(),
            policy,
        }
    }

    pub fn register(&mut self, executor: Arc<dyn TaskExecutor>) -> &mut Self {
        self.executors.insert(executor.name(), executor);
        self
    }

    pub fn handles(&self, task_name: &str) -> bool {
        self.executors.contains_key(task_name)
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn dispatch(&self, message: &TaskMessage) -> Dispatch {
        let Some(executor) = self.executors.get(message.name.as_str()) else {
            warn!(task_name = %message.name, "No executor registered");
            return Dispatch::Rejected(QueueError::UnknownTask(message.name.clone()));
        };

        let span = info_span!(
            "task",
            task_id = %message.id,
            task_name = %message.name,
            attempt = message.attempt
        );
        let _enter = span.enter();

        let ctx = TaskContext::new(message, &self.policy);
        match self.run_attempt(executor, &ctx, &message.args) {
            Ok(response) => {
                info!("Task completed");
                Dispatch::Completed(response)
            }
            Err(e) if e.is_retryable() && ctx.remaining_retries() > 0 => {
                let delay = self.policy.backoff(ctx.attempt);
                warn!(error = %e, delay_ms = delay.as_millis() as u64, "Task attempt failed, retrying");
                Dispatch::Retry {
                    message: message.next_attempt(),
                    delay,
                }
            }
            Err(e) => {
                error!(error = %e, "Task failed");
                Dispatch::Failed(executor.fail(&ctx, &message.args, &e))
            }
        }
    }

    fn run_attempt(
        &self,
        executor: &Arc<dyn TaskExecutor>,
        ctx: &TaskContext,
        args: &[Value],
    ) -> Result<TaskResponse, ExecutionError> {
        let Some(hard_limit) = self.policy.hard_time_limit else {
            return panic::catch_unwind(AssertUnwindSafe(|| executor.execute(ctx, args)))
                .unwrap_or_else(|payload| Err(ExecutionError::Panicked(panic_message(&*payload))));
        };

        let (tx, rx) = bounded(1);
        let runner = Arc::clone(executor);
        let attempt_ctx = ctx.clone();
        let attempt_args = args.to_vec();
        let span = tracing::Span::current();

        thread::Builder::new()
            .name(format!("task-{}", ctx.task_id))
            .spawn(move || {
                let _enter = span.enter();
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    runner.execute(&attempt_ctx, &attempt_args)
                }));
                // The receiver is gone once the hard limit fired.
                let _ = tx.send(result);
            })
            .map_err(|e| ExecutionError::Spawn(e.to_string()))?;

        match rx.recv_timeout(hard_limit) {
            Ok(Ok(result)) => result,
            Ok(Err(payload)) => Err(ExecutionError::Panicked(panic_message(&*payload))),
            Err(RecvTimeoutError::Timeout) => {
                ctx.cancel();
                Err(ExecutionError::HardTimeLimit(hard_limit))
            }
            Err(RecvTimeoutError::Disconnected) => Err(ExecutionError::Panicked(
                "attempt thread exited without a result".to_string(),
            )),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
