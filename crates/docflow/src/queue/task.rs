use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExecutionError;
use crate::queue::response::TaskResponse;

/// A named task with positional arguments. `id` is caller-supplied and is
/// also the uuid of the job that tracks the task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub id: String,
    pub name: String,
    pub args: Vec<Value>,
    /// Zero for the first delivery, incremented on each retry.
    #[serde(default)]
    pub attempt: u32,
}

impl TaskMessage {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
            attempt: 0,
        }
    }

    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

/// Retry and time-limit settings owned by the queue consumer.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_unit: Duration,
    pub soft_time_limit: Option<Duration>,
    pub hard_time_limit: Option<Duration>,
}

impl RetryPolicy {
    /// Delay before re-running a task whose attempt `attempt` failed:
    /// `10 * (attempt + 1)` backoff units.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_unit * (10 * (attempt + 1))
    }

    pub fn total_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_unit: Duration::from_secs(1),
            soft_time_limit: Some(Duration::from_secs(300)),
            hard_time_limit: Some(Duration::from_secs(600)),
        }
    }
}

/// What an executor knows about the attempt it is running.
///
/// Clones share the cancellation flag, so the consumer can abandon an
/// attempt that is still running on another thread.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: String,
    pub task_name: String,
    pub attempt: u32,
    pub max_retries: u32,
    started: Instant,
    soft_time_limit: Option<Duration>,
    cancelled: Arc<AtomicBool>,
}

impl TaskContext {
    pub fn new(message: &TaskMessage, policy: &RetryPolicy) -> Self {
        Self {
            task_id: message.id.clone(),
            task_name: message.name.clone(),
            attempt: message.attempt,
            max_retries: policy.max_retries,
            started: Instant::now(),
            soft_time_limit: policy.soft_time_limit,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn remaining_retries(&self) -> u32 {
        self.max_retries.saturating_sub(self.attempt)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fails once the attempt was cancelled. Checked right before commit.
    pub fn ensure_live(&self) -> Result<(), ExecutionError> {
        if self.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }
        Ok(())
    }

    /// Cooperative limit check between units of work. Fails when the
    /// attempt was cancelled or has run past its soft time limit.
    pub fn checkpoint(&self) -> Result<(), ExecutionError> {
        self.ensure_live()?;
        if let Some(limit) = self.soft_time_limit {
            if self.started.elapsed() > limit {
                return Err(ExecutionError::SoftTimeLimit(limit));
            }
        }
        Ok(())
    }
}

/// Business logic for one task name. Retry, backoff and time limits are
/// handled by the caller; an executor only runs a single attempt.
pub trait TaskExecutor: Send + Sync {
    fn name(&self) -> &'static str;

    fn execute(&self, ctx: &TaskContext, args: &[Value]) -> Result<TaskResponse, ExecutionError>;

    /// Records the terminal failure once no attempts remain and returns the
    /// error envelope.
    fn fail(&self, ctx: &TaskContext, args: &[Value], error: &ExecutionError) -> TaskResponse;
}
