pub mod dispatch;
pub mod memory;
pub mod pool;
pub mod response;
pub mod task;

pub use dispatch::{Dispatch, Dispatcher};
pub use memory::MemoryQueue;
pub use pool::WorkerQueue;
pub use response::{TaskResponse, TaskStatus};
pub use task::{RetryPolicy, TaskContext, TaskExecutor, TaskMessage};

use crate::error::QueueError;

/// Accepts task messages for asynchronous execution. Submission only
/// hands the message over; the outcome is recorded by the executor.
pub trait TaskQueue: Send + Sync {
    fn submit(&self, message: TaskMessage) -> Result<(), QueueError>;
}
