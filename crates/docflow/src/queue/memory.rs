use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::error::QueueError;
use crate::queue::dispatch::{Dispatch, Dispatcher};
use crate::queue::task::TaskMessage;
use crate::queue::TaskQueue;

/// Single-threaded queue for tests and one-shot runs. Messages wait until
/// the owner drains them, and retries are re-queued without sleeping.
#[derive(Default)]
pub struct MemoryQueue {
    messages: Mutex<VecDeque<TaskMessage>>,
    closed: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<TaskMessage>> {
        self.messages.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Further submissions fail with [`QueueError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn pop(&self) -> Option<TaskMessage> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<TaskMessage> {
        self.lock().iter().cloned().collect()
    }

    /// Runs every queued message, including retries, until the queue is
    /// empty. Returns each dispatch outcome in order.
    pub fn drain_with(&self, dispatcher: &Dispatcher) -> Vec<Dispatch> {
        let mut outcomes = Vec::new();
        while let Some(message) = self.pop() {
            let outcome = dispatcher.dispatch(&message);
            if let Dispatch::Retry { message, .. } = &outcome {
                self.lock().push_back(message.clone());
            }
            outcomes.push(outcome);
        }
        outcomes
    }
}

impl TaskQueue for MemoryQueue {
    fn submit(&self, message: TaskMessage) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        self.lock().push_back(message);
        Ok(())
    }
}
