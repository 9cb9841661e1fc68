use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};

use crate::error::QueueError;
use crate::queue::dispatch::{Dispatch, Dispatcher};
use crate::queue::task::TaskMessage;
use crate::queue::TaskQueue;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// In-process task queue backed by a fixed set of worker threads.
///
/// Retries are handed to a scheduler thread that re-submits each message
/// once its backoff delay has elapsed.
pub struct WorkerQueue {
    task_sender: Sender<TaskMessage>,
    delay_sender: Sender<Delayed>,
    workers: Vec<JoinHandle<()>>,
    scheduler: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
}

impl WorkerQueue {
    pub fn start(
        dispatcher: Arc<Dispatcher>,
        worker_count: usize,
        capacity: usize,
    ) -> Result<Self, QueueError> {
        if worker_count == 0 {
            return Err(QueueError::SpawnFailed(
                "worker_count must be greater than 0".to_string(),
            ));
        }

        let (task_sender, task_receiver) = bounded::<TaskMessage>(capacity.max(1));
        let (delay_sender, delay_receiver) = unbounded::<Delayed>();
        let shutdown = Arc::new(AtomicBool::new(false));
        let pending = Arc::new(AtomicUsize::new(0));
        let seq = Arc::new(AtomicU64::new(0));

        let scheduler = {
            let task_tx = task_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let pending = Arc::clone(&pending);
            thread::Builder::new()
                .name("docflow-scheduler".to_string())
                .spawn(move || run_scheduler(delay_receiver, task_tx, shutdown_flag, pending))
                .map_err(|e| QueueError::SpawnFailed(e.to_string()))?
        };

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let ctx = WorkerContext {
                worker_id,
                tasks: task_receiver.clone(),
                delayed: delay_sender.clone(),
                shutdown: Arc::clone(&shutdown),
                pending: Arc::clone(&pending),
                seq: Arc::clone(&seq),
                dispatcher: Arc::clone(&dispatcher),
            };

            let handle = thread::Builder::new()
                .name(format!("docflow-worker-{}", worker_id))
                .spawn(move || run_worker(ctx))
                .map_err(|e| QueueError::SpawnFailed(e.to_string()))?;
            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            task_sender,
            delay_sender,
            workers,
            scheduler: Some(scheduler),
            shutdown,
            pending,
        })
    }

    /// Messages submitted or scheduled for retry that have not reached a
    /// final outcome yet.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Blocks until every submitted message has finished or `timeout`
    /// elapses. Returns whether the queue drained.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.pending() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        true
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker queue...");
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn wait(mut self) {
        self.shutdown();
        drop(self.task_sender);
        drop(self.delay_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        if let Some(scheduler) = self.scheduler.take() {
            if scheduler.join().is_err() {
                error!("Retry scheduler panicked");
            }
        }

        info!("All workers have stopped");
    }
}

impl TaskQueue for WorkerQueue {
    fn submit(&self, message: TaskMessage) -> Result<(), QueueError> {
        if self.is_shutdown() {
            return Err(QueueError::Closed);
        }

        self.pending.fetch_add(1, Ordering::SeqCst);
        self.task_sender.send(message).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            QueueError::Closed
        })
    }
}

struct WorkerContext {
    worker_id: usize,
    tasks: Receiver<TaskMessage>,
    delayed: Sender<Delayed>,
    shutdown: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
    seq: Arc<AtomicU64>,
    dispatcher: Arc<Dispatcher>,
}

fn run_worker(ctx: WorkerContext) {
    debug!("Worker {} started", ctx.worker_id);

    loop {
        if ctx.shutdown.load(Ordering::SeqCst) {
            debug!("Worker {} received shutdown signal", ctx.worker_id);
            break;
        }

        match ctx.tasks.recv_timeout(POLL_INTERVAL) {
            Ok(message) => {
                debug!(
                    "Worker {} running task {} ({}), attempt {}",
                    ctx.worker_id, message.id, message.name, message.attempt
                );

                match ctx.dispatcher.dispatch(&message) {
                    Dispatch::Retry { message, delay } => {
                        let delayed = Delayed {
                            due: Instant::now() + delay,
                            seq: ctx.seq.fetch_add(1, Ordering::SeqCst),
                            message,
                        };
                        if ctx.delayed.send(delayed).is_err() {
                            warn!("Worker {} could not schedule retry, scheduler is gone", ctx.worker_id);
                            ctx.pending.fetch_sub(1, Ordering::SeqCst);
                        }
                    }
                    Dispatch::Rejected(e) => {
                        error!("Worker {} rejected task {}: {}", ctx.worker_id, message.id, e);
                        ctx.pending.fetch_sub(1, Ordering::SeqCst);
                    }
                    Dispatch::Completed(_) | Dispatch::Failed(_) => {
                        ctx.pending.fetch_sub(1, Ordering::SeqCst);
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} task channel disconnected", ctx.worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", ctx.worker_id);
}

fn run_scheduler(
    incoming: Receiver<Delayed>,
    tasks: Sender<TaskMessage>,
    shutdown: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
) {
    let mut heap: BinaryHeap<Delayed> = BinaryHeap::new();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let now = Instant::now();
        while heap.peek().is_some_and(|d| d.due <= now) {
            if let Some(due) = heap.pop() {
                if tasks.send(due.message).is_err() {
                    pending.fetch_sub(1, Ordering::SeqCst);
                }
            }
        }

        let wait = heap
            .peek()
            .map(|d| d.due.saturating_duration_since(now).min(POLL_INTERVAL))
            .unwrap_or(POLL_INTERVAL);

        match incoming.recv_timeout(wait) {
            Ok(delayed) => heap.push(delayed),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if !heap.is_empty() {
        warn!("Dropping {} scheduled retries at shutdown", heap.len());
    }
}

/// A retry waiting for its backoff to elapse. Ordered so that the
/// `BinaryHeap` pops the earliest due message first.
struct Delayed {
    due: Instant,
    seq: u64,
    message: TaskMessage,
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Delayed {}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecutionError;
    use crate::model::Payload;
    use crate::queue::{RetryPolicy, TaskContext, TaskExecutor, TaskResponse};
    use serde_json::Value;
    use std::sync::Mutex;

    /// Fails the first `failures` attempts of every task, then succeeds.
    struct Flaky {
        failures: u32,
        attempts: Mutex<Vec<(String, u32)>>,
    }

    impl TaskExecutor for Flaky {
        fn name(&self) -> &'static str {
            "test.flaky"
        }

        fn execute(&self, ctx: &TaskContext, _args: &[Value]) -> Result<TaskResponse, ExecutionError> {
            self.attempts
                .lock()
                .unwrap()
                .push((ctx.task_id.clone(), ctx.attempt));
            if ctx.attempt < self.failures {
                return Err(ExecutionError::Cancelled);
            }
            Ok(TaskResponse::success(ctx, Payload::new(), "ok"))
        }

        fn fail(&self, ctx: &TaskContext, _args: &[Value], e: &ExecutionError) -> TaskResponse {
            TaskResponse::error(ctx, Payload::new(), e.to_string())
        }
    }

    fn start(failures: u32) -> (Arc<Flaky>, WorkerQueue) {
        let executor = Arc::new(Flaky {
            failures,
            attempts: Mutex::new(Vec::new()),
        });
        let mut dispatcher = Dispatcher::new(RetryPolicy {
            max_retries: 3,
            backoff_unit: Duration::from_millis(1),
            soft_time_limit: None,
            hard_time_limit: Some(Duration::from_secs(5)),
        });
        dispatcher.register(executor.clone());
        let queue = WorkerQueue::start(Arc::new(dispatcher), 2, 8).unwrap();
        (executor, queue)
    }

    #[test]
    fn test_worker_queue_lifecycle() {
        let (_, queue) = start(0);
        assert!(!queue.is_shutdown());
        queue.shutdown();
        assert!(queue.is_shutdown());
        assert!(matches!(
            queue.submit(TaskMessage::new("t", "test.flaky", vec![])),
            Err(QueueError::Closed)
        ));
        queue.wait();
    }

    #[test]
    fn test_zero_workers_rejected() {
        let dispatcher = Arc::new(Dispatcher::new(RetryPolicy::default()));
        assert!(WorkerQueue::start(dispatcher, 0, 8).is_err());
    }

    #[test]
    fn test_retries_are_redelivered_after_backoff() {
        let (executor, queue) = start(2);
        queue
            .submit(TaskMessage::new("t1", "test.flaky", vec![]))
            .unwrap();
        queue
            .submit(TaskMessage::new("t2", "test.flaky", vec![]))
            .unwrap();

        assert!(queue.wait_idle(Duration::from_secs(10)));
        queue.wait();

        let attempts = executor.attempts.lock().unwrap();
        for id in ["t1", "t2"] {
            let mut seen: Vec<u32> = attempts
                .iter()
                .filter(|(t, _)| t == id)
                .map(|(_, a)| *a)
                .collect();
            seen.sort();
            assert_eq!(seen, vec![0, 1, 2]);
        }
    }

    #[test]
    fn test_delayed_orders_earliest_first() {
        let now = Instant::now();
        let mut heap = BinaryHeap::new();
        for (offset, seq) in [(30, 0), (10, 1), (20, 2), (10, 3)] {
            heap.push(Delayed {
                due: now + Duration::from_millis(offset),
                seq,
                message: TaskMessage::new(seq.to_string(), "x", vec![]),
            });
        }
        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|d| d.seq)).collect();
        assert_eq!(order, vec![1, 3, 2, 0]);
    }
}
