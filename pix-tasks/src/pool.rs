use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{TaskError, TaskPoolConfig, TaskResult};

/// How [`TaskPool::shutdown`] treats outstanding work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Stop accepting tasks, then run everything already queued
    Drain,
    /// Cancel running tasks and discard queued ones
    Cancel,
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub dropped: u64,
    pub in_flight: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    in_flight: AtomicU64,
}

struct Task {
    name: String,
    fut: BoxFuture<'static, Result<(), String>>,
}

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<Task>>>;

/// Bounded pool for fire-and-forget side effects.
///
/// Submissions never block: when the queue is full the task is dropped,
/// counted and logged. Every task runs under the pool's timeout and
/// cancellation token, so nothing outlives [`TaskPool::shutdown`].
pub struct TaskPool {
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    receiver: SharedReceiver,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    config: TaskPoolConfig,
}

impl TaskPool {
    /// Start the workers. Must be called from within a Tokio runtime.
    pub fn new(config: TaskPoolConfig) -> Self {
        let config = TaskPoolConfig {
            workers: config.workers.max(1),
            queue_capacity: config.queue_capacity.max(1),
            task_timeout: config.task_timeout,
        };

        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let receiver: SharedReceiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let counters = Arc::new(Counters::default());
        let cancel = CancellationToken::new();

        let workers = (0..config.workers)
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    receiver.clone(),
                    counters.clone(),
                    cancel.clone(),
                    config.task_timeout,
                ))
            })
            .collect();

        info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            "Task pool started"
        );

        Self {
            sender: Mutex::new(Some(sender)),
            receiver,
            workers: Mutex::new(workers),
            counters,
            cancel,
            config,
        }
    }

    pub fn config(&self) -> &TaskPoolConfig {
        &self.config
    }

    /// Queue a task without waiting for room
    pub fn submit<F, E>(&self, name: impl Into<String>, fut: F) -> TaskResult<()>
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let name = name.into();
        let sender = match self.sender.lock().as_ref() {
            Some(sender) => sender.clone(),
            None => return Err(TaskError::ShutDown),
        };

        let task = Task {
            name: name.clone(),
            fut: Box::pin(async move { fut.await.map_err(|e| e.to_string()) }),
        };

        self.counters.submitted.fetch_add(1, Ordering::SeqCst);
        match sender.try_send(task) {
            Ok(()) => {
                debug!(task = %name, "Task queued");
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.counters.submitted.fetch_sub(1, Ordering::SeqCst);
                self.counters.dropped.fetch_add(1, Ordering::SeqCst);
                warn!(task = %name, capacity = self.config.queue_capacity, "Task queue full, dropping task");
                Err(TaskError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => {
                self.counters.submitted.fetch_sub(1, Ordering::SeqCst);
                Err(TaskError::ShutDown)
            }
        }
    }

    pub fn stats(&self) -> TaskStats {
        TaskStats {
            submitted: self.counters.submitted.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            dropped: self.counters.dropped.load(Ordering::SeqCst),
            in_flight: self.counters.in_flight.load(Ordering::SeqCst),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Stop the pool and wait for the workers to exit. Calling it again is a no-op.
    pub async fn shutdown(&self, mode: ShutdownMode) {
        let sender = self.sender.lock().take();
        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        if sender.is_none() && workers.is_empty() {
            return;
        }
        drop(sender);

        info!(mode = ?mode, "Task pool shutting down");
        if mode == ShutdownMode::Cancel {
            self.cancel.cancel();
        }

        for worker in workers {
            if let Err(err) = worker.await {
                warn!(error = %err, "Task worker ended abnormally");
            }
        }

        // Anything still queued was never run
        let mut receiver = self.receiver.lock().await;
        while let Ok(task) = receiver.try_recv() {
            self.counters.dropped.fetch_add(1, Ordering::SeqCst);
            debug!(task = %task.name, "Discarding queued task");
        }

        let stats = self.stats();
        info!(
            completed = stats.completed,
            failed = stats.failed,
            dropped = stats.dropped,
            "Task pool stopped"
        );
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum Outcome {
    Completed,
    Failed(TaskError),
    Cancelled,
}

async fn worker_loop(
    worker: usize,
    receiver: SharedReceiver,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    task_timeout: Duration,
) {
    loop {
        let next = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                task = receiver.recv() => task,
            }
        };
        let Some(task) = next else { break };

        counters.in_flight.fetch_add(1, Ordering::SeqCst);
        let run = AssertUnwindSafe(tokio::time::timeout(task_timeout, task.fut)).catch_unwind();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Outcome::Cancelled,
            result = run => match result {
                Ok(Ok(Ok(()))) => Outcome::Completed,
                Ok(Ok(Err(message))) => Outcome::Failed(TaskError::Failed(message)),
                Ok(Err(_elapsed)) => Outcome::Failed(TaskError::TimedOut),
                Err(_panic) => Outcome::Failed(TaskError::failed("task panicked")),
            },
        };
        counters.in_flight.fetch_sub(1, Ordering::SeqCst);

        match outcome {
            Outcome::Completed => {
                counters.completed.fetch_add(1, Ordering::SeqCst);
                debug!(worker, task = %task.name, "Task completed");
            }
            Outcome::Failed(err) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                warn!(worker, task = %task.name, error = %err, "Background task failed");
            }
            Outcome::Cancelled => {
                counters.dropped.fetch_add(1, Ordering::SeqCst);
                debug!(worker, task = %task.name, "Task cancelled");
            }
        }
    }
    debug!(worker, "Task worker stopped");
}
