use std::time::Duration;

/// Task pool sizing
#[derive(Debug, Clone)]
pub struct TaskPoolConfig {
    /// Number of worker tasks
    pub workers: usize,

    /// Bound of the submission queue; submissions beyond it are dropped
    pub queue_capacity: usize,

    /// Upper bound on a single task's run time
    pub task_timeout: Duration,
}

impl Default for TaskPoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
            task_timeout: Duration::from_secs(60),
        }
    }
}

impl TaskPoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Defaults overridden by `PIXRS_TASK_WORKERS` / `PIXRS_TASK_QUEUE`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(workers) = env_usize("PIXRS_TASK_WORKERS") {
            config = config.with_workers(workers);
        }
        if let Some(capacity) = env_usize("PIXRS_TASK_QUEUE") {
            config = config.with_queue_capacity(capacity);
        }
        config
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
