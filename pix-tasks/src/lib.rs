//! # pix-tasks: bounded background work
//!
//! A small worker pool for side effects that must not hold up a request
//! (cache warming, thumbnail generation). Work is queued on a bounded
//! channel and executed by a fixed set of workers, each task under a timeout
//! and the pool's cancellation token.
//!
//! ```rust,no_run
//! use pix_tasks::{ShutdownMode, TaskPool, TaskPoolConfig};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let pool = TaskPool::new(TaskPoolConfig::from_env());
//! pool.submit("warm-cache", async { Ok::<(), String>(()) }).ok();
//! pool.shutdown(ShutdownMode::Drain).await;
//! # }
//! ```

mod config;
mod error;
mod pool;

pub use config::TaskPoolConfig;
pub use error::{TaskError, TaskResult};
pub use pool::{ShutdownMode, TaskPool, TaskStats};
