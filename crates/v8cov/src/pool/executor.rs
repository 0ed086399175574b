//! Conversion executors.

use super::{Handler, WorkerPool};
use crate::convert::{convert, convert_in_place, ConvertOutput, ConvertTask};
use crate::result::CovResult;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Runs conversion tasks
pub trait Executor: Send + Sync + fmt::Debug {
    /// Run every task; results are in submission order
    fn execute_all(&self, tasks: Vec<ConvertTask>) -> Vec<CovResult<ConvertOutput>>;

    /// Worker limit (`0` for in-process execution)
    fn max_workers(&self) -> usize;

    /// Release workers; later calls fail with [`crate::result::CovError::PoolTerminated`]
    fn shutdown(&self);
}

/// Converts on the caller's thread, one sized conversion thread per task
#[derive(Debug)]
pub struct InlineExecutor {
    pool: WorkerPool<ConvertTask, ConvertOutput>,
}

impl InlineExecutor {
    /// Create an open executor
    #[must_use]
    pub fn new() -> Self {
        let handler: Handler<ConvertTask, ConvertOutput> =
            Arc::new(|task: ConvertTask| convert(&task));
        Self {
            pool: WorkerPool::new("v8cov-inline", 0, handler),
        }
    }

    /// Check whether [`Executor::shutdown`] was called
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.pool.is_terminated()
    }
}

impl Default for InlineExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for InlineExecutor {
    fn execute_all(&self, tasks: Vec<ConvertTask>) -> Vec<CovResult<ConvertOutput>> {
        tasks
            .into_iter()
            .map(|task| self.pool.run_task(task).and_then(super::TaskHandle::wait))
            .collect()
    }

    fn max_workers(&self) -> usize {
        0
    }

    fn shutdown(&self) {
        self.pool.terminate();
    }
}

/// Converts on a [`WorkerPool`]
#[derive(Debug)]
pub struct PooledExecutor {
    pool: WorkerPool<ConvertTask, ConvertOutput>,
}

impl PooledExecutor {
    /// Create an executor with up to `max_workers` threads
    #[must_use]
    pub fn new(max_workers: usize) -> Self {
        // workers own a conversion-sized stack; without workers tasks run on the caller
        let handler: Handler<ConvertTask, ConvertOutput> = if max_workers == 0 {
            Arc::new(|task: ConvertTask| convert(&task))
        } else {
            Arc::new(|task: ConvertTask| convert_in_place(&task))
        };
        Self {
            pool: WorkerPool::new("v8cov-worker", max_workers, handler),
        }
    }

    /// Underlying pool
    #[must_use]
    pub fn pool(&self) -> &WorkerPool<ConvertTask, ConvertOutput> {
        &self.pool
    }
}

impl Executor for PooledExecutor {
    fn execute_all(&self, tasks: Vec<ConvertTask>) -> Vec<CovResult<ConvertOutput>> {
        let handles: Vec<_> = tasks.into_iter().map(|task| self.pool.run_task(task)).collect();
        debug!(tasks = handles.len(), queued = self.pool.queued(), "submitted conversion tasks");
        handles
            .into_iter()
            .map(|handle| handle.and_then(super::TaskHandle::wait))
            .collect()
    }

    fn max_workers(&self) -> usize {
        self.pool.max_workers()
    }

    fn shutdown(&self) {
        self.pool.terminate();
    }
}

/// Pick the executor for a worker limit: `0` runs in process
#[must_use]
pub fn executor_for(max_workers: usize) -> Arc<dyn Executor> {
    if max_workers == 0 {
        Arc::new(InlineExecutor::new())
    } else {
        Arc::new(PooledExecutor::new(max_workers))
    }
}

/// Process-wide executor with explicit setup and teardown
pub mod global {
    use super::{executor_for, Executor};
    use std::sync::{Arc, Mutex, PoisonError};

    static EXECUTOR: Mutex<Option<Arc<dyn Executor>>> = Mutex::new(None);

    /// Install a new executor, shutting down the previous one
    pub fn init(max_workers: usize) -> Arc<dyn Executor> {
        let executor = executor_for(max_workers);
        let previous = EXECUTOR
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Arc::clone(&executor));
        if let Some(previous) = previous {
            previous.shutdown();
        }
        executor
    }

    /// Installed executor, if any
    #[must_use]
    pub fn get() -> Option<Arc<dyn Executor>> {
        EXECUTOR.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Shut down and remove the installed executor; returns whether one existed
    pub fn shutdown() -> bool {
        let previous = EXECUTOR.lock().unwrap_or_else(PoisonError::into_inner).take();
        match previous {
            Some(executor) => {
                executor.shutdown();
                true
            }
            None => false,
        }
    }
}
