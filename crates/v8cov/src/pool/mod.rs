//! Bounded worker pool
//!
//! Named OS threads, spawned lazily up to `max_workers` and reused. All
//! submissions go through one FIFO queue; a worker that finishes a task
//! pulls the next queued one itself, or goes idle.
//!
//! ```text
//! run_task ─→ idle worker? ── yes ─→ Run ─→ worker
//!                 │ no
//!                 ├─ live < max ─→ spawn ─→ Run ─→ worker
//!                 └─ else ─→ queue ←── pulled by the next finishing worker
//! ```
//!
//! Worker states: created → busy → idle → busy …, or evicted after a panic.
//! Pool states: open → terminated.

mod executor;

pub use executor::{executor_for, global, Executor, InlineExecutor, PooledExecutor};

use crate::result::{CovError, CovResult};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use tracing::{debug, info, warn};

/// Task handler run on the workers
pub type Handler<T, R> = Arc<dyn Fn(T) -> R + Send + Sync>;

/// Stack of each worker thread, sized for converting deeply nested scripts
pub const WORKER_STACK_SIZE: usize = crate::convert::CONVERT_STACK_SIZE;

/// Half the logical cores, clamped to `[2, 8]`
#[must_use]
pub fn default_max_workers() -> usize {
    (num_cpus::get() / 2).clamp(2, 8)
}

/// A queued or dispatched task
pub struct Job<T, R> {
    task_id: u64,
    task: T,
    reply: Sender<CovResult<R>>,
}

impl<T, R> fmt::Debug for Job<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("task_id", &self.task_id).finish()
    }
}

/// Message sent to a worker
#[derive(Debug)]
pub enum WorkerMessage<T, R> {
    /// Process one task
    Run(Job<T, R>),
    /// Exit the worker loop
    Shutdown,
}

/// Pending result of a submitted task
#[derive(Debug)]
pub struct TaskHandle<R> {
    task_id: u64,
    rx: Receiver<CovResult<R>>,
}

impl<R> TaskHandle<R> {
    fn ready(task_id: u64, result: CovResult<R>) -> Self {
        let (tx, rx) = bounded(1);
        let _ = tx.send(result);
        Self { task_id, rx }
    }

    /// Sequence number of the task
    #[must_use]
    pub fn task_id(&self) -> u64 {
        self.task_id
    }

    /// Block until the task settles.
    ///
    /// A result dropped by `terminate()` surfaces as [`CovError::PoolTerminated`].
    pub fn wait(self) -> CovResult<R> {
        self.rx.recv().unwrap_or(Err(CovError::PoolTerminated))
    }
}

struct WorkerSlot<T, R> {
    sender: Sender<WorkerMessage<T, R>>,
}

struct PoolState<T, R> {
    terminated: bool,
    workers: HashMap<usize, WorkerSlot<T, R>>,
    idle: VecDeque<usize>,
    queue: VecDeque<Job<T, R>>,
    next_worker_id: usize,
    next_task_id: u64,
    spawned_total: usize,
}

struct Shared<T, R> {
    name: String,
    max_workers: usize,
    handler: Handler<T, R>,
    state: Mutex<PoolState<T, R>>,
}

/// Pool of worker threads running one handler
pub struct WorkerPool<T, R> {
    shared: Arc<Shared<T, R>>,
}

impl<T, R> fmt::Debug for WorkerPool<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("WorkerPool")
            .field("name", &self.shared.name)
            .field("max_workers", &self.shared.max_workers)
            .field("live", &state.workers.len())
            .field("idle", &state.idle.len())
            .field("queued", &state.queue.len())
            .field("terminated", &state.terminated)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

impl<T: Send + 'static, R: Send + 'static> WorkerPool<T, R> {
    /// Create a pool; `max_workers == 0` runs every task on the caller's thread
    pub fn new(name: impl Into<String>, max_workers: usize, handler: Handler<T, R>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                max_workers,
                handler,
                state: Mutex::new(PoolState {
                    terminated: false,
                    workers: HashMap::new(),
                    idle: VecDeque::new(),
                    queue: VecDeque::new(),
                    next_worker_id: 0,
                    next_task_id: 0,
                    spawned_total: 0,
                }),
            }),
        }
    }

    /// Worker limit
    #[must_use]
    pub fn max_workers(&self) -> usize {
        self.shared.max_workers
    }

    /// Submit a task.
    ///
    /// Fails with [`CovError::PoolTerminated`] once the pool is terminated.
    pub fn run_task(&self, task: T) -> CovResult<TaskHandle<R>> {
        let mut state = self.shared.lock();
        if state.terminated {
            return Err(CovError::PoolTerminated);
        }
        let task_id = state.next_task_id;
        state.next_task_id += 1;

        if self.shared.max_workers == 0 {
            drop(state);
            let result = panic::catch_unwind(AssertUnwindSafe(|| (self.shared.handler)(task)))
                .map_err(|payload| CovError::WorkerCrashed {
                    worker_id: 0,
                    message: panic_message(payload.as_ref()),
                });
            return Ok(TaskHandle::ready(task_id, result));
        }

        let (reply, rx) = bounded(1);
        let job = Job {
            task_id,
            task,
            reply,
        };
        Shared::dispatch(&self.shared, &mut state, job);
        Ok(TaskHandle { task_id, rx })
    }

    /// Stop every worker and reject queued tasks; later submissions fail
    pub fn terminate(&self) {
        let mut state = self.shared.lock();
        if state.terminated {
            return;
        }
        state.terminated = true;
        for (_, worker) in state.workers.drain() {
            let _ = worker.sender.send(WorkerMessage::Shutdown);
        }
        state.idle.clear();
        let rejected = state.queue.len();
        for job in state.queue.drain(..) {
            let _ = job.reply.send(Err(CovError::PoolTerminated));
        }
        info!(pool = %self.shared.name, rejected, "worker pool terminated");
    }

    /// Live workers (busy and idle)
    #[must_use]
    pub fn live_workers(&self) -> usize {
        self.shared.lock().workers.len()
    }

    /// Idle workers
    #[must_use]
    pub fn idle_workers(&self) -> usize {
        self.shared.lock().idle.len()
    }

    /// Tasks waiting for a worker
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Workers created over the pool's lifetime
    #[must_use]
    pub fn spawned_total(&self) -> usize {
        self.shared.lock().spawned_total
    }

    /// Check whether the pool was terminated
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.shared.lock().terminated
    }
}

impl<T, R> Drop for WorkerPool<T, R> {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.terminated = true;
        for (_, worker) in state.workers.drain() {
            let _ = worker.sender.send(WorkerMessage::Shutdown);
        }
        state.idle.clear();
        state.queue.clear();
    }
}

impl<T, R> Shared<T, R> {
    fn lock(&self) -> MutexGuard<'_, PoolState<T, R>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Send + 'static, R: Send + 'static> Shared<T, R> {
    /// Hand `job` to an idle worker, a new worker, or the queue
    fn dispatch(shared: &Arc<Self>, state: &mut PoolState<T, R>, job: Job<T, R>) {
        while let Some(id) = state.idle.pop_front() {
            let Some(worker) = state.workers.get(&id) else {
                continue;
            };
            match worker.sender.send(WorkerMessage::Run(job)) {
                Ok(()) => return,
                Err(err) => {
                    state.workers.remove(&id);
                    let WorkerMessage::Run(recovered) = err.into_inner() else {
                        return;
                    };
                    return Self::dispatch(shared, state, recovered);
                }
            }
        }

        if state.workers.len() < shared.max_workers {
            Self::spawn(shared, state, job);
        } else {
            state.queue.push_back(job);
        }
    }

    fn spawn(shared: &Arc<Self>, state: &mut PoolState<T, R>, job: Job<T, R>) {
        let id = state.next_worker_id;
        state.next_worker_id += 1;
        let (sender, rx) = unbounded();

        let worker_shared = Arc::clone(shared);
        let spawned = thread::Builder::new()
            .name(format!("{}-{id}", shared.name))
            .stack_size(WORKER_STACK_SIZE)
            .spawn(move || worker_loop(&worker_shared, id, &rx));
        if let Err(e) = spawned {
            warn!(pool = %shared.name, error = %e, "failed to spawn worker");
            let _ = job.reply.send(Err(CovError::WorkerSpawn {
                message: e.to_string(),
            }));
            return;
        }

        let _ = sender.send(WorkerMessage::Run(job));
        state.workers.insert(id, WorkerSlot { sender });
        state.spawned_total += 1;
        debug!(pool = %shared.name, worker_id = id, "spawned worker");
    }

    /// Record a finished task; returns the next queued job for this worker
    fn complete(
        &self,
        worker_id: usize,
        reply: Sender<CovResult<R>>,
        result: R,
    ) -> Option<Job<T, R>> {
        let mut state = self.lock();
        if state.terminated {
            return None;
        }
        let _ = reply.send(Ok(result));
        if let Some(next) = state.queue.pop_front() {
            return Some(next);
        }
        state.idle.push_back(worker_id);
        None
    }

    /// Remove a crashed worker and keep the queue moving
    fn evict(shared: &Arc<Self>, worker_id: usize) {
        let mut state = shared.lock();
        state.workers.remove(&worker_id);
        state.idle.retain(|&id| id != worker_id);
        if state.terminated {
            return;
        }
        if let Some(next) = state.queue.pop_front() {
            Self::dispatch(shared, &mut state, next);
        }
    }
}

fn worker_loop<T: Send + 'static, R: Send + 'static>(
    shared: &Arc<Shared<T, R>>,
    worker_id: usize,
    rx: &Receiver<WorkerMessage<T, R>>,
) {
    while let Ok(message) = rx.recv() {
        let WorkerMessage::Run(mut job) = message else {
            break;
        };
        loop {
            let Job { task_id, task, reply } = job;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (shared.handler)(task)));
            match outcome {
                Ok(result) => match shared.complete(worker_id, reply, result) {
                    Some(next) => job = next,
                    None => break,
                },
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!(pool = %shared.name, worker_id, task_id, %message, "worker crashed; evicting");
                    let _ = reply.send(Err(CovError::WorkerCrashed { worker_id, message }));
                    Shared::evict(shared, worker_id);
                    return;
                }
            }
        }
    }
    debug!(pool = %shared.name, worker_id, "worker exited");
}

#[cfg(test)]
mod tests;
