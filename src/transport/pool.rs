//! # Elastic Worker Pool
//!
//! Worker threads between `min_workers` and `max_workers`, all blocked on one
//! shared [`Notification`]. Each signal consumed runs the job once.
//!
//! - A worker that wakes while the backlog exceeds `backlog_threshold`
//!   spawns one more worker, up to the maximum.
//! - A worker that times out `max_idle_attempts` times in a row retires,
//!   unless that would leave fewer than `min_workers` running.
//! - Stop is cooperative: [`WorkerPool::graceful_stop`] raises a flag and
//!   waits a bounded time for every worker to finish its current job.
//!   [`WorkerPool::unpolite_stop`] then detaches whatever is still running.

use super::lock;
use super::notify::Notification;
use crate::config::PoolConfig;
use crate::error::{ProtocolError, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Work run by a worker for every consumed signal
pub type Job = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Default)]
struct PoolState {
    running: usize,
    stopping: bool,
    next_id: usize,
    handles: Vec<JoinHandle<()>>,
}

struct PoolInner {
    name: String,
    config: PoolConfig,
    notify: Arc<Notification>,
    job: Job,
    state: Mutex<PoolState>,
    exited: Condvar,
    abort: AtomicBool,
}

impl PoolInner {
    fn should_stop(&self) -> bool {
        self.abort.load(Ordering::Acquire) || lock(&self.state).stopping
    }

    /// Spawn one worker; the caller holds the state lock
    fn spawn_worker(self: &Arc<Self>, state: &mut PoolState) -> std::io::Result<()> {
        let id = state.next_id;
        let inner = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("{}-worker-{}", self.name, id))
            .spawn(move || worker_loop(inner))?;

        state.next_id += 1;
        state.running += 1;
        state.handles.push(handle);
        debug!(pool = %self.name, worker = id, running = state.running, "Worker started");
        Ok(())
    }

    fn maybe_grow(self: &Arc<Self>) {
        if self.notify.backlog() <= self.config.backlog_threshold {
            return;
        }
        let mut state = lock(&self.state);
        if state.stopping || state.running >= self.config.max_workers {
            return;
        }
        if let Err(e) = self.spawn_worker(&mut state) {
            warn!(pool = %self.name, error = %e, "Failed to grow worker pool");
        }
    }

    /// Claim an exit slot if the pool stays at or above its minimum
    fn try_retire(&self) -> bool {
        let mut state = lock(&self.state);
        if state.running > self.config.min_workers {
            state.running -= 1;
            self.exited.notify_all();
            true
        } else {
            false
        }
    }
}

/// Decrements the running count when a worker leaves for any reason
struct ExitGuard {
    inner: Arc<PoolInner>,
    counted: bool,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if self.counted {
            let mut state = lock(&self.inner.state);
            state.running = state.running.saturating_sub(1);
            self.inner.exited.notify_all();
        }
    }
}

fn worker_loop(inner: Arc<PoolInner>) {
    let mut guard = ExitGuard {
        inner: Arc::clone(&inner),
        counted: true,
    };
    let mut idle = 0u32;

    while !inner.should_stop() {
        if inner.notify.wait_timeout(inner.config.wait_timeout) {
            idle = 0;
            inner.maybe_grow();
            if inner.abort.load(Ordering::Acquire) {
                break;
            }
            if panic::catch_unwind(AssertUnwindSafe(|| (inner.job)())).is_err() {
                error!(pool = %inner.name, "Worker job panicked");
            }
        } else {
            idle += 1;
            if idle >= inner.config.max_idle_attempts {
                if inner.try_retire() {
                    guard.counted = false;
                    debug!(pool = %inner.name, "Idle worker retired");
                    break;
                }
                idle = 0;
            }
        }
    }
}

/// Self-scaling set of worker threads
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Start `min_workers` workers running `job` for every signal on `notify`.
    ///
    /// # Errors
    /// `ConfigError` for inconsistent bounds, `ThreadStartFailure` if a
    /// worker cannot be spawned (already started workers are stopped).
    pub fn start(
        name: impl Into<String>,
        config: PoolConfig,
        notify: Arc<Notification>,
        job: Job,
    ) -> Result<Self> {
        let problems = config.validate();
        if !problems.is_empty() {
            return Err(ProtocolError::ConfigError(problems.join("; ")));
        }

        let pool = Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                config,
                notify,
                job,
                state: Mutex::new(PoolState::default()),
                exited: Condvar::new(),
                abort: AtomicBool::new(false),
            }),
        };

        let started = {
            let mut state = lock(&pool.inner.state);
            (0..pool.inner.config.min_workers).try_for_each(|_| pool.inner.spawn_worker(&mut state))
        };

        if let Err(e) = started {
            error!(pool = %pool.inner.name, error = %e, "Failed to start worker pool");
            pool.shutdown();
            return Err(ProtocolError::ThreadStartFailure(e));
        }

        info!(
            pool = %pool.inner.name,
            min = pool.inner.config.min_workers,
            max = pool.inner.config.max_workers,
            "Worker pool started"
        );
        Ok(pool)
    }

    /// Workers currently running
    pub fn worker_count(&self) -> usize {
        lock(&self.inner.state).running
    }

    pub fn is_stopping(&self) -> bool {
        self.inner.should_stop()
    }

    /// Ask every worker to exit after its current job and wait up to `wait`.
    ///
    /// Returns `true` if all workers exited in time.
    pub fn graceful_stop(&self, wait: Duration) -> bool {
        lock(&self.inner.state).stopping = true;
        self.inner.notify.close();

        let state = lock(&self.inner.state);
        let (state, _) = self
            .inner
            .exited
            .wait_timeout_while(state, wait, |s| s.running > 0)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let finished = state.running == 0;
        drop(state);

        self.cleanup();
        finished
    }

    /// Detach every worker still running and tell it to abort at its next
    /// loop boundary. Returns the number of threads abandoned.
    ///
    /// Threads cannot be cancelled: an abandoned worker blocked inside a job
    /// keeps running until that job returns.
    pub fn unpolite_stop(&self) -> usize {
        self.inner.abort.store(true, Ordering::Release);
        let handles = {
            let mut state = lock(&self.inner.state);
            state.stopping = true;
            std::mem::take(&mut state.handles)
        };
        self.inner.notify.close();

        let mut abandoned = 0;
        for handle in handles {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                abandoned += 1;
            }
        }
        if abandoned > 0 {
            warn!(pool = %self.inner.name, abandoned, "Abandoned workers on forced stop");
        }
        abandoned
    }

    /// Graceful stop bounded by `shutdown_timeout`, then forced
    pub fn shutdown(&self) -> bool {
        if self.graceful_stop(self.inner.config.shutdown_timeout) {
            info!(pool = %self.inner.name, "Worker pool stopped");
            true
        } else {
            self.unpolite_stop();
            false
        }
    }

    /// Join workers that have already exited. Returns how many were reaped.
    pub fn cleanup(&self) -> usize {
        let finished: Vec<JoinHandle<()>> = {
            let mut state = lock(&self.inner.state);
            let (finished, alive) = std::mem::take(&mut state.handles)
                .into_iter()
                .partition(|h| h.is_finished());
            state.handles = alive;
            finished
        };
        let reaped = finished.len();
        for handle in finished {
            let _ = handle.join();
        }
        reaped
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.inner.name)
            .field("workers", &self.worker_count())
            .finish()
    }
}
