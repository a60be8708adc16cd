use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info};

/// How long a worker sleeps after a tick that found nothing to do.
pub const IDLE_BACKOFF: Duration = Duration::from_millis(10);

type Tick = dyn Fn() -> bool + Send + Sync;

/// A fixed set of OS threads that keep calling a tick function until stopped.
///
/// The tick returns `true` when it did some work and `false` when it was idle, in which
/// case the worker backs off for [`IDLE_BACKOFF`] before ticking again.
///
/// Dropping the pool stops and joins every worker, so anything the tick borrows through
/// its captured state must outlive the pool. Owners declare the pool before the client
/// handle it polls so that it is dropped first.
pub struct WorkerPool {
    name: String,
    worker_count: usize,
    tick: Arc<Tick>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new<F>(name: impl Into<String>, worker_count: usize, tick: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            worker_count,
            tick: Arc::new(tick),
            workers: Mutex::new(Vec::with_capacity(worker_count)),
            started: AtomicBool::new(false),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawn the workers. Only the first call does anything.
    pub fn start(&self) -> io::Result<()> {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(pool = %self.name, "worker pool already started");
            return Ok(());
        }

        info!(pool = %self.name, workers = self.worker_count, "starting worker pool");

        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        for id in 0..self.worker_count {
            let tick = self.tick.clone();
            let stopped = self.stopped.clone();
            let pool = self.name.clone();

            let handle = thread::Builder::new()
                .name(format!("{}-{}", self.name, id))
                .spawn(move || event_loop(&pool, id, tick.as_ref(), &stopped))
                .map_err(|e| {
                    error!(pool = %self.name, worker = id, "failed to spawn worker: {}", e);
                    e
                })?;

            workers.push(handle);
        }

        Ok(())
    }

    /// Ask every worker to exit after its current tick. Does not block.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// Block until every worker has exited.
    ///
    /// A worker calling this on its own pool skips joining itself; it exits once it returns
    /// to the top of its loop.
    pub fn wait_for_stop(&self) {
        let workers: Vec<JoinHandle<()>> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        let current = thread::current().id();
        for handle in workers {
            if handle.thread().id() == current {
                continue;
            }
            let worker = handle.thread().name().unwrap_or("unnamed").to_owned();
            if handle.join().is_err() {
                error!(pool = %self.name, worker = %worker, "worker panicked");
            }
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Number of worker threads spawned and not yet joined.
    pub fn spawned_workers(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
        self.wait_for_stop();
    }
}

fn event_loop(pool: &str, id: usize, tick: &Tick, stopped: &AtomicBool) {
    debug!(pool, worker = id, "worker started");

    while !stopped.load(Ordering::Acquire) {
        if !tick() {
            thread::sleep(IDLE_BACKOFF);
        }
    }

    debug!(pool, worker = id, "worker exited");
}
