//! Fixed-size worker pool draining a [`Handoff`].
//!
//! Workers are long-lived named threads that loop
//! `next() → run() → release()` until the handoff is shut down and its
//! queue is empty. The pool size is fixed at spawn time.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::ConfigError;
use crate::handoff::Handoff;

/// Work a pool thread can execute on a claimed payload.
pub(crate) trait Task: Send + 'static {
    fn run(&mut self);
}

pub(crate) struct WorkerPool<T: Task> {
    handoff: Arc<Handoff<T>>,
    handles: Vec<JoinHandle<()>>,
}

impl<T: Task> WorkerPool<T> {
    /// Spawn `count` workers. If any spawn fails, the workers already
    /// started are shut down and joined before the error is returned.
    pub fn spawn(count: usize, handoff: Arc<Handoff<T>>) -> Result<Self, ConfigError> {
        let mut pool = Self {
            handoff,
            handles: Vec::with_capacity(count),
        };
        for i in 0..count {
            let handoff = Arc::clone(&pool.handoff);
            let spawned = thread::Builder::new()
                .name(format!("herd-worker-{i}"))
                .spawn(move || worker_loop(&handoff, i));
            match spawned {
                Ok(handle) => pool.handles.push(handle),
                Err(e) => {
                    pool.shutdown();
                    return Err(ConfigError::ThreadSpawnFailed {
                        reason: format!("herd-worker-{i}: {e}"),
                    });
                }
            }
        }
        log::debug!("spawned {count} workers");
        Ok(pool)
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Request shutdown and join every worker. Queued and in-flight work
    /// completes first. Returns the number of workers joined cleanly.
    pub fn shutdown(&mut self) -> usize {
        self.handoff.shutdown();
        let mut joined = 0;
        for handle in self.handles.drain(..) {
            let name = handle.thread().name().map(str::to_owned);
            match handle.join() {
                Ok(()) => joined += 1,
                Err(_) => log::warn!("worker {name:?} exited by panic"),
            }
        }
        joined
    }
}

impl<T: Task> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.shutdown();
        }
    }
}

fn worker_loop<T: Task>(handoff: &Handoff<T>, worker: usize) {
    let mut processed: u64 = 0;
    while let Some(mut claim) = handoff.next() {
        claim.payload.run();
        handoff.release(claim);
        processed += 1;
    }
    log::trace!("worker {worker} exiting after {processed} claims");
}
