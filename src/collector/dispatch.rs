//! Delivery of completion callbacks to the caller's execution context.
//!
//! Sampling workers never run caller code themselves. They hand completed
//! callbacks to a [`Dispatcher`]; a [`DispatchQueue`] owned by the calling
//! thread runs them when that thread pumps it, so callbacks never overlap
//! with the owner's other work.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

/// A unit of work posted to a dispatcher.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Somewhere tasks can be posted from any thread.
pub trait Dispatcher: Send + Sync + 'static {
    fn dispatch(&self, task: Task);
}

/// Runs tasks immediately on the posting thread.
///
/// Callbacks then execute on sampler worker threads, concurrently with each
/// other. Suitable for tests and for consumers that synchronize themselves.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, task: Task) {
        task();
    }
}

/// Task queue drained by the thread that owns it.
pub struct DispatchQueue {
    rx: Receiver<Task>,
    tx: Sender<Task>,
}

/// Cloneable posting side of a [`DispatchQueue`].
#[derive(Clone)]
pub struct DispatchHandle {
    tx: Sender<Task>,
}

impl Dispatcher for DispatchHandle {
    fn dispatch(&self, task: Task) {
        // The owner dropped the queue: nobody is left to observe the callback.
        let _ = self.tx.send(task);
    }
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { rx, tx }
    }

    /// Returns a handle workers can post through.
    pub fn handle(&self) -> DispatchHandle {
        DispatchHandle {
            tx: self.tx.clone(),
        }
    }

    /// Runs every task already queued without blocking. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Waits up to `timeout` for a task and runs it together with any others
    /// already queued. Returns how many ran.
    pub fn run_for(&self, timeout: Duration) -> usize {
        match self.rx.recv_timeout(timeout) {
            Ok(task) => {
                task();
                1 + self.run_pending()
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    /// Pumps the queue until `done` returns true or `timeout` elapses.
    /// Returns whether `done` was satisfied.
    pub fn run_until(&self, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while !done() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.run_for(deadline - now);
        }
        true
    }
}
