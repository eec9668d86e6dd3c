//! Where load work runs: inline, on the next poll, or on rayon's pool.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// A unit of load work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Hook deciding where load tasks execute.
pub trait TaskScheduler: Send {
    fn spawn(&mut self, task: Task);

    /// Run work that was held back for the owning thread. Returns how many
    /// tasks ran.
    fn run_pending(&mut self) -> usize {
        0
    }

    /// Tasks accepted but not yet started by this scheduler.
    fn queued(&self) -> usize {
        0
    }
}

/// Runs each task inline, inside `spawn`.
#[derive(Debug, Default)]
pub struct ImmediateScheduler;

impl TaskScheduler for ImmediateScheduler {
    fn spawn(&mut self, task: Task) {
        task();
    }
}

/// Holds tasks until the owner calls `run_pending`, typically on the next tick.
#[derive(Default)]
pub struct DeferredScheduler {
    tasks: VecDeque<Task>,
}

impl DeferredScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskScheduler for DeferredScheduler {
    fn spawn(&mut self, task: Task) {
        self.tasks.push_back(task);
    }

    fn run_pending(&mut self) -> usize {
        // Tasks spawned while draining wait for the next call.
        let batch = std::mem::take(&mut self.tasks);
        let ran = batch.len();
        for task in batch {
            task();
        }
        ran
    }

    fn queued(&self) -> usize {
        self.tasks.len()
    }
}

/// Fire-and-forget on rayon's global pool.
#[derive(Debug, Default)]
pub struct ThreadPoolScheduler;

impl TaskScheduler for ThreadPoolScheduler {
    fn spawn(&mut self, task: Task) {
        rayon::spawn(task);
    }
}

/// Configuration-level choice of task scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadExecution {
    Immediate,
    Deferred,
    #[default]
    ThreadPool,
}

impl LoadExecution {
    pub fn scheduler(self) -> Box<dyn TaskScheduler> {
        match self {
            Self::Immediate => Box::new(ImmediateScheduler),
            Self::Deferred => Box::new(DeferredScheduler::new()),
            Self::ThreadPool => Box::new(ThreadPoolScheduler),
        }
    }
}
