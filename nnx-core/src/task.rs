//! C7: task and task group.
//!
//! A task wraps a boxed closure rather than a raw function-pointer-plus-data
//! pair, since Rust has no direct equivalent of a `void*` payload that stays
//! sound across the pool's worker threads.

use std::sync::Arc;

/// A single unit of work. Cloning shares the underlying closure (tasks are
/// handed to worker threads by reference via the pool's task vector).
#[derive(Clone)]
pub struct Task {
    run: Arc<dyn Fn() + Send + Sync>,
}

impl Task {
    pub fn new(f: impl Fn() + Send + Sync + 'static) -> Self {
        Task { run: Arc::new(f) }
    }

    pub fn execute(&self) {
        (self.run)();
    }
}

/// Scheduling discipline for a [`TaskGroup`] (§4.7/§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Run the whole group on one worker thread.
    Single,
    /// Any worker may run any task; tasks may run concurrently.
    Unordered,
    /// Partition into equal contiguous chunks, one per worker, in order.
    Split,
}

/// An ordered sequence of tasks plus how the pool should divide them among
/// workers.
#[derive(Clone)]
pub struct TaskGroup {
    pub tasks: Vec<Task>,
    pub schedule: Schedule,
}

impl TaskGroup {
    pub fn new(tasks: Vec<Task>, schedule: Schedule) -> Self {
        TaskGroup { tasks, schedule }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
