//! C8: worker pool.
//!
//! A fixed-size thread pool that executes one [`TaskGroup`] at a time under
//! its chosen [`Schedule`]. Two rendezvous points (wake, end-of-tasks)
//! bracket each submission, and workers claim work by atomically
//! fetch-adding a batch size into a shared cursor rather than being handed
//! individual tasks. `std::sync::Barrier` provides both rendezvous points.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread::JoinHandle;

use parking_lot::RwLock;

use crate::task::{Schedule, TaskGroup};

struct Shared {
    total: AtomicUsize,
    batch_size: AtomicUsize,
    cursor: AtomicUsize,
    /// The in-flight task group. `None` between submissions (§4.8 invariant:
    /// "no worker holds task-vector memory; the pointer is null").
    current: RwLock<Option<TaskGroup>>,
    stop: AtomicBool,
}

/// A fixed pool of worker threads executing task groups to completion.
pub struct WorkerPool {
    num_threads: usize,
    wake: Arc<Barrier>,
    endtasks: Arc<Barrier>,
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

fn batch_size_for(schedule: Schedule, total: usize, num_threads: usize) -> usize {
    match schedule {
        Schedule::Single => total,
        Schedule::Unordered => 1,
        Schedule::Split => (total + num_threads - 1) / num_threads,
    }
}

impl WorkerPool {
    /// Spawns `num_threads` workers, or `num_cpus::get()` if zero.
    pub fn new(num_threads: usize) -> Self {
        let num_threads = if num_threads == 0 { num_cpus::get() } else { num_threads };
        let wake = Arc::new(Barrier::new(num_threads + 1));
        let endtasks = Arc::new(Barrier::new(num_threads + 1));
        let shared = Arc::new(Shared {
            total: AtomicUsize::new(0),
            batch_size: AtomicUsize::new(1),
            cursor: AtomicUsize::new(0),
            current: RwLock::new(None),
            stop: AtomicBool::new(false),
        });

        let threads = (0..num_threads)
            .map(|_| {
                let wake = wake.clone();
                let endtasks = endtasks.clone();
                let shared = shared.clone();
                std::thread::spawn(move || worker_loop(wake, endtasks, shared))
            })
            .collect();

        tracing::info!(num_threads, "worker pool started");
        WorkerPool { num_threads, wake, endtasks, shared, threads }
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Runs `group` to completion, returning only once every task has
    /// executed (§4.8: "a task completes-before `push_job` returns").
    pub fn push_job(&self, group: TaskGroup) {
        if group.is_empty() {
            return;
        }
        let total = group.len();
        let batch_size = batch_size_for(group.schedule, total, self.num_threads);

        self.shared.total.store(total, Ordering::Release);
        self.shared.batch_size.store(batch_size, Ordering::Release);
        self.shared.cursor.store(0, Ordering::Release);
        *self.shared.current.write() = Some(group);

        self.wake.wait();
        self.endtasks.wait();

        *self.shared.current.write() = None;
    }
}

fn worker_loop(wake: Arc<Barrier>, endtasks: Arc<Barrier>, shared: Arc<Shared>) {
    loop {
        wake.wait();

        if shared.stop.load(Ordering::Acquire) {
            return;
        }

        let total = shared.total.load(Ordering::Acquire);
        let batch_size = shared.batch_size.load(Ordering::Acquire);

        loop {
            let start = shared.cursor.fetch_add(batch_size, Ordering::AcqRel);
            if start >= total {
                break;
            }
            let end = (start + batch_size).min(total);
            let guard = shared.current.read();
            let group = guard.as_ref().expect("task group present while cursor < total");
            for task in &group.tasks[start..end] {
                task.execute();
            }
        }

        endtasks.wait();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        self.wake.wait();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        tracing::info!("worker pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;

    #[test]
    fn single_discipline_runs_every_task_once_on_one_worker() {
        let pool = WorkerPool::new(4);
        let counters: Vec<Arc<StdAtomicUsize>> = (0..20).map(|_| Arc::new(StdAtomicUsize::new(0))).collect();
        let tasks = counters
            .iter()
            .map(|c| {
                let c = c.clone();
                Task::new(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        pool.push_job(TaskGroup::new(tasks, Schedule::Single));
        for c in &counters {
            assert_eq!(c.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn unordered_discipline_runs_every_task_exactly_once() {
        let pool = WorkerPool::new(8);
        let counters: Vec<Arc<StdAtomicUsize>> = (0..500).map(|_| Arc::new(StdAtomicUsize::new(0))).collect();
        let tasks = counters
            .iter()
            .map(|c| {
                let c = c.clone();
                Task::new(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        pool.push_job(TaskGroup::new(tasks, Schedule::Unordered));
        for c in &counters {
            assert_eq!(c.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn split_discipline_runs_every_task_exactly_once() {
        let pool = WorkerPool::new(30);
        let counters: Vec<Arc<StdAtomicUsize>> = (0..10_000).map(|_| Arc::new(StdAtomicUsize::new(0))).collect();
        let tasks = counters
            .iter()
            .map(|c| {
                let c = c.clone();
                Task::new(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        pool.push_job(TaskGroup::new(tasks, Schedule::Split));
        for c in &counters {
            assert_eq!(c.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn empty_group_returns_immediately() {
        let pool = WorkerPool::new(2);
        pool.push_job(TaskGroup::new(vec![], Schedule::Unordered));
    }

    #[test]
    fn pool_shuts_down_cleanly_on_drop() {
        let pool = WorkerPool::new(4);
        drop(pool);
    }
}
