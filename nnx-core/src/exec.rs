//! C10: asynchronous execution.
//!
//! A primitives sequence and a worker sequence are bound together; dispatch
//! either starts immediately on a background thread (eager engines) or
//! waits for an explicit `wait()` (lazy engines, so a pattern-rewrite pass
//! could run over the assembled list first). `wait()` uses a short
//! spin/yield backoff rather than a bare spin, to avoid pinning a core at
//! 100% in safe portable Rust.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::error::{Error, Result};
use crate::registry::Engine;
use crate::task::TaskGroup;
use crate::worker::Worker;

/// Anything `execute` can submit: a precomputed task group and the index
/// into the `workers` slice that should run it.
pub trait Executable: Send + Sync {
    fn work(&self) -> TaskGroup;
    fn worker_index(&self) -> usize;
}

struct PendingWork {
    primitives: Vec<Arc<dyn Executable>>,
    workers: Vec<Arc<dyn Worker>>,
}

enum Mode {
    Eager {
        #[allow(dead_code)]
        thread: Option<JoinHandle<()>>,
    },
    Lazy {
        pending: Mutex<Option<PendingWork>>,
    },
}

/// Handle returned by [`execute`]. Ends when `tasks_left()` reaches zero.
pub struct AsyncResult {
    remaining: Arc<AtomicUsize>,
    mode: Mode,
}

fn run_submission(primitives: &[Arc<dyn Executable>], workers: &[Arc<dyn Worker>], remaining: &AtomicUsize) {
    for primitive in primitives {
        let idx = primitive.worker_index();
        workers[idx].execute(primitive.work());
        remaining.fetch_sub(1, Ordering::AcqRel);
    }
}

impl AsyncResult {
    /// Blocks until every submitted primitive has executed.
    pub fn wait(&self) {
        match &self.mode {
            Mode::Eager { .. } => {
                let mut spins = 0u32;
                while self.remaining.load(Ordering::Acquire) != 0 {
                    if spins < 100 {
                        std::hint::spin_loop();
                        spins += 1;
                    } else {
                        std::thread::yield_now();
                    }
                }
            }
            Mode::Lazy { pending } => {
                // A pattern-match/rewrite pass over `primitives` would run
                // here, before dispatch, while the assembled list is still
                // available uncommitted.
                if let Some(work) = pending.lock().expect("pending lock poisoned").take() {
                    run_submission(&work.primitives, &work.workers, &self.remaining);
                }
            }
        }
    }

    /// Non-blocking: the current remaining-task count.
    pub fn tasks_left(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }
}

fn lazy_bit_consistent(workers: &[Arc<dyn Worker>]) -> Result<bool> {
    let mut iter = workers.iter().map(|w| w.engine().lazy);
    let first = match iter.next() {
        Some(v) => v,
        None => return Err(Error::invalid_argument("workers", "must supply at least one worker")),
    };
    if iter.all(|lazy| lazy == first) {
        Ok(first)
    } else {
        Err(Error::invalid_argument(
            "workers",
            "either all workers must be lazy or none may be (mixed eager/lazy submission)",
        ))
    }
}

/// Submits `primitives` across `workers`. Eager engines start a background
/// submission thread immediately; lazy engines defer to `wait()` (§4.10).
pub fn execute(primitives: Vec<Arc<dyn Executable>>, workers: Vec<Arc<dyn Worker>>) -> Result<AsyncResult> {
    let lazy = lazy_bit_consistent(&workers)?;
    let remaining = Arc::new(AtomicUsize::new(primitives.len()));

    if lazy {
        tracing::trace!(count = primitives.len(), "async execution: deferred (lazy)");
        Ok(AsyncResult {
            remaining,
            mode: Mode::Lazy { pending: Mutex::new(Some(PendingWork { primitives, workers })) },
        })
    } else {
        tracing::trace!(count = primitives.len(), "async execution: submitted (eager)");
        let remaining_bg = remaining.clone();
        let handle = std::thread::spawn(move || {
            run_submission(&primitives, &workers, &remaining_bg);
        });
        Ok(AsyncResult { remaining, mode: Mode::Eager { thread: Some(handle) } })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::EngineKind;
    use crate::task::{Schedule, Task};
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;

    struct StubWorker {
        engine: Engine,
        ran: Arc<StdAtomicUsize>,
    }

    impl Worker for StubWorker {
        fn execute(&self, group: TaskGroup) {
            for task in &group.tasks {
                task.execute();
            }
            self.ran.fetch_add(1, Ordering::SeqCst);
        }
        fn engine(&self) -> Engine {
            self.engine
        }
    }

    struct StubPrimitive {
        counter: Arc<StdAtomicUsize>,
    }

    impl Executable for StubPrimitive {
        fn work(&self) -> TaskGroup {
            let c = self.counter.clone();
            TaskGroup::new(
                vec![Task::new(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                })],
                Schedule::Single,
            )
        }
        fn worker_index(&self) -> usize {
            0
        }
    }

    #[test]
    fn eager_execution_runs_and_completes() {
        let ran = Arc::new(StdAtomicUsize::new(0));
        let worker: Arc<dyn Worker> = Arc::new(StubWorker { engine: Engine::new(EngineKind::Cpu), ran: ran.clone() });
        let counter = Arc::new(StdAtomicUsize::new(0));
        let primitives: Vec<Arc<dyn Executable>> = vec![Arc::new(StubPrimitive { counter: counter.clone() })];

        let handle = execute(primitives, vec![worker]).unwrap();
        handle.wait();
        assert_eq!(handle.tasks_left(), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn lazy_execution_defers_until_wait() {
        let ran = Arc::new(StdAtomicUsize::new(0));
        let worker: Arc<dyn Worker> =
            Arc::new(StubWorker { engine: Engine::new(EngineKind::Cpu).lazy(), ran: ran.clone() });
        let counter = Arc::new(StdAtomicUsize::new(0));
        let primitives: Vec<Arc<dyn Executable>> = vec![
            Arc::new(StubPrimitive { counter: counter.clone() }),
            Arc::new(StubPrimitive { counter: counter.clone() }),
            Arc::new(StubPrimitive { counter: counter.clone() }),
        ];

        let handle = execute(primitives, vec![worker]).unwrap();
        assert_eq!(handle.tasks_left(), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        handle.wait();
        assert_eq!(handle.tasks_left(), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn mixed_lazy_and_eager_workers_is_an_error() {
        let eager: Arc<dyn Worker> =
            Arc::new(StubWorker { engine: Engine::new(EngineKind::Cpu), ran: Arc::new(StdAtomicUsize::new(0)) });
        let lazy: Arc<dyn Worker> =
            Arc::new(StubWorker { engine: Engine::new(EngineKind::Gpu).lazy(), ran: Arc::new(StdAtomicUsize::new(0)) });
        let result = execute(vec![], vec![eager, lazy]);
        assert!(result.is_err());
    }
}
