//! C9: worker façade.
//!
//! An engine-typed executor. Both kinds conform to a common capability
//! trait (§4.9): `execute(task_group)` and `engine()`. There is no physical
//! GPU backend here (see SPEC_FULL.md Non-goals), so `WorkerGpu` dispatches
//! onto the same pool abstraction as the CPU worker while still reporting
//! `EngineKind::Gpu` for dispatch-key purposes.

use std::sync::Arc;

use crate::pool::WorkerPool;
use crate::registry::{Engine, EngineKind};
use crate::task::TaskGroup;

/// Common capability shared by every worker façade.
pub trait Worker: Send + Sync {
    fn execute(&self, group: TaskGroup);
    fn engine(&self) -> Engine;
}

/// Executes task groups on a borrowed or owned CPU thread pool.
pub struct WorkerCpu {
    pool: Arc<WorkerPool>,
    engine: Engine,
}

impl WorkerCpu {
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        WorkerCpu { pool, engine: Engine::new(EngineKind::Cpu) }
    }

    pub fn lazy(pool: Arc<WorkerPool>) -> Self {
        WorkerCpu { pool, engine: Engine::new(EngineKind::Cpu).lazy() }
    }
}

impl Worker for WorkerCpu {
    fn execute(&self, group: TaskGroup) {
        self.pool.push_job(group);
    }

    fn engine(&self) -> Engine {
        self.engine
    }
}

/// Façade for a GPU-engine device queue. No physical accelerator backend is
/// implemented; task groups run on the wrapped CPU pool so the rest of the
/// graph/dispatch machinery (which only cares about `EngineKind::Gpu` as a
/// dispatch-key component) still has somewhere to execute.
pub struct WorkerGpu {
    pool: Arc<WorkerPool>,
    engine: Engine,
}

impl WorkerGpu {
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        WorkerGpu { pool, engine: Engine::new(EngineKind::Gpu) }
    }

    pub fn lazy(pool: Arc<WorkerPool>) -> Self {
        WorkerGpu { pool, engine: Engine::new(EngineKind::Gpu).lazy() }
    }
}

impl Worker for WorkerGpu {
    fn execute(&self, group: TaskGroup) {
        tracing::debug!("gpu worker: no device queue available, running on host pool");
        self.pool.push_job(group);
    }

    fn engine(&self) -> Engine {
        self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Schedule, Task};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn cpu_worker_reports_cpu_engine() {
        let pool = Arc::new(WorkerPool::new(2));
        let worker = WorkerCpu::new(pool);
        assert_eq!(worker.engine().kind, EngineKind::Cpu);
        assert!(!worker.engine().lazy);
    }

    #[test]
    fn lazy_worker_carries_lazy_bit() {
        let pool = Arc::new(WorkerPool::new(2));
        let worker = WorkerCpu::lazy(pool);
        assert!(worker.engine().lazy);
    }

    #[test]
    fn gpu_worker_executes_on_wrapped_pool() {
        let pool = Arc::new(WorkerPool::new(2));
        let worker = WorkerGpu::new(pool);
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        worker.execute(TaskGroup::new(
            vec![Task::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })],
            Schedule::Single,
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
