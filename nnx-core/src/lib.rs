//! nnx-core: the runtime that makes a primitive graph go.
//!
//! Owns the pieces SPEC_FULL.md calls C1-C10 and C13-C16: the type and
//! implementation registries, shape/format addressing, memory buffers,
//! primitive graph nodes, the task scheduler and worker pool, async
//! execution, the `.nnd` loader, the error taxonomy and configuration.
//! Reference/optimized kernel bodies (C11/C12) live in `nnx-kernels`, which
//! depends on this crate for the `KernelFactory` seam (`registry::KernelFactory`).

pub mod config;
pub mod error;
pub mod exec;
pub mod file;
pub mod format;
pub mod memory;
pub mod pool;
pub mod primitive;
pub mod registry;
pub mod shape;
pub mod task;
pub mod types;
pub mod worker;

pub use config::Config;
pub use error::{Error, Result};
pub use exec::{execute, AsyncResult, Executable};
pub use format::{AxisFamily, Format, Layout};
pub use memory::{MemoryBuffer, SharedBuffer};
pub use pool::WorkerPool;
pub use primitive::{Argument, Padding, Primitive, PrimitiveAt, PrimitiveKind, PoolingMode};
pub use registry::{DispatchKey, Engine, EngineKind, KernelFactory, Registry};
pub use shape::Shape;
pub use task::{Schedule, Task, TaskGroup};
pub use types::ElementType;
pub use worker::{Worker, WorkerCpu, WorkerGpu};

/// Installs a `tracing-subscriber` `EnvFilter` subscriber driven by
/// `config.log_level` (§4.15, §6). Opt-in: a library embedding this crate
/// is expected to install its own subscriber instead of calling this.
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
