//! nnx-kernels: reference and optimized compute kernels (SPEC_FULL.md C11/C12).
//!
//! `nnx-core` owns the graph, dispatch registry and worker pool; this crate
//! only supplies [`nnx_core::registry::KernelFactory`] implementations and
//! [`register::register_default_kernels`], the one call site that wires them
//! into a set of per-kind registries.

mod tensor;

#[cfg(feature = "optimized")]
pub mod optimized;
pub mod reference;
pub mod register;

pub use register::{register_default_kernels, Registries};
