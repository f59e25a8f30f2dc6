//! Wires the kernels in [`crate::reference`] and [`crate::optimized`] into a
//! set of per-kind [`Registry`] instances (SPEC_FULL.md §4.6, §4.12).
//!
//! One `Registry` per [`PrimitiveKind`], matching `nnx_core::primitive`'s
//! doc comment ("the graph layer keeps one `Registry` per kind so a
//! convolution lookup never sees a pooling factory"): [`Registries`] is the
//! thin map the embedding application builds once and threads through every
//! `Primitive::create` call.

use std::collections::HashMap;
use std::sync::Arc;

use nnx_core::config::Config;
use nnx_core::format::{Format, Layout};
use nnx_core::primitive::PrimitiveKind;
use nnx_core::registry::{DispatchKey, EngineKind, KernelFactory, Registry};
use nnx_core::types::ElementType;

#[cfg(feature = "optimized")]
use crate::optimized;
use crate::reference;

/// Per-kind implementation registries (§4.6).
#[derive(Default)]
pub struct Registries {
    by_kind: HashMap<PrimitiveKind, Registry>,
}

impl Registries {
    pub fn new() -> Self {
        Registries { by_kind: HashMap::new() }
    }

    pub fn get(&self, kind: PrimitiveKind) -> Option<&Registry> {
        self.by_kind.get(&kind)
    }

    fn registry_for(&mut self, kind: PrimitiveKind) -> &Registry {
        self.by_kind.entry(kind).or_insert_with(Registry::new)
    }
}

fn fmt(layout: Layout) -> Format {
    Format::new(layout, ElementType::F32)
}

fn register(registries: &mut Registries, kind: PrimitiveKind, engine: EngineKind, input: Layout, output: Layout, factory: Arc<dyn KernelFactory>, estimated_time_us: u64) {
    let key = DispatchKey::new(engine, fmt(input), fmt(output));
    registries.registry_for(kind).register(key, factory, estimated_time_us);
}

/// Populates `registries` with every kernel this crate ships: the reference
/// implementation under `EngineKind::Reference` for every kind first, then —
/// if `config.prefer_optimized` — the narrower `optimized` variants under
/// `EngineKind::Cpu` for the same formats, so a `Cpu` dispatch key prefers
/// the optimized kernel while `Reference`/`Any` lookups still reach the
/// general one (§4.6 "last registration wins", §4.12).
pub fn register_default_kernels(registries: &mut Registries, config: &Config) {
    use PrimitiveKind::*;

    register(registries, Relu, EngineKind::Reference, Layout::Bfyx, Layout::Bfyx, Arc::new(reference::ReluForward), 100);
    register(registries, ReluBackward, EngineKind::Reference, Layout::Bfyx, Layout::Bfyx, Arc::new(reference::ReluBackward), 100);
    register(registries, Pooling, EngineKind::Reference, Layout::Bfyx, Layout::Bfyx, Arc::new(reference::PoolingForward), 100);
    register(registries, Response, EngineKind::Reference, Layout::Bfyx, Layout::Bfyx, Arc::new(reference::ResponseForward), 100);
    register(registries, Softmax, EngineKind::Reference, Layout::Bx, Layout::Bx, Arc::new(reference::SoftmaxForward), 100);
    register(registries, Convolution, EngineKind::Reference, Layout::Bfyx, Layout::Bfyx, Arc::new(reference::ConvolutionForward::new()), 100);
    register(registries, ConvolutionRelu, EngineKind::Reference, Layout::Bfyx, Layout::Bfyx, Arc::new(reference::ConvolutionForward::with_relu()), 100);
    register(registries, ConvolutionBackward, EngineKind::Reference, Layout::Bfyx, Layout::Bfyx, Arc::new(reference::ConvolutionBackward), 100);
    register(registries, BatchTrainingForward, EngineKind::Reference, Layout::Bfyx, Layout::Bfyx, Arc::new(reference::BatchTrainingForward), 100);
    register(registries, BatchTrainingBackward, EngineKind::Reference, Layout::Bfyx, Layout::Bfyx, Arc::new(reference::BatchTrainingBackward), 100);
    register(registries, BatchInference, EngineKind::Reference, Layout::Bfyx, Layout::Bfyx, Arc::new(reference::BatchInference), 100);
    register(registries, Reorder, EngineKind::Reference, Layout::Bfyx, Layout::Bfyx, Arc::new(reference::ReorderForward), 100);
    register(registries, DepthConcatenate, EngineKind::Reference, Layout::Bfyx, Layout::Bfyx, Arc::new(reference::DepthConcatenateForward), 100);
    register(registries, FullyConnected, EngineKind::Reference, Layout::Bx, Layout::Bx, Arc::new(reference::FullyConnectedForward), 100);

    if config.prefer_optimized {
        register_optimized_kernels(registries);
    }
}

#[cfg(feature = "optimized")]
fn register_optimized_kernels(registries: &mut Registries) {
    use PrimitiveKind::*;

    register(registries, Relu, EngineKind::Cpu, Layout::Bfyx, Layout::Bfyx, Arc::new(optimized::ReluPlainForward), 40);
    register(registries, Pooling, EngineKind::Cpu, Layout::Bfyx, Layout::Bfyx, Arc::new(optimized::PoolingMaxSplit), 40);
    register(registries, Response, EngineKind::Cpu, Layout::ByxfB24, Layout::ByxfB24, Arc::new(optimized::ResponseByxfB24), 40);
    register(registries, Softmax, EngineKind::Cpu, Layout::Bx, Layout::Bx, Arc::new(optimized::SoftmaxFixedWidth), 40);
}

#[cfg(not(feature = "optimized"))]
fn register_optimized_kernels(_registries: &mut Registries) {}

#[cfg(test)]
mod tests {
    use super::*;
    use nnx_core::registry::EngineKind;

    #[test]
    fn registers_reference_kernel_for_every_kind() {
        let mut registries = Registries::new();
        register_default_kernels(&mut registries, &Config { prefer_optimized: false, ..Config::default() });
        let relu_registry = registries.get(PrimitiveKind::Relu).unwrap();
        let key = DispatchKey::new(EngineKind::Reference, fmt(Layout::Bfyx), fmt(Layout::Bfyx));
        assert!(relu_registry.lookup(key).is_ok());
    }

    #[test]
    fn optimized_kernels_registered_only_when_preferred() {
        let mut registries = Registries::new();
        register_default_kernels(&mut registries, &Config { prefer_optimized: true, ..Config::default() });
        let relu_registry = registries.get(PrimitiveKind::Relu).unwrap();
        let cpu_key = DispatchKey::new(EngineKind::Cpu, fmt(Layout::Bfyx), fmt(Layout::Bfyx));
        assert_eq!(relu_registry.lookup(cpu_key).unwrap().name(), "relu.optimized.plain");

        let mut registries_no_opt = Registries::new();
        register_default_kernels(&mut registries_no_opt, &Config { prefer_optimized: false, ..Config::default() });
        assert!(registries_no_opt.get(PrimitiveKind::Relu).unwrap().lookup(cpu_key).is_err());
    }

    #[test]
    fn any_engine_lookup_falls_back_to_reference_pooling() {
        let mut registries = Registries::new();
        register_default_kernels(&mut registries, &Config::default());
        let pooling_registry = registries.get(PrimitiveKind::Pooling).unwrap();
        let any_key = DispatchKey::new(EngineKind::Any, fmt(Layout::Bfyx), fmt(Layout::Bfyx));
        // Reference is earlier in ENGINE_PRIORITY than Cpu, so `any` still
        // resolves to it even though an optimized Cpu variant is registered.
        assert_eq!(pooling_registry.lookup(any_key).unwrap().name(), "pooling.reference");
    }
}
