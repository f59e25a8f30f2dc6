//! C6: implementation registry.
//!
//! A process-wide, kind-specialized mapping from dispatch key to kernel
//! factory (§4.6): a `parking_lot::RwLock` around a `HashMap`, with
//! `tracing` at mutation points. Last registration for a key wins; `any` is
//! a lookup wildcard, never a stored key.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::format::Format;
use crate::memory::SharedBuffer;
use crate::primitive::Argument;
use crate::task::TaskGroup;

/// Execution target for a kernel (§GLOSSARY "Engine").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    Reference,
    Cpu,
    Gpu,
    /// Wildcard: matches any concrete kind during lookup. Never a valid
    /// engine for a registered factory.
    Any,
}

/// An engine kind with the `lazy` bit OR-ed on (§4.9 worker façade).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Engine {
    pub kind: EngineKind,
    pub lazy: bool,
}

impl Engine {
    pub fn new(kind: EngineKind) -> Self {
        Engine { kind, lazy: false }
    }

    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }
}

/// `(engine, input_format, output_format)` — the default key builder from
/// §4.6. Kinds may override the key builder; this struct is what the
/// default one produces and what every registered factory is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DispatchKey {
    pub engine: EngineKind,
    pub input_format: Format,
    pub output_format: Format,
}

impl DispatchKey {
    pub fn new(engine: EngineKind, input_format: Format, output_format: Format) -> Self {
        DispatchKey { engine, input_format, output_format }
    }
}

/// A factory producing a runnable kernel for one dispatch key. Implementors
/// live in `nnx-kernels`; this crate only stores the boxed factory.
pub trait KernelFactory: Send + Sync {
    /// Human-readable name used in logs and the `engine` attribute (§3).
    fn name(&self) -> &'static str;

    /// Builds the task group that will run this kernel for the given
    /// buffers and kind-specific argument block (§4.5 step 3).
    fn instantiate(&self, inputs: &[SharedBuffer], outputs: &[SharedBuffer], argument: &Argument) -> Result<TaskGroup>;
}

/// One row returned by [`Registry::query`]: a candidate implementation plus
/// the cost estimate a caller can use to pick among several matches.
#[derive(Clone)]
pub struct QueryEntry {
    pub key: DispatchKey,
    pub factory: Arc<dyn KernelFactory>,
    pub estimated_time_us: u64,
}

impl fmt::Debug for QueryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryEntry")
            .field("key", &self.key)
            .field("factory", &self.factory.name())
            .field("estimated_time_us", &self.estimated_time_us)
            .finish()
    }
}

struct Entry {
    factory: Arc<dyn KernelFactory>,
    estimated_time_us: u64,
}

/// Fixed enumeration order used when a lookup's engine is [`EngineKind::Any`]
/// (§4.6: "enumerates all engines in a fixed order").
const ENGINE_PRIORITY: [EngineKind; 3] = [EngineKind::Reference, EngineKind::Cpu, EngineKind::Gpu];

/// Process-wide registry for one primitive kind. The graph layer keeps one
/// `Registry` per kind (so a convolution lookup never sees a pooling
/// factory); `nnx-kernels::register_default_kernels` populates them.
#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<DispatchKey, Entry>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry { entries: RwLock::new(HashMap::new()) }
    }

    /// Registers `factory` for `key`, replacing any prior registration
    /// (last registration wins, §4.6).
    pub fn register(&self, key: DispatchKey, factory: Arc<dyn KernelFactory>, estimated_time_us: u64) {
        tracing::debug!(name = factory.name(), engine = ?key.engine, "registering kernel implementation");
        self.entries.write().insert(key, Entry { factory, estimated_time_us });
    }

    /// Resolves the best implementation for `key`. If `key.engine` is
    /// `any`, tries [`ENGINE_PRIORITY`] in order and returns the first hit.
    pub fn lookup(&self, key: DispatchKey) -> Result<Arc<dyn KernelFactory>> {
        let guard = self.entries.read();
        if key.engine != EngineKind::Any {
            return guard
                .get(&key)
                .map(|e| e.factory.clone())
                .ok_or(Error::NotImplemented { key });
        }
        for &engine in &ENGINE_PRIORITY {
            let candidate = DispatchKey { engine, ..key };
            if let Some(entry) = guard.get(&candidate) {
                return Ok(entry.factory.clone());
            }
        }
        Err(Error::NotImplemented { key })
    }

    /// Returns every registered implementation matching `key`'s formats,
    /// across all engines if `key.engine` is `any`, with per-entry cost
    /// estimates so a caller can choose (§4.6 `query`).
    pub fn query(&self, key: DispatchKey) -> Vec<QueryEntry> {
        let guard = self.entries.read();
        guard
            .iter()
            .filter(|(k, _)| {
                k.input_format == key.input_format
                    && k.output_format == key.output_format
                    && (key.engine == EngineKind::Any || k.engine == key.engine)
            })
            .map(|(k, e)| QueryEntry {
                key: *k,
                factory: e.factory.clone(),
                estimated_time_us: e.estimated_time_us,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
