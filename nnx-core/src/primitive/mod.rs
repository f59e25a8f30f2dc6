//! C5: primitive graph node.
//!
//! A primitive is a tagged record (kind + argument block) with ordered
//! inputs/outputs and a typed attribute map. Handles are reference counted
//! ([`Arc`]); dropping the last one drops the node's owned output buffers
//! along with it.

mod kinds;

pub use kinds::{default_formats, validate, Argument, Padding, PoolingMode, PrimitiveKind};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;
use crate::memory::SharedBuffer;
use crate::registry::{DispatchKey, Engine, EngineKind, Registry};
use crate::task::TaskGroup;

/// A value in the per-node attribute map (§3, §4.5 "attribute query").
#[derive(Debug, Clone)]
pub enum Attribute {
    Str(String),
    F32(f32),
    U32(u32),
}

impl Attribute {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Attribute::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Attribute::F32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Attribute::U32(v) => Some(*v),
            _ => None,
        }
    }
}

/// A reference to the *i*-th output of another primitive — how a node
/// consumes a producer's output without owning it outright (§3 "inputs").
#[derive(Clone)]
pub struct PrimitiveAt {
    pub node: Arc<Primitive>,
    pub output_index: usize,
}

impl PrimitiveAt {
    pub fn new(node: Arc<Primitive>, output_index: usize) -> Self {
        PrimitiveAt { node, output_index }
    }

    pub fn buffer(&self) -> SharedBuffer {
        self.node.outputs[self.output_index].clone()
    }
}

/// A graph node: kind, argument block, producers, owned outputs, the
/// instantiated kernel's task group, and a queryable attribute map.
pub struct Primitive {
    pub kind: PrimitiveKind,
    pub argument: Argument,
    pub inputs: Vec<PrimitiveAt>,
    pub outputs: Vec<SharedBuffer>,
    pub engine: Engine,
    /// Index into the `workers` slice passed to [`crate::exec::execute`];
    /// lets a node double as an [`crate::exec::Executable`].
    worker_index: RwLock<usize>,
    work: RwLock<Option<TaskGroup>>,
    attributes: RwLock<HashMap<String, Attribute>>,
}

impl Primitive {
    /// Validates `argument` against the resolved input/output buffers and,
    /// unless `engine` is lazy, looks up and instantiates an implementation
    /// immediately (§4.5).
    pub fn create(
        kind: PrimitiveKind,
        argument: Argument,
        inputs: Vec<PrimitiveAt>,
        outputs: Vec<SharedBuffer>,
        engine: Engine,
        registry: &Registry,
    ) -> Result<Arc<Primitive>> {
        let input_buffers: Vec<SharedBuffer> = inputs.iter().map(PrimitiveAt::buffer).collect();
        validate(kind, &argument, &input_buffers, &outputs)?;

        let mut attributes = HashMap::new();
        attributes.insert("engine".to_string(), Attribute::Str(format!("{:?}", engine.kind)));
        attributes.insert("name".to_string(), Attribute::Str(kind.name().to_string()));
        attributes.insert("inputs".to_string(), Attribute::U32(inputs.len() as u32));
        for (i, input) in input_buffers.iter().enumerate() {
            attributes.insert(format!("input{i}"), Attribute::Str(format!("{:?}", input.format())));
        }

        let work = if engine.lazy {
            None
        } else {
            let (in_fmt, out_fmt) = default_formats(&input_buffers, &outputs)?;
            let key = DispatchKey::new(engine.kind, in_fmt, out_fmt);
            let factory = registry.lookup(key)?;
            tracing::debug!(kind = kind.name(), factory = factory.name(), "instantiated kernel");
            Some(factory.instantiate(&input_buffers, &outputs, &argument)?)
        };

        Ok(Arc::new(Primitive {
            kind,
            argument,
            inputs,
            outputs,
            engine,
            worker_index: RwLock::new(0),
            work: RwLock::new(work),
            attributes: RwLock::new(attributes),
        }))
    }

    /// Creates a `memory` primitive wrapping a single pre-existing buffer —
    /// the leaf node every graph bottoms out at.
    pub fn memory(buffer: SharedBuffer) -> Arc<Primitive> {
        let mut attributes = HashMap::new();
        attributes.insert("engine".to_string(), Attribute::Str(format!("{:?}", EngineKind::Cpu)));
        attributes.insert("name".to_string(), Attribute::Str(PrimitiveKind::Memory.name().to_string()));
        Arc::new(Primitive {
            kind: PrimitiveKind::Memory,
            argument: Argument::Memory,
            inputs: Vec::new(),
            outputs: vec![buffer],
            engine: Engine::new(EngineKind::Cpu),
            worker_index: RwLock::new(0),
            work: RwLock::new(None),
            attributes: RwLock::new(attributes),
        })
    }

    pub fn work(&self) -> Option<TaskGroup> {
        self.work.read().clone()
    }

    pub fn set_work(&self, group: TaskGroup) {
        *self.work.write() = Some(group);
    }

    pub fn worker_index(&self) -> usize {
        *self.worker_index.read()
    }

    pub fn set_worker_index(&self, index: usize) {
        *self.worker_index.write() = index;
    }

    /// `node["key"].as::<T>()` (§3) — returns a clone of the stored
    /// attribute, if any.
    pub fn attribute(&self, key: &str) -> Option<Attribute> {
        self.attributes.read().get(key).cloned()
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: Attribute) {
        self.attributes.write().insert(key.into(), value);
    }
}

impl crate::exec::Executable for Primitive {
    fn work(&self) -> TaskGroup {
        self.work.read().clone().unwrap_or_else(|| TaskGroup::new(Vec::new(), crate::task::Schedule::Unordered))
    }

    fn worker_index(&self) -> usize {
        self.worker_index()
    }
}
