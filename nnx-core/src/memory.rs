//! C4: memory buffer.
//!
//! A buffer is either *described* (no storage yet, must be bound to an
//! external pointer before it's touched by a kernel) or *allocated* (owned
//! storage from an engine-specific allocator). Tracking is pool-style:
//! a keyed table of allocation metadata behind a lock, with `thiserror`
//! for the error enum.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::format::Format;
use crate::registry::EngineKind;
use crate::shape::Shape;

/// A pointer into externally-owned storage. The caller guarantees it
/// outlives every in-flight task touching the buffer (§3); this type only
/// carries the address and length, it never frees anything.
#[derive(Debug)]
struct ExternalPtr {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: the caller guarantees the pointed-to region outlives any task
// that touches it and is not concurrently mutated from outside the
// lock/release protocol, matching the contract documented on `reset`.
unsafe impl Send for ExternalPtr {}
unsafe impl Sync for ExternalPtr {}

enum Storage {
    /// `describe`d buffer with no storage bound yet.
    Unbound,
    Owned(Vec<u8>),
    External(ExternalPtr),
}

type AllocFn = fn(usize) -> Result<Vec<u8>>;

static ALLOCATORS: OnceLock<RwLock<HashMap<EngineKind, AllocFn>>> = OnceLock::new();

fn allocators() -> &'static RwLock<HashMap<EngineKind, AllocFn>> {
    ALLOCATORS.get_or_init(|| {
        let mut map = HashMap::new();
        map.insert(EngineKind::Reference, host_alloc as AllocFn);
        map.insert(EngineKind::Cpu, host_alloc as AllocFn);
        map.insert(EngineKind::Gpu, host_alloc as AllocFn);
        RwLock::new(map)
    })
}

fn host_alloc(bytes: usize) -> Result<Vec<u8>> {
    Ok(vec![0u8; bytes])
}

/// Registers (or replaces) the allocator used by `allocate` for `engine`.
pub fn register_allocator(engine: EngineKind, alloc: AllocFn) {
    allocators().write().insert(engine, alloc);
}

/// A contiguous tensor buffer: shape, format, storage and a lock count.
pub struct MemoryBuffer {
    shape: Shape,
    format: Format,
    size_bytes: usize,
    storage: RwLock<Storage>,
    lock_count: AtomicUsize,
}

impl MemoryBuffer {
    fn size_of(shape: &Shape, format: Format) -> usize {
        shape.element_count() * format.dtype.size_bytes()
    }

    /// Creates a buffer with no storage; it must be [`reset`](Self::reset)
    /// to an external pointer before any kernel touches it.
    pub fn describe(shape: Shape, format: Format) -> Self {
        let size_bytes = Self::size_of(&shape, format);
        MemoryBuffer {
            shape,
            format,
            size_bytes,
            storage: RwLock::new(Storage::Unbound),
            lock_count: AtomicUsize::new(0),
        }
    }

    /// Allocates `size_of(shape, format)` bytes via the allocator registered
    /// for `engine`.
    pub fn allocate(shape: Shape, format: Format, engine: EngineKind) -> Result<Self> {
        let size_bytes = Self::size_of(&shape, format);
        let alloc = *allocators()
            .read()
            .get(&engine)
            .ok_or_else(|| Error::internal(format!("no allocator registered for {engine:?}")))?;
        let bytes = alloc(size_bytes).map_err(|_| Error::OutOfMemory { requested: size_bytes, available: 0 })?;
        tracing::debug!(size_bytes, engine = ?engine, "allocated memory buffer");
        Ok(MemoryBuffer {
            shape,
            format,
            size_bytes,
            storage: RwLock::new(Storage::Owned(bytes)),
            lock_count: AtomicUsize::new(0),
        })
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn is_bound(&self) -> bool {
        !matches!(*self.storage.read(), Storage::Unbound)
    }

    /// Replaces storage with an externally owned region of `len` bytes at
    /// `ptr`. Survives across `execute` calls (§3).
    ///
    /// # Safety
    /// `ptr` must be valid for reads and writes of `len` bytes for as long
    /// as this buffer (or any task operating on it) is alive.
    pub unsafe fn reset(&self, ptr: *mut u8, len: usize) {
        *self.storage.write() = Storage::External(ExternalPtr { ptr, len });
    }

    /// Increments the lock count; on 0→1 transition "maps" the storage and
    /// returns a pointer to it. Returns `None` if storage is unbound.
    pub fn lock(&self) -> Option<*mut u8> {
        self.lock_count.fetch_add(1, Ordering::AcqRel);
        match &mut *self.storage.write() {
            Storage::Unbound => {
                self.lock_count.fetch_sub(1, Ordering::AcqRel);
                None
            }
            Storage::Owned(bytes) => Some(bytes.as_mut_ptr()),
            Storage::External(ext) => Some(ext.ptr),
        }
    }

    /// Decrements the lock count; unmaps on 1→0. No-op below zero.
    pub fn release(&self) {
        let _ = self
            .lock_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1));
    }

    pub fn lock_count(&self) -> usize {
        self.lock_count.load(Ordering::Acquire)
    }
}

/// Primitive handles share buffers by reference count (§3 "Primitive handles
/// are shared").
pub type SharedBuffer = Arc<MemoryBuffer>;
