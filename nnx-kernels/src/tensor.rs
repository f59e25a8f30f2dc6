//! Coordinate-addressed buffer views used by every kernel body below.
//!
//! A thin RAII wrapper that locks a buffer once, exposes element-level
//! `get`/`set` through `nnx_core::format::index`, and releases the lock on
//! drop. Kernel bodies never touch `MemoryBuffer::lock`/`release` directly.
//!
//! Size-array convention per tensor role (the buffer's own [`Shape`] carries
//! named sub-ranges that this module reinterprets per role rather than
//! relying on `Shape::raw()`'s literal order, since weight tensors store
//! output-feature in the "feature" sub-range and input-feature in "batch"):
//!
//! - activation `(b, f, y, x)`: sizes = `[batch_size, feature_size, spatial[0], spatial[1]]`.
//! - convolution/weight `(o, i, y, x)`: sizes = `[feature_size, batch_size, spatial[0], spatial[1]]`.
//! - fully-connected weight `(i, o)` (layout `oi`): sizes = `[batch_size, feature_size]`.
//! - bias/vector `(b, x)` (layout `bx`): sizes = `[batch_size, feature_size]`.

use std::sync::Arc;

use nnx_core::format::{self, Layout};
use nnx_core::memory::MemoryBuffer;

/// An f32 view over one buffer, addressed through its own format.
///
/// Only `ElementType::F32` buffers are supported; the dispatch keys these
/// kernels register under only ever match f32 formats, so this is an
/// invariant of how the factories are wired, not a runtime check.
pub(crate) struct View {
    buf: Arc<MemoryBuffer>,
    ptr: *mut f32,
    layout: Layout,
    sizes: Vec<usize>,
}

// SAFETY: `ptr` is derived from `buf.lock()`, which guarantees exclusive
// access for the view's lifetime under the crate's "one writer per buffer
// per submission" contract (SPEC_FULL.md §5); the view does not outlive the
// task closure that created it.
unsafe impl Send for View {}
unsafe impl Sync for View {}

impl View {
    fn new(buf: Arc<MemoryBuffer>, layout: Layout, sizes: Vec<usize>) -> Self {
        let ptr = buf.lock().expect("kernel buffer must be bound before execution") as *mut f32;
        View { buf, ptr, layout, sizes }
    }

    pub(crate) fn activation(buf: Arc<MemoryBuffer>) -> Self {
        let layout = buf.format().layout;
        let s = buf.shape();
        let spatial = s.spatial();
        let sizes = vec![s.batch_size(), s.feature_size(), spatial[0], spatial[1]];
        View::new(buf.clone(), layout, sizes)
    }

    pub(crate) fn vector2(buf: Arc<MemoryBuffer>) -> Self {
        let layout = buf.format().layout;
        let s = buf.shape();
        let sizes = vec![s.batch_size(), s.feature_size()];
        View::new(buf.clone(), layout, sizes)
    }

    pub(crate) fn conv_weight(buf: Arc<MemoryBuffer>) -> Self {
        let layout = buf.format().layout;
        let s = buf.shape();
        let spatial = s.spatial();
        let sizes = vec![s.feature_size(), s.batch_size(), spatial[0], spatial[1]];
        View::new(buf.clone(), layout, sizes)
    }

    pub(crate) fn fc_weight(buf: Arc<MemoryBuffer>) -> Self {
        let layout = buf.format().layout;
        let s = buf.shape();
        let sizes = vec![s.batch_size(), s.feature_size()];
        View::new(buf.clone(), layout, sizes)
    }

    pub(crate) fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub(crate) fn get(&self, coords: &[usize]) -> f32 {
        let offset = format::index(self.layout, &self.sizes, coords).expect("coordinate within bounds");
        unsafe { *self.ptr.add(offset) }
    }

    pub(crate) fn set(&self, coords: &[usize], value: f32) {
        let offset = format::index(self.layout, &self.sizes, coords).expect("coordinate within bounds");
        unsafe {
            *self.ptr.add(offset) = value;
        }
    }
}

impl Drop for View {
    fn drop(&mut self) {
        self.buf.release();
    }
}
