//! Scoped ownership of transient kernel buffers

use super::{BufferDesc, ComputeBackend};
use crate::core::Result;

/// Index of a buffer inside a [`BufferSet`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferHandle(usize);

/// Buffers allocated for one dispatch, released together on drop
///
/// Dropping the set (success, early `?` return, or a failed allocation
/// halfway through) hands every buffer back to the backend.
pub struct BufferSet<'a, B: ComputeBackend> {
    backend: &'a B,
    buffers: Vec<(&'static str, B::Buffer)>,
}

impl<'a, B: ComputeBackend> BufferSet<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self {
            backend,
            buffers: Vec::with_capacity(4),
        }
    }

    /// Allocate a buffer owned by this set
    pub fn allocate(&mut self, desc: &BufferDesc) -> Result<BufferHandle> {
        let buffer = self.backend.allocate(desc)?;
        log::trace!("Allocated buffer '{}' ({} bytes)", desc.label, desc.size);
        self.buffers.push((desc.label, buffer));
        Ok(BufferHandle(self.buffers.len() - 1))
    }

    pub fn get(&self, handle: BufferHandle) -> &B::Buffer {
        &self.buffers[handle.0].1
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

impl<B: ComputeBackend> Drop for BufferSet<'_, B> {
    fn drop(&mut self) {
        for (label, buffer) in self.buffers.drain(..) {
            self.backend.release(buffer);
            log::trace!("Released buffer '{}'", label);
        }
    }
}
