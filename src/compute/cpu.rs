//! CPU compute host: workgroups run in parallel on the rayon pool

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};

use glam::UVec3;
use rayon::prelude::*;

use super::{BufferDesc, ComputeBackend, KernelDispatch, KernelParams, MAX_WORKGROUP_INVOCATIONS};
use crate::core::{Error, Result};
use crate::meshing::mesh::Triangle;
use crate::meshing::volume::linear_index;
use crate::voxel::sample::Sample;

/// Cell corner offsets in the conventional marching-cubes order
pub const CORNER_OFFSETS: [UVec3; 8] = [
    UVec3::new(0, 0, 0),
    UVec3::new(1, 0, 0),
    UVec3::new(1, 1, 0),
    UVec3::new(0, 1, 0),
    UVec3::new(0, 0, 1),
    UVec3::new(1, 0, 1),
    UVec3::new(1, 1, 1),
    UVec3::new(0, 1, 1),
];

/// Per-cell surface extraction, the CPU counterpart of a WGSL kernel entry point
pub trait CellKernel: Sync {
    /// Emit the triangles of `cell` (its minimum corner) into `sink`
    fn process_cell(&self, volume: &VolumeView<'_>, cell: UVec3, sink: &TriangleSink<'_>);
}

/// Read-only view of the uploaded sample buffer
#[derive(Clone, Copy)]
pub struct VolumeView<'a> {
    dims: UVec3,
    samples: &'a [Sample],
}

impl<'a> VolumeView<'a> {
    pub fn new(dims: UVec3, samples: &'a [Sample]) -> Self {
        Self { dims, samples }
    }

    pub fn dims(&self) -> UVec3 {
        self.dims
    }

    pub fn cell_dims(&self) -> UVec3 {
        self.dims.saturating_sub(UVec3::ONE)
    }

    #[inline]
    pub fn get(&self, pos: UVec3) -> Sample {
        self.samples[linear_index(self.dims, pos)]
    }

    /// The 8 corner samples of a cell, ordered as [`CORNER_OFFSETS`]
    pub fn corners(&self, cell: UVec3) -> [Sample; 8] {
        CORNER_OFFSETS.map(|offset| self.get(cell + offset))
    }
}

/// Append-only triangle output shared by every invocation of a dispatch
///
/// Mirrors `atomicAdd` on the GPU counter: the count keeps growing past
/// capacity so the caller can see that output was lost. Each reserved slot is
/// written once, so pushes never wait on each other.
pub struct TriangleSink<'a> {
    count: AtomicU32,
    capacity: u32,
    staged: Vec<OnceLock<Triangle>>,
    out: &'a mut [Triangle],
}

impl<'a> TriangleSink<'a> {
    /// Sink over `out`, continuing from a counter value of `start`
    pub fn new(out: &'a mut [Triangle], start: u32) -> Self {
        let capacity = u32::try_from(out.len()).unwrap_or(u32::MAX);
        let staged = (start.min(capacity)..capacity).map(|_| OnceLock::new()).collect();
        Self {
            count: AtomicU32::new(start),
            capacity,
            staged,
            out,
        }
    }

    pub fn push(&self, triangle: Triangle) {
        let slot = self.count.fetch_add(1, Ordering::Relaxed);
        if slot < self.capacity {
            let start = self.capacity as usize - self.staged.len();
            // The counter hands out each slot once
            let _ = self.staged[slot as usize - start].set(triangle);
        }
    }

    /// Write the pushed triangles into the output slice and return the final count
    pub fn finish(self) -> u32 {
        let Self { count, staged, out, .. } = self;
        let start = out.len() - staged.len();
        for (dst, slot) in out[start..].iter_mut().zip(staged) {
            if let Some(triangle) = slot.into_inner() {
                *dst = triangle;
            }
        }
        count.into_inner()
    }

    /// Triangles reported so far, including dropped ones
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Host memory standing in for a device buffer, stored as 4-byte words
pub struct CpuBuffer {
    size: u64,
    words: Mutex<Vec<u32>>,
}

impl CpuBuffer {
    pub fn size(&self) -> u64 {
        self.size
    }

    fn range(&self, offset: u64, len: u64) -> Result<std::ops::Range<usize>> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(offset as usize..end as usize),
            _ => Err(Error::Kernel(format!(
                "access of {} bytes at offset {} exceeds buffer of {} bytes",
                len, offset, self.size
            ))),
        }
    }
}

/// Runs a [`CellKernel`] over the cell grid on the rayon thread pool
pub struct CpuBackend<K> {
    kernel: K,
    memory_limit: Option<u64>,
    allocated: AtomicU64,
    live: AtomicUsize,
}

impl<K: CellKernel> CpuBackend<K> {
    pub fn new(kernel: K) -> Self {
        Self {
            kernel,
            memory_limit: None,
            allocated: AtomicU64::new(0),
            live: AtomicUsize::new(0),
        }
    }

    /// Fail allocations once `bytes` are outstanding
    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Buffers allocated and not yet released
    pub fn live_buffers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn allocated_bytes(&self) -> u64 {
        self.allocated.load(Ordering::SeqCst)
    }
}

impl<K: CellKernel> ComputeBackend for CpuBackend<K> {
    type Buffer = CpuBuffer;

    fn allocate(&self, desc: &BufferDesc) -> Result<CpuBuffer> {
        let failed = || Error::BufferAllocation {
            label: desc.label,
            size: desc.size,
        };

        self.allocated
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                let next = used.checked_add(desc.size)?;
                match self.memory_limit {
                    Some(limit) if next > limit => None,
                    _ => Some(next),
                }
            })
            .map_err(|_| failed())?;

        let len = usize::try_from(desc.size.div_ceil(4)).ok();
        let mut words = Vec::new();
        if len.is_none_or(|len| words.try_reserve_exact(len).is_err()) {
            self.allocated.fetch_sub(desc.size, Ordering::SeqCst);
            return Err(failed());
        }
        words.resize(len.unwrap_or(0), 0);

        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(CpuBuffer {
            size: desc.size,
            words: Mutex::new(words),
        })
    }

    fn upload(&self, buffer: &CpuBuffer, offset: u64, data: &[u8]) -> Result<()> {
        let range = buffer.range(offset, data.len() as u64)?;
        let mut words = lock(&buffer.words);
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(words.as_mut_slice());
        bytes[range].copy_from_slice(data);
        Ok(())
    }

    fn dispatch(&self, dispatch: &KernelDispatch<'_, CpuBuffer>) -> Result<()> {
        let params: KernelParams = {
            let words = lock(&dispatch.params.words);
            let bytes: &[u8] = bytemuck::cast_slice(words.as_slice());
            let size = std::mem::size_of::<KernelParams>();
            if bytes.len() < size {
                return Err(Error::Kernel(format!("params buffer holds {} bytes, need {}", bytes.len(), size)));
            }
            bytemuck::pod_read_unaligned(&bytes[..size])
        };
        let dims = UVec3::from_array(params.dims);
        let sample_count = dims.x as usize * dims.y as usize * dims.z as usize;

        let sample_words = lock(&dispatch.samples.words);
        let samples: &[Sample] = bytemuck::try_cast_slice(sample_words.as_slice())
            .map_err(|e| Error::Kernel(format!("samples buffer: {e}")))?;
        if samples.len() < sample_count {
            return Err(Error::Kernel(format!(
                "samples buffer holds {} samples, volume needs {}",
                samples.len(),
                sample_count
            )));
        }
        let view = VolumeView::new(dims, &samples[..sample_count]);

        let mut triangle_words = lock(&dispatch.triangles.words);
        let slots: &mut [Triangle] = bytemuck::try_cast_slice_mut(triangle_words.as_mut_slice())
            .map_err(|e| Error::Kernel(format!("triangles buffer: {e}")))?;
        let capacity = slots.len().min(params.max_triangles as usize);

        let mut counter = lock(&dispatch.counter.words);
        let start = *counter
            .first()
            .ok_or_else(|| Error::Kernel("counter buffer is empty".into()))?;
        let sink = TriangleSink::new(&mut slots[..capacity], start);

        let cells = view.cell_dims();
        let [gx, gy, gz] = dispatch.workgroups;
        let size = dispatch.workgroup_size;
        if size == 0 || size.saturating_pow(3) > MAX_WORKGROUP_INVOCATIONS {
            return Err(Error::Kernel(format!(
                "workgroup size {size}^3 exceeds {MAX_WORKGROUP_INVOCATIONS} invocations"
            )));
        }
        let groups = gx as u64 * gy as u64 * gz as u64;

        (0..groups).into_par_iter().for_each(|g| {
            let group = UVec3::new(
                (g % gx as u64) as u32,
                (g / gx as u64 % gy as u64) as u32,
                (g / (gx as u64 * gy as u64)) as u32,
            );
            let base = group * size;
            for z in 0..size {
                for y in 0..size {
                    for x in 0..size {
                        let cell = base + UVec3::new(x, y, z);
                        if cell.cmplt(cells).all() {
                            self.kernel.process_cell(&view, cell, &sink);
                        }
                    }
                }
            }
        });

        counter[0] = sink.finish();
        log::trace!("CPU dispatch: {} workgroups, {} triangles", groups, counter[0]);
        Ok(())
    }

    fn read(&self, buffer: &CpuBuffer, offset: u64, len: u64) -> Result<Vec<u8>> {
        let range = buffer.range(offset, len)?;
        let words = lock(&buffer.words);
        let bytes: &[u8] = bytemuck::cast_slice(words.as_slice());
        Ok(bytes[range].to_vec())
    }

    fn release(&self, buffer: CpuBuffer) {
        self.allocated.fetch_sub(buffer.size, Ordering::SeqCst);
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}
