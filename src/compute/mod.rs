//! Compute hosts for surface-extraction kernels
//!
//! The meshing pipeline only talks to [`ComputeBackend`]: it allocates four
//! buffers, uploads the sample volume and parameters, runs one dispatch and
//! reads the results back. Two hosts implement it:
//!
//! - [`cpu::CpuBackend`]: rayon workgroups calling a Rust [`cpu::CellKernel`]
//! - [`gpu::GpuBackend`]: a wgpu compute pipeline built from WGSL
//!
//! Kernels see the same binding layout on both:
//!
//! | binding | buffer    | access                     |
//! |---------|-----------|----------------------------|
//! | 0       | samples   | `array<Sample>`, read-only |
//! | 1       | triangles | `array<Triangle>`          |
//! | 2       | counter   | `atomic<u32>`              |
//! | 3       | params    | [`KernelParams`] uniform   |

pub mod buffers;
pub mod cpu;
pub mod gpu;

use bytemuck::{Pod, Zeroable};

use crate::core::Result;

pub use buffers::{BufferHandle, BufferSet};
pub use cpu::{CellKernel, CpuBackend, TriangleSink, VolumeView};
pub use gpu::{GpuBackend, GpuContext};

/// Upper bound on triangles a marching-cubes cell can emit
pub const MAX_TRIANGLES_PER_CELL: u32 = 5;

/// Invocations a workgroup may hold (wgpu's default
/// `max_compute_invocations_per_workgroup`)
pub const MAX_WORKGROUP_INVOCATIONS: u32 = 256;

/// Role of a buffer within one dispatch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Samples,
    Triangles,
    Counter,
    Params,
}

/// Request for one transient buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferDesc {
    pub label: &'static str,
    /// Size in bytes
    pub size: u64,
    pub kind: BufferKind,
}

impl BufferDesc {
    pub fn new(label: &'static str, size: u64, kind: BufferKind) -> Self {
        Self { label, size, kind }
    }
}

/// Kernel parameters uniform (binding 3)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct KernelParams {
    /// Sample volume dimensions (cells are one fewer per axis)
    pub dims: [u32; 3],
    /// Capacity of the triangle buffer
    pub max_triangles: u32,
}

/// One kernel launch over the cell grid
pub struct KernelDispatch<'a, B> {
    pub samples: &'a B,
    pub triangles: &'a B,
    pub counter: &'a B,
    pub params: &'a B,
    /// Workgroup count per axis
    pub workgroups: [u32; 3],
    /// Invocations per workgroup axis
    pub workgroup_size: u32,
}

/// Number of workgroups covering `cells` along one axis
pub fn workgroup_count(cells: u32, workgroup_size: u32) -> u32 {
    cells.div_ceil(workgroup_size)
}

/// Device that owns kernel buffers and runs dispatches
///
/// Calls are blocking. Buffers are released explicitly; [`BufferSet`] does it
/// on drop so no exit path leaks them.
pub trait ComputeBackend {
    type Buffer;

    /// Allocate a zero-initialized buffer of `desc.size` bytes
    fn allocate(&self, desc: &BufferDesc) -> Result<Self::Buffer>;

    /// Copy `data` into `buffer` at byte `offset`
    fn upload(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]) -> Result<()>;

    /// Run the kernel and wait for it to finish
    fn dispatch(&self, dispatch: &KernelDispatch<'_, Self::Buffer>) -> Result<()>;

    /// Read `len` bytes starting at byte `offset`
    fn read(&self, buffer: &Self::Buffer, offset: u64, len: u64) -> Result<Vec<u8>>;

    /// Free a buffer
    fn release(&self, buffer: Self::Buffer);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_layout() {
        assert_eq!(std::mem::size_of::<KernelParams>(), 16);
        let params = KernelParams { dims: [33, 33, 33], max_triangles: 5 * 32 * 32 * 32 };
        let words: &[u32] = bytemuck::cast_slice(bytemuck::bytes_of(&params));
        assert_eq!(words, &[33, 33, 33, 163_840]);
    }

    #[test]
    fn test_workgroup_count() {
        assert_eq!(workgroup_count(32, 4), 8);
        assert_eq!(workgroup_count(33, 4), 9);
        assert_eq!(workgroup_count(1, 4), 1);
        assert_eq!(workgroup_count(0, 4), 0);
    }
}
