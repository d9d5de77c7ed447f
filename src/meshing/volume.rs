//! Padded sample volume handed to the surface-extraction kernel

use glam::UVec3;

use crate::voxel::sample::Sample;

/// Linear index of `pos` in a `dims`-sized grid: `x + y * W + z * W * H`
#[inline]
pub fn linear_index(dims: UVec3, pos: UVec3) -> usize {
    pos.x as usize + pos.y as usize * dims.x as usize + pos.z as usize * dims.x as usize * dims.y as usize
}

/// Flattened 3D grid of samples.
///
/// Every read and write goes through [`SampleVolume::index`]
/// ([`linear_index`]), which is also the layout kernels see.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleVolume {
    dims: UVec3,
    samples: Vec<Sample>,
}

impl SampleVolume {
    /// Create a volume with every sample set to `fill`
    pub fn filled(dims: UVec3, fill: Sample) -> Self {
        let len = dims.x as usize * dims.y as usize * dims.z as usize;
        Self {
            dims,
            samples: vec![fill; len],
        }
    }

    /// Samples per axis
    pub fn dims(&self) -> UVec3 {
        self.dims
    }

    /// Linear index of `pos`
    #[inline]
    pub fn index(&self, pos: UVec3) -> usize {
        linear_index(self.dims, pos)
    }

    /// Sample at `pos`
    #[inline]
    pub fn get(&self, pos: UVec3) -> Sample {
        self.samples[self.index(pos)]
    }

    /// Overwrite the sample at `pos`
    #[inline]
    pub fn set(&mut self, pos: UVec3, sample: Sample) {
        let index = self.index(pos);
        self.samples[index] = sample;
    }

    /// Unit cells per axis (one fewer than samples, since a cell needs 8 corners)
    pub fn cell_dims(&self) -> UVec3 {
        self.dims.saturating_sub(UVec3::ONE)
    }

    /// Total number of unit cells
    pub fn cell_count(&self) -> u64 {
        let c = self.cell_dims();
        c.x as u64 * c.y as u64 * c.z as u64
    }

    /// All samples in index order
    pub fn as_slice(&self) -> &[Sample] {
        &self.samples
    }

    /// Raw bytes for upload
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.samples)
    }
}
