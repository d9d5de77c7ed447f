//! Mesh extraction: volume upload, one kernel dispatch, triangle readback

use super::assembler::assemble_volume;
use super::config::MeshingConfig;
use super::mesh::{ChunkMesh, Triangle, TRIANGLE_SIZE};
use super::volume::SampleVolume;
use crate::compute::{
    workgroup_count, BufferDesc, BufferKind, BufferSet, ComputeBackend, KernelDispatch, KernelParams,
};
use crate::core::{Error, Result};
use crate::voxel::chunk::ChunkCoord;
use crate::voxel::world::ChunkSource;

const COUNTER_SIZE: u64 = std::mem::size_of::<u32>() as u64;

/// Drives a surface-extraction kernel on a compute backend
///
/// Every buffer lives only for one [`MeshPipeline::extract`] call.
/// `extract` borrows the pipeline mutably, so one instance never runs two
/// extractions at once; mesh chunks in parallel with one pipeline each.
pub struct MeshPipeline<B: ComputeBackend> {
    backend: B,
    config: MeshingConfig,
}

impl<B: ComputeBackend> MeshPipeline<B> {
    pub fn new(backend: B, config: MeshingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { backend, config })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &MeshingConfig {
        &self.config
    }

    /// Assemble the padded volume for `coord` and mesh it
    pub fn mesh_chunk<S>(&mut self, source: &S, coord: ChunkCoord) -> Result<ChunkMesh>
    where
        S: ChunkSource + ?Sized,
    {
        let volume = assemble_volume(source, coord)?;
        self.extract(&volume)
    }

    /// Run the kernel over every cell of `volume`
    pub fn extract(&mut self, volume: &SampleVolume) -> Result<ChunkMesh> {
        let cells = volume.cell_dims();
        let cell_count = volume.cell_count();
        if cell_count == 0 {
            return Ok(ChunkMesh::default());
        }

        let capacity = cell_count
            .checked_mul(self.config.max_triangles_per_cell as u64)
            .and_then(|c| u32::try_from(c).ok())
            .ok_or(Error::BufferAllocation {
                label: "mesh_triangles",
                size: u64::MAX,
            })?;
        let params = KernelParams {
            dims: volume.dims().to_array(),
            max_triangles: capacity,
        };

        let mut buffers = BufferSet::new(&self.backend);
        let samples = buffers.allocate(&BufferDesc::new(
            "mesh_samples",
            volume.as_bytes().len() as u64,
            BufferKind::Samples,
        ))?;
        let triangles = buffers.allocate(&BufferDesc::new(
            "mesh_triangles",
            capacity as u64 * TRIANGLE_SIZE,
            BufferKind::Triangles,
        ))?;
        let counter = buffers.allocate(&BufferDesc::new("mesh_counter", COUNTER_SIZE, BufferKind::Counter))?;
        let params_buf = buffers.allocate(&BufferDesc::new(
            "mesh_params",
            std::mem::size_of::<KernelParams>() as u64,
            BufferKind::Params,
        ))?;

        self.backend.upload(buffers.get(samples), 0, volume.as_bytes())?;
        self.backend.upload(buffers.get(counter), 0, &0u32.to_le_bytes())?;
        self.backend.upload(buffers.get(params_buf), 0, bytemuck::bytes_of(&params))?;

        let size = self.config.workgroup_size;
        self.backend.dispatch(&KernelDispatch {
            samples: buffers.get(samples),
            triangles: buffers.get(triangles),
            counter: buffers.get(counter),
            params: buffers.get(params_buf),
            workgroups: [
                workgroup_count(cells.x, size),
                workgroup_count(cells.y, size),
                workgroup_count(cells.z, size),
            ],
            workgroup_size: size,
        })?;

        let count_bytes = self.backend.read(buffers.get(counter), 0, COUNTER_SIZE)?;
        let count = match count_bytes.as_slice() {
            [a, b, c, d] => u32::from_le_bytes([*a, *b, *c, *d]),
            other => {
                return Err(Error::Kernel(format!("counter readback returned {} bytes", other.len())));
            }
        };
        if count > capacity {
            return Err(Error::TriangleOverflow { count, capacity });
        }

        let bytes = self
            .backend
            .read(buffers.get(triangles), 0, count as u64 * TRIANGLE_SIZE)?;
        let triangles: Vec<Triangle> = bytes
            .chunks_exact(TRIANGLE_SIZE as usize)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        drop(buffers);

        log::debug!(
            "Extracted {} triangles from {} cells ({}x{}x{})",
            count,
            cell_count,
            cells.x,
            cells.y,
            cells.z
        );

        Ok(ChunkMesh::from_triangles(&triangles, self.config.voxel_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::{CellKernel, CpuBackend, TriangleSink, VolumeView};
    use crate::voxel::sample::Sample;
    use crate::voxel::{Chunk, World};
    use glam::{UVec3, Vec3};

    /// Emits a fixed number of triangles from the origin cell only
    struct FixedCount(u32);

    impl CellKernel for FixedCount {
        fn process_cell(&self, _volume: &VolumeView<'_>, cell: UVec3, sink: &TriangleSink<'_>) {
            if cell == UVec3::ZERO {
                for i in 0..self.0 {
                    let base = Vec3::splat(i as f32);
                    sink.push(Triangle::new(base, base + Vec3::X, base + Vec3::Y, [0.5, 0.5, 0.5, 1.0]));
                }
            }
        }
    }

    /// One triangle per cell whose corners straddle the surface, colored by the inside corner
    struct SignChange;

    impl CellKernel for SignChange {
        fn process_cell(&self, volume: &VolumeView<'_>, cell: UVec3, sink: &TriangleSink<'_>) {
            let corners = volume.corners(cell);
            let inside = corners.iter().filter(|s| s.is_inside()).count();
            if inside > 0 && inside < 8 {
                let color = corners.iter().find(|s| s.is_inside()).map(|s| s.color).unwrap_or_default();
                let p = cell.as_vec3();
                sink.push(Triangle::new(p, p + Vec3::X, p + Vec3::Z, [color[0], color[1], color[2], 1.0]));
            }
        }
    }

    /// Reports more triangles per cell than the buffer can hold
    struct Overflowing;

    impl CellKernel for Overflowing {
        fn process_cell(&self, _volume: &VolumeView<'_>, cell: UVec3, sink: &TriangleSink<'_>) {
            for _ in 0..6 {
                sink.push(Triangle::new(cell.as_vec3(), Vec3::ZERO, Vec3::ZERO, [0.0; 4]));
            }
        }
    }

    fn volume(side: u32) -> SampleVolume {
        SampleVolume::filled(UVec3::splat(side + 1), Sample::new(1.0, [0.0; 3]))
    }

    #[test]
    fn test_zero_triangles() {
        let mut pipeline = MeshPipeline::new(CpuBackend::new(FixedCount(0)), MeshingConfig::default()).unwrap();
        let mesh = pipeline.extract(&volume(4)).unwrap();
        assert!(mesh.positions.is_empty());
        assert!(mesh.colors.is_empty());
        assert!(mesh.indices.is_empty());
        assert_eq!(pipeline.backend().live_buffers(), 0);
    }

    #[test]
    fn test_n_triangles() {
        let mut pipeline = MeshPipeline::new(CpuBackend::new(FixedCount(7)), MeshingConfig::default()).unwrap();
        let mesh = pipeline.extract(&volume(4)).unwrap();
        assert_eq!(mesh.positions.len(), 21);
        assert_eq!(mesh.colors.len(), 21);
        assert_eq!(mesh.indices, (0..21).collect::<Vec<u32>>());
        assert_eq!(mesh.positions[3], Vec3::ONE);
        assert_eq!(pipeline.backend().live_buffers(), 0);
    }

    #[test]
    fn test_voxel_size_scales_positions() {
        let config = MeshingConfig { voxel_size: 0.5, ..Default::default() };
        let mut pipeline = MeshPipeline::new(CpuBackend::new(FixedCount(2)), config).unwrap();
        let mesh = pipeline.extract(&volume(2)).unwrap();
        assert_eq!(mesh.positions[4], Vec3::new(1.0, 0.5, 0.5));
    }

    #[test]
    fn test_overflow_is_fatal() {
        let mut pipeline = MeshPipeline::new(CpuBackend::new(Overflowing), MeshingConfig::default()).unwrap();
        let result = pipeline.extract(&volume(2));
        assert!(matches!(result, Err(Error::TriangleOverflow { count: 48, capacity: 40 })));
        assert_eq!(pipeline.backend().live_buffers(), 0);
    }

    #[test]
    fn test_allocation_failure_releases() {
        // Samples fit, triangles (5 * 512 * 64 bytes) do not
        let backend = CpuBackend::new(FixedCount(1)).with_memory_limit(16 * 1024);
        let mut pipeline = MeshPipeline::new(backend, MeshingConfig::default()).unwrap();
        let result = pipeline.extract(&volume(8));
        assert!(matches!(result, Err(Error::BufferAllocation { label: "mesh_triangles", .. })));
        assert_eq!(pipeline.backend().live_buffers(), 0);
        assert_eq!(pipeline.backend().allocated_bytes(), 0);
    }

    #[test]
    fn test_no_cells() {
        let backend = CpuBackend::new(FixedCount(3)).with_memory_limit(0);
        let mut pipeline = MeshPipeline::new(backend, MeshingConfig::default()).unwrap();
        let flat = SampleVolume::filled(UVec3::new(5, 1, 5), Sample::default());
        assert!(pipeline.extract(&flat).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_config() {
        let config = MeshingConfig { workgroup_size: 0, ..Default::default() };
        assert!(MeshPipeline::new(CpuBackend::new(FixedCount(0)), config).is_err());
        let config = MeshingConfig { workgroup_size: 8, ..Default::default() };
        assert!(MeshPipeline::new(CpuBackend::new(FixedCount(0)), config).is_err());
    }

    #[test]
    fn test_mesh_chunk_with_neighbor() {
        // Plane at x = 2.5 through a 2x2x2 block of depth-2 chunks
        let mut world = World::new(2).unwrap();
        let red = [1.0, 0.0, 0.0];
        for cz in 0..2 {
            for cy in 0..2 {
                for cx in 0..2 {
                    let mut chunk = Chunk::new(ChunkCoord::new(cx, cy, cz), 2).unwrap();
                    chunk.fill_with(|p| Sample::new((cx * 4 + p.x as i32) as f32 - 2.5, red));
                    world.insert_chunk(chunk).unwrap();
                }
            }
        }

        let mut pipeline = MeshPipeline::new(CpuBackend::new(SignChange), MeshingConfig::default()).unwrap();
        let mesh = pipeline.mesh_chunk(&world, ChunkCoord::new(0, 0, 0)).unwrap();

        // Only the x == 2 cells straddle the plane. The x == 3 cells read the
        // neighbor's 1.5 on their +x side and stay outside.
        assert_eq!(mesh.triangle_count(), 16);
        assert!(mesh.colors.iter().all(|c| *c == [1.0, 0.0, 0.0, 1.0]));
        assert!(mesh.positions.iter().step_by(3).all(|p| p.x == 2.0));
    }

    #[test]
    fn test_mesh_chunk_missing_neighbor_closes_surface() {
        // Solid chunk with nothing around it: only boundary cells touch OUTSIDE padding
        let mut world = World::new(1).unwrap();
        let mut chunk = Chunk::new(ChunkCoord::new(0, 0, 0), 1).unwrap();
        chunk.fill_with(|_| Sample::new(-1.0, [0.0, 1.0, 0.0]));
        world.insert_chunk(chunk).unwrap();

        let mut pipeline = MeshPipeline::new(CpuBackend::new(SignChange), MeshingConfig::default()).unwrap();
        let mesh = pipeline.mesh_chunk(&world, ChunkCoord::new(0, 0, 0)).unwrap();

        // Every cell except the origin one has a corner in the padding
        assert_eq!(mesh.triangle_count(), 7);
    }
}
