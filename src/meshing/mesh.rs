//! Triangle records written by extraction kernels and the flattened chunk mesh

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// One kernel output triangle - exactly 64 bytes
///
/// Positions are padded to `[f32; 4]` so the struct matches std430 layout of
/// `array<Triangle>` in WGSL (w unused).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Triangle {
    pub a: [f32; 4],
    pub b: [f32; 4],
    pub c: [f32; 4],
    /// RGBA color shared by all three vertices
    pub color: [f32; 4],
}

impl Triangle {
    pub fn new(a: Vec3, b: Vec3, c: Vec3, color: [f32; 4]) -> Self {
        Self {
            a: a.extend(0.0).to_array(),
            b: b.extend(0.0).to_array(),
            c: c.extend(0.0).to_array(),
            color,
        }
    }

    /// Vertex positions in winding order
    pub fn positions(&self) -> [Vec3; 3] {
        [
            Vec3::new(self.a[0], self.a[1], self.a[2]),
            Vec3::new(self.b[0], self.b[1], self.b[2]),
            Vec3::new(self.c[0], self.c[1], self.c[2]),
        ]
    }
}

/// Size of a [`Triangle`] in kernel buffers
pub const TRIANGLE_SIZE: u64 = std::mem::size_of::<Triangle>() as u64;

/// Renderable mesh for one chunk, in chunk-local coordinates
///
/// Vertices are not shared: triangle `i` owns vertices `3i..3i+3` and
/// `indices` is simply `0..3N`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChunkMesh {
    pub positions: Vec<Vec3>,
    pub colors: Vec<[f32; 4]>,
    pub indices: Vec<u32>,
}

impl ChunkMesh {
    /// Flatten triangles into vertex streams, scaling positions by `scale`
    pub fn from_triangles(triangles: &[Triangle], scale: f32) -> Self {
        let vertex_count = triangles.len() * 3;
        let mut mesh = Self {
            positions: Vec::with_capacity(vertex_count),
            colors: Vec::with_capacity(vertex_count),
            indices: (0..vertex_count as u32).collect(),
        };

        for tri in triangles {
            for pos in tri.positions() {
                mesh.positions.push(pos * scale);
                mesh.colors.push(tri.color);
            }
        }

        mesh
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }
}
