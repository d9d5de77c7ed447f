//! Chunk system for managing cubic regions of voxel space

use glam::{IVec3, UVec3, Vec3};

use crate::core::Result;
use crate::voxel::dense::{DenseOctree, Iter};
use crate::voxel::sample::{decode_sample, encode_sample, Sample};

/// Integer coordinate identifying a chunk in the world grid
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChunkCoord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl ChunkCoord {
    /// Create a new chunk coordinate
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Neighbor displaced by `offset` chunks
    pub fn offset(&self, offset: IVec3) -> Self {
        Self {
            x: self.x + offset.x,
            y: self.y + offset.y,
            z: self.z + offset.z,
        }
    }

    /// Split a world voxel position into its chunk and the local position inside it
    pub fn from_voxel(pos: IVec3, side: u32) -> (Self, UVec3) {
        let side = side as i32;
        let chunk = IVec3::new(pos.x.div_euclid(side), pos.y.div_euclid(side), pos.z.div_euclid(side));
        let local = IVec3::new(pos.x.rem_euclid(side), pos.y.rem_euclid(side), pos.z.rem_euclid(side));
        (chunk.into(), local.as_uvec3())
    }

    /// World voxel position of this chunk's (0, 0, 0) voxel
    pub fn voxel_origin(&self, side: u32) -> IVec3 {
        IVec3::from(*self) * side as i32
    }

    /// Convert world position to chunk coordinate
    pub fn from_world_pos(pos: Vec3, chunk_size: f32) -> Self {
        Self {
            x: (pos.x / chunk_size).floor() as i32,
            y: (pos.y / chunk_size).floor() as i32,
            z: (pos.z / chunk_size).floor() as i32,
        }
    }

    /// Get the world-space origin (minimum corner) of this chunk
    pub fn world_origin(&self, chunk_size: f32) -> Vec3 {
        Vec3::new(self.x as f32, self.y as f32, self.z as f32) * chunk_size
    }
}

impl From<IVec3> for ChunkCoord {
    fn from(v: IVec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

impl From<ChunkCoord> for IVec3 {
    fn from(c: ChunkCoord) -> Self {
        IVec3::new(c.x, c.y, c.z)
    }
}

/// A cubic region of 2^depth voxels per side
#[derive(Clone, Debug)]
pub struct Chunk {
    /// Coordinate of this chunk in the world grid
    pub coord: ChunkCoord,
    /// Dense octree holding one sample per voxel
    voxels: DenseOctree<Sample>,
}

impl Chunk {
    /// Create a chunk with every voxel at `Sample::default()`
    pub fn new(coord: ChunkCoord, depth: u8) -> Result<Self> {
        Ok(Self {
            coord,
            voxels: DenseOctree::new(depth)?,
        })
    }

    /// Octree depth of this chunk
    pub fn depth(&self) -> u8 {
        self.voxels.depth()
    }

    /// Voxels per axis
    pub fn side(&self) -> u32 {
        self.voxels.side()
    }

    /// Read the sample at a local position (must be inside the chunk)
    pub fn get(&self, local: UVec3) -> Sample {
        *self.voxels.get(local)
    }

    /// Write a sample at a local position as an unsaved edit
    pub fn set(&mut self, local: UVec3, sample: Sample) {
        self.voxels.set(local, sample);
    }

    /// Write a sample without recording it as an edit
    pub fn set_clean(&mut self, local: UVec3, sample: Sample) {
        self.voxels.set_clean(local, sample);
    }

    /// Initialize every voxel from `f(local)` as a clean load
    pub fn fill_with(&mut self, mut f: impl FnMut(UVec3) -> Sample) {
        let side = self.side();
        for z in 0..side {
            for y in 0..side {
                for x in 0..side {
                    let local = UVec3::new(x, y, z);
                    self.voxels.set_clean(local, f(local));
                }
            }
        }
    }

    /// Iterate `(local position, sample)` over every voxel
    pub fn iter(&self) -> impl Iterator<Item = (UVec3, Sample)> + '_ {
        self.voxels.iter().map(|(pos, sample)| (pos, *sample))
    }

    /// Borrowing iterator over the underlying octree
    pub fn voxels(&self) -> Iter<'_, Sample> {
        self.voxels.iter()
    }

    /// Whether this chunk has edits that were not serialized yet
    pub fn is_dirty(&self) -> bool {
        self.voxels.is_dirty()
    }

    /// Serialize the edited subtrees, keeping them marked as unsaved
    pub fn delta_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.voxels.write_delta(&mut bytes, encode_sample)?;
        Ok(bytes)
    }

    /// Forget pending edits (after they were persisted elsewhere)
    pub fn mark_clean(&mut self) {
        self.voxels.mark_clean();
    }

    /// Serialize the edited subtrees and mark the chunk clean
    pub fn encode_delta(&mut self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.voxels.serialize(&mut bytes, encode_sample)?;
        Ok(bytes)
    }

    /// Apply a delta produced by a chunk of the same depth
    pub fn apply_delta(&mut self, bytes: &[u8]) -> Result<()> {
        self.voxels.deserialize_slice(bytes, decode_sample)
    }
}
