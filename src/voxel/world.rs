//! World container managing multiple chunks

use std::collections::HashMap;

use glam::IVec3;

use super::chunk::{Chunk, ChunkCoord};
use super::dense::MAX_DEPTH;
use super::sample::Sample;
use crate::core::{Error, Result};

/// Anything that can hand out loaded chunks by coordinate
///
/// The distance-field assembler only needs read access to a chunk and its
/// positive-side neighbors; an unloaded chunk is simply `None`.
pub trait ChunkSource {
    fn chunk(&self, coord: ChunkCoord) -> Option<&Chunk>;
}

impl ChunkSource for HashMap<ChunkCoord, Chunk> {
    fn chunk(&self, coord: ChunkCoord) -> Option<&Chunk> {
        self.get(&coord)
    }
}

/// Container for managing a world composed of multiple chunks of one depth
pub struct World {
    /// Octree depth shared by every chunk
    depth: u8,
    /// Map from chunk coordinates to loaded chunks
    chunks: HashMap<ChunkCoord, Chunk>,
}

impl World {
    /// Create a new empty world whose chunks are `2^depth` voxels per side
    pub fn new(depth: u8) -> Result<Self> {
        if depth > MAX_DEPTH {
            return Err(Error::InvalidDepth(depth));
        }
        Ok(Self {
            depth,
            chunks: HashMap::new(),
        })
    }

    /// Octree depth of every chunk in this world
    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Voxels per chunk side
    pub fn chunk_side(&self) -> u32 {
        1 << self.depth
    }

    /// Get immutable reference to a chunk by coordinate
    pub fn get_chunk(&self, coord: ChunkCoord) -> Option<&Chunk> {
        self.chunks.get(&coord)
    }

    /// Get mutable reference to a chunk by coordinate
    pub fn get_chunk_mut(&mut self, coord: ChunkCoord) -> Option<&mut Chunk> {
        self.chunks.get_mut(&coord)
    }

    /// Get a chunk, creating an all-default one if it is not loaded
    pub fn get_or_create_chunk(&mut self, coord: ChunkCoord) -> Result<&mut Chunk> {
        if !self.chunks.contains_key(&coord) {
            self.chunks.insert(coord, Chunk::new(coord, self.depth)?);
        }
        self.chunks.get_mut(&coord).ok_or(Error::ChunkNotLoaded(coord))
    }

    /// Insert a chunk into the world
    /// If a chunk already exists at this coordinate, it will be replaced
    pub fn insert_chunk(&mut self, chunk: Chunk) -> Result<()> {
        if chunk.depth() != self.depth {
            return Err(Error::ChunkDepthMismatch {
                expected: self.depth,
                found: chunk.depth(),
            });
        }
        self.chunks.insert(chunk.coord, chunk);
        Ok(())
    }

    /// Remove a chunk from the world and return it
    pub fn remove_chunk(&mut self, coord: ChunkCoord) -> Option<Chunk> {
        self.chunks.remove(&coord)
    }

    /// Get the number of loaded chunks
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Get an iterator over all loaded chunk coordinates
    pub fn loaded_coords(&self) -> impl Iterator<Item = &ChunkCoord> {
        self.chunks.keys()
    }

    /// Coordinates of chunks holding edits that have not been serialized
    pub fn dirty_chunks(&self) -> Vec<ChunkCoord> {
        self.chunks
            .values()
            .filter(|c| c.is_dirty())
            .map(|c| c.coord)
            .collect()
    }

    /// Read a voxel by world voxel position, `None` if its chunk is not loaded
    pub fn get_voxel(&self, pos: IVec3) -> Option<Sample> {
        let (coord, local) = ChunkCoord::from_voxel(pos, self.chunk_side());
        self.chunks.get(&coord).map(|c| c.get(local))
    }

    /// Edit a voxel by world voxel position, creating its chunk on demand
    pub fn set_voxel(&mut self, pos: IVec3, sample: Sample) -> Result<ChunkCoord> {
        let (coord, local) = ChunkCoord::from_voxel(pos, self.chunk_side());
        self.get_or_create_chunk(coord)?.set(local, sample);
        Ok(coord)
    }
}

impl ChunkSource for World {
    fn chunk(&self, coord: ChunkCoord) -> Option<&Chunk> {
        self.chunks.get(&coord)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::UVec3;

    #[test]
    fn test_new_world() {
        let world = World::new(3).unwrap();
        assert_eq!(world.chunk_count(), 0);
        assert_eq!(world.chunk_side(), 8);
    }

    #[test]
    fn test_new_world_depth_limit() {
        assert!(matches!(World::new(MAX_DEPTH + 1), Err(Error::InvalidDepth(d)) if d == MAX_DEPTH + 1));
        assert!(matches!(World::new(32), Err(Error::InvalidDepth(32))));
        assert_eq!(World::new(MAX_DEPTH).unwrap().chunk_side(), 256);
    }

    #[test]
    fn test_insert_and_get_chunk() {
        let mut world = World::new(2).unwrap();
        let coord = ChunkCoord::new(1, 2, 3);
        world.insert_chunk(Chunk::new(coord, 2).unwrap()).unwrap();
        assert_eq!(world.chunk_count(), 1);

        let retrieved = world.get_chunk(coord);
        assert!(retrieved.is_some());
        assert_eq!(retrieved.unwrap().coord, coord);
        assert!(world.chunk(ChunkCoord::new(0, 0, 0)).is_none());
    }

    #[test]
    fn test_insert_wrong_depth() {
        let mut world = World::new(2).unwrap();
        let result = world.insert_chunk(Chunk::new(ChunkCoord::new(0, 0, 0), 3).unwrap());
        assert!(matches!(result, Err(Error::ChunkDepthMismatch { expected: 2, found: 3 })));
    }

    #[test]
    fn test_remove_chunk() {
        let mut world = World::new(1).unwrap();
        let coord = ChunkCoord::new(5, 5, 5);
        world.insert_chunk(Chunk::new(coord, 1).unwrap()).unwrap();

        let removed = world.remove_chunk(coord);
        assert!(removed.is_some());
        assert_eq!(world.chunk_count(), 0);
        assert!(world.remove_chunk(coord).is_none());
    }

    #[test]
    fn test_set_voxel_creates_chunk() {
        let mut world = World::new(2).unwrap();
        let sample = Sample::new(-1.0, [1.0, 1.0, 1.0]);

        let coord = world.set_voxel(IVec3::new(-1, 4, 0), sample).unwrap();
        assert_eq!(coord, ChunkCoord::new(-1, 1, 0));
        assert_eq!(world.get_voxel(IVec3::new(-1, 4, 0)), Some(sample));
        assert_eq!(world.get_chunk(coord).unwrap().get(UVec3::new(3, 0, 0)), sample);
        assert_eq!(world.get_voxel(IVec3::new(100, 0, 0)), None);
    }

    #[test]
    fn test_dirty_chunks() {
        let mut world = World::new(2).unwrap();
        world.insert_chunk(Chunk::new(ChunkCoord::new(0, 0, 0), 2).unwrap()).unwrap();
        world.set_voxel(IVec3::new(4, 0, 0), Sample::default()).unwrap();

        assert_eq!(world.dirty_chunks(), vec![ChunkCoord::new(1, 0, 0)]);

        world.get_chunk_mut(ChunkCoord::new(1, 0, 0)).unwrap().encode_delta().unwrap();
        assert!(world.dirty_chunks().is_empty());
    }

    #[test]
    fn test_dirty_chunks_depth_zero() {
        let mut world = World::new(0).unwrap();
        let coord = world.set_voxel(IVec3::new(3, -1, 0), Sample::new(-3.0, [0.0; 3])).unwrap();
        assert_eq!(coord, ChunkCoord::new(3, -1, 0));
        assert_eq!(world.dirty_chunks(), vec![coord]);
    }
}
