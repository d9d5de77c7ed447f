//! Voxel data structures and operations

pub mod sample;
pub mod dense;
pub mod chunk;
pub mod world;

pub use sample::Sample;
pub use dense::DenseOctree;
pub use chunk::{Chunk, ChunkCoord};
pub use world::{ChunkSource, World};
