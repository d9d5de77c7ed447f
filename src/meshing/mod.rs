//! Chunk mesh extraction
//!
//! [`assembler`] pads a chunk with its neighbors' boundary samples,
//! [`pipeline`] runs a surface-extraction kernel over the result.

pub mod assembler;
pub mod config;
pub mod mesh;
pub mod pipeline;
pub mod volume;

pub use assembler::assemble_volume;
pub use config::MeshingConfig;
pub use mesh::{ChunkMesh, Triangle};
pub use pipeline::MeshPipeline;
pub use volume::SampleVolume;
