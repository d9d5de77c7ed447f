//! Error types for voxmesh

use glam::UVec3;
use thiserror::Error;

use crate::voxel::chunk::ChunkCoord;

/// Main error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    #[error("coordinate {pos} outside of [0, {side})")]
    OutOfRange { pos: UVec3, side: u32 },

    #[error("invalid octree depth {0} (max {max})", max = crate::voxel::dense::MAX_DEPTH)]
    InvalidDepth(u8),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("chunk {0:?} is not loaded")]
    ChunkNotLoaded(ChunkCoord),

    #[error("chunk depth mismatch: expected {expected}, found {found}")]
    ChunkDepthMismatch { expected: u8, found: u8 },

    #[error("failed to allocate compute buffer '{label}' ({size} bytes)")]
    BufferAllocation { label: &'static str, size: u64 },

    #[error("kernel reported {count} triangles but only {capacity} fit the output buffer")]
    TriangleOverflow { count: u32, capacity: u32 },

    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("Kernel error: {0}")]
    Kernel(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Wrap a reader failure hit while decoding a delta stream.
    ///
    /// Running out of bytes mid-tree means the stream was truncated or was
    /// produced by a tree of a different depth.
    pub(crate) fn from_stream(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                Error::Decode("delta stream ended before the tree was complete".into())
            }
            _ => Error::Decode(err.to_string()),
        }
    }
}
