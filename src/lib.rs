//! Voxmesh - dense voxel chunk storage and chunk mesh extraction

pub mod core;
pub mod voxel;
pub mod meshing;
pub mod compute;
pub mod storage;
