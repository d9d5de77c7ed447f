//! Distance-field assembly: a chunk's samples plus one stitched boundary layer
//!
//! Surface extraction evaluates each unit cell from its 8 corner samples, so
//! the cells along a chunk's positive faces need the first sample row of the
//! next chunk over. The assembled volume is `(side + 1)³`:
//!
//! ```text
//!   y
//!   ^   +x+y edge   +x+y+z corner
//!   |  +---------+.
//!   |  |         | |  +x face   <- x = side, copied from neighbor's x = 0
//!   |  |  chunk  | |
//!   |  |  side³  | |
//!   |  +---------+ |
//!   |   `---------'   +y face on top, +z face behind
//!   +--------------> x
//! ```
//!
//! Absent neighbors leave their slab at [`Sample::OUTSIDE`], so the surface
//! closes at the boundary instead of reading garbage.

use glam::{IVec3, UVec3};

use super::volume::SampleVolume;
use crate::core::{Error, Result};
use crate::voxel::chunk::ChunkCoord;
use crate::voxel::sample::Sample;
use crate::voxel::world::ChunkSource;

/// Positive-side neighbors whose near boundary pads the volume:
/// three faces, three edges, one corner.
pub const NEIGHBOR_OFFSETS: [IVec3; 7] = [
    IVec3::new(1, 0, 0),
    IVec3::new(0, 1, 0),
    IVec3::new(0, 0, 1),
    IVec3::new(1, 1, 0),
    IVec3::new(1, 0, 1),
    IVec3::new(0, 1, 1),
    IVec3::new(1, 1, 1),
];

/// Destination range of a neighbor slab along one axis
fn slab_range(offset: i32, side: u32) -> std::ops::Range<u32> {
    if offset == 1 { side..side + 1 } else { 0..side }
}

/// Build the padded sample volume for the chunk at `coord`
pub fn assemble_volume<S>(source: &S, coord: ChunkCoord) -> Result<SampleVolume>
where
    S: ChunkSource + ?Sized,
{
    let chunk = source.chunk(coord).ok_or(Error::ChunkNotLoaded(coord))?;
    let side = chunk.side();
    let mut volume = SampleVolume::filled(UVec3::splat(side + 1), Sample::OUTSIDE);

    for (pos, sample) in chunk.iter() {
        volume.set(pos, sample);
    }

    let mut missing = 0;
    for offset in NEIGHBOR_OFFSETS {
        let Some(neighbor) = source.chunk(coord.offset(offset)) else {
            missing += 1;
            continue;
        };
        if neighbor.depth() != chunk.depth() {
            return Err(Error::ChunkDepthMismatch {
                expected: chunk.depth(),
                found: neighbor.depth(),
            });
        }

        for z in slab_range(offset.z, side) {
            for y in slab_range(offset.y, side) {
                for x in slab_range(offset.x, side) {
                    let dst = UVec3::new(x, y, z);
                    // Padding coordinates (== side) wrap to the neighbor's 0 layer
                    volume.set(dst, neighbor.get(dst % side));
                }
            }
        }
    }

    log::trace!(
        "Assembled {:?}: {}^3 samples, {} of {} neighbors missing",
        coord,
        side + 1,
        missing,
        NEIGHBOR_OFFSETS.len()
    );

    Ok(volume)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::{Chunk, World};
    use std::collections::HashMap;

    fn tagged(tag: f32) -> impl FnMut(UVec3) -> Sample {
        move |p| Sample::new(tag + (p.x + p.y * 10 + p.z * 100) as f32, [tag, 0.0, 0.0])
    }

    fn is_padding(pos: UVec3, side: u32) -> bool {
        pos.x == side || pos.y == side || pos.z == side
    }

    #[test]
    fn test_lone_chunk_padding_is_outside() {
        let mut world = World::new(1).unwrap();
        let coord = ChunkCoord::new(0, 0, 0);
        let mut chunk = Chunk::new(coord, 1).unwrap();
        chunk.fill_with(tagged(0.0));
        world.insert_chunk(chunk).unwrap();

        let volume = assemble_volume(&world, coord).unwrap();
        assert_eq!(volume.dims(), UVec3::splat(3));

        let chunk = world.get_chunk(coord).unwrap();
        for z in 0..3 {
            for y in 0..3 {
                for x in 0..3 {
                    let pos = UVec3::new(x, y, z);
                    if is_padding(pos, 2) {
                        assert_eq!(volume.get(pos), Sample::OUTSIDE, "{pos}");
                    } else {
                        assert_eq!(volume.get(pos), chunk.get(pos), "{pos}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_missing_target() {
        let world = World::new(1).unwrap();
        let result = assemble_volume(&world, ChunkCoord::new(3, 3, 3));
        assert!(matches!(result, Err(Error::ChunkNotLoaded(_))));
    }

    #[test]
    fn test_face_neighbor_copied() {
        let side = 4;
        let mut chunks = HashMap::new();
        let coord = ChunkCoord::new(2, 0, -1);
        let mut own = Chunk::new(coord, 2).unwrap();
        own.fill_with(tagged(0.0));
        let mut right = Chunk::new(coord.offset(IVec3::X), 2).unwrap();
        right.fill_with(tagged(1000.0));
        chunks.insert(own.coord, own);
        chunks.insert(right.coord, right);

        let volume = assemble_volume(&chunks, coord).unwrap();
        let right = &chunks[&coord.offset(IVec3::X)];
        for z in 0..side {
            for y in 0..side {
                assert_eq!(volume.get(UVec3::new(side, y, z)), right.get(UVec3::new(0, y, z)));
            }
        }
        // +y face has no neighbor
        assert_eq!(volume.get(UVec3::new(1, side, 1)), Sample::OUTSIDE);
        // Edge and corner need the diagonal chunks, which are absent
        assert_eq!(volume.get(UVec3::new(side, side, 0)), Sample::OUTSIDE);
        assert_eq!(volume.get(UVec3::new(side, side, side)), Sample::OUTSIDE);
    }

    #[test]
    fn test_all_neighbors_stitched() {
        let mut world = World::new(2).unwrap();
        let origin = ChunkCoord::new(0, 0, 0);
        for (i, offset) in std::iter::once(IVec3::ZERO).chain(NEIGHBOR_OFFSETS).enumerate() {
            let mut chunk = Chunk::new(origin.offset(offset), 2).unwrap();
            chunk.fill_with(tagged(i as f32 * 1000.0));
            world.insert_chunk(chunk).unwrap();
        }

        let volume = assemble_volume(&world, origin).unwrap();
        let side = 4;
        // Every sample must match the world voxel it stands for
        for z in 0..=side {
            for y in 0..=side {
                for x in 0..=side {
                    let pos = UVec3::new(x, y, z);
                    let expected = world.get_voxel(pos.as_ivec3()).unwrap();
                    assert_eq!(volume.get(pos), expected, "{pos}");
                }
            }
        }

        // Corner comes from the (1,1,1) chunk's origin voxel
        let corner = world.get_chunk(ChunkCoord::new(1, 1, 1)).unwrap().get(UVec3::ZERO);
        assert_eq!(volume.get(UVec3::splat(side)), corner);
    }

    #[test]
    fn test_neighbor_depth_mismatch() {
        let mut chunks = HashMap::new();
        let coord = ChunkCoord::new(0, 0, 0);
        chunks.insert(coord, Chunk::new(coord, 2).unwrap());
        let odd = ChunkCoord::new(0, 1, 0);
        chunks.insert(odd, Chunk::new(odd, 1).unwrap());

        let result = assemble_volume(&chunks, coord);
        assert!(matches!(result, Err(Error::ChunkDepthMismatch { expected: 2, found: 1 })));
    }
}
