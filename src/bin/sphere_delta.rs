//! Sphere delta demo - edits a generated sphere, logs the edits, replays them.
//!
//! Usage: cargo run --release --bin sphere_delta -- [OPTIONS]
//!
//! Options:
//!   --dir <DIR>        Delta log directory (default: "deltas")
//!   --config <PATH>    Meshing config JSON (default: built-in defaults)
//!   --dent <VOXELS>    Radius of the carved dent (default: chunk side / 4)

use std::path::PathBuf;
use std::time::Instant;

use glam::{IVec3, UVec3, Vec3};

use voxmesh::core::Result;
use voxmesh::meshing::{assemble_volume, MeshingConfig};
use voxmesh::storage::DeltaLog;
use voxmesh::voxel::sample::{rgb8_to_f32, Sample};
use voxmesh::voxel::{Chunk, ChunkCoord, World};

/// Chunks per axis of the demo block
const GRID: i32 = 2;

fn sphere_sample(world_pos: IVec3, center: Vec3, radius: f32) -> Sample {
    let p = world_pos.as_vec3();
    let height = ((p.y - center.y) / radius * 0.5 + 0.5).clamp(0.0, 1.0);
    let low = rgb8_to_f32(90, 70, 50);
    let high = rgb8_to_f32(200, 200, 210);
    let color = [
        low[0] + (high[0] - low[0]) * height,
        low[1] + (high[1] - low[1]) * height,
        low[2] + (high[2] - low[2]) * height,
    ];
    Sample::new(p.distance(center) - radius, color)
}

/// Fill a GRID³ block of chunks with the generated sphere (no edits)
fn generate(depth: u8, center: Vec3, radius: f32) -> Result<World> {
    let mut world = World::new(depth)?;
    let side = world.chunk_side();
    for z in 0..GRID {
        for y in 0..GRID {
            for x in 0..GRID {
                let coord = ChunkCoord::new(x, y, z);
                let origin = coord.voxel_origin(side);
                let mut chunk = Chunk::new(coord, depth)?;
                chunk.fill_with(|local| sphere_sample(origin + local.as_ivec3(), center, radius));
                world.insert_chunk(chunk)?;
            }
        }
    }
    Ok(world)
}

fn main() -> Result<()> {
    voxmesh::core::logging::init();

    let args: Vec<String> = std::env::args().collect();
    let dir = parse_str_arg(&args, "--dir").unwrap_or_else(|| "deltas".to_string());
    let config = match parse_str_arg(&args, "--config") {
        Some(path) => MeshingConfig::load_sync(&PathBuf::from(path))?,
        None => MeshingConfig::default(),
    };

    let depth = config.chunk_depth;
    let side = config.chunk_side();
    let extent = (side as i32 * GRID) as f32;
    let center = Vec3::splat(extent * 0.5);
    let radius = extent * 0.375;
    let dent = parse_u32_arg(&args, "--dent").unwrap_or((side / 4).max(1)) as i32;

    log::info!("Generating {}^3 chunks of {}^3 voxels", GRID, side);
    let start = Instant::now();
    let mut world = generate(depth, center, radius)?;
    log::info!("Generated in {:.2?}", start.elapsed());

    // Carve a dent where the sphere meets the +y axis
    let dent_center = (center + Vec3::Y * radius).as_ivec3();
    let mut edits = 0;
    for z in -dent..=dent {
        for y in -dent..=dent {
            for x in -dent..=dent {
                let offset = IVec3::new(x, y, z);
                if offset.length_squared() > dent * dent {
                    continue;
                }
                let pos = dent_center + offset;
                if let Some(sample) = world.get_voxel(pos) {
                    let carve = dent as f32 - offset.as_vec3().length();
                    world.set_voxel(pos, Sample::new(sample.distance.max(carve), sample.color))?;
                    edits += 1;
                }
            }
        }
    }
    log::info!("Carved {} voxels across {} chunks", edits, world.dirty_chunks().len());

    let deltas = DeltaLog::open(&dir)?;
    for coord in world.dirty_chunks() {
        let Some(chunk) = world.get_chunk_mut(coord) else {
            continue;
        };
        deltas.append(chunk)?;
        let bytes = std::fs::metadata(deltas.path_for(coord))?.len();
        log::info!("{:?}: delta log now {} bytes", coord, bytes);
    }

    // Regenerate from scratch and bring the edits back from disk
    let mut restored = generate(depth, center, radius)?;
    let coords: Vec<ChunkCoord> = restored.loaded_coords().copied().collect();
    let mut replayed = 0;
    for coord in &coords {
        if let Some(chunk) = restored.get_chunk_mut(*coord) {
            replayed += deltas.replay(chunk)?;
        }
    }

    let mut mismatched = 0;
    for coord in &coords {
        if let (Some(a), Some(b)) = (world.get_chunk(*coord), restored.get_chunk(*coord)) {
            mismatched += a.iter().zip(b.iter()).filter(|(x, y)| x.1 != y.1).count();
        }
    }
    log::info!("Replayed {} records, {} voxels differ from the edited world", replayed, mismatched);

    for coord in &coords {
        let volume = assemble_volume(&restored, *coord)?;
        let inside = volume.as_slice().iter().filter(|s| s.is_inside()).count();
        let padding = volume
            .as_slice()
            .iter()
            .filter(|s| **s == Sample::OUTSIDE)
            .count();
        let dims: UVec3 = volume.dims();
        log::info!(
            "{:?}: volume {}x{}x{}, {} cells, {} inside samples, {} outside padding",
            coord,
            dims.x,
            dims.y,
            dims.z,
            volume.cell_count(),
            inside,
            padding
        );
    }

    Ok(())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn parse_u32_arg(args: &[String], flag: &str) -> Option<u32> {
    parse_str_arg(args, flag).and_then(|s| s.parse().ok())
}
