//! Meshing configuration, loadable from JSON

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::compute::{MAX_TRIANGLES_PER_CELL, MAX_WORKGROUP_INVOCATIONS};
use crate::core::{Error, Result};
use crate::voxel::dense::MAX_DEPTH;

/// Tunables for chunk storage and mesh extraction
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshingConfig {
    /// Octree depth of every chunk (side = 2^depth)
    pub chunk_depth: u8,
    /// Invocations per workgroup axis. Must match the kernel's
    /// `@workgroup_size` when running on the GPU, and its cube may not exceed
    /// [`MAX_WORKGROUP_INVOCATIONS`].
    pub workgroup_size: u32,
    /// World units per voxel; emitted positions are scaled by this
    pub voxel_size: f32,
    /// Triangle slots reserved per cell. Marching cubes needs
    /// [`MAX_TRIANGLES_PER_CELL`]; kernels that emit more may raise it.
    pub max_triangles_per_cell: u32,
}

impl Default for MeshingConfig {
    fn default() -> Self {
        Self {
            chunk_depth: 5,
            workgroup_size: 4,
            voxel_size: 1.0,
            max_triangles_per_cell: MAX_TRIANGLES_PER_CELL,
        }
    }
}

impl MeshingConfig {
    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.chunk_depth > MAX_DEPTH {
            return Err(Error::InvalidDepth(self.chunk_depth));
        }
        if self.workgroup_size == 0 {
            return Err(Error::Config("workgroup_size must be at least 1".into()));
        }
        if self.workgroup_size.saturating_pow(3) > MAX_WORKGROUP_INVOCATIONS {
            return Err(Error::Config(format!(
                "workgroup_size {} gives more than {} invocations per workgroup",
                self.workgroup_size, MAX_WORKGROUP_INVOCATIONS
            )));
        }
        if !(self.voxel_size.is_finite() && self.voxel_size > 0.0) {
            return Err(Error::Config(format!("voxel_size must be positive, got {}", self.voxel_size)));
        }
        if self.max_triangles_per_cell < MAX_TRIANGLES_PER_CELL {
            return Err(Error::Config(format!(
                "max_triangles_per_cell must be at least {}, got {}",
                MAX_TRIANGLES_PER_CELL, self.max_triangles_per_cell
            )));
        }
        Ok(())
    }

    /// Voxels per chunk side
    pub fn chunk_side(&self) -> u32 {
        1 << self.chunk_depth
    }

    /// Save to file (sync)
    pub fn save_sync(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load from file (sync) and validate
    pub fn load_sync(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MeshingConfig::default();
        assert_eq!(config.chunk_depth, 5);
        assert_eq!(config.chunk_side(), 32);
        assert_eq!(config.workgroup_size, 4);
        assert_eq!(config.voxel_size, 1.0);
        assert_eq!(config.max_triangles_per_cell, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects() {
        let bad_depth = MeshingConfig { chunk_depth: MAX_DEPTH + 1, ..Default::default() };
        assert!(matches!(bad_depth.validate(), Err(Error::InvalidDepth(_))));

        let bad_group = MeshingConfig { workgroup_size: 0, ..Default::default() };
        assert!(matches!(bad_group.validate(), Err(Error::Config(_))));

        // 7^3 = 343 invocations
        let big_group = MeshingConfig { workgroup_size: 7, ..Default::default() };
        assert!(matches!(big_group.validate(), Err(Error::Config(_))));
        let huge_group = MeshingConfig { workgroup_size: u32::MAX, ..Default::default() };
        assert!(matches!(huge_group.validate(), Err(Error::Config(_))));
        let max_group = MeshingConfig { workgroup_size: 6, ..Default::default() };
        assert!(max_group.validate().is_ok());

        let bad_scale = MeshingConfig { voxel_size: -1.0, ..Default::default() };
        assert!(matches!(bad_scale.validate(), Err(Error::Config(_))));

        let bad_cap = MeshingConfig { max_triangles_per_cell: 2, ..Default::default() };
        assert!(matches!(bad_cap.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("meshing.json");
        let config = MeshingConfig { chunk_depth: 3, voxel_size: 0.25, ..Default::default() };

        config.save_sync(&path).unwrap();
        assert_eq!(MeshingConfig::load_sync(&path).unwrap(), config);
    }

    #[test]
    fn test_load_partial_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meshing.json");
        std::fs::write(&path, r#"{ "workgroup_size": 8 }"#).unwrap();

        let config = MeshingConfig::load_sync(&path).unwrap();
        assert_eq!(config.workgroup_size, 8);
        assert_eq!(config.chunk_depth, 5);
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = MeshingConfig::load_sync(&dir.path().join("nope.json"));
        assert!(matches!(missing, Err(Error::Io(_))));

        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(MeshingConfig::load_sync(&path), Err(Error::Config(_))));
    }
}
