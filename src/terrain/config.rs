//! Landscape tunables
//!
//! Screen-space error thresholds, skirt policy, horizon-buffer parameters
//! and object cull distances. Everything round-trips through JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::types::Result;

/// Geo-mipmap selection parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LodConfig {
    /// Largest projected geometric error (pixels) a level may show at
    /// `terrain_detail == 1.0`
    pub pixel_error_threshold: f32,
    /// Camera distance at which level 1 becomes eligible; level `i` needs
    /// `base_lod_distance * terrain_detail * (2^i - 1)`
    pub base_lod_distance: f32,
    /// Global detail multiplier. Larger values keep finer levels longer.
    pub terrain_detail: f32,
    /// Skirt depth added below the largest block variance
    pub min_skirt_depth: f32,
    /// Draw skirts on edges that face the outside of the block grid, where
    /// there is no neighbour to stitch to
    pub skirt_grid_edges: bool,
}

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            pixel_error_threshold: 4.0,
            base_lod_distance: 48.0,
            terrain_detail: 1.0,
            min_skirt_depth: 1.0,
            skirt_grid_edges: true,
        }
    }
}

/// Horizon occlusion culling parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcclusionConfig {
    pub enabled: bool,
    /// Columns in the horizon buffer
    pub horizon_resolution: u32,
    /// Normalised device Y margin a horizon edge must clear to count as visible
    pub horizon_epsilon: f32,
    /// Clip-space `w` below which edge end points are clipped as behind the eye
    pub near_w: f32,
    /// Frames to skip occlusion tests after a frame in which nothing was culled
    pub retest_interval: u32,
    /// Camera movement that cancels a pending skip
    pub retest_distance: f32,
    /// Minimum fraction of occlusion tests that must succeed to keep testing
    pub min_success_ratio: f32,
    /// Spatial tree depth; 0 derives it from the block layout
    pub max_tree_depth: u32,
}

impl Default for OcclusionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            horizon_resolution: 256,
            horizon_epsilon: 1e-3,
            near_w: 0.01,
            retest_interval: 8,
            retest_distance: 16.0,
            min_success_ratio: 0.02,
            max_tree_depth: 0,
        }
    }
}

/// Maximum object size allowed to draw up to a distance
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CullDescriptor {
    pub maximum_size: f32,
    pub distance: f32,
}

/// Shading constants and object culling
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Colour of the unpainted base layer
    pub base_color: [f32; 4],
    /// Strength of the noise used to break up layer tiling
    pub noise_strength: f32,
    /// Objects beyond this distance are always culled (0 disables)
    pub cull_distance: f32,
    pub cull_descriptors: Vec<CullDescriptor>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            base_color: [0.45, 0.42, 0.36, 1.0],
            noise_strength: 0.5,
            cull_distance: 0.0,
            cull_descriptors: Vec::new(),
        }
    }
}

/// Complete landscape configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LandscapeConfig {
    pub lod: LodConfig,
    pub occlusion: OcclusionConfig,
    pub render: RenderConfig,
}

impl LandscapeConfig {
    /// Parse from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = LandscapeConfig::from_json_str(r#"{ "lod": { "terrain_detail": 2.0 } }"#).unwrap();
        assert_eq!(config.lod.terrain_detail, 2.0);
        assert_eq!(config.lod.pixel_error_threshold, LodConfig::default().pixel_error_threshold);
        assert_eq!(config.occlusion, OcclusionConfig::default());
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let err = LandscapeConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, crate::core::error::Error::Config(_)));
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/landscape.json");

        let mut config = LandscapeConfig::default();
        config.occlusion.horizon_resolution = 512;
        config.render.cull_descriptors.push(CullDescriptor { maximum_size: 2.0, distance: 100.0 });
        config.save(&path).unwrap();

        assert_eq!(LandscapeConfig::load(&path).unwrap(), config);
    }
}
