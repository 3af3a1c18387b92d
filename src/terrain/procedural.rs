//! Procedural texture layers
//!
//! A procedural layer places a material wherever the terrain height and
//! slope match its rules. Blocks that share the same set of active layers are
//! grouped into draw batches so the layer constants are uploaded once per
//! group rather than once per block.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::math::Aabb;
use crate::render::buffer::{CtProceduralData, TerrainVertex};
use super::block::TerrainBlock;
use super::material::MaterialId;

/// Height and slope rules for one procedural layer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProceduralLayer {
    pub name: String,
    pub material: MaterialId,
    pub min_height: f32,
    pub max_height: f32,
    /// Distance over which the layer fades in and out at the height limits
    pub height_attenuation_band: f32,
    /// Direction of the slope of interest (usually up)
    pub slope_axis: [f32; 3],
    pub slope_scale: f32,
    pub slope_bias: f32,
    pub weight: f32,
    pub invert_slope: bool,
    /// When false the height limits are ignored
    pub enable_height: bool,
}

impl Default for ProceduralLayer {
    fn default() -> Self {
        Self {
            name: String::new(),
            material: 0,
            min_height: 0.0,
            max_height: 100.0,
            height_attenuation_band: 10.0,
            slope_axis: [0.0, 1.0, 0.0],
            slope_scale: 1.0,
            slope_bias: 0.0,
            weight: 1.0,
            invert_slope: false,
            enable_height: true,
        }
    }
}

impl ProceduralLayer {
    fn fade_range(&self) -> f32 {
        self.height_attenuation_band.max(1e-3)
    }

    /// Effective (scale, bias) pair with inversion applied
    pub fn slope_params(&self) -> (f32, f32) {
        if self.invert_slope {
            (-self.slope_scale, 1.0 - self.slope_bias)
        } else {
            (self.slope_scale, self.slope_bias)
        }
    }

    /// Height weight in `[0, 1]` at world height `y`
    pub fn height_weight(&self, y: f32) -> f32 {
        if !self.enable_height {
            return 1.0;
        }
        let data = self.procedural_data();
        let [center, slope, intercept, _] = data.height_params;
        ((y - center).abs() * slope + intercept).clamp(0.0, 1.0)
    }

    /// Slope weight in `[0, 1]` for a unit normal
    pub fn slope_weight(&self, normal: [f32; 3]) -> f32 {
        let a = self.slope_axis;
        let d = normal[0] * a[0] + normal[1] * a[1] + normal[2] * a[2];
        let (scale, bias) = self.slope_params();
        (d * d * scale + bias).clamp(0.0, 1.0)
    }

    /// Shader constants for this layer
    pub fn procedural_data(&self) -> CtProceduralData {
        let fade = self.fade_range();
        let center = (self.min_height + self.max_height) * 0.5;
        let (scale, bias) = self.slope_params();
        CtProceduralData {
            height_params: [
                center,
                -1.0 / fade,
                ((self.max_height - center) + fade) / fade,
                if self.enable_height { 1.0 } else { 0.0 },
            ],
            slope_axis: [self.slope_axis[0], self.slope_axis[1], self.slope_axis[2], 0.0],
            slope_params: [scale, bias],
            weight: self.weight,
            _pad: 0.0,
        }
    }

    /// Conservative test: false only when the layer has zero weight over
    /// the whole block
    pub fn is_active(&self, bounds: &Aabb, vertices: &[TerrainVertex]) -> bool {
        if self.weight <= 0.0 {
            return false;
        }
        if self.enable_height {
            let fade = self.fade_range();
            if bounds.max.y < self.min_height - fade || bounds.min.y > self.max_height + fade {
                return false;
            }
        }
        if vertices.is_empty() {
            return true;
        }

        // The slope weight is linear in dot², so its maximum is at one of
        // the extremes of dot² over the block. Normals interpolated between
        // differing vertex normals can swing closer to the axis than any
        // vertex, and through zero when the dot products change sign.
        let a = self.slope_axis;
        let dot = |n: [f32; 3]| n[0] * a[0] + n[1] * a[1] + n[2] * a[2];
        let first = vertices[0].normal;
        let (min_d, max_d) = vertices.iter().fold((f32::MAX, f32::MIN), |(lo, hi), v| {
            let d = dot(v.normal);
            (lo.min(d), hi.max(d))
        });
        let uniform = vertices.iter().all(|v| v.normal == first);
        let (min_d2, max_d2) = if uniform {
            (min_d * min_d, min_d * min_d)
        } else {
            let lower = if min_d < 0.0 && max_d > 0.0 { 0.0 } else { (min_d * min_d).min(max_d * max_d) };
            (lower, dot(a).max(max_d * max_d).max(min_d * min_d))
        };
        let (scale, bias) = self.slope_params();
        (min_d2 * scale + bias).max(max_d2 * scale + bias) > 0.0
    }
}

/// Blocks sharing the same ordered set of active procedural layers
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProceduralDrawBatch {
    pub layers: Vec<usize>,
    pub blocks: Vec<usize>,
}

/// Indices of the layers active for one block, in layer order
pub fn active_layers(layers: &[ProceduralLayer], block: &TerrainBlock) -> Vec<usize> {
    layers
        .iter()
        .enumerate()
        .filter(|(_, layer)| layer.is_active(block.bounds(), block.grid_vertices()))
        .map(|(i, _)| i)
        .collect()
}

/// Group every block by its active layer set
pub fn batch_procedural_draws(layers: &[ProceduralLayer], blocks: &[TerrainBlock]) -> Vec<ProceduralDrawBatch> {
    let mut groups: BTreeMap<Vec<usize>, Vec<usize>> = BTreeMap::new();
    for block in blocks {
        groups.entry(active_layers(layers, block)).or_default().push(block.index());
    }
    let batches: Vec<ProceduralDrawBatch> = groups
        .into_iter()
        .map(|(layers, blocks)| ProceduralDrawBatch { layers, blocks })
        .collect();
    log::debug!("Batched {} blocks into {} procedural draw batches", blocks.len(), batches.len());
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Vec3;

    fn vertex(normal: [f32; 3]) -> TerrainVertex {
        TerrainVertex { position: [0.0; 3], normal, color: 0 }
    }

    fn bounds(min_y: f32, max_y: f32) -> Aabb {
        Aabb::new(Vec3::new(0.0, min_y, 0.0), Vec3::new(16.0, max_y, 16.0))
    }

    #[test]
    fn test_height_params() {
        let layer = ProceduralLayer { min_height: 10.0, max_height: 30.0, height_attenuation_band: 5.0, ..Default::default() };
        let data = layer.procedural_data();
        assert_eq!(data.height_params[0], 20.0);
        assert_eq!(data.height_params[1], -0.2);
        assert_eq!(data.height_params[2], 3.0);

        assert_eq!(layer.height_weight(20.0), 1.0);
        assert_eq!(layer.height_weight(30.0), 1.0);
        assert!((layer.height_weight(32.5) - 0.5).abs() < 1e-5);
        assert_eq!(layer.height_weight(35.0), 0.0);
        assert_eq!(layer.height_weight(5.0), 0.0);
    }

    #[test]
    fn test_invert_slope() {
        let layer = ProceduralLayer { slope_scale: 1.0, slope_bias: 0.0, invert_slope: true, ..Default::default() };
        assert_eq!(layer.slope_params(), (-1.0, 1.0));
        assert_eq!(layer.slope_weight([0.0, 1.0, 0.0]), 0.0);
        assert_eq!(layer.slope_weight([1.0, 0.0, 0.0]), 1.0);
    }

    #[test]
    fn test_is_active_height_gate() {
        let layer = ProceduralLayer { min_height: 50.0, max_height: 80.0, height_attenuation_band: 5.0, ..Default::default() };
        let flat = [vertex([0.0, 1.0, 0.0])];
        assert!(layer.is_active(&bounds(40.0, 60.0), &flat));
        // Inside the fade band still counts
        assert!(layer.is_active(&bounds(40.0, 46.0), &flat));
        assert!(!layer.is_active(&bounds(0.0, 44.0), &flat));

        let unbounded = ProceduralLayer { enable_height: false, ..layer };
        assert!(unbounded.is_active(&bounds(0.0, 44.0), &flat));
    }

    #[test]
    fn test_is_active_slope_gate() {
        let cliffs = ProceduralLayer { enable_height: false, invert_slope: true, ..Default::default() };
        let flat = [vertex([0.0, 1.0, 0.0])];
        assert!(!cliffs.is_active(&bounds(0.0, 1.0), &flat));

        let mixed = [vertex([0.0, 1.0, 0.0]), vertex([0.6, 0.8, 0.0])];
        assert!(cliffs.is_active(&bounds(0.0, 1.0), &mixed));

        let steep = ProceduralLayer { enable_height: false, slope_scale: 1.0, slope_bias: -0.7, ..Default::default() };
        assert!(!steep.is_active(&bounds(0.0, 1.0), &[vertex([0.6, 0.8, 0.0])]));
        // Opposing tilts: the normal halfway across the face points straight up
        let ridge = [vertex([0.6, 0.8, 0.0]), vertex([-0.6, 0.8, 0.0])];
        assert!(steep.slope_weight([0.0, 1.0, 0.0]) > 0.0);
        assert!(steep.is_active(&bounds(0.0, 1.0), &ridge));

        let disabled = ProceduralLayer { weight: 0.0, ..Default::default() };
        assert!(!disabled.is_active(&bounds(0.0, 1.0), &flat));
    }

    #[test]
    fn test_json_round_trip_uses_defaults() {
        let layer: ProceduralLayer = serde_json::from_str(r#"{"name":"snow","material":3,"min_height":200.0}"#).unwrap();
        assert_eq!(layer.name, "snow");
        assert_eq!(layer.max_height, 100.0);
        assert!(layer.enable_height);
        let json = serde_json::to_string(&layer).unwrap();
        let back: ProceduralLayer = serde_json::from_str(&json).unwrap();
        assert_eq!(back, layer);
    }
}
