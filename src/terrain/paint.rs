//! Brush model and per-texel weight blending for painted layers
//!
//! Blend weights are 8-bit. The unpainted base layer is implicit: its weight
//! at a texel is `255 - sum(layer weights)`, so every texel always totals
//! exactly 255.

use serde::{Deserialize, Serialize};

/// Full weight of a texel
pub const FULL_WEIGHT: u8 = 255;

/// What a stroke does to the target layer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaintType {
    /// Raise the target layer, scaling the others down
    #[default]
    Paint,
    /// Lower the target layer, returning its weight to the base layer
    Erase,
}

/// Circular brush with a linear falloff between two radii
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaintParams {
    pub paint_type: PaintType,
    /// Full-strength radius in world units
    pub inner_radius: f32,
    /// Radius at which the brush fades to nothing
    pub outer_radius: f32,
    /// Peak weight applied, 0-1
    pub strength: f32,
}

impl Default for PaintParams {
    fn default() -> Self {
        Self {
            paint_type: PaintType::Paint,
            inner_radius: 2.0,
            outer_radius: 6.0,
            strength: 1.0,
        }
    }
}

impl PaintParams {
    /// Brush falloff at `distance` from the stroke, 0-1
    pub fn intensity(&self, distance: f32) -> f32 {
        let outer = self.outer_radius.max(self.inner_radius);
        if distance <= self.inner_radius {
            1.0
        } else if distance >= outer {
            0.0
        } else {
            1.0 - (distance - self.inner_radius) / (outer - self.inner_radius)
        }
    }

    /// Target weight for a texel at `distance` from the stroke
    pub fn coverage(&self, distance: f32) -> u8 {
        let value = self.intensity(distance) * self.strength.clamp(0.0, 1.0) * FULL_WEIGHT as f32;
        value.round() as u8
    }

    /// Radius beyond which the brush has no effect
    pub fn reach(&self) -> f32 {
        self.outer_radius.max(self.inner_radius)
    }
}

/// Distance from a point to the segment `from`-`to` on the XZ plane
pub fn distance_to_segment(x: f32, z: f32, from: (f32, f32), to: (f32, f32)) -> f32 {
    let (dx, dz) = (to.0 - from.0, to.1 - from.1);
    let length_sq = dx * dx + dz * dz;
    let t = if length_sq <= f32::EPSILON {
        0.0
    } else {
        (((x - from.0) * dx + (z - from.1) * dz) / length_sq).clamp(0.0, 1.0)
    };
    let (cx, cz) = (from.0 + dx * t, from.1 + dz * t);
    ((x - cx) * (x - cx) + (z - cz) * (z - cz)).sqrt()
}

/// Apply `delta` to layer `target` of one texel.
///
/// Painting raises the target by up to `delta` and scales every other layer
/// (the implicit base included) by the same factor so the texel still sums
/// to [`FULL_WEIGHT`]; rounding error is absorbed by the base layer.
/// Erasing hands the removed weight to the base layer.
pub fn blend_texel(weights: &mut [u8], target: usize, delta: u8, paint_type: PaintType) {
    let old = weights[target] as u32;
    match paint_type {
        PaintType::Paint => {
            let new = (old + delta as u32).min(FULL_WEIGHT as u32);
            let old_rest = FULL_WEIGHT as u32 - old;
            let new_rest = FULL_WEIGHT as u32 - new;
            for (i, weight) in weights.iter_mut().enumerate() {
                if i == target {
                    *weight = new as u8;
                } else if old_rest == 0 {
                    *weight = 0;
                } else {
                    *weight = (*weight as u32 * new_rest / old_rest) as u8;
                }
            }
        }
        PaintType::Erase => {
            weights[target] = (old.saturating_sub(delta as u32)) as u8;
        }
    }
}

/// Weight of the implicit base layer at a texel
pub fn base_weight(weights: &[u8]) -> u8 {
    let total: u32 = weights.iter().map(|&w| w as u32).sum();
    FULL_WEIGHT.saturating_sub(total.min(FULL_WEIGHT as u32) as u8)
}
