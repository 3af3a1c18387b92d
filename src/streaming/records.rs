//! Persisted landscape records
//!
//! The header and procedural layer rows are small and human-editable, so
//! they are kept as JSON. Block records carry bulk height and blend-map data
//! and are archived with rkyv and compressed with LZ4.

use rkyv::util::AlignedVec;
use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::terrain::config::LandscapeConfig;
use crate::terrain::material::LayerMaterial;

/// Landscape-wide settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LandscapeHeader {
    pub landscape_id: u32,
    /// Height map samples along X and Z
    pub height_map_size: (u32, u32),
    /// Blocks along X and Z
    pub block_layout: (u32, u32),
    /// Vertices per block edge
    pub block_verts: u32,
    /// Active blend-map texels per block edge
    pub blend_map_size: u32,
    pub scale: [f32; 3],
    pub offset: [f32; 3],
    pub flags: u32,
    #[serde(default)]
    pub config: LandscapeConfig,
    #[serde(default)]
    pub materials: Vec<LayerMaterial>,
}

/// `a * b` as a texel or sample count, or a persistence error on overflow
fn checked_area(a: u32, b: u32, what: &str) -> Result<usize> {
    (a as usize)
        .checked_mul(b as usize)
        .filter(|&n| n <= u32::MAX as usize)
        .ok_or_else(|| Error::Persistence(format!("{} {}x{} is too large", what, a, b)))
}

impl LandscapeHeader {
    /// Check the stored grid is self-consistent before anything is
    /// allocated from it
    pub fn validate(&self) -> Result<()> {
        let quads = self.block_verts.wrapping_sub(1);
        if self.block_verts < 2 || !quads.is_power_of_two() {
            return Err(Error::Persistence(format!("invalid block size {} vertices", self.block_verts)));
        }
        let (width, height) = self.height_map_size;
        let (layout_x, layout_z) = self.block_layout;
        let expected = |blocks: u32| blocks.checked_mul(quads).and_then(|n| n.checked_add(1));
        if layout_x == 0 || layout_z == 0 || expected(layout_x) != Some(width) || expected(layout_z) != Some(height) {
            return Err(Error::Persistence(format!(
                "{}x{} blocks of {} vertices do not tile a {}x{} height map",
                layout_x, layout_z, self.block_verts, width, height
            )));
        }
        checked_area(width, height, "height map")?;
        checked_area(layout_x, layout_z, "block layout")?;
        let stride = self.blend_map_size.checked_add(2).ok_or_else(|| {
            Error::Persistence(format!("blend map size {} is too large", self.blend_map_size))
        })?;
        checked_area(stride, stride, "blend map")?;
        Ok(())
    }
}

/// Painted weights of one material within one block
#[derive(Clone, Debug, PartialEq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct PaintedLayerRecord {
    pub material: u32,
    /// `(blend_map_size + 2)^2` weights, border included
    pub blend_map: Vec<u8>,
}

/// Height samples and painted layers of one block
#[derive(Clone, Debug, PartialEq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct BlockRecord {
    pub block_index: u32,
    /// Samples per row and column (vertices per block edge)
    pub width: u32,
    pub height: u32,
    pub heights: Vec<i16>,
    /// Per-sample RGBA8 colours; empty when the landscape has no colour map
    pub colors: Vec<u32>,
    pub layers: Vec<PaintedLayerRecord>,
}

impl BlockRecord {
    /// Archive and compress
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map_err(|e| Error::Persistence(format!("block {} archive failed: {}", self.block_index, e)))?;
        Ok(lz4_flex::compress_prepend_size(&bytes))
    }

    /// Decompress and validate an archived record
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let decompressed = lz4_flex::decompress_size_prepended(data)
            .map_err(|e| Error::Persistence(format!("LZ4 decompression failed: {}", e)))?;
        let mut aligned = AlignedVec::<16>::with_capacity(decompressed.len());
        aligned.extend_from_slice(&decompressed);
        rkyv::from_bytes::<BlockRecord, rkyv::rancor::Error>(&aligned)
            .map_err(|e| Error::Persistence(format!("block archive invalid: {}", e)))
    }

    /// Check the record matches the expected block shape
    pub fn validate(&self, block_index: u32, verts: u32, blend_map_size: u32) -> Result<()> {
        let samples = checked_area(verts, verts, "block")?;
        if self.block_index != block_index {
            return Err(Error::Persistence(format!(
                "record for block {} stored under block {}",
                self.block_index, block_index
            )));
        }
        if self.width != verts || self.height != verts || self.heights.len() != samples {
            return Err(Error::Persistence(format!(
                "block {} has {}x{} samples ({} stored), expected {}x{}",
                block_index,
                self.width,
                self.height,
                self.heights.len(),
                verts,
                verts
            )));
        }
        if !self.colors.is_empty() && self.colors.len() != samples {
            return Err(Error::Persistence(format!("block {} colour count mismatch", block_index)));
        }
        let stride = blend_map_size
            .checked_add(2)
            .ok_or_else(|| Error::Persistence(format!("blend map size {} is too large", blend_map_size)))?;
        let texels = checked_area(stride, stride, "blend map")?;
        if let Some(layer) = self.layers.iter().find(|l| l.blend_map.len() != texels) {
            return Err(Error::Persistence(format!(
                "block {} layer {} has {} texels, expected {}",
                block_index,
                layer.material,
                layer.blend_map.len(),
                texels
            )));
        }
        Ok(())
    }
}
