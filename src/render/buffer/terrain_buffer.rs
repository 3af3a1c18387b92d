//! Landscape vertex format and shader constant layouts
//!
//! Every structure is `repr(C)`, made only of `f32`/`u32` fields and padded
//! to a multiple of 16 bytes so it can be uploaded with `bytemuck::bytes_of`.

use bytemuck::{Pod, Zeroable};

/// Layers a single painted pass can blend (one RGBA blend map)
pub const MAX_PASS_LAYERS: usize = 4;
/// Procedural layer descriptors that fit in one constant buffer upload
pub const MAX_PROCEDURAL_PASS_LAYERS: usize = 3;

/// Terrain vertex (28 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct TerrainVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    /// Packed RGBA8 vertex colour
    pub color: u32,
}

impl TerrainVertex {
    pub const STRIDE: u32 = std::mem::size_of::<TerrainVertex>() as u32;
}

/// Per-layer texture mapping parameters (64 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct CtLayerData {
    /// Blend map size in texels (xy) and reciprocal (zw)
    pub texture_size: [f32; 4],
    pub scale: [f32; 2],
    pub base_scale: [f32; 2],
    /// cos, sin, -sin, cos of the layer rotation
    pub rotation: [f32; 4],
    pub offset: [f32; 2],
    /// 1.0 when tiling reduction noise applies
    pub tiling_reduction: f32,
    /// Blend map channel read by this layer (0-3)
    pub channel: f32,
}

/// Height/slope gating of one procedural layer (48 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct CtProceduralData {
    /// x = centre, y = -1 / band, z = ((max - centre) + band) / band
    pub height_params: [f32; 4],
    pub slope_axis: [f32; 4],
    /// x = scale, y = bias
    pub slope_params: [f32; 2],
    pub weight: f32,
    pub _pad: f32,
}

/// Landscape-wide shading constants (48 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct CbTerrainBaseData {
    pub color: [f32; 4],
    /// World dimensions (xyz) and 1 / dimensions.x (w)
    pub terrain_size: [f32; 4],
    pub terrain_offset: [f32; 3],
    pub noise_strength: f32,
}

/// Up to four painted layers for one pass (272 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct CbTerrainLayerData {
    pub layers: [CtLayerData; MAX_PASS_LAYERS],
    pub layer_count: f32,
    pub _pad: [f32; 3],
}

/// Up to three procedural layers for one draw batch (160 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct CbTerrainProcData {
    pub procedural: [CtProceduralData; MAX_PROCEDURAL_PASS_LAYERS],
    pub layer_count: f32,
    pub _pad: [f32; 3],
}

/// Per-block painted pass constants (32 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct CbTerrainPaintData {
    pub blend_map_scale: [f32; 2],
    pub blend_map_offset: [f32; 2],
    /// x = pass count, y = 1 / pass count
    pub pass_count: [f32; 2],
    pub noise_strength: f32,
    pub _pad: f32,
}
