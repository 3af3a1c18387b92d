//! Abstract render device and resource manager
//!
//! The landscape never talks to a graphics API directly. It allocates
//! buffers and textures through [`ResourceManager`] and issues geometry
//! through [`RenderDriver`]; both are injected by the caller.

use crate::core::types::Result;
use crate::math::Rect;

/// Vertex buffer resource
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexBufferHandle(pub u32);

/// Index buffer resource
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IndexBufferHandle(pub u32);

/// RGBA8 texture resource
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u32);

/// Shader constant buffer resource
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConstantBufferHandle(pub u32);

/// Texture slot assignments used by the landscape shaders
pub mod texture_slot {
    pub const BLEND_MAP: u32 = 0;
    pub const NORMAL_MAP: u32 = 1;
    /// First of four layer colour slots
    pub const LAYER_COLOR: u32 = 2;
    /// First of four layer normal slots
    pub const LAYER_NORMAL: u32 = 6;
}

/// Constant buffer slot assignments used by the landscape shaders
pub mod constant_slot {
    pub const BASE: u32 = 0;
    pub const LAYER: u32 = 1;
    pub const PROCEDURAL: u32 = 2;
    pub const PAINT: u32 = 3;
}

/// Shading path for a block draw. The caller binds the matching shader and
/// constants; blocks only issue geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RenderMode {
    Wire,
    Simple,
    Procedural,
    Painted,
}

/// Output merger blending
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendMode {
    Opaque,
    Additive,
}

/// Depth/blend/raster state pushed around a landscape pass
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RenderState {
    pub depth_write: bool,
    pub blend: BlendMode,
    pub wireframe: bool,
}

impl RenderState {
    pub const OPAQUE: RenderState = RenderState { depth_write: true, blend: BlendMode::Opaque, wireframe: false };
    pub const ADDITIVE: RenderState = RenderState { depth_write: false, blend: BlendMode::Additive, wireframe: false };
    pub const WIREFRAME: RenderState = RenderState { depth_write: true, blend: BlendMode::Opaque, wireframe: true };
}

/// Creation and update of GPU resources
pub trait ResourceManager {
    fn create_vertex_buffer(&mut self, data: &[u8], stride: u32) -> Result<VertexBufferHandle>;
    fn update_vertex_buffer(&mut self, buffer: VertexBufferHandle, offset: usize, data: &[u8]) -> Result<()>;
    fn destroy_vertex_buffer(&mut self, buffer: VertexBufferHandle);

    fn create_index_buffer(&mut self, indices: &[u32]) -> Result<IndexBufferHandle>;
    fn destroy_index_buffer(&mut self, buffer: IndexBufferHandle);

    /// Create an RGBA8 texture; contents are undefined until updated
    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureHandle>;
    /// Replace the texels of `rect` with tightly packed RGBA8 data
    fn update_texture(&mut self, texture: TextureHandle, rect: Rect, rgba: &[u8]) -> Result<()>;
    fn destroy_texture(&mut self, texture: TextureHandle);

    fn create_constant_buffer(&mut self, size: usize) -> Result<ConstantBufferHandle>;
    fn update_constant_buffer(&mut self, buffer: ConstantBufferHandle, data: &[u8]) -> Result<()>;
    fn destroy_constant_buffer(&mut self, buffer: ConstantBufferHandle);
}

/// Command submission
pub trait RenderDriver: ResourceManager {
    fn set_vertex_buffer(&mut self, buffer: VertexBufferHandle);
    fn set_index_buffer(&mut self, buffer: IndexBufferHandle);
    fn set_texture(&mut self, slot: u32, texture: Option<TextureHandle>);
    fn set_constant_buffer(&mut self, slot: u32, buffer: ConstantBufferHandle);
    fn set_shader(&mut self, mode: RenderMode);

    /// Draw an indexed triangle list. `vertex_count` bounds the vertex range
    /// referenced by the indices.
    fn draw_indexed(&mut self, vertex_count: u32, index_start: u32, primitive_count: u32);

    fn push_render_state(&mut self, state: RenderState);
    fn pop_render_state(&mut self);
}
