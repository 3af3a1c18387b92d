//! Recording render driver with no GPU behind it
//!
//! Used by the import tool and by tests: resources live in host memory and
//! every command is appended to a log that can be inspected afterwards.

use std::collections::HashMap;

use crate::core::error::Error;
use crate::core::types::Result;
use crate::math::Rect;
use super::driver::{
    ConstantBufferHandle, IndexBufferHandle, RenderDriver, RenderMode, RenderState,
    ResourceManager, TextureHandle, VertexBufferHandle,
};

/// A command issued through [`RenderDriver`]
#[derive(Clone, Debug, PartialEq)]
pub enum DriverCommand {
    SetVertexBuffer(VertexBufferHandle),
    SetIndexBuffer(IndexBufferHandle),
    SetTexture { slot: u32, texture: Option<TextureHandle> },
    SetConstantBuffer { slot: u32, buffer: ConstantBufferHandle },
    SetShader(RenderMode),
    DrawIndexed {
        vertex_buffer: Option<VertexBufferHandle>,
        vertex_count: u32,
        index_start: u32,
        primitive_count: u32,
    },
    PushRenderState(RenderState),
    PopRenderState,
}

/// Host-memory RGBA8 texture
#[derive(Clone, Debug)]
pub struct HeadlessTexture {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl HeadlessTexture {
    pub fn texel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = ((x + y * self.width) * 4) as usize;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }
}

/// Driver that keeps resources in memory and records commands
#[derive(Default)]
pub struct HeadlessDriver {
    next_id: u32,
    vertex_buffers: HashMap<u32, Vec<u8>>,
    index_buffers: HashMap<u32, Vec<u32>>,
    textures: HashMap<u32, HeadlessTexture>,
    constant_buffers: HashMap<u32, Vec<u8>>,
    commands: Vec<DriverCommand>,
    bound_vertex_buffer: Option<VertexBufferHandle>,
    state_stack: Vec<RenderState>,
    /// Make vertex buffer creation fail
    pub fail_vertex_buffers: bool,
    /// Make texture creation fail
    pub fail_textures: bool,
    /// Make constant buffer creation fail
    pub fail_constant_buffers: bool,
}

impl HeadlessDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    pub fn commands(&self) -> &[DriverCommand] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Draw commands issued since the log was last cleared
    pub fn draw_calls(&self) -> Vec<DriverCommand> {
        self.commands
            .iter()
            .filter(|c| matches!(c, DriverCommand::DrawIndexed { .. }))
            .cloned()
            .collect()
    }

    /// Total primitives drawn since the log was last cleared
    pub fn primitive_count(&self) -> u64 {
        self.commands
            .iter()
            .map(|c| match c {
                DriverCommand::DrawIndexed { primitive_count, .. } => *primitive_count as u64,
                _ => 0,
            })
            .sum()
    }

    pub fn texture(&self, texture: TextureHandle) -> Option<&HeadlessTexture> {
        self.textures.get(&texture.0)
    }

    pub fn vertex_data(&self, buffer: VertexBufferHandle) -> Option<&[u8]> {
        self.vertex_buffers.get(&buffer.0).map(|v| v.as_slice())
    }

    pub fn index_data(&self, buffer: IndexBufferHandle) -> Option<&[u32]> {
        self.index_buffers.get(&buffer.0).map(|v| v.as_slice())
    }

    pub fn constant_data(&self, buffer: ConstantBufferHandle) -> Option<&[u8]> {
        self.constant_buffers.get(&buffer.0).map(|v| v.as_slice())
    }

    /// Number of live resources of every kind
    pub fn live_resources(&self) -> usize {
        self.vertex_buffers.len() + self.index_buffers.len() + self.textures.len() + self.constant_buffers.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    /// Depth of the render state stack (zero when pushes and pops balance)
    pub fn state_depth(&self) -> usize {
        self.state_stack.len()
    }
}

impl ResourceManager for HeadlessDriver {
    fn create_vertex_buffer(&mut self, data: &[u8], stride: u32) -> Result<VertexBufferHandle> {
        if self.fail_vertex_buffers {
            return Err(Error::Resource("vertex buffer allocation failed".into()));
        }
        if stride == 0 || data.len() % stride as usize != 0 {
            return Err(Error::Resource(format!("vertex data of {} bytes is not a multiple of stride {}", data.len(), stride)));
        }
        let id = self.allocate_id();
        self.vertex_buffers.insert(id, data.to_vec());
        Ok(VertexBufferHandle(id))
    }

    fn update_vertex_buffer(&mut self, buffer: VertexBufferHandle, offset: usize, data: &[u8]) -> Result<()> {
        let storage = self
            .vertex_buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| Error::Resource(format!("unknown vertex buffer {:?}", buffer)))?;
        let end = offset + data.len();
        if end > storage.len() {
            return Err(Error::Resource(format!("vertex update {}..{} past end {}", offset, end, storage.len())));
        }
        storage[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn destroy_vertex_buffer(&mut self, buffer: VertexBufferHandle) {
        self.vertex_buffers.remove(&buffer.0);
    }

    fn create_index_buffer(&mut self, indices: &[u32]) -> Result<IndexBufferHandle> {
        let id = self.allocate_id();
        self.index_buffers.insert(id, indices.to_vec());
        Ok(IndexBufferHandle(id))
    }

    fn destroy_index_buffer(&mut self, buffer: IndexBufferHandle) {
        self.index_buffers.remove(&buffer.0);
    }

    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureHandle> {
        if self.fail_textures {
            return Err(Error::Resource(format!("{}x{} texture allocation failed", width, height)));
        }
        let id = self.allocate_id();
        self.textures.insert(id, HeadlessTexture {
            width,
            height,
            data: vec![0; (width * height * 4) as usize],
        });
        Ok(TextureHandle(id))
    }

    fn update_texture(&mut self, texture: TextureHandle, rect: Rect, rgba: &[u8]) -> Result<()> {
        let target = self
            .textures
            .get_mut(&texture.0)
            .ok_or_else(|| Error::Resource(format!("unknown texture {:?}", texture)))?;
        let bounds = Rect::from_size(target.width as i32, target.height as i32);
        if rect.is_empty() || rect.intersect(&bounds) != rect {
            return Err(Error::Resource(format!("texture update {:?} outside {:?}", rect, bounds)));
        }
        let row_bytes = rect.width() as usize * 4;
        if rgba.len() != row_bytes * rect.height() as usize {
            return Err(Error::Resource(format!("texture update expected {} bytes, got {}", row_bytes * rect.height() as usize, rgba.len())));
        }
        for (row, src) in rgba.chunks_exact(row_bytes).enumerate() {
            let start = ((rect.left as usize) + (rect.top as usize + row) * target.width as usize) * 4;
            target.data[start..start + row_bytes].copy_from_slice(src);
        }
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
    }

    fn create_constant_buffer(&mut self, size: usize) -> Result<ConstantBufferHandle> {
        if self.fail_constant_buffers {
            return Err(Error::Resource("constant buffer allocation failed".into()));
        }
        let id = self.allocate_id();
        self.constant_buffers.insert(id, vec![0; size]);
        Ok(ConstantBufferHandle(id))
    }

    fn update_constant_buffer(&mut self, buffer: ConstantBufferHandle, data: &[u8]) -> Result<()> {
        let storage = self
            .constant_buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| Error::Resource(format!("unknown constant buffer {:?}", buffer)))?;
        if data.len() != storage.len() {
            return Err(Error::Resource(format!("constant buffer is {} bytes, update is {}", storage.len(), data.len())));
        }
        storage.copy_from_slice(data);
        Ok(())
    }

    fn destroy_constant_buffer(&mut self, buffer: ConstantBufferHandle) {
        self.constant_buffers.remove(&buffer.0);
    }
}

impl RenderDriver for HeadlessDriver {
    fn set_vertex_buffer(&mut self, buffer: VertexBufferHandle) {
        self.bound_vertex_buffer = Some(buffer);
        self.commands.push(DriverCommand::SetVertexBuffer(buffer));
    }

    fn set_index_buffer(&mut self, buffer: IndexBufferHandle) {
        self.commands.push(DriverCommand::SetIndexBuffer(buffer));
    }

    fn set_texture(&mut self, slot: u32, texture: Option<TextureHandle>) {
        self.commands.push(DriverCommand::SetTexture { slot, texture });
    }

    fn set_constant_buffer(&mut self, slot: u32, buffer: ConstantBufferHandle) {
        self.commands.push(DriverCommand::SetConstantBuffer { slot, buffer });
    }

    fn set_shader(&mut self, mode: RenderMode) {
        self.commands.push(DriverCommand::SetShader(mode));
    }

    fn draw_indexed(&mut self, vertex_count: u32, index_start: u32, primitive_count: u32) {
        self.commands.push(DriverCommand::DrawIndexed {
            vertex_buffer: self.bound_vertex_buffer,
            vertex_count,
            index_start,
            primitive_count,
        });
    }

    fn push_render_state(&mut self, state: RenderState) {
        self.state_stack.push(state);
        self.commands.push(DriverCommand::PushRenderState(state));
    }

    fn pop_render_state(&mut self) {
        if self.state_stack.pop().is_none() {
            log::warn!("pop_render_state with an empty state stack");
        }
        self.commands.push(DriverCommand::PopRenderState);
    }
}
