//! Per-block painted layer blend maps
//!
//! Each block keeps one 8-bit weight map per material layer it uses. For
//! rendering the layers are packed four at a time into the RGBA channels of
//! combined blend-map textures, and each combined map becomes one render
//! pass. Blend maps cover the block's active area plus a one texel border
//! shared with the neighbouring blocks so filtering is seamless.

use bytemuck::bytes_of;

use crate::core::error::Error;
use crate::core::types::Result;
use crate::math::{Rect, RectF};
use crate::render::buffer::{CbTerrainLayerData, CbTerrainPaintData, MAX_PASS_LAYERS};
use crate::render::driver::{
    constant_slot, texture_slot, ConstantBufferHandle, RenderDriver, ResourceManager, TextureHandle,
};
use super::material::{MaterialId, MaterialLibrary};
use super::paint::{blend_texel, distance_to_segment, PaintParams, PaintType};

const UNASSIGNED: usize = usize::MAX;

/// Weights of one material layer within a block
#[derive(Clone, Debug)]
pub struct LayerReference {
    pub material: MaterialId,
    /// Texels (border included) with a non-zero weight
    pub reference_count: u32,
    pub blend_map: Vec<u8>,
    /// Combined blend map holding this layer
    pub combined_map: usize,
    /// RGBA channel within the combined map
    pub channel: usize,
    /// Texels changed since the last upload
    pub dirty: Rect,
}

#[derive(Clone, Debug, Default)]
struct BatchedMap {
    texture: Option<TextureHandle>,
    /// Materials by channel at the last packing, used to detect changes
    channels: [Option<MaterialId>; MAX_PASS_LAYERS],
    dirty: Rect,
}

/// One render pass: up to four layers sharing a combined blend map
#[derive(Clone, Debug)]
pub struct RenderBatch {
    pub layers: Vec<usize>,
    pub combined_map: usize,
    layer_buffer: Option<ConstantBufferHandle>,
}

#[derive(Clone, Debug)]
struct PaintSession {
    material: MaterialId,
    params: PaintParams,
    /// Highest coverage applied to each texel this session
    coverage: Vec<u8>,
}

/// Painted layer data owned by one terrain block
pub struct LandscapeTextureData {
    block_index: usize,
    /// Active texels per side, border excluded
    size: u32,
    /// World XZ area mapped to the active texels
    world_area: RectF,
    /// Global blend-map grid position of the first active texel
    grid_origin: (i32, i32),
    layers: Vec<LayerReference>,
    maps: Vec<BatchedMap>,
    batches: Vec<RenderBatch>,
    current_pass: usize,
    paint: Option<PaintSession>,
    paint_buffer: Option<ConstantBufferHandle>,
    layout_dirty: bool,
}

impl LandscapeTextureData {
    pub fn new(block_index: usize, size: u32, world_area: RectF, grid_origin: (i32, i32)) -> Self {
        Self {
            block_index,
            size: size.max(1),
            world_area,
            grid_origin,
            layers: Vec::new(),
            maps: Vec::new(),
            batches: Vec::new(),
            current_pass: 0,
            paint: None,
            paint_buffer: None,
            layout_dirty: false,
        }
    }

    /// Texels per side including the border
    pub fn stride(&self) -> u32 {
        self.size + 2
    }

    pub fn active_size(&self) -> u32 {
        self.size
    }

    fn full_rect(&self) -> Rect {
        Rect::from_size(self.stride() as i32, self.stride() as i32)
    }

    pub fn world_area(&self) -> RectF {
        self.world_area
    }

    pub fn set_world_area(&mut self, area: RectF) {
        self.world_area = area;
    }

    /// World area covered including the border texels
    pub fn blend_map_world_area(&self) -> RectF {
        let (tw, th) = self.texel_size();
        RectF::new(
            self.world_area.left - tw,
            self.world_area.top - th,
            self.world_area.right + tw,
            self.world_area.bottom + th,
        )
    }

    /// Region of the global blend-map grid stored by this block, border included
    pub fn blend_map_area(&self) -> Rect {
        let (x, y) = self.grid_origin;
        Rect::new(x - 1, y - 1, x + self.size as i32 + 1, y + self.size as i32 + 1)
    }

    fn texel_size(&self) -> (f32, f32) {
        (
            self.world_area.width() / self.size as f32,
            self.world_area.height() / self.size as f32,
        )
    }

    fn texel_center(&self, tx: i32, ty: i32) -> (f32, f32) {
        let (tw, th) = self.texel_size();
        (
            self.world_area.left + ((tx - 1) as f32 + 0.5) * tw,
            self.world_area.top + ((ty - 1) as f32 + 0.5) * th,
        )
    }

    /// Stored texels whose centres fall inside a world rectangle
    pub fn paint_rectangle(&self, bounds: &RectF) -> Option<Rect> {
        let (tw, th) = self.texel_size();
        if tw <= 0.0 || th <= 0.0 {
            return None;
        }
        let to_texel = |world: f32, origin: f32, size: f32| (world - origin) / size - 0.5 + 1.0;
        let left = to_texel(bounds.left, self.world_area.left, tw).ceil() as i32;
        let right = to_texel(bounds.right, self.world_area.left, tw).floor() as i32 + 1;
        let top = to_texel(bounds.top, self.world_area.top, th).ceil() as i32;
        let bottom = to_texel(bounds.bottom, self.world_area.top, th).floor() as i32 + 1;
        let rect = Rect::new(left, top, right, bottom).intersect(&self.full_rect());
        if rect.is_empty() { None } else { Some(rect) }
    }

    pub fn layers(&self) -> &[LayerReference] {
        &self.layers
    }

    pub fn batches(&self) -> &[RenderBatch] {
        &self.batches
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn is_painting(&self) -> bool {
        self.paint.is_some()
    }

    pub fn current_pass(&self) -> usize {
        self.current_pass
    }

    fn layer_index(&self, material: MaterialId) -> Option<usize> {
        self.layers.iter().position(|l| l.material == material)
    }

    /// Weight of a material at a stored texel (0 when absent)
    pub fn weight(&self, material: MaterialId, tx: u32, ty: u32) -> u8 {
        let i = (tx + ty * self.stride()) as usize;
        self.layer_index(material)
            .and_then(|l| self.layers[l].blend_map.get(i).copied())
            .unwrap_or(0)
    }

    /// Sum of all explicit layer weights at a stored texel
    pub fn texel_total(&self, tx: u32, ty: u32) -> u32 {
        let i = (tx + ty * self.stride()) as usize;
        self.layers.iter().map(|l| l.blend_map[i] as u32).sum()
    }

    /// Replace a layer's weights, e.g. when loading persisted data
    pub fn set_layer_data(&mut self, material: MaterialId, blend_map: Vec<u8>) -> Result<()> {
        let expected = (self.stride() * self.stride()) as usize;
        if blend_map.len() != expected {
            return Err(Error::Persistence(format!(
                "block {} layer {} has {} texels, expected {}",
                self.block_index, material, blend_map.len(), expected
            )));
        }
        let reference_count = blend_map.iter().filter(|&&w| w > 0).count() as u32;
        let full = self.full_rect();
        match self.layer_index(material) {
            Some(i) => {
                let layer = &mut self.layers[i];
                layer.blend_map = blend_map;
                layer.reference_count = reference_count;
                layer.dirty = full;
            }
            None => self.layers.push(LayerReference {
                material,
                reference_count,
                blend_map,
                combined_map: UNASSIGNED,
                channel: UNASSIGNED,
                dirty: full,
            }),
        }
        self.layout_dirty = true;
        Ok(())
    }

    /// Start a painting session for `material`
    pub fn begin_paint(&mut self, material: MaterialId, params: PaintParams) {
        let texels = (self.stride() * self.stride()) as usize;
        self.paint = Some(PaintSession { material, params, coverage: vec![0; texels] });
    }

    /// Paint a single dab centred on a world position
    pub fn paint(&mut self, x: f32, z: f32) -> bool {
        self.paint_line(x, z, x, z)
    }

    /// Sweep the brush along a world-space segment. Returns true when any
    /// texel changed.
    pub fn paint_line(&mut self, from_x: f32, from_z: f32, to_x: f32, to_z: f32) -> bool {
        let Some(session) = self.paint.as_ref() else {
            log::warn!("paint_line on block {} outside a paint session", self.block_index);
            return false;
        };
        let (material, params) = (session.material, session.params);
        let bounds = RectF::from_segment(from_x, from_z, to_x, to_z, params.reach());
        let Some(rect) = self.paint_rectangle(&bounds) else {
            return false;
        };

        let target = match (self.layer_index(material), params.paint_type) {
            (Some(i), _) => i,
            (None, PaintType::Erase) => return false,
            (None, PaintType::Paint) => {
                let texels = (self.stride() * self.stride()) as usize;
                self.layers.push(LayerReference {
                    material,
                    reference_count: 0,
                    blend_map: vec![0; texels],
                    combined_map: UNASSIGNED,
                    channel: UNASSIGNED,
                    dirty: Rect::EMPTY,
                });
                self.layout_dirty = true;
                self.layers.len() - 1
            }
        };

        let stride = self.stride() as i32;
        let mut changed = false;
        for ty in rect.top..rect.bottom {
            for tx in rect.left..rect.right {
                let (cx, cz) = self.texel_center(tx, ty);
                let coverage = params.coverage(distance_to_segment(cx, cz, (from_x, from_z), (to_x, to_z)));
                let index = (tx + ty * stride) as usize;
                let Some(session) = self.paint.as_mut() else {
                    return changed;
                };
                let applied = session.coverage[index];
                if coverage <= applied {
                    continue;
                }
                session.coverage[index] = coverage;
                changed |= self.set_pixel(tx, ty, target, coverage - applied, params.paint_type);
            }
        }
        changed
    }

    /// Blend `delta` into one texel of layer `target`, keeping reference
    /// counts and dirty rectangles current
    fn set_pixel(&mut self, tx: i32, ty: i32, target: usize, delta: u8, paint_type: PaintType) -> bool {
        let index = (tx + ty * self.stride() as i32) as usize;
        let before: Vec<u8> = self.layers.iter().map(|l| l.blend_map[index]).collect();
        let mut after = before.clone();
        blend_texel(&mut after, target, delta, paint_type);

        let texel = Rect::new(tx, ty, tx + 1, ty + 1);
        let mut changed = false;
        for ((layer, &old), &new) in self.layers.iter_mut().zip(&before).zip(&after) {
            if old == new {
                continue;
            }
            layer.blend_map[index] = new;
            if old == 0 {
                layer.reference_count += 1;
            } else if new == 0 {
                layer.reference_count -= 1;
            }
            layer.dirty = layer.dirty.union(&texel);
            changed = true;
        }
        changed
    }

    /// Push in-progress paint changes to the GPU so they can be previewed
    pub fn update_paint_preview<R: ResourceManager + ?Sized>(&mut self, resources: &mut R) -> Result<()> {
        if self.layout_dirty {
            self.optimize_layers(resources);
        }
        self.upload(resources)
    }

    /// Finish the session: prune and repack layers, then upload
    pub fn end_paint<R: ResourceManager + ?Sized>(&mut self, resources: &mut R) -> Result<()> {
        if self.paint.take().is_none() {
            return Ok(());
        }
        self.optimize_layers(resources);
        self.upload(resources)
    }

    /// Drop unreferenced layers and pack the rest into combined maps, most
    /// referenced first, four channels per map
    pub fn optimize_layers<R: ResourceManager + ?Sized>(&mut self, resources: &mut R) {
        let before = self.layers.len();
        self.layers.retain(|l| l.reference_count > 0);
        if self.layers.len() != before {
            log::debug!("Block {}: pruned {} unused layers", self.block_index, before - self.layers.len());
        }
        self.layers.sort_by(|a, b| {
            b.reference_count.cmp(&a.reference_count).then(a.material.cmp(&b.material))
        });

        let map_count = self.layers.len().div_ceil(MAX_PASS_LAYERS);
        while self.maps.len() > map_count {
            if let Some(texture) = self.maps.pop().and_then(|m| m.texture) {
                resources.destroy_texture(texture);
            }
        }
        self.maps.resize_with(map_count, BatchedMap::default);

        let full = self.full_rect();
        for (map_index, map) in self.maps.iter_mut().enumerate() {
            let mut channels = [None; MAX_PASS_LAYERS];
            for (channel, slot) in channels.iter_mut().enumerate() {
                *slot = self.layers.get(map_index * MAX_PASS_LAYERS + channel).map(|l| l.material);
            }
            if channels != map.channels {
                map.channels = channels;
                map.dirty = full;
            }
        }
        for (i, layer) in self.layers.iter_mut().enumerate() {
            layer.combined_map = i / MAX_PASS_LAYERS;
            layer.channel = i % MAX_PASS_LAYERS;
        }

        while self.batches.len() > map_count {
            if let Some(buffer) = self.batches.pop().and_then(|b| b.layer_buffer) {
                resources.destroy_constant_buffer(buffer);
            }
        }
        for map_index in 0..map_count {
            let start = map_index * MAX_PASS_LAYERS;
            let layers: Vec<usize> = (start..(start + MAX_PASS_LAYERS).min(self.layers.len())).collect();
            match self.batches.get_mut(map_index) {
                Some(batch) => batch.layers = layers,
                None => self.batches.push(RenderBatch { layers, combined_map: map_index, layer_buffer: None }),
            }
        }
        self.layout_dirty = false;
    }

    /// Upload dirty regions of every combined map. A map whose texture cannot
    /// be allocated stays dirty and its layers render with zero weight.
    pub fn upload<R: ResourceManager + ?Sized>(&mut self, resources: &mut R) -> Result<()> {
        let stride = self.stride();
        let full = self.full_rect();
        let mut result = Ok(());

        for map_index in 0..self.maps.len() {
            let mut dirty = self.maps[map_index].dirty;
            for layer in self.layers.iter().filter(|l| l.combined_map == map_index) {
                dirty = dirty.union(&layer.dirty);
            }
            if dirty.is_empty() {
                continue;
            }

            let texture = match self.maps[map_index].texture {
                Some(texture) => texture,
                None => match resources.create_texture(stride, stride) {
                    Ok(texture) => {
                        self.maps[map_index].texture = Some(texture);
                        dirty = full;
                        texture
                    }
                    Err(e) => {
                        log::error!("Block {}: blend map {} allocation failed: {}", self.block_index, map_index, e);
                        self.maps[map_index].dirty = dirty;
                        result = Err(e);
                        continue;
                    }
                },
            };

            let rgba = self.compose_rgba(map_index, &dirty);
            if let Err(e) = resources.update_texture(texture, dirty, &rgba) {
                log::error!("Block {}: blend map {} upload failed: {}", self.block_index, map_index, e);
                self.maps[map_index].dirty = dirty;
                result = Err(e);
                continue;
            }
            self.maps[map_index].dirty = Rect::EMPTY;
            for layer in self.layers.iter_mut().filter(|l| l.combined_map == map_index) {
                layer.dirty = Rect::EMPTY;
            }
        }
        result
    }

    fn compose_rgba(&self, map_index: usize, rect: &Rect) -> Vec<u8> {
        let stride = self.stride() as i32;
        let mut rgba = Vec::with_capacity((rect.width() * rect.height() * 4) as usize);
        let channels: Vec<&LayerReference> = self.layers.iter().filter(|l| l.combined_map == map_index).collect();
        for y in rect.top..rect.bottom {
            for x in rect.left..rect.right {
                let mut texel = [0u8; 4];
                for layer in &channels {
                    texel[layer.channel] = layer.blend_map[(x + y * stride) as usize];
                }
                rgba.extend_from_slice(&texel);
            }
        }
        rgba
    }

    /// Start drawing; returns the number of passes this block needs
    pub fn begin_draw(&mut self) -> usize {
        self.current_pass = 0;
        self.batches.len().max(1)
    }

    /// Bind the resources of the current pass. Returns the pass index, or
    /// `None` once every pass has been drawn.
    pub fn begin_draw_pass<D: RenderDriver + ?Sized>(
        &mut self,
        driver: &mut D,
        materials: &MaterialLibrary,
        noise_strength: f32,
    ) -> Option<usize> {
        let pass_count = self.batches.len().max(1);
        if self.current_pass >= pass_count {
            return None;
        }
        let pass = self.current_pass;
        let stride = self.stride();

        let mut data = CbTerrainLayerData::default();
        let mut blend_map = None;
        if let Some(batch) = self.batches.get(pass) {
            blend_map = self.maps.get(batch.combined_map).and_then(|m| m.texture);
            if blend_map.is_some() {
                for (slot, &layer_index) in batch.layers.iter().enumerate() {
                    let layer = &self.layers[layer_index];
                    data.layers[slot] = materials.layer_data(layer.material, layer.channel, stride);
                    let material = materials.get(layer.material);
                    driver.set_texture(texture_slot::LAYER_COLOR + slot as u32, material.and_then(|m| m.color_texture));
                    driver.set_texture(texture_slot::LAYER_NORMAL + slot as u32, material.and_then(|m| m.normal_texture));
                }
                data.layer_count = batch.layers.len() as f32;
            } else {
                log::error!("Block {}: blend map for pass {} unavailable; layers dropped", self.block_index, pass);
            }
        }
        driver.set_texture(texture_slot::BLEND_MAP, blend_map);

        if let Some(batch) = self.batches.get_mut(pass) {
            if batch.layer_buffer.is_none() {
                match driver.create_constant_buffer(std::mem::size_of::<CbTerrainLayerData>()) {
                    Ok(buffer) => batch.layer_buffer = Some(buffer),
                    Err(e) => log::error!("Block {}: layer constant buffer allocation failed: {}", self.block_index, e),
                }
            }
            if let Some(buffer) = batch.layer_buffer {
                if let Err(e) = driver.update_constant_buffer(buffer, bytes_of(&data)) {
                    log::error!("Block {}: layer constant update failed: {}", self.block_index, e);
                }
                driver.set_constant_buffer(constant_slot::LAYER, buffer);
            }
        }

        let paint_data = CbTerrainPaintData {
            blend_map_scale: [self.size as f32 / stride as f32; 2],
            blend_map_offset: [1.0 / stride as f32; 2],
            pass_count: [pass_count as f32, 1.0 / pass_count as f32],
            noise_strength,
            _pad: 0.0,
        };
        if self.paint_buffer.is_none() {
            match driver.create_constant_buffer(std::mem::size_of::<CbTerrainPaintData>()) {
                Ok(buffer) => self.paint_buffer = Some(buffer),
                Err(e) => log::error!("Block {}: paint constant buffer allocation failed: {}", self.block_index, e),
            }
        }
        if let Some(buffer) = self.paint_buffer {
            if let Err(e) = driver.update_constant_buffer(buffer, bytes_of(&paint_data)) {
                log::error!("Block {}: paint constant update failed: {}", self.block_index, e);
            }
            driver.set_constant_buffer(constant_slot::PAINT, buffer);
        }

        Some(pass)
    }

    pub fn end_draw_pass(&mut self) {
        self.current_pass += 1;
    }

    /// Copy one material's weights over part of the global blend-map grid.
    /// `out` covers `region` row-major; only active texels of this block are
    /// written.
    pub fn copy_weights(&self, material: MaterialId, region: &Rect, out: &mut [u8]) {
        let Some(layer) = self.layer_index(material).map(|i| &self.layers[i]) else {
            return;
        };
        let (ox, oy) = self.grid_origin;
        let active = Rect::new(ox, oy, ox + self.size as i32, oy + self.size as i32);
        let overlap = active.intersect(region);
        let stride = self.stride() as i32;
        for gy in overlap.top..overlap.bottom {
            for gx in overlap.left..overlap.right {
                let local = (gx - ox + 1) + (gy - oy + 1) * stride;
                let dest = (gx - region.left) + (gy - region.top) * region.width();
                out[dest as usize] = layer.blend_map[local as usize];
            }
        }
    }

    /// Destroy all GPU resources; layer data is kept and re-uploaded on demand
    pub fn release<R: ResourceManager + ?Sized>(&mut self, resources: &mut R) {
        let full = self.full_rect();
        for map in &mut self.maps {
            if let Some(texture) = map.texture.take() {
                resources.destroy_texture(texture);
            }
            map.dirty = full;
        }
        for batch in &mut self.batches {
            if let Some(buffer) = batch.layer_buffer.take() {
                resources.destroy_constant_buffer(buffer);
            }
        }
        if let Some(buffer) = self.paint_buffer.take() {
            resources.destroy_constant_buffer(buffer);
        }
    }
}
