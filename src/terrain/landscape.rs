//! The landscape root: owns the height map, blocks, LOD table, spatial tree
//! and shading state, and drives culling, rendering and painting.
//!
//! Blocks refer to each other by index into [`Landscape::blocks`]. Graphics
//! resources are created through an injected [`ResourceManager`] and released
//! with [`Landscape::release`]; dropping a landscape without releasing it
//! leaks nothing on the CPU side but leaves the driver's objects alive.

use std::collections::{BTreeSet, HashMap};

use rayon::prelude::*;

use crate::core::camera::Camera;
use crate::core::error::Error;
use crate::core::types::{Result, Vec3};
use crate::math::{Aabb, Frustum, Ray, Rect, RectF};
use crate::render::buffer::{CbTerrainBaseData, CbTerrainLayerData, CbTerrainProcData, MAX_PROCEDURAL_PASS_LAYERS};
use crate::render::driver::{
    constant_slot, texture_slot, ConstantBufferHandle, RenderDriver, RenderMode, RenderState, ResourceManager,
    TextureHandle,
};
use crate::render::visibility::{IssuerId, VisibilityFlags, VisibilitySet};
use crate::streaming::{BlockRecord, LandscapeHeader, LandscapeStore, PaintedLayerRecord};
use super::block::{BlockContext, BlockDrawStats, TerrainBlock};
use super::config::LandscapeConfig;
use super::heightmap::{HeightMap, MAX_CELL_HEIGHT};
use super::lod::{Edge, LodTable};
use super::material::{MaterialId, MaterialLibrary};
use super::occlusion::{HorizonBuffer, OcclusionScheduler};
use super::paint::PaintParams;
use super::procedural::{batch_procedural_draws, ProceduralDrawBatch, ProceduralLayer};
use super::spatial_tree::{SpatialTree, TraversalStats};
use super::texture_data::LandscapeTextureData;

const DEFAULT_VERTEX_COLOR: u32 = 0xFFFF_FFFF;
const RAY_BISECTION_STEPS: u32 = 16;

/// Landscape behaviour flags
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct LandscapeFlags(u32);

impl LandscapeFlags {
    pub const NONE: LandscapeFlags = LandscapeFlags(0);
    /// Height samples may be edited after import
    pub const DYNAMIC: LandscapeFlags = LandscapeFlags(1);
    /// LOD selection uses horizontal distance only
    pub const LOD_IGNORE_Y: LandscapeFlags = LandscapeFlags(2);

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: LandscapeFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for LandscapeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// How a render pass shades the terrain
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LandscapeRenderMethod {
    /// Geometry only, for depth pre-passes and shadow maps
    DepthFill,
    /// Height and slope driven layers
    Procedural,
    /// Painted blend-map layers
    Painted,
    Wireframe,
}

impl LandscapeRenderMethod {
    fn render_mode(self) -> RenderMode {
        match self {
            LandscapeRenderMethod::DepthFill => RenderMode::Simple,
            LandscapeRenderMethod::Procedural => RenderMode::Procedural,
            LandscapeRenderMethod::Painted => RenderMode::Painted,
            LandscapeRenderMethod::Wireframe => RenderMode::Wire,
        }
    }
}

/// Counters from one render pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub blocks_drawn: u32,
    /// Shading passes issued, summed over blocks
    pub passes: u32,
    pub draws: BlockDrawStats,
}

/// Inputs for building a landscape from a height map
#[derive(Clone, Debug)]
pub struct LandscapeImportParams {
    pub landscape_id: u32,
    pub height_map: HeightMap,
    /// Per-sample RGBA8 colours, same dimensions as the height map
    pub color_map: Option<Vec<u32>>,
    /// World units per height-map sample (x, z) and per height unit (y)
    pub scale: Vec3,
    pub offset: Vec3,
    /// Vertices per block edge; one more than a power of two
    pub block_verts: u32,
    /// Blocks along X and Z
    pub block_layout: (u32, u32),
    /// Active blend-map texels per block edge
    pub blend_map_size: u32,
    pub flags: LandscapeFlags,
    pub procedural_layers: Vec<ProceduralLayer>,
    pub config: LandscapeConfig,
}

impl LandscapeImportParams {
    /// Parameters with the block layout derived from the height map size
    pub fn new(landscape_id: u32, height_map: HeightMap, block_verts: u32) -> Result<Self> {
        let quads = block_verts.saturating_sub(1);
        if quads == 0 {
            return Err(Error::Layout(format!("block size {} too small", block_verts)));
        }
        let (w, h) = (height_map.width(), height_map.height());
        if w < 2 || h < 2 || (w - 1) % quads != 0 || (h - 1) % quads != 0 {
            return Err(Error::Layout(format!(
                "{}x{} height map does not divide into blocks of {} vertices",
                w, h, block_verts
            )));
        }
        Ok(Self {
            landscape_id,
            block_layout: ((w - 1) / quads, (h - 1) / quads),
            height_map,
            color_map: None,
            scale: Vec3::ONE,
            offset: Vec3::ZERO,
            block_verts,
            blend_map_size: quads,
            flags: LandscapeFlags::NONE,
            procedural_layers: Vec::new(),
            config: LandscapeConfig::default(),
        })
    }

    /// Set the scale so the terrain spans `dimensions` world units; y maps
    /// the full sample range
    pub fn with_dimensions(mut self, dimensions: Vec3) -> Self {
        self.scale = Vec3::new(
            dimensions.x / (self.height_map.width() - 1) as f32,
            dimensions.y / MAX_CELL_HEIGHT as f32,
            dimensions.z / (self.height_map.height() - 1) as f32,
        );
        self
    }

    fn validate(&self) -> Result<()> {
        let quads = self.block_verts.saturating_sub(1);
        if quads == 0 || !quads.is_power_of_two() {
            return Err(Error::Layout(format!(
                "block size {} is not a power of two plus one",
                self.block_verts
            )));
        }
        let (bx, bz) = self.block_layout;
        if bx == 0 || bz == 0 {
            return Err(Error::Layout("block layout must be at least 1x1".into()));
        }
        let expected = (bx * quads + 1, bz * quads + 1);
        let actual = (self.height_map.width(), self.height_map.height());
        if expected != actual {
            return Err(Error::Layout(format!(
                "{}x{} blocks of {} vertices need a {}x{} height map, got {}x{}",
                bx, bz, self.block_verts, expected.0, expected.1, actual.0, actual.1
            )));
        }
        if let Some(colors) = &self.color_map {
            if colors.len() != (actual.0 * actual.1) as usize {
                return Err(Error::Layout(format!(
                    "colour map has {} samples, height map has {}",
                    colors.len(),
                    actual.0 * actual.1
                )));
            }
        }
        if self.blend_map_size == 0 {
            return Err(Error::Layout("blend map size must be non-zero".into()));
        }
        if self.scale.x <= 0.0 || self.scale.z <= 0.0 {
            return Err(Error::Layout(format!("horizontal scale {:?} must be positive", self.scale)));
        }
        Ok(())
    }
}

struct PaintStroke {
    material: MaterialId,
    params: PaintParams,
    blocks: BTreeSet<usize>,
}

pub struct Landscape {
    id: u32,
    config: LandscapeConfig,
    flags: LandscapeFlags,
    height_map: HeightMap,
    color_map: Option<Vec<u32>>,
    scale: Vec3,
    offset: Vec3,
    block_layout: (u32, u32),
    block_verts: u32,
    blend_map_size: u32,
    lods: LodTable,
    blocks: Vec<TerrainBlock>,
    tree: SpatialTree,
    horizon: HorizonBuffer,
    occlusion: HashMap<IssuerId, OcclusionScheduler>,
    materials: MaterialLibrary,
    procedural_layers: Vec<ProceduralLayer>,
    procedural_batches: Vec<ProceduralDrawBatch>,
    procedural_dirty: bool,
    base_buffer: Option<ConstantBufferHandle>,
    procedural_buffer: Option<ConstantBufferHandle>,
    procedural_layer_buffer: Option<ConstantBufferHandle>,
    normal_texture: Option<TextureHandle>,
    stroke: Option<PaintStroke>,
}

impl Landscape {
    /// Build a landscape from a height map. Geometry is computed on the CPU
    /// in parallel; GPU uploads that fail are logged and retried on the next
    /// render pass.
    pub fn import<R: ResourceManager + ?Sized>(params: LandscapeImportParams, resources: &mut R) -> Result<Self> {
        params.validate()?;
        let mut lods = LodTable::build(params.block_verts)?;
        if let Err(e) = lods.create_resources(resources) {
            log::error!("Landscape {}: LOD index buffers unavailable: {}", params.landscape_id, e);
        }

        let quads = params.block_verts - 1;
        let (layout_x, layout_z) = params.block_layout;
        let mut blocks = Vec::with_capacity((layout_x * layout_z) as usize);
        for bz in 0..layout_z {
            for bx in 0..layout_x {
                let index = blocks.len();
                let left = (bx * quads) as i32;
                let top = (bz * quads) as i32;
                let rect = Rect::new(left, top, left + quads as i32 + 1, top + quads as i32 + 1);
                let texture = LandscapeTextureData::new(
                    index,
                    params.blend_map_size,
                    block_world_area(&rect, params.scale, params.offset),
                    ((bx * params.blend_map_size) as i32, (bz * params.blend_map_size) as i32),
                );
                let mut block = TerrainBlock::new(index, bx, bz, rect, texture);
                let at = |x: u32, z: u32| (z * layout_x + x) as usize;
                block.set_neighbor(Edge::North, (bz > 0).then(|| at(bx, bz - 1)));
                block.set_neighbor(Edge::East, (bx + 1 < layout_x).then(|| at(bx + 1, bz)));
                block.set_neighbor(Edge::South, (bz + 1 < layout_z).then(|| at(bx, bz + 1)));
                block.set_neighbor(Edge::West, (bx > 0).then(|| at(bx - 1, bz)));
                blocks.push(block);
            }
        }

        let mut landscape = Self {
            id: params.landscape_id,
            horizon: HorizonBuffer::from_config(&params.config.occlusion),
            config: params.config,
            flags: params.flags,
            height_map: params.height_map,
            color_map: params.color_map,
            scale: params.scale,
            offset: params.offset,
            block_layout: params.block_layout,
            block_verts: params.block_verts,
            blend_map_size: params.blend_map_size,
            lods,
            blocks,
            tree: SpatialTree::default(),
            occlusion: HashMap::new(),
            materials: MaterialLibrary::new(),
            procedural_layers: params.procedural_layers,
            procedural_batches: Vec::new(),
            procedural_dirty: true,
            base_buffer: None,
            procedural_buffer: None,
            procedural_layer_buffer: None,
            normal_texture: None,
            stroke: None,
        };
        landscape.rebuild_blocks(None, resources);
        if let Err(e) = landscape.update_normal_texture(resources, None) {
            log::error!("Landscape {}: normal texture unavailable: {}", landscape.id, e);
        }

        log::info!(
            "Landscape {} imported: {}x{} samples, {}x{} blocks of {} vertices, {} LOD levels, {} tree nodes",
            landscape.id,
            landscape.height_map.width(),
            landscape.height_map.height(),
            layout_x,
            layout_z,
            landscape.block_verts,
            landscape.lods.lod_count(),
            landscape.tree.nodes().len()
        );
        Ok(landscape)
    }

    /// Load a landscape saved with [`Self::save`]. Unreadable or malformed
    /// block records are logged and replaced by flat terrain.
    pub fn load<S, R>(store: &S, landscape_id: u32, resources: &mut R) -> Result<Self>
    where
        S: LandscapeStore + ?Sized,
        R: ResourceManager + ?Sized,
    {
        let header = store.load_header(landscape_id)?;
        header.validate()?;
        let (width, height) = header.height_map_size;
        let (layout_x, layout_z) = header.block_layout;
        let verts = header.block_verts;
        let quads = verts.saturating_sub(1) as i32;

        let mut height_map = HeightMap::new(width, height);
        let mut color_map: Option<Vec<u32>> = None;
        let mut painted: Vec<(usize, Vec<PaintedLayerRecord>)> = Vec::new();

        for index in 0..layout_x * layout_z {
            let record = store
                .load_block(landscape_id, index)
                .and_then(|record| record.validate(index, verts, header.blend_map_size).map(|_| record));
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    log::error!("Landscape {}: block {} replaced by flat terrain: {}", landscape_id, index, e);
                    continue;
                }
            };
            let left = (index % layout_x) as i32 * quads;
            let top = (index / layout_x) as i32 * quads;
            for z in 0..verts as i32 {
                for x in 0..verts as i32 {
                    let sample = (x + z * verts as i32) as usize;
                    height_map.set_cell(left + x, top + z, record.heights[sample]);
                    if !record.colors.is_empty() {
                        let colors = color_map
                            .get_or_insert_with(|| vec![DEFAULT_VERTEX_COLOR; (width * height) as usize]);
                        if let Some(slot) = colors.get_mut((left + x) as usize + (top + z) as usize * width as usize) {
                            *slot = record.colors[sample];
                        }
                    }
                }
            }
            painted.push((index as usize, record.layers));
        }

        let procedural_layers = store.load_procedural_layers(landscape_id).unwrap_or_else(|e| {
            log::warn!("Landscape {}: procedural layers unreadable: {}", landscape_id, e);
            Vec::new()
        });

        let params = LandscapeImportParams {
            landscape_id,
            height_map,
            color_map,
            scale: Vec3::from_array(header.scale),
            offset: Vec3::from_array(header.offset),
            block_verts: verts,
            block_layout: header.block_layout,
            blend_map_size: header.blend_map_size,
            flags: LandscapeFlags::from_bits(header.flags),
            procedural_layers,
            config: header.config,
        };
        let mut landscape = Self::import(params, resources)?;
        for material in header.materials {
            landscape.materials.insert(material);
        }

        for (index, layers) in painted {
            let texture_data = landscape.blocks[index].texture_data_mut();
            for layer in layers {
                if let Err(e) = texture_data.set_layer_data(layer.material, layer.blend_map) {
                    log::error!("Landscape {}: block {} layer dropped: {}", landscape_id, index, e);
                }
            }
            texture_data.optimize_layers(resources);
            if let Err(e) = texture_data.upload(resources) {
                log::error!("Landscape {}: block {} blend maps not uploaded: {}", landscape_id, index, e);
            }
        }
        Ok(landscape)
    }

    /// Write the header, every block and the procedural layers
    pub fn save<S: LandscapeStore + ?Sized>(&self, store: &mut S) -> Result<()> {
        store.save_header(&self.header())?;
        for block in &self.blocks {
            store.save_block(self.id, &self.block_record(block)?)?;
        }
        store.save_procedural_layers(self.id, &self.procedural_layers)?;
        log::info!("Landscape {} saved: {} blocks", self.id, self.blocks.len());
        Ok(())
    }

    pub fn header(&self) -> LandscapeHeader {
        LandscapeHeader {
            landscape_id: self.id,
            height_map_size: (self.height_map.width(), self.height_map.height()),
            block_layout: self.block_layout,
            block_verts: self.block_verts,
            blend_map_size: self.blend_map_size,
            scale: self.scale.to_array(),
            offset: self.offset.to_array(),
            flags: self.flags.bits(),
            config: self.config.clone(),
            materials: self.materials.iter().cloned().collect(),
        }
    }

    fn block_record(&self, block: &TerrainBlock) -> Result<BlockRecord> {
        let rect = block.rect();
        let heights = self.height_map.section(&rect)?.data().to_vec();
        let colors = match &self.color_map {
            Some(colors) => {
                let width = self.height_map.width() as usize;
                (rect.top..rect.bottom)
                    .flat_map(|z| (rect.left..rect.right).map(move |x| x as usize + z as usize * width))
                    .map(|i| colors[i])
                    .collect()
            }
            None => Vec::new(),
        };
        let layers = block
            .texture_data()
            .layers()
            .iter()
            .map(|layer| PaintedLayerRecord { material: layer.material, blend_map: layer.blend_map.clone() })
            .collect();
        Ok(BlockRecord {
            block_index: block.index() as u32,
            width: rect.width() as u32,
            height: rect.height() as u32,
            heights,
            colors,
            layers,
        })
    }

    /// Recompute geometry of blocks touching `region` (all blocks when
    /// `None`), upload it and rebuild the spatial tree
    fn rebuild_blocks<R: ResourceManager + ?Sized>(&mut self, region: Option<&Rect>, resources: &mut R) {
        let ctx = BlockContext {
            height_map: &self.height_map,
            color_map: self.color_map.as_deref(),
            scale: self.scale,
            offset: self.offset,
            lods: &self.lods,
            min_skirt_depth: self.config.lod.min_skirt_depth,
        };
        self.blocks
            .par_iter_mut()
            .filter(|block| region.is_none_or(|r| !block.rect().intersect(r).is_empty()))
            .for_each(|block| block.compute_geometry(&ctx));

        for block in &mut self.blocks {
            if block.upload_pending() {
                if let Err(e) = block.upload(resources) {
                    log::error!("Landscape {}: block {} upload failed: {}", self.id, block.index(), e);
                }
            }
        }
        self.tree = SpatialTree::build(&self.blocks, self.block_layout, self.config.occlusion.max_tree_depth);
        self.procedural_dirty = true;
    }

    /// Retry resources whose creation failed earlier
    fn ensure_resources<R: ResourceManager + ?Sized>(&mut self, visibility: &VisibilitySet, resources: &mut R) {
        if let Err(e) = self.lods.create_resources(resources) {
            log::error!("Landscape {}: LOD index buffers unavailable: {}", self.id, e);
        }
        for &index in visibility.blocks() {
            let block = &mut self.blocks[index];
            if block.upload_pending() {
                if let Err(e) = block.upload(resources) {
                    log::warn!("Landscape {}: block {} upload retry failed: {}", self.id, index, e);
                }
            }
        }
    }

    // --- Accessors ---

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn config(&self) -> &LandscapeConfig {
        &self.config
    }

    /// Mutable configuration. Occlusion resolution changes take effect on
    /// the next [`Self::compute_visibility`].
    pub fn config_mut(&mut self) -> &mut LandscapeConfig {
        &mut self.config
    }

    pub fn flags(&self) -> LandscapeFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: LandscapeFlags) {
        self.flags = flags;
    }

    pub fn height_map(&self) -> &HeightMap {
        &self.height_map
    }

    /// Editable height samples; only dynamic landscapes allow edits. Call
    /// [`Self::height_map_updated`] afterwards.
    pub fn height_map_mut(&mut self) -> Option<&mut HeightMap> {
        if self.flags.contains(LandscapeFlags::DYNAMIC) {
            Some(&mut self.height_map)
        } else {
            log::warn!("Landscape {} is not dynamic; height map is read-only", self.id);
            None
        }
    }

    pub fn color_map(&self) -> Option<&[u32]> {
        self.color_map.as_deref()
    }

    pub fn blocks(&self) -> &[TerrainBlock] {
        &self.blocks
    }

    pub fn block(&self, index: usize) -> Option<&TerrainBlock> {
        self.blocks.get(index)
    }

    pub fn block_layout(&self) -> (u32, u32) {
        self.block_layout
    }

    pub fn block_verts(&self) -> u32 {
        self.block_verts
    }

    pub fn blend_map_size(&self) -> u32 {
        self.blend_map_size
    }

    pub fn lods(&self) -> &LodTable {
        &self.lods
    }

    pub fn spatial_tree(&self) -> &SpatialTree {
        &self.tree
    }

    /// Occlusion schedule of one issuer, once it has searched
    pub fn occlusion(&self, issuer: IssuerId) -> Option<&OcclusionScheduler> {
        self.occlusion.get(&issuer)
    }

    pub fn horizon(&self) -> &HorizonBuffer {
        &self.horizon
    }

    pub fn materials(&self) -> &MaterialLibrary {
        &self.materials
    }

    pub fn materials_mut(&mut self) -> &mut MaterialLibrary {
        &mut self.materials
    }

    pub fn normal_texture(&self) -> Option<TextureHandle> {
        self.normal_texture
    }

    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    pub fn offset(&self) -> Vec3 {
        self.offset
    }

    /// World extent of the terrain: x and z span the height map, y spans
    /// the full sample range
    pub fn dimensions(&self) -> Vec3 {
        Vec3::new(
            (self.height_map.width() - 1) as f32 * self.scale.x,
            MAX_CELL_HEIGHT as f32 * self.scale.y,
            (self.height_map.height() - 1) as f32 * self.scale.z,
        )
    }

    /// Union of all block bounds
    pub fn bounds(&self) -> Aabb {
        self.blocks.iter().fold(Aabb::EMPTY, |acc, block| acc.merged(block.bounds()))
    }

    pub fn set_scale<R: ResourceManager + ?Sized>(&mut self, scale: Vec3, resources: &mut R) -> Result<()> {
        if scale.x <= 0.0 || scale.z <= 0.0 {
            return Err(Error::Layout(format!("horizontal scale {:?} must be positive", scale)));
        }
        self.scale = scale;
        self.update_world_areas();
        self.rebuild_blocks(None, resources);
        Ok(())
    }

    /// Scale so the terrain spans `dimensions` in world units
    pub fn set_dimensions<R: ResourceManager + ?Sized>(&mut self, dimensions: Vec3, resources: &mut R) -> Result<()> {
        let scale = Vec3::new(
            dimensions.x / (self.height_map.width() - 1) as f32,
            dimensions.y / MAX_CELL_HEIGHT as f32,
            dimensions.z / (self.height_map.height() - 1) as f32,
        );
        self.set_scale(scale, resources)
    }

    pub fn set_offset<R: ResourceManager + ?Sized>(&mut self, offset: Vec3, resources: &mut R) {
        self.offset = offset;
        self.update_world_areas();
        self.rebuild_blocks(None, resources);
    }

    fn update_world_areas(&mut self) {
        for block in &mut self.blocks {
            let area = block_world_area(&block.rect(), self.scale, self.offset);
            block.texture_data_mut().set_world_area(area);
        }
    }

    // --- Height queries and edits ---

    fn context(&self) -> BlockContext<'_> {
        BlockContext {
            height_map: &self.height_map,
            color_map: self.color_map.as_deref(),
            scale: self.scale,
            offset: self.offset,
            lods: &self.lods,
            min_skirt_depth: self.config.lod.min_skirt_depth,
        }
    }

    /// Index of the block containing a world XZ position, clamped to the grid
    pub fn block_at(&self, x: f32, z: f32) -> usize {
        let quads = (self.block_verts - 1) as f32;
        let cell_x = (x - self.offset.x) / self.scale.x / quads;
        let cell_z = (z - self.offset.z) / self.scale.z / quads;
        let bx = (cell_x.floor().max(0.0) as u32).min(self.block_layout.0 - 1);
        let bz = (cell_z.floor().max(0.0) as u32).min(self.block_layout.1 - 1);
        (bz * self.block_layout.0 + bx) as usize
    }

    /// World height at an XZ position. Positions outside the terrain clamp
    /// to its edge. With `account_for_lod` the height follows the mesh at
    /// each block's current level of detail.
    pub fn terrain_height(&self, x: f32, z: f32, account_for_lod: bool) -> f32 {
        let ctx = self.context();
        self.blocks[self.block_at(x, z)].terrain_height(&ctx, x, z, account_for_lod)
    }

    /// Height-map normal nearest to a world XZ position
    pub fn height_map_normal(&self, x: f32, z: f32) -> Vec3 {
        let block = &self.blocks[self.block_at(x, z)];
        let rect = block.rect();
        let local_x = ((x - self.offset.x) / self.scale.x).round() as i32 - rect.left;
        let local_z = ((z - self.offset.z) / self.scale.z).round() as i32 - rect.top;
        block.height_map_normal(&self.context(), local_x, local_z)
    }

    /// First point where the segment `origin .. origin + velocity` meets the
    /// terrain surface. The segment is marched in steps of `accuracy` world
    /// units and the crossing refined by bisection.
    pub fn ray_intersect(&self, origin: Vec3, velocity: Vec3, accuracy: f32) -> Option<Vec3> {
        let length = velocity.length();
        if length <= f32::EPSILON {
            return None;
        }
        let ray = Ray::new(origin, velocity);
        let (t_start, t_end) = ray.clip_to_aabb(&self.bounds(), 1.0)?;
        let below = |t: f32| {
            let p = ray.at(t);
            p.y <= self.terrain_height(p.x, p.z, false)
        };
        if below(t_start) {
            return Some(ray.at(t_start));
        }

        let step = (accuracy.max(1e-3) / length).max(1e-6);
        let mut previous = t_start;
        loop {
            let t = (previous + step).min(t_end);
            if below(t) {
                let (mut above_t, mut below_t) = (previous, t);
                for _ in 0..RAY_BISECTION_STEPS {
                    let mid = (above_t + below_t) * 0.5;
                    if below(mid) {
                        below_t = mid;
                    } else {
                        above_t = mid;
                    }
                }
                return Some(ray.at(below_t));
            }
            if t >= t_end {
                return None;
            }
            previous = t;
        }
    }

    /// Rebuild blocks after height samples inside `region` changed
    pub fn height_map_updated<R: ResourceManager + ?Sized>(&mut self, region: Rect, resources: &mut R) {
        // Normals read one sample beyond the edited cells
        let affected = region.inflate(1).intersect(&self.height_map.bounds());
        if affected.is_empty() {
            return;
        }
        self.rebuild_blocks(Some(&affected), resources);
        if let Err(e) = self.update_normal_texture(resources, Some(affected)) {
            log::error!("Landscape {}: normal texture update failed: {}", self.id, e);
        }
    }

    /// Refresh the RGBA8 height-map normal texture, creating it on first use
    pub fn update_normal_texture<R: ResourceManager + ?Sized>(&mut self, resources: &mut R, region: Option<Rect>) -> Result<()> {
        let bounds = self.height_map.bounds();
        let texture = match self.normal_texture {
            Some(texture) => texture,
            None => {
                let texture = resources.create_texture(self.height_map.width(), self.height_map.height())?;
                self.normal_texture = Some(texture);
                texture
            }
        };
        let rect = region.map_or(bounds, |r| r.intersect(&bounds));
        if rect.is_empty() {
            return Ok(());
        }
        let mut rgba = Vec::with_capacity((rect.width() * rect.height() * 4) as usize);
        for z in rect.top..rect.bottom {
            for x in rect.left..rect.right {
                let n = self.height_map.normal(x, z, self.scale) * 0.5 + Vec3::splat(0.5);
                let to_byte = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
                rgba.extend_from_slice(&[to_byte(n.x), to_byte(n.y), to_byte(n.z), 255]);
            }
        }
        resources.update_texture(texture, rect, &rgba)
    }

    // --- Procedural layers ---

    pub fn procedural_layers(&self) -> &[ProceduralLayer] {
        &self.procedural_layers
    }

    pub fn procedural_layer(&self, index: usize) -> Option<&ProceduralLayer> {
        self.procedural_layers.get(index)
    }

    /// Replace one layer; returns false when `index` is out of range
    pub fn set_procedural_layer(&mut self, index: usize, layer: ProceduralLayer) -> bool {
        match self.procedural_layers.get_mut(index) {
            Some(slot) => {
                *slot = layer;
                self.procedural_dirty = true;
                true
            }
            None => {
                log::warn!("Landscape {}: no procedural layer {}", self.id, index);
                false
            }
        }
    }

    pub fn add_procedural_layer(&mut self, layer: ProceduralLayer) -> usize {
        self.procedural_layers.push(layer);
        self.procedural_dirty = true;
        self.procedural_layers.len() - 1
    }

    pub fn remove_procedural_layer(&mut self, index: usize) -> Option<ProceduralLayer> {
        if index >= self.procedural_layers.len() {
            return None;
        }
        self.procedural_dirty = true;
        Some(self.procedural_layers.remove(index))
    }

    /// Replace every layer
    pub fn update_procedural_layers(&mut self, layers: Vec<ProceduralLayer>) {
        self.procedural_layers = layers;
        self.procedural_dirty = true;
    }

    /// Blocks grouped by the procedural layers that can affect them
    pub fn procedural_batches(&mut self) -> &[ProceduralDrawBatch] {
        if self.procedural_dirty {
            self.procedural_batches = batch_procedural_draws(&self.procedural_layers, &self.blocks);
            self.procedural_dirty = false;
            log::debug!(
                "Landscape {}: {} procedural batches for {} layers",
                self.id,
                self.procedural_batches.len(),
                self.procedural_layers.len()
            );
        }
        &self.procedural_batches
    }

    // --- Painting ---

    pub fn is_painting(&self) -> bool {
        self.stroke.is_some()
    }

    /// Start a paint stroke. Blocks join the stroke as the brush reaches
    /// them.
    pub fn begin_paint(&mut self, material: MaterialId, params: PaintParams) {
        if self.stroke.is_some() {
            log::warn!("Landscape {}: paint stroke already active; restarting", self.id);
        }
        self.stroke = Some(PaintStroke { material, params, blocks: BTreeSet::new() });
    }

    pub fn paint(&mut self, x: f32, z: f32) -> bool {
        self.paint_line(x, z, x, z)
    }

    /// Sweep the brush along a segment. Returns true if any texel changed.
    pub fn paint_line(&mut self, from_x: f32, from_z: f32, to_x: f32, to_z: f32) -> bool {
        let Some(stroke) = self.stroke.as_mut() else {
            log::warn!("Landscape {}: paint without begin_paint", self.id);
            return false;
        };
        let reach = stroke.params.outer_radius.max(stroke.params.inner_radius).max(0.0);
        let area = RectF::from_segment(from_x, from_z, to_x, to_z, reach);

        // Border texels reach one texel beyond a block's own footprint
        let quads = (self.block_verts - 1) as f32;
        let texel = (quads * self.scale.x.max(self.scale.z)) / self.blend_map_size as f32;
        let query = Aabb::new(
            Vec3::new(area.left - texel, f32::MIN, area.top - texel),
            Vec3::new(area.right + texel, f32::MAX, area.bottom + texel),
        );
        let mut candidates = Vec::new();
        self.tree.collect_blocks(&query, &mut candidates);

        let mut changed = false;
        for index in candidates {
            let texture_data = self.blocks[index].texture_data_mut();
            if !texture_data.blend_map_world_area().intersects(&area) {
                continue;
            }
            if stroke.blocks.insert(index) {
                texture_data.begin_paint(stroke.material, stroke.params);
            }
            changed |= texture_data.paint_line(from_x, from_z, to_x, to_z);
        }
        changed
    }

    /// Upload the blend maps touched so far without ending the stroke
    pub fn update_paint_preview<R: ResourceManager + ?Sized>(&mut self, resources: &mut R) {
        let Some(stroke) = self.stroke.as_ref() else {
            return;
        };
        for &index in &stroke.blocks {
            if let Err(e) = self.blocks[index].texture_data_mut().update_paint_preview(resources) {
                log::error!("Landscape {}: block {} paint preview failed: {}", self.id, index, e);
            }
        }
    }

    /// Finish the stroke, repacking and uploading every touched block
    pub fn end_paint<R: ResourceManager + ?Sized>(&mut self, resources: &mut R) {
        let Some(stroke) = self.stroke.take() else {
            return;
        };
        for &index in &stroke.blocks {
            if let Err(e) = self.blocks[index].texture_data_mut().end_paint(resources) {
                log::error!("Landscape {}: block {} blend maps not uploaded: {}", self.id, index, e);
            }
        }
        log::debug!("Landscape {}: paint stroke touched {} blocks", self.id, stroke.blocks.len());
    }

    /// Weights of one material over a region of the global blend-map grid,
    /// row-major. Texels no block has painted are zero.
    pub fn blend_map_paint_data(&self, material: MaterialId, region: Rect) -> Vec<u8> {
        let mut out = vec![0u8; (region.width().max(0) * region.height().max(0)) as usize];
        if region.is_empty() {
            return out;
        }
        for block in &self.blocks {
            let texture_data = block.texture_data();
            if !texture_data.blend_map_area().intersect(&region).is_empty() {
                texture_data.copy_weights(material, &region, &mut out);
            }
        }
        out
    }

    // --- Culling ---

    /// Fill `visibility` with the blocks visible from `frustum`, using
    /// horizon occlusion when enabled and not backed off for `issuer`.
    /// Shadow caster searches skip horizon occlusion.
    pub fn compute_visibility(
        &mut self,
        frustum: &Frustum,
        visibility: &mut VisibilitySet,
        flags: VisibilityFlags,
        issuer: IssuerId,
    ) -> TraversalStats {
        visibility.clear();
        let occlusion = &self.config.occlusion;
        if self.horizon.resolution() != occlusion.horizon_resolution.max(1) as usize {
            self.horizon = HorizonBuffer::from_config(occlusion);
        }
        let scheduler = self.occlusion.entry(issuer).or_default();
        let test_occlusion = !flags.contains(VisibilityFlags::MUST_CAST_SHADOWS)
            && scheduler.begin_frame(frustum.origin, occlusion);
        let horizon = test_occlusion.then_some(&mut self.horizon);
        let stats = self.tree.compute_visibility(frustum, horizon, visibility);
        if test_occlusion {
            scheduler.end_frame(frustum.origin, stats.occlusion_success, stats.occlusion_failure, occlusion);
        }
        if flags.contains(VisibilityFlags::COLLECT_MATERIALS) {
            self.collect_materials(visibility);
        }
        for (index, block) in self.blocks.iter_mut().enumerate() {
            block.set_visible(visibility.contains_block(index));
        }
        log::trace!(
            "Landscape {}: {} blocks visible, {} nodes visited, {} frustum culled, {} occluded",
            self.id,
            visibility.blocks().len(),
            stats.nodes_visited,
            stats.frustum_culled,
            stats.occlusion_success
        );
        stats
    }

    fn collect_materials(&mut self, visibility: &mut VisibilitySet) {
        let mut materials: Vec<MaterialId> = visibility
            .blocks()
            .iter()
            .flat_map(|&index| self.blocks[index].texture_data().layers().iter().map(|l| l.material))
            .collect();
        let batches = self.procedural_batches().to_vec();
        for batch in batches.iter().filter(|b| b.blocks.iter().any(|&i| visibility.contains_block(i))) {
            materials.extend(batch.layers.iter().map(|&layer| self.procedural_layers[layer].material));
        }
        for material in materials {
            visibility.add_material(material);
        }
    }

    /// Whether an object of `size` at squared distance `distance_sq` from
    /// the camera should be skipped
    pub fn should_cull_object(&self, size: f32, distance_sq: f32) -> bool {
        let render = &self.config.render;
        if render.cull_distance > 0.0 && distance_sq > render.cull_distance * render.cull_distance {
            return true;
        }
        render
            .cull_descriptors
            .iter()
            .filter(|d| size <= d.maximum_size)
            .min_by(|a, b| a.maximum_size.total_cmp(&b.maximum_size))
            .is_some_and(|d| distance_sq > d.distance * d.distance)
    }

    // --- Rendering ---

    /// Select levels of detail for the visible blocks and their neighbours
    pub fn update_lods(&mut self, camera: &Camera, visibility: &VisibilitySet) {
        let ignore_y = self.flags.contains(LandscapeFlags::LOD_IGNORE_Y);
        let mut pending = BTreeSet::new();
        for &index in visibility.blocks() {
            pending.insert(index);
            pending.extend(self.blocks[index].neighbors().into_iter().flatten());
        }
        for index in pending {
            self.blocks[index].calculate_lod(camera, self.config.lod.terrain_detail, 0, &self.config.lod, ignore_y);
        }
    }

    fn neighbor_lods(&self, index: usize) -> [Option<usize>; 4] {
        self.blocks[index].neighbors().map(|n| n.map(|i| self.blocks[i].current_lod()))
    }

    fn bind_base_constants<D: RenderDriver + ?Sized>(&mut self, driver: &mut D) {
        let dimensions = self.dimensions();
        let data = CbTerrainBaseData {
            color: self.config.render.base_color,
            terrain_size: [dimensions.x, dimensions.y, dimensions.z, 1.0 / dimensions.x.max(f32::EPSILON)],
            terrain_offset: self.offset.to_array(),
            noise_strength: self.config.render.noise_strength,
        };
        if let Some(buffer) = update_constants(driver, &mut self.base_buffer, bytemuck::bytes_of(&data), self.id) {
            driver.set_constant_buffer(constant_slot::BASE, buffer);
        }
        driver.set_texture(texture_slot::NORMAL_MAP, self.normal_texture);
    }

    /// Draw the visible blocks with one shading method
    pub fn render_pass<D: RenderDriver + ?Sized>(
        &mut self,
        method: LandscapeRenderMethod,
        camera: &Camera,
        visibility: &VisibilitySet,
        driver: &mut D,
    ) -> RenderStats {
        self.ensure_resources(visibility, driver);
        self.update_lods(camera, visibility);

        let state = match method {
            LandscapeRenderMethod::Wireframe => RenderState::WIREFRAME,
            _ => RenderState::OPAQUE,
        };
        driver.push_render_state(state);
        driver.set_shader(method.render_mode());
        self.bind_base_constants(driver);

        let stats = match method {
            LandscapeRenderMethod::DepthFill | LandscapeRenderMethod::Wireframe => {
                self.draw_geometry(method.render_mode(), visibility, driver)
            }
            LandscapeRenderMethod::Procedural => self.draw_procedural(visibility, driver),
            LandscapeRenderMethod::Painted => self.draw_painted(visibility, driver),
        };
        driver.pop_render_state();
        stats
    }

    fn draw_block<D: RenderDriver + ?Sized>(&self, index: usize, mode: RenderMode, driver: &mut D) -> BlockDrawStats {
        let neighbor_lods = self.neighbor_lods(index);
        self.blocks[index].draw(driver, &self.lods, neighbor_lods, mode, self.config.lod.skirt_grid_edges)
    }

    fn draw_geometry<D: RenderDriver + ?Sized>(&self, mode: RenderMode, visibility: &VisibilitySet, driver: &mut D) -> RenderStats {
        let mut stats = RenderStats::default();
        for &index in visibility.blocks() {
            stats.draws += self.draw_block(index, mode, driver);
            stats.blocks_drawn += 1;
            stats.passes += 1;
        }
        stats
    }

    fn draw_procedural<D: RenderDriver + ?Sized>(&mut self, visibility: &VisibilitySet, driver: &mut D) -> RenderStats {
        self.procedural_batches();
        let mut stats = RenderStats::default();
        let mut drawn = BTreeSet::new();

        for batch in &self.procedural_batches {
            let blocks: Vec<usize> = batch.blocks.iter().copied().filter(|&b| visibility.contains_block(b)).collect();
            if blocks.is_empty() {
                continue;
            }
            let chunks: Vec<&[usize]> = if batch.layers.is_empty() {
                vec![&batch.layers[..]]
            } else {
                batch.layers.chunks(MAX_PROCEDURAL_PASS_LAYERS).collect()
            };

            for (chunk_index, chunk) in chunks.into_iter().enumerate() {
                let mut procedural = CbTerrainProcData::default();
                let mut layer_data = CbTerrainLayerData::default();
                for (slot, &layer_index) in chunk.iter().enumerate() {
                    let layer = &self.procedural_layers[layer_index];
                    procedural.procedural[slot] = layer.procedural_data();
                    layer_data.layers[slot] = self.materials.layer_data(layer.material, slot, self.blend_map_size);
                    let material = self.materials.get(layer.material);
                    driver.set_texture(texture_slot::LAYER_COLOR + slot as u32, material.and_then(|m| m.color_texture));
                    driver.set_texture(texture_slot::LAYER_NORMAL + slot as u32, material.and_then(|m| m.normal_texture));
                }
                procedural.layer_count = chunk.len() as f32;
                layer_data.layer_count = chunk.len() as f32;

                if let Some(buffer) = update_constants(driver, &mut self.procedural_buffer, bytemuck::bytes_of(&procedural), self.id) {
                    driver.set_constant_buffer(constant_slot::PROCEDURAL, buffer);
                }
                if let Some(buffer) =
                    update_constants(driver, &mut self.procedural_layer_buffer, bytemuck::bytes_of(&layer_data), self.id)
                {
                    driver.set_constant_buffer(constant_slot::LAYER, buffer);
                }

                // Further layer groups accumulate over the first
                if chunk_index > 0 {
                    driver.push_render_state(RenderState::ADDITIVE);
                }
                for &index in &blocks {
                    let neighbor_lods = self.neighbor_lods(index);
                    stats.draws += self.blocks[index].draw(
                        driver,
                        &self.lods,
                        neighbor_lods,
                        RenderMode::Procedural,
                        self.config.lod.skirt_grid_edges,
                    );
                    stats.passes += 1;
                    drawn.insert(index);
                }
                if chunk_index > 0 {
                    driver.pop_render_state();
                }
            }
        }
        stats.blocks_drawn = drawn.len() as u32;
        stats
    }

    fn draw_painted<D: RenderDriver + ?Sized>(&mut self, visibility: &VisibilitySet, driver: &mut D) -> RenderStats {
        let mut stats = RenderStats::default();
        let noise_strength = self.config.render.noise_strength;
        let skirt_grid_edges = self.config.lod.skirt_grid_edges;

        for &index in visibility.blocks() {
            let neighbor_lods = self.neighbor_lods(index);
            let block = &mut self.blocks[index];
            let passes = block.texture_data_mut().begin_draw();
            while let Some(pass) = block.texture_data_mut().begin_draw_pass(driver, &self.materials, noise_strength) {
                if pass == 1 {
                    driver.push_render_state(RenderState::ADDITIVE);
                }
                stats.draws += block.draw(driver, &self.lods, neighbor_lods, RenderMode::Painted, skirt_grid_edges);
                stats.passes += 1;
                block.texture_data_mut().end_draw_pass();
            }
            if passes > 1 {
                driver.pop_render_state();
            }
            stats.blocks_drawn += 1;
        }
        stats
    }

    /// Destroy every GPU resource. The landscape can be drawn again
    /// afterwards; resources are recreated on demand.
    pub fn release<R: ResourceManager + ?Sized>(&mut self, resources: &mut R) {
        for block in &mut self.blocks {
            block.release(resources);
        }
        self.lods.release(resources);
        for buffer in [
            self.base_buffer.take(),
            self.procedural_buffer.take(),
            self.procedural_layer_buffer.take(),
        ]
        .into_iter()
        .flatten()
        {
            resources.destroy_constant_buffer(buffer);
        }
        if let Some(texture) = self.normal_texture.take() {
            resources.destroy_texture(texture);
        }
        log::debug!("Landscape {} released", self.id);
    }
}

/// World XZ area covered by a block's quads
fn block_world_area(rect: &Rect, scale: Vec3, offset: Vec3) -> RectF {
    RectF::new(
        offset.x + rect.left as f32 * scale.x,
        offset.z + rect.top as f32 * scale.z,
        offset.x + (rect.right - 1) as f32 * scale.x,
        offset.z + (rect.bottom - 1) as f32 * scale.z,
    )
}

/// Create a constant buffer on first use and fill it
fn update_constants<R: ResourceManager + ?Sized>(
    resources: &mut R,
    slot: &mut Option<ConstantBufferHandle>,
    data: &[u8],
    landscape_id: u32,
) -> Option<ConstantBufferHandle> {
    if slot.is_none() {
        match resources.create_constant_buffer(data.len()) {
            Ok(buffer) => *slot = Some(buffer),
            Err(e) => {
                log::error!("Landscape {}: constant buffer allocation failed: {}", landscape_id, e);
                return None;
            }
        }
    }
    let buffer = (*slot)?;
    if let Err(e) = resources.update_constant_buffer(buffer, data) {
        log::error!("Landscape {}: constant buffer update failed: {}", landscape_id, e);
    }
    Some(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::headless::{DriverCommand, HeadlessDriver};
    use crate::streaming::MemoryStore;
    use crate::terrain::paint::{base_weight, PaintType, FULL_WEIGHT};

    const VERTS: u32 = 17;
    const LAYOUT: u32 = 4;
    const SIZE: u32 = (VERTS - 1) * LAYOUT + 1;

    fn params(map: HeightMap) -> LandscapeImportParams {
        LandscapeImportParams::new(1, map, VERTS).unwrap()
    }

    fn flat_landscape(driver: &mut HeadlessDriver) -> Landscape {
        Landscape::import(params(HeightMap::flat(SIZE, SIZE, 100)), driver).unwrap()
    }

    fn all_blocks(landscape: &Landscape) -> VisibilitySet {
        let mut vis = VisibilitySet::new();
        for i in 0..landscape.blocks().len() {
            vis.add_block(i);
        }
        vis
    }

    fn interior_draws(driver: &HeadlessDriver) -> usize {
        driver
            .draw_calls()
            .iter()
            .filter(|c| matches!(c, DriverCommand::DrawIndexed { index_start: 0, .. }))
            .count()
    }

    #[test]
    fn test_import_validates_layout() {
        let mut driver = HeadlessDriver::new();
        assert!(LandscapeImportParams::new(1, HeightMap::flat(30, 33, 0), VERTS).is_err());

        let mut bad = params(HeightMap::flat(SIZE, SIZE, 0));
        bad.block_verts = 13;
        assert!(Landscape::import(bad, &mut driver).is_err());

        let mut bad = params(HeightMap::flat(SIZE, SIZE, 0));
        bad.block_layout = (3, 4);
        assert!(Landscape::import(bad, &mut driver).is_err());

        let mut bad = params(HeightMap::flat(SIZE, SIZE, 0));
        bad.color_map = Some(vec![0; 5]);
        assert!(Landscape::import(bad, &mut driver).is_err());
    }

    #[test]
    fn test_import_builds_grid() {
        let mut driver = HeadlessDriver::new();
        let landscape = flat_landscape(&mut driver);
        assert_eq!(landscape.blocks().len(), 16);
        assert_eq!(landscape.lods().lod_count(), 5);
        assert_eq!(landscape.spatial_tree().leaf_count(), 16);
        assert!(landscape.normal_texture().is_some());

        // Block 5 sits at grid (1, 1)
        let block = landscape.block(5).unwrap();
        assert_eq!(block.grid_position(), (1, 1));
        assert_eq!(block.rect(), Rect::new(16, 16, 33, 33));
        assert_eq!(block.neighbor(Edge::North), Some(1));
        assert_eq!(block.neighbor(Edge::East), Some(6));
        assert_eq!(block.neighbor(Edge::South), Some(9));
        assert_eq!(block.neighbor(Edge::West), Some(4));
        assert_eq!(landscape.block(0).unwrap().neighbor(Edge::North), None);
        assert!(landscape.blocks().iter().all(|b| !b.upload_pending()));
    }

    #[test]
    fn test_lod_near_and_far() {
        let mut driver = HeadlessDriver::new();
        let mut landscape = flat_landscape(&mut driver);
        let vis = all_blocks(&landscape);

        let near = Camera::new(Vec3::new(8.0, 105.0, 8.0), 60.0, 16.0 / 9.0);
        landscape.update_lods(&near, &vis);
        assert_eq!(landscape.block(0).unwrap().current_lod(), 0);

        let far = Camera::new(Vec3::new(8.0 + 500.0, 105.0, 8.0), 60.0, 16.0 / 9.0);
        landscape.update_lods(&far, &vis);
        assert!(landscape.block(0).unwrap().current_lod() > 0);
    }

    #[test]
    fn test_render_pass_draws_and_skirts() {
        let mut driver = HeadlessDriver::new();
        let mut landscape = flat_landscape(&mut driver);
        let vis = all_blocks(&landscape);
        driver.clear_commands();

        let camera = Camera::look_at(Vec3::new(-40.0, 110.0, 32.0), Vec3::new(32.0, 100.0, 32.0), Vec3::Y);
        let stats = landscape.render_pass(LandscapeRenderMethod::DepthFill, &camera, &vis, &mut driver);

        assert_eq!(stats.blocks_drawn, 16);
        assert_eq!(stats.draws.interior_draws, 16);
        assert_eq!(interior_draws(&driver), 16);

        // Only the first column is fine enough to need skirts toward the east
        for (i, block) in landscape.blocks().iter().enumerate() {
            let expected = if i % 4 == 0 { 0 } else { 1 };
            assert_eq!(block.current_lod(), expected, "block {}", i);
        }
        let seam_skirts: u32 = landscape
            .blocks()
            .iter()
            .map(|b| {
                b.neighbors()
                    .iter()
                    .flatten()
                    .filter(|&&n| landscape.blocks()[n].current_lod() > b.current_lod())
                    .count() as u32
            })
            .sum();
        let border_edges: u32 = landscape
            .blocks()
            .iter()
            .map(|b| b.neighbors().iter().filter(|n| n.is_none()).count() as u32)
            .sum();
        assert_eq!(seam_skirts, 4);
        assert_eq!(border_edges, 16);
        assert_eq!(stats.draws.skirt_draws, seam_skirts + border_edges);
        assert_eq!(driver.state_depth(), 0);

        landscape.config_mut().lod.skirt_grid_edges = false;
        let stats = landscape.render_pass(LandscapeRenderMethod::DepthFill, &camera, &vis, &mut driver);
        assert_eq!(stats.draws.skirt_draws, seam_skirts);
    }

    #[test]
    fn test_wireframe_pass_has_no_skirts() {
        let mut driver = HeadlessDriver::new();
        let mut landscape = flat_landscape(&mut driver);
        let vis = all_blocks(&landscape);
        let camera = Camera::look_at(Vec3::new(-40.0, 110.0, 32.0), Vec3::new(32.0, 100.0, 32.0), Vec3::Y);
        let stats = landscape.render_pass(LandscapeRenderMethod::Wireframe, &camera, &vis, &mut driver);
        assert_eq!(stats.draws.interior_draws, 16);
        assert_eq!(stats.draws.skirt_draws, 0);
    }

    #[test]
    fn test_upload_retried_on_render() {
        let mut driver = HeadlessDriver::new();
        driver.fail_vertex_buffers = true;
        let mut landscape = flat_landscape(&mut driver);
        assert!(landscape.blocks().iter().all(|b| b.upload_pending()));

        let vis = all_blocks(&landscape);
        let camera = Camera::default();
        let stats = landscape.render_pass(LandscapeRenderMethod::DepthFill, &camera, &vis, &mut driver);
        assert_eq!(stats.draws.interior_draws, 0);

        driver.fail_vertex_buffers = false;
        let stats = landscape.render_pass(LandscapeRenderMethod::DepthFill, &camera, &vis, &mut driver);
        assert_eq!(stats.draws.interior_draws, 16);
    }

    #[test]
    fn test_terrain_height_round_trip() {
        let mut driver = HeadlessDriver::new();
        let mut map = HeightMap::flat(SIZE, SIZE, 0);
        map.set_cell(20, 24, 400);
        let mut p = params(map);
        p.scale = Vec3::new(2.0, 0.25, 3.0);
        p.offset = Vec3::new(-10.0, 5.0, 7.0);
        let landscape = Landscape::import(p, &mut driver).unwrap();

        let x = -10.0 + 20.0 * 2.0;
        let z = 7.0 + 24.0 * 3.0;
        assert!((landscape.terrain_height(x, z, false) - (400.0 * 0.25 + 5.0)).abs() < 1e-4);
        assert!((landscape.terrain_height(-1000.0, -1000.0, false) - 5.0).abs() < 1e-4);
        assert!(landscape.height_map_normal(-10.0, 7.0).y > 0.99);
    }

    #[test]
    fn test_set_dimensions() {
        let mut driver = HeadlessDriver::new();
        let mut landscape = flat_landscape(&mut driver);
        landscape.set_dimensions(Vec3::new(128.0, MAX_CELL_HEIGHT as f32, 256.0), &mut driver).unwrap();
        assert_eq!(landscape.scale(), Vec3::new(2.0, 1.0, 4.0));
        assert_eq!(landscape.dimensions(), Vec3::new(128.0, MAX_CELL_HEIGHT as f32, 256.0));
        let bounds = landscape.bounds();
        assert!((bounds.max.x - 128.0).abs() < 1e-4);
        assert!((bounds.max.z - 256.0).abs() < 1e-4);
        assert!(landscape.set_dimensions(Vec3::new(0.0, 1.0, 1.0), &mut driver).is_err());

        landscape.set_offset(Vec3::new(10.0, 0.0, -5.0), &mut driver);
        let bounds = landscape.bounds();
        assert!((bounds.min.x - 10.0).abs() < 1e-4);
        assert!((bounds.max.z - 251.0).abs() < 1e-4);
        assert_eq!(landscape.block_at(10.5, -4.5), 0);

        let p = params(HeightMap::flat(SIZE, SIZE, 0)).with_dimensions(Vec3::new(32.0, 0.0, 64.0));
        assert_eq!(p.scale, Vec3::new(0.5, 0.0, 1.0));
    }

    #[test]
    fn test_ray_intersect() {
        let mut driver = HeadlessDriver::new();
        let landscape = flat_landscape(&mut driver);
        let hit = landscape
            .ray_intersect(Vec3::new(20.0, 200.0, 20.0), Vec3::new(0.0, -200.0, 0.0), 0.5)
            .unwrap();
        assert!((hit.y - 100.0).abs() < 0.01);

        assert!(landscape
            .ray_intersect(Vec3::new(20.0, 200.0, 20.0), Vec3::new(0.0, -50.0, 0.0), 0.5)
            .is_none());
        assert!(landscape.ray_intersect(Vec3::ZERO, Vec3::ZERO, 0.5).is_none());
    }

    #[test]
    fn test_height_edit_requires_dynamic() {
        let mut driver = HeadlessDriver::new();
        let mut landscape = flat_landscape(&mut driver);
        assert!(landscape.height_map_mut().is_none());

        landscape.set_flags(LandscapeFlags::DYNAMIC);
        landscape.height_map_mut().unwrap().set_cell(8, 8, 300);
        landscape.height_map_updated(Rect::new(8, 8, 9, 9), &mut driver);
        assert!((landscape.terrain_height(8.0, 8.0, false) - 300.0).abs() < 1e-4);
        assert!(landscape.block(0).unwrap().bounds().max.y >= 300.0);
        assert!(landscape.block(0).unwrap().lod_variance()[1] > 0.0);
    }

    /// One block wide strip: a ramp facing the camera rising to a ridge
    /// at z = 16, falling back to flat ground behind it
    fn ridge_map() -> HeightMap {
        let depth = (VERTS - 1) * 4 + 1;
        let mut map = HeightMap::flat(VERTS, depth, 0);
        for z in 0..=32 {
            let height = if z <= 16 { z * 12 } else { (32 - z) * 12 };
            for x in 0..VERTS as i32 {
                map.set_cell(x, z, height as i16);
            }
        }
        map
    }

    #[test]
    fn test_occluded_block_culled() {
        let mut driver = HeadlessDriver::new();
        let landscape_params = params(ridge_map());
        assert_eq!(landscape_params.block_layout, (1, 4));
        let mut landscape = Landscape::import(landscape_params, &mut driver).unwrap();

        let camera = Camera::look_at(Vec3::new(8.0, 10.0, -10.0), Vec3::new(8.0, 10.0, 50.0), Vec3::Y);
        let frustum = Frustum::from_camera(&camera);
        let mut vis = VisibilitySet::new();
        let stats = landscape.compute_visibility(&frustum, &mut vis, VisibilityFlags::MUST_RENDER, 0);

        assert!(vis.contains_block(0));
        assert!(frustum.intersects_aabb(landscape.block(2).unwrap().bounds()));
        assert!(!vis.contains_block(2));
        assert!(!vis.contains_block(3));
        assert!(stats.occlusion_success > 0);
        assert!(!landscape.block(3).unwrap().is_visible());
    }

    #[test]
    fn test_shadow_search_skips_occlusion_per_issuer() {
        let mut driver = HeadlessDriver::new();
        let mut landscape = Landscape::import(params(ridge_map()), &mut driver).unwrap();
        let camera = Camera::look_at(Vec3::new(8.0, 10.0, -10.0), Vec3::new(8.0, 10.0, 50.0), Vec3::Y);
        let frustum = Frustum::from_camera(&camera);
        let mut vis = VisibilitySet::new();

        let stats = landscape.compute_visibility(&frustum, &mut vis, VisibilityFlags::MUST_CAST_SHADOWS, 7);
        assert_eq!(stats.occlusion_success, 0);
        assert!(vis.contains_block(2));
        assert_eq!(landscape.occlusion(7).map(|s| s.success), Some(0));

        landscape.compute_visibility(&frustum, &mut vis, VisibilityFlags::MUST_RENDER, 1);
        assert!(!vis.contains_block(2));
        assert!(landscape.occlusion(1).is_some_and(|s| s.success > 0));
        assert_eq!(landscape.occlusion(7).map(|s| s.success), Some(0));
        assert!(landscape.occlusion(2).is_none());
    }

    #[test]
    fn test_visibility_collects_materials() {
        let mut driver = HeadlessDriver::new();
        let mut landscape = Landscape::import(params(ridge_map()), &mut driver).unwrap();
        let grass = landscape.materials_mut().create("grass");
        landscape.begin_paint(grass, PaintParams { paint_type: PaintType::Paint, inner_radius: 2.0, outer_radius: 4.0, strength: 1.0 });
        assert!(landscape.paint(8.0, 8.0));
        landscape.end_paint(&mut driver);
        landscape.add_procedural_layer(ProceduralLayer {
            name: "everywhere".into(),
            material: 9,
            min_height: -1000.0,
            max_height: 5000.0,
            ..Default::default()
        });

        let camera = Camera::look_at(Vec3::new(8.0, 10.0, -10.0), Vec3::new(8.0, 10.0, 50.0), Vec3::Y);
        let frustum = Frustum::from_camera(&camera);
        let mut vis = VisibilitySet::new();
        landscape.compute_visibility(&frustum, &mut vis, VisibilityFlags::MUST_RENDER, 0);
        assert_eq!(vis.materials().count(), 0);

        let flags = VisibilityFlags::MUST_RENDER | VisibilityFlags::COLLECT_MATERIALS;
        landscape.compute_visibility(&frustum, &mut vis, flags, 0);
        assert!(vis.contains_block(0));
        assert_eq!(vis.materials().collect::<Vec<_>>(), vec![grass, 9]);
    }

    #[test]
    fn test_unoccluded_leaves_all_visible() {
        let mut driver = HeadlessDriver::new();
        let mut landscape = Landscape::import(params(HeightMap::flat(SIZE, SIZE, 0)), &mut driver).unwrap();
        let camera = Camera::look_at(Vec3::new(32.0, 10.0, -10.0), Vec3::new(32.0, 10.0, 60.0), Vec3::Y);
        let frustum = Frustum::from_camera(&camera);
        let mut vis = VisibilitySet::new();
        landscape.compute_visibility(&frustum, &mut vis, VisibilityFlags::MUST_RENDER, 0);

        for (i, block) in landscape.blocks().iter().enumerate() {
            assert_eq!(vis.contains_block(i), frustum.intersects_aabb(block.bounds()), "block {}", i);
        }
    }

    #[test]
    fn test_occlusion_disabled_by_config() {
        let mut driver = HeadlessDriver::new();
        let mut p = params(ridge_map());
        p.config.occlusion.enabled = false;
        let mut landscape = Landscape::import(p, &mut driver).unwrap();
        let camera = Camera::look_at(Vec3::new(8.0, 10.0, -10.0), Vec3::new(8.0, 10.0, 50.0), Vec3::Y);
        let mut vis = VisibilitySet::new();
        let stats = landscape.compute_visibility(&Frustum::from_camera(&camera), &mut vis, VisibilityFlags::MUST_RENDER, 0);
        assert_eq!(stats.occlusion_success, 0);
        assert!(vis.contains_block(2));
    }

    #[test]
    fn test_paint_across_blocks_conserves_weight() {
        let mut driver = HeadlessDriver::new();
        let mut landscape = flat_landscape(&mut driver);
        let grass = landscape.materials_mut().create("grass");
        let rock = landscape.materials_mut().create("rock");
        let brush = PaintParams { paint_type: PaintType::Paint, inner_radius: 3.0, outer_radius: 6.0, strength: 1.0 };

        landscape.begin_paint(grass, brush);
        assert!(landscape.paint_line(10.0, 16.0, 22.0, 16.0));
        landscape.end_paint(&mut driver);
        landscape.begin_paint(rock, PaintParams { strength: 0.5, ..brush });
        assert!(landscape.paint(16.0, 16.0));
        landscape.update_paint_preview(&mut driver);
        landscape.end_paint(&mut driver);
        assert!(!landscape.is_painting());

        // The stroke straddles the corner shared by blocks 0, 1, 4 and 5
        let mut touched = 0;
        for block in landscape.blocks() {
            let data = block.texture_data();
            if !data.is_empty() {
                touched += 1;
            }
            let stride = data.stride();
            for ty in 0..stride {
                for tx in 0..stride {
                    let i = (tx + ty * stride) as usize;
                    let weights: Vec<u8> = data.layers().iter().map(|l| l.blend_map[i]).collect();
                    let total = weights.iter().map(|&w| w as u32).sum::<u32>() + base_weight(&weights) as u32;
                    assert_eq!(total, FULL_WEIGHT as u32, "block {} texel ({}, {})", block.index(), tx, ty);
                    assert_eq!(data.texel_total(tx, ty) + base_weight(&weights) as u32, FULL_WEIGHT as u32);
                }
            }
        }
        assert_eq!(touched, 4);

        // Border texels repeat the neighbour's edge texels across the seam
        // between blocks 0 and 1 (x = 16 in world and blend-map units)
        let (left, right) = (landscape.block(0).unwrap().texture_data(), landscape.block(1).unwrap().texture_data());
        let mut seam_painted = false;
        for ty in 1..=16 {
            for material in [grass, rock] {
                assert_eq!(left.weight(material, 17, ty), right.weight(material, 1, ty));
                assert_eq!(left.weight(material, 16, ty), right.weight(material, 0, ty));
                seam_painted |= right.weight(material, 0, ty) > 0;
            }
            let base = |data: &LandscapeTextureData, tx: u32| {
                FULL_WEIGHT as u32 - data.texel_total(tx, ty)
            };
            assert_eq!(base(left, 17), base(right, 1));
            assert_eq!(base(left, 16), base(right, 0));
        }
        assert!(seam_painted);

        let region = Rect::new(0, 0, 64, 64);
        let weights = landscape.blend_map_paint_data(grass, region);
        assert_eq!(weights.len(), 64 * 64);
        assert!(weights[16 + 16 * 64] > 0);
        assert_eq!(weights[60 + 60 * 64], 0);
    }

    #[test]
    fn test_paint_without_stroke_is_ignored() {
        let mut driver = HeadlessDriver::new();
        let mut landscape = flat_landscape(&mut driver);
        assert!(!landscape.paint(16.0, 16.0));
        landscape.end_paint(&mut driver);
        assert!(landscape.blocks().iter().all(|b| b.texture_data().is_empty()));
    }

    #[test]
    fn test_painted_pass_uses_additive_passes() {
        let mut driver = HeadlessDriver::new();
        let mut landscape = flat_landscape(&mut driver);
        let brush = PaintParams { paint_type: PaintType::Paint, inner_radius: 20.0, outer_radius: 30.0, strength: 0.2 };
        for _ in 0..5 {
            let material = landscape.materials_mut().create("layer");
            landscape.begin_paint(material, brush);
            landscape.paint(8.0, 8.0);
            landscape.end_paint(&mut driver);
        }
        assert_eq!(landscape.block(0).unwrap().texture_data().batches().len(), 2);

        let mut vis = VisibilitySet::new();
        vis.add_block(0);
        driver.clear_commands();
        let stats = landscape.render_pass(LandscapeRenderMethod::Painted, &Camera::default(), &vis, &mut driver);
        assert_eq!(stats.passes, 2);
        assert_eq!(stats.draws.interior_draws, 2);
        let additive = driver
            .commands()
            .iter()
            .filter(|c| matches!(c, DriverCommand::PushRenderState(s) if *s == RenderState::ADDITIVE))
            .count();
        assert_eq!(additive, 1);
        assert_eq!(driver.state_depth(), 0);
    }

    #[test]
    fn test_procedural_pass_batches_layers() {
        let mut driver = HeadlessDriver::new();
        let mut map = HeightMap::flat(SIZE, SIZE, 0);
        for z in 0..SIZE as i32 {
            for x in 32..SIZE as i32 {
                map.set_cell(x, z, 500);
            }
        }
        let mut landscape = Landscape::import(params(map), &mut driver).unwrap();
        let low = ProceduralLayer { name: "low".into(), min_height: -10.0, max_height: 10.0, ..Default::default() };
        let high = ProceduralLayer { name: "high".into(), min_height: 400.0, max_height: 600.0, ..Default::default() };
        landscape.add_procedural_layer(low);
        landscape.add_procedural_layer(high);

        let batches = landscape.procedural_batches().to_vec();
        assert!(batches.len() >= 2);
        let covered: usize = batches.iter().map(|b| b.blocks.len()).sum();
        assert_eq!(covered, 16);

        let vis = all_blocks(&landscape);
        let stats = landscape.render_pass(LandscapeRenderMethod::Procedural, &Camera::default(), &vis, &mut driver);
        assert_eq!(stats.blocks_drawn, 16);
        assert_eq!(stats.draws.interior_draws, 16);
        assert!(driver.commands().iter().any(|c| matches!(c, DriverCommand::SetShader(RenderMode::Procedural))));

        assert!(landscape.set_procedural_layer(0, ProceduralLayer::default()));
        assert!(!landscape.set_procedural_layer(9, ProceduralLayer::default()));
        assert!(landscape.remove_procedural_layer(1).is_some());
        assert_eq!(landscape.procedural_layers().len(), 1);

        let replacement = ProceduralLayer { name: "everywhere".into(), min_height: -1000.0, max_height: 1000.0, ..Default::default() };
        landscape.update_procedural_layers(vec![replacement]);
        assert_eq!(landscape.procedural_layer(0).map(|l| l.name.as_str()), Some("everywhere"));
        assert!(landscape.procedural_layer(1).is_none());
        assert_eq!(landscape.procedural_batches().len(), 1);
    }

    #[test]
    fn test_should_cull_object() {
        let mut driver = HeadlessDriver::new();
        let mut landscape = flat_landscape(&mut driver);
        assert!(!landscape.should_cull_object(1.0, 1e9));

        let render = &mut landscape.config_mut().render;
        render.cull_distance = 1000.0;
        render.cull_descriptors = vec![
            crate::terrain::config::CullDescriptor { maximum_size: 10.0, distance: 200.0 },
            crate::terrain::config::CullDescriptor { maximum_size: 1.0, distance: 50.0 },
        ];
        assert!(landscape.should_cull_object(0.5, 60.0 * 60.0));
        assert!(!landscape.should_cull_object(5.0, 60.0 * 60.0));
        assert!(landscape.should_cull_object(5.0, 300.0 * 300.0));
        assert!(!landscape.should_cull_object(50.0, 900.0 * 900.0));
        assert!(landscape.should_cull_object(50.0, 1100.0 * 1100.0));
    }

    #[test]
    fn test_save_load_round_trip() {
        let mut driver = HeadlessDriver::new();
        let mut map = HeightMap::flat(SIZE, SIZE, 100);
        map.set_cell(24, 24, 250);
        let mut p = params(map);
        p.scale = Vec3::new(1.0, 0.5, 1.0);
        p.color_map = Some(vec![0xFF00_00FF; (SIZE * SIZE) as usize]);
        p.procedural_layers = vec![ProceduralLayer { name: "snow".into(), ..Default::default() }];
        let mut landscape = Landscape::import(p, &mut driver).unwrap();
        let grass = landscape.materials_mut().create("grass");
        landscape.begin_paint(grass, PaintParams::default());
        landscape.paint(40.0, 40.0);
        landscape.end_paint(&mut driver);

        let mut store = MemoryStore::new();
        landscape.save(&mut store).unwrap();
        assert_eq!(store.block_count(1), 16);

        let loaded = Landscape::load(&store, 1, &mut driver).unwrap();
        assert_eq!(loaded.height_map(), landscape.height_map());
        assert_eq!(loaded.color_map(), landscape.color_map());
        assert_eq!(loaded.scale(), landscape.scale());
        assert_eq!(loaded.procedural_layers(), landscape.procedural_layers());
        assert_eq!(loaded.materials().len(), 1);
        let region = Rect::new(0, 0, 64, 64);
        assert_eq!(loaded.blend_map_paint_data(grass, region), landscape.blend_map_paint_data(grass, region));
    }

    #[test]
    fn test_malformed_block_loads_flat() {
        let mut driver = HeadlessDriver::new();
        let landscape = flat_landscape(&mut driver);
        let mut store = MemoryStore::new();
        landscape.save(&mut store).unwrap();
        store.insert_raw_block(1, 5, b"not a block".to_vec());

        let loaded = Landscape::load(&store, 1, &mut driver).unwrap();
        assert_eq!(loaded.blocks().len(), 16);
        assert_eq!(loaded.height_map().cell(24, 24), 0);
        assert_eq!(loaded.height_map().cell(8, 8), 100);
    }

    #[test]
    fn test_corrupt_header_fails_load() {
        let mut driver = HeadlessDriver::new();
        let landscape = flat_landscape(&mut driver);
        let mut store = MemoryStore::new();
        landscape.save(&mut store).unwrap();

        let mut header = store.load_header(1).unwrap();
        header.block_verts = u32::MAX;
        store.save_header(&header).unwrap();
        assert!(matches!(Landscape::load(&store, 1, &mut driver), Err(Error::Persistence(_))));

        header.block_verts = 17;
        header.blend_map_size = u32::MAX;
        store.save_header(&header).unwrap();
        assert!(Landscape::load(&store, 1, &mut driver).is_err());
    }

    #[test]
    fn test_release_frees_resources() {
        let mut driver = HeadlessDriver::new();
        let mut landscape = flat_landscape(&mut driver);
        let vis = all_blocks(&landscape);
        landscape.render_pass(LandscapeRenderMethod::DepthFill, &Camera::default(), &vis, &mut driver);
        assert!(driver.live_resources() > 0);
        landscape.release(&mut driver);
        assert_eq!(driver.live_resources(), 0);
    }
}
