//! A rectangular tile of the landscape
//!
//! Blocks own their vertex buffer and LOD state. Height samples stay in the
//! landscape's height map; a block only records the rectangle it covers.

use bytemuck::Zeroable;

use crate::core::camera::Camera;
use crate::core::types::{Result, Vec3};
use crate::math::{Aabb, Rect};
use crate::render::buffer::TerrainVertex;
use crate::render::driver::{RenderDriver, RenderMode, ResourceManager, VertexBufferHandle};
use super::config::LodConfig;
use super::heightmap::HeightMap;
use super::lod::{skirt_vertex, Edge, LodTable, MAX_LANDSCAPE_LOD};
use super::texture_data::LandscapeTextureData;

/// Shared inputs for building block geometry
#[derive(Clone, Copy)]
pub struct BlockContext<'a> {
    pub height_map: &'a HeightMap,
    /// Optional per-sample RGBA8 colours, same layout as the height map
    pub color_map: Option<&'a [u32]>,
    pub scale: Vec3,
    pub offset: Vec3,
    pub lods: &'a LodTable,
    pub min_skirt_depth: f32,
}

impl BlockContext<'_> {
    /// World position of a height map sample
    pub fn world_position(&self, x: i32, z: i32) -> Vec3 {
        Vec3::new(
            self.offset.x + x as f32 * self.scale.x,
            self.offset.y + self.height_map.cell(x, z) as f32 * self.scale.y,
            self.offset.z + z as f32 * self.scale.z,
        )
    }
}

/// Draw calls issued for one block
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockDrawStats {
    pub interior_draws: u32,
    pub skirt_draws: u32,
    pub primitives: u32,
}

impl std::ops::AddAssign for BlockDrawStats {
    fn add_assign(&mut self, other: Self) {
        self.interior_draws += other.interior_draws;
        self.skirt_draws += other.skirt_draws;
        self.primitives += other.primitives;
    }
}

pub struct TerrainBlock {
    index: usize,
    grid_x: u32,
    grid_z: u32,
    /// Height map vertices covered by this block
    rect: Rect,
    neighbors: [Option<usize>; 4],
    vertices: Vec<TerrainVertex>,
    vertex_buffer: Option<VertexBufferHandle>,
    /// Vertex data changed since the last successful upload
    upload_pending: bool,
    bounds: Aabb,
    lod_variance: [f32; MAX_LANDSCAPE_LOD],
    lod_count: usize,
    current_lod: usize,
    skirt_depth: f32,
    visible: bool,
    texture_data: LandscapeTextureData,
}

impl TerrainBlock {
    pub fn new(index: usize, grid_x: u32, grid_z: u32, rect: Rect, texture_data: LandscapeTextureData) -> Self {
        Self {
            index,
            grid_x,
            grid_z,
            rect,
            neighbors: [None; 4],
            vertices: Vec::new(),
            vertex_buffer: None,
            upload_pending: true,
            bounds: Aabb::EMPTY,
            lod_variance: [0.0; MAX_LANDSCAPE_LOD],
            lod_count: 1,
            current_lod: 0,
            skirt_depth: 0.0,
            visible: false,
            texture_data,
        }
    }

    /// Rebuild vertices, bounds, LOD variance and skirt depth from the
    /// height map. CPU only; call [`Self::upload`] afterwards.
    pub fn compute_geometry(&mut self, ctx: &BlockContext) {
        let verts = ctx.lods.verts_per_edge();
        let quads = verts - 1;
        let lookup = ctx.lods.mip_lookup();
        let map_width = ctx.height_map.width() as usize;

        self.vertices = vec![TerrainVertex::zeroed(); ctx.lods.total_vertex_count() as usize];
        self.bounds = Aabb::EMPTY;

        for z in 0..verts {
            for x in 0..verts {
                let hx = self.rect.left + x as i32;
                let hz = self.rect.top + z as i32;
                let position = ctx.world_position(hx, hz);
                let normal = ctx.height_map.normal(hx, hz, ctx.scale);
                let color = ctx
                    .color_map
                    .and_then(|colors| colors.get(hx as usize + hz as usize * map_width).copied())
                    .unwrap_or(0xFFFF_FFFF);

                self.vertices[lookup[(x + z * verts) as usize] as usize] = TerrainVertex {
                    position: position.to_array(),
                    normal: normal.to_array(),
                    color,
                };
                self.bounds.expand(position);
            }
        }

        self.lod_count = ctx.lods.lod_count();
        self.calculate_lod_variance(ctx.height_map, ctx.scale.y);
        self.skirt_depth = self.lod_variance[self.lod_count - 1] + ctx.min_skirt_depth;

        for edge in Edge::ALL {
            for i in 0..verts {
                let (x, z) = edge.vertex(i, quads);
                let mut bottom = self.vertices[lookup[(x + z * verts) as usize] as usize];
                bottom.position[1] -= self.skirt_depth;
                self.vertices[skirt_vertex(verts, edge, i) as usize] = bottom;
            }
        }

        self.current_lod = self.current_lod.min(self.lod_count - 1);
        self.upload_pending = true;
    }

    /// Largest world-space height error of each level against the full
    /// resolution mesh, made non-decreasing across levels
    fn calculate_lod_variance(&mut self, height_map: &HeightMap, scale_y: f32) {
        let quads = self.rect.width() - 1;
        self.lod_variance = [0.0; MAX_LANDSCAPE_LOD];
        for level in 1..self.lod_count {
            let step = 1 << level;
            let mut max_error = 0.0f32;
            for z in 0..=quads {
                for x in 0..=quads {
                    if x % step == 0 && z % step == 0 {
                        continue;
                    }
                    let actual = height_map.cell(self.rect.left + x, self.rect.top + z) as f32;
                    let approx = mesh_height(height_map, &self.rect, step, x as f32, z as f32);
                    max_error = max_error.max((actual - approx).abs());
                }
            }
            self.lod_variance[level] = (max_error * scale_y.abs()).max(self.lod_variance[level - 1]);
        }
    }

    /// Create or refresh the GPU vertex buffer
    pub fn upload<R: ResourceManager + ?Sized>(&mut self, resources: &mut R) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(&self.vertices);
        match self.vertex_buffer {
            Some(buffer) => resources.update_vertex_buffer(buffer, 0, bytes)?,
            None => self.vertex_buffer = Some(resources.create_vertex_buffer(bytes, TerrainVertex::STRIDE)?),
        }
        self.upload_pending = false;
        Ok(())
    }

    /// Destroy GPU resources owned by this block
    pub fn release<R: ResourceManager + ?Sized>(&mut self, resources: &mut R) {
        if let Some(buffer) = self.vertex_buffer.take() {
            resources.destroy_vertex_buffer(buffer);
        }
        self.upload_pending = true;
        self.texture_data.release(resources);
    }

    /// Choose the coarsest level whose projected error stays under the pixel
    /// threshold and whose switch distance has been reached. Ties go coarser.
    pub fn calculate_lod(
        &mut self,
        camera: &Camera,
        terrain_detail: f32,
        detail_level_adjust: i32,
        config: &LodConfig,
        ignore_y: bool,
    ) -> usize {
        let distance = if ignore_y {
            self.bounds.distance_to_point_xz(camera.position)
        } else {
            self.bounds.distance_squared_to_point(camera.position).sqrt()
        };
        // Higher detail shrinks the error budget and pushes switches further out
        let detail = terrain_detail.max(1e-3);
        let threshold = config.pixel_error_threshold / detail;
        let projection = camera.lod_projection_scale();

        let mut selected = 0;
        for level in 1..self.lod_count {
            let projected = self.lod_variance[level] * projection / distance.max(1e-3);
            let switch_distance = config.base_lod_distance * detail * ((1u32 << level) - 1) as f32;
            if projected > threshold || distance < switch_distance {
                break;
            }
            selected = level;
        }

        let adjusted = (selected as i32 + detail_level_adjust).clamp(0, self.lod_count as i32 - 1);
        self.current_lod = adjusted as usize;
        self.current_lod
    }

    /// Issue the interior draw and any skirts this block needs.
    ///
    /// A skirt is drawn on an edge only when the neighbour across it uses a
    /// strictly coarser level, or when there is no neighbour and
    /// `skirt_grid_edges` is set. Wireframe draws omit skirts.
    pub fn draw<D: RenderDriver + ?Sized>(
        &self,
        driver: &mut D,
        lods: &LodTable,
        neighbor_lods: [Option<usize>; 4],
        mode: RenderMode,
        skirt_grid_edges: bool,
    ) -> BlockDrawStats {
        let mut stats = BlockDrawStats::default();
        let Some(vertex_buffer) = self.vertex_buffer else {
            log::trace!("Block {} has no vertex buffer; skipped", self.index);
            return stats;
        };
        let lod = lods.level(self.current_lod);
        let Some(index_buffer) = lod.index_buffer else {
            log::warn!("LOD {} index buffer missing; block {} skipped", lod.level, self.index);
            return stats;
        };

        driver.set_vertex_buffer(vertex_buffer);
        driver.set_index_buffer(index_buffer);
        driver.draw_indexed(lod.vertex_count, 0, lod.interior_primitive_count);
        stats.interior_draws = 1;
        stats.primitives = lod.interior_primitive_count;

        if mode == RenderMode::Wire {
            return stats;
        }

        for edge in Edge::ALL {
            let target = match neighbor_lods[edge.index()] {
                Some(level) if level > self.current_lod => Some(level),
                Some(_) => None,
                None if skirt_grid_edges => Some(self.current_lod),
                None => None,
            };
            if let Some(skirt) = target.and_then(|level| lod.skirt(edge, level)) {
                driver.draw_indexed(lods.total_vertex_count(), skirt.index_start, skirt.primitive_count);
                stats.skirt_draws += 1;
                stats.primitives += skirt.primitive_count;
            }
        }
        stats
    }

    /// Height at a world position, clamped to this block. With
    /// `account_for_lod` the result follows the mesh at the current level.
    pub fn terrain_height(&self, ctx: &BlockContext, x: f32, z: f32, account_for_lod: bool) -> f32 {
        let local_x = ((x - ctx.offset.x) / ctx.scale.x - self.rect.left as f32).clamp(0.0, (self.rect.width() - 1) as f32);
        let local_z = ((z - ctx.offset.z) / ctx.scale.z - self.rect.top as f32).clamp(0.0, (self.rect.height() - 1) as f32);
        let sample = if account_for_lod {
            mesh_height(ctx.height_map, &self.rect, 1 << self.current_lod, local_x, local_z)
        } else {
            ctx.height_map.interpolated(self.rect.left as f32 + local_x, self.rect.top as f32 + local_z)
        };
        sample * ctx.scale.y + ctx.offset.y
    }

    /// Normal at a block-local sample, clamped to the block
    pub fn height_map_normal(&self, ctx: &BlockContext, x: i32, z: i32) -> Vec3 {
        let x = x.clamp(0, self.rect.width() - 1) + self.rect.left;
        let z = z.clamp(0, self.rect.height() - 1) + self.rect.top;
        ctx.height_map.normal(x, z, ctx.scale)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn grid_position(&self) -> (u32, u32) {
        (self.grid_x, self.grid_z)
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn bounds(&self) -> &Aabb {
        &self.bounds
    }

    pub fn current_lod(&self) -> usize {
        self.current_lod
    }

    pub fn set_current_lod(&mut self, level: usize) {
        self.current_lod = level.min(self.lod_count.saturating_sub(1));
    }

    pub fn lod_count(&self) -> usize {
        self.lod_count
    }

    pub fn lod_variance(&self) -> &[f32] {
        &self.lod_variance[..self.lod_count]
    }

    pub fn skirt_depth(&self) -> f32 {
        self.skirt_depth
    }

    pub fn neighbor(&self, edge: Edge) -> Option<usize> {
        self.neighbors[edge.index()]
    }

    pub fn neighbors(&self) -> [Option<usize>; 4] {
        self.neighbors
    }

    pub fn set_neighbor(&mut self, edge: Edge, block: Option<usize>) {
        self.neighbors[edge.index()] = block;
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn vertex_buffer(&self) -> Option<VertexBufferHandle> {
        self.vertex_buffer
    }

    pub fn upload_pending(&self) -> bool {
        self.upload_pending
    }

    /// Full-resolution grid vertices (mip ordered), without skirts
    pub fn grid_vertices(&self) -> &[TerrainVertex] {
        let count = (self.rect.width() * self.rect.height()) as usize;
        &self.vertices[..count.min(self.vertices.len())]
    }

    pub fn texture_data(&self) -> &LandscapeTextureData {
        &self.texture_data
    }

    pub fn texture_data_mut(&mut self) -> &mut LandscapeTextureData {
        &mut self.texture_data
    }
}

/// Height of the mesh at level step `step` at a block-local position,
/// using the same diagonal split as the index buffers
fn mesh_height(height_map: &HeightMap, rect: &Rect, step: i32, x: f32, z: f32) -> f32 {
    let quads = rect.width() - 1;
    let step = step.min(quads).max(1);
    let cell = |gx: i32, gz: i32| height_map.cell(rect.left + gx, rect.top + gz) as f32;

    let ix = (((x / step as f32).floor() as i32) * step).clamp(0, quads - step);
    let iz = (((z / step as f32).floor() as i32) * step).clamp(0, quads - step);
    let px = (x - ix as f32) / step as f32;
    let pz = (z - iz as f32) / step as f32;

    let top_left = cell(ix, iz);
    let bottom_right = cell(ix + step, iz + step);
    let (top_right, bottom_left) = if px < pz {
        let bottom_left = cell(ix, iz + step);
        (top_left + (bottom_right - bottom_left), bottom_left)
    } else {
        let top_right = cell(ix + step, iz);
        (top_right, top_left + (bottom_right - top_right))
    };
    let top = top_left + (top_right - top_left) * px;
    let bottom = bottom_left + (bottom_right - bottom_left) * px;
    top + (bottom - top) * pz
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::headless::{DriverCommand, HeadlessDriver};

    fn context<'a>(map: &'a HeightMap, lods: &'a LodTable) -> BlockContext<'a> {
        BlockContext {
            height_map: map,
            color_map: None,
            scale: Vec3::ONE,
            offset: Vec3::ZERO,
            lods,
            min_skirt_depth: 1.0,
        }
    }

    fn block(rect: Rect) -> TerrainBlock {
        TerrainBlock::new(0, 0, 0, rect, LandscapeTextureData::new(0, 8, crate::math::RectF::default(), (0, 0)))
    }

    fn spiky_map() -> HeightMap {
        let mut map = HeightMap::flat(17, 17, 100);
        map.set_cell(5, 5, 104);
        map
    }

    #[test]
    fn test_flat_block_geometry() {
        let map = HeightMap::flat(17, 17, 100);
        let lods = LodTable::build(17).unwrap();
        let mut b = block(Rect::new(0, 0, 17, 17));
        b.compute_geometry(&context(&map, &lods));

        assert_eq!(b.bounds().min, Vec3::new(0.0, 100.0, 0.0));
        assert_eq!(b.bounds().max, Vec3::new(16.0, 100.0, 16.0));
        assert!(b.lod_variance().iter().all(|&v| v == 0.0));
        assert_eq!(b.skirt_depth(), 1.0);
        assert_eq!(b.grid_vertices().len(), 289);
    }

    #[test]
    fn test_variance_is_monotonic() {
        let map = spiky_map();
        let lods = LodTable::build(17).unwrap();
        let mut b = block(Rect::new(0, 0, 17, 17));
        b.compute_geometry(&context(&map, &lods));

        let variance = b.lod_variance();
        assert_eq!(variance[0], 0.0);
        // (5, 5) is dropped from level 1 onwards
        assert_eq!(variance[1], 4.0);
        assert!(variance.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(b.skirt_depth(), variance[variance.len() - 1] + 1.0);
    }

    #[test]
    fn test_skirt_vertices_hang_below_edges() {
        let map = spiky_map();
        let lods = LodTable::build(17).unwrap();
        let mut b = block(Rect::new(0, 0, 17, 17));
        b.compute_geometry(&context(&map, &lods));
        let bottom = b.vertices[skirt_vertex(17, Edge::East, 3) as usize];
        assert_eq!(bottom.position, [16.0, 100.0 - b.skirt_depth(), 3.0]);
    }

    #[test]
    fn test_calculate_lod_near_and_far() {
        let map = HeightMap::flat(17, 17, 100);
        let lods = LodTable::build(17).unwrap();
        let config = LodConfig::default();
        let mut b = block(Rect::new(0, 0, 17, 17));
        b.compute_geometry(&context(&map, &lods));

        let mut camera = Camera::default();
        camera.position = Vec3::new(8.0, 100.0, 8.0);
        assert_eq!(b.calculate_lod(&camera, 1.0, 0, &config, false), 0);

        camera.position = Vec3::new(516.0, 100.0, 8.0);
        let far = b.calculate_lod(&camera, 1.0, 0, &config, false);
        assert!(far > 0);

        // Adjustment is clamped into range
        assert_eq!(b.calculate_lod(&camera, 1.0, 100, &config, false), 4);
        assert_eq!(b.calculate_lod(&camera, 1.0, -100, &config, false), 0);
    }

    #[test]
    fn test_lod_never_decreases_with_distance() {
        let map = spiky_map();
        let lods = LodTable::build(17).unwrap();
        let config = LodConfig::default();
        let mut b = block(Rect::new(0, 0, 17, 17));
        b.compute_geometry(&context(&map, &lods));

        let mut camera = Camera::default();
        let mut previous = 0;
        for step in 0..200 {
            camera.position = Vec3::new(8.0 + step as f32 * 25.0, 150.0, 8.0);
            let level = b.calculate_lod(&camera, 1.0, 0, &config, false);
            assert!(level >= previous);
            previous = level;
        }
        assert!(previous > 0);
    }

    #[test]
    fn test_higher_detail_keeps_finer_levels() {
        let map = spiky_map();
        let lods = LodTable::build(17).unwrap();
        let config = LodConfig::default();
        let mut b = block(Rect::new(0, 0, 17, 17));
        b.compute_geometry(&context(&map, &lods));

        let mut camera = Camera::default();
        let mut finer_somewhere = false;
        for step in 0..200 {
            camera.position = Vec3::new(8.0 + step as f32 * 25.0, 150.0, 8.0);
            let normal = b.calculate_lod(&camera, 1.0, 0, &config, false);
            let detailed = b.calculate_lod(&camera, 4.0, 0, &config, false);
            assert!(detailed <= normal);
            finer_somewhere |= detailed < normal;
        }
        assert!(finer_somewhere);
    }

    #[test]
    fn test_ignore_y_uses_horizontal_distance() {
        let map = HeightMap::flat(17, 17, 0);
        let lods = LodTable::build(17).unwrap();
        let config = LodConfig::default();
        let mut b = block(Rect::new(0, 0, 17, 17));
        b.compute_geometry(&context(&map, &lods));

        let mut camera = Camera::default();
        camera.position = Vec3::new(8.0, 5000.0, 8.0);
        assert!(b.calculate_lod(&camera, 1.0, 0, &config, false) > 0);
        assert_eq!(b.calculate_lod(&camera, 1.0, 0, &config, true), 0);
    }

    #[test]
    fn test_draw_skirts_only_toward_coarser_neighbours() {
        let map = HeightMap::flat(17, 17, 100);
        let mut lods = LodTable::build(17).unwrap();
        let mut driver = HeadlessDriver::new();
        lods.create_resources(&mut driver).unwrap();

        let mut b = block(Rect::new(0, 0, 17, 17));
        b.compute_geometry(&context(&map, &lods));
        b.upload(&mut driver).unwrap();
        b.set_current_lod(1);

        // North coarser, East equal, South finer, West missing
        let stats = b.draw(&mut driver, &lods, [Some(3), Some(1), Some(0), None], RenderMode::Simple, false);
        assert_eq!(stats.interior_draws, 1);
        assert_eq!(stats.skirt_draws, 1);

        let skirt = lods.level(1).skirt(Edge::North, 3).unwrap();
        let draws = driver.draw_calls();
        assert_eq!(draws.len(), 2);
        assert!(matches!(draws[1], DriverCommand::DrawIndexed { index_start, primitive_count, .. }
            if index_start == skirt.index_start && primitive_count == skirt.primitive_count));

        driver.clear_commands();
        let stats = b.draw(&mut driver, &lods, [Some(3), Some(1), Some(0), None], RenderMode::Simple, true);
        assert_eq!(stats.skirt_draws, 2);

        driver.clear_commands();
        let stats = b.draw(&mut driver, &lods, [Some(3), Some(4), Some(4), Some(4)], RenderMode::Wire, true);
        assert_eq!(stats.skirt_draws, 0);
        assert_eq!(driver.draw_calls().len(), 1);
    }

    #[test]
    fn test_draw_without_buffer_is_skipped() {
        let lods = LodTable::build(17).unwrap();
        let b = block(Rect::new(0, 0, 17, 17));
        let mut driver = HeadlessDriver::new();
        let stats = b.draw(&mut driver, &lods, [None; 4], RenderMode::Simple, false);
        assert_eq!(stats, BlockDrawStats::default());
        assert!(driver.commands().is_empty());
    }

    #[test]
    fn test_upload_failure_keeps_pending() {
        let map = HeightMap::flat(17, 17, 100);
        let lods = LodTable::build(17).unwrap();
        let mut b = block(Rect::new(0, 0, 17, 17));
        b.compute_geometry(&context(&map, &lods));

        let mut driver = HeadlessDriver::new();
        driver.fail_vertex_buffers = true;
        assert!(b.upload(&mut driver).is_err());
        assert!(b.upload_pending());
        driver.fail_vertex_buffers = false;
        b.upload(&mut driver).unwrap();
        assert!(!b.upload_pending());
        assert!(b.vertex_buffer().is_some());
    }

    #[test]
    fn test_terrain_height_with_and_without_lod() {
        let map = spiky_map();
        let lods = LodTable::build(17).unwrap();
        let ctx = context(&map, &lods);
        let mut b = block(Rect::new(0, 0, 17, 17));
        b.compute_geometry(&ctx);

        assert_eq!(b.terrain_height(&ctx, 5.0, 5.0, false), 104.0);
        b.set_current_lod(1);
        assert_eq!(b.terrain_height(&ctx, 5.0, 5.0, true), 100.0);
        // Clamped to the block edge
        assert_eq!(b.terrain_height(&ctx, -50.0, 5.0, false), 100.0);
        assert_eq!(b.height_map_normal(&ctx, 0, 0), Vec3::Y);
    }
}
