//! Spatial tree over the block grid
//!
//! A quad-tree built over block grid coordinates, stored as an arena of
//! nodes. Every node carries a fitted height plane plus minimum and maximum
//! horizon quads bounding the terrain beneath it; leaves (cells) hold the
//! blocks they cover. The tree drives frustum and horizon occlusion culling
//! when filling a visibility set.

use crate::core::types::{Mat4, Vec3};
use crate::math::{Aabb, Frustum, HeightPlane, LeastSquaresSums, Visibility};
use crate::render::visibility::VisibilitySet;
use super::block::TerrainBlock;
use super::occlusion::{HorizonBuffer, HorizonResult};

/// Terminal node holding the blocks it covers
#[derive(Clone, Debug, Default)]
pub struct LandscapeCell {
    pub blocks: Vec<usize>,
}

#[derive(Clone, Debug)]
pub enum NodeKind {
    Branch {
        children: Vec<usize>,
        /// World X / Z of the split lines, `None` for an axis not split
        split: [Option<f32>; 2],
    },
    Leaf(LandscapeCell),
}

#[derive(Clone, Debug)]
pub struct SpatialNode {
    pub bounds: Aabb,
    pub depth: u32,
    pub kind: NodeKind,
    sums: LeastSquaresSums,
    /// Plane lying on or below every sample in the node
    pub minimum_plane: HeightPlane,
    /// Plane lying on or above every sample in the node
    pub maximum_plane: HeightPlane,
    /// Minimum plane over the node footprint, used to raise the horizon
    pub minimum_horizon: [Vec3; 4],
    /// Maximum plane over the node footprint, used to test for occlusion
    pub maximum_horizon: [Vec3; 4],
}

impl SpatialNode {
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf(_))
    }

    pub fn sums(&self) -> &LeastSquaresSums {
        &self.sums
    }

    fn footprint(&self) -> [(f32, f32); 4] {
        let (a, b) = (self.bounds.min, self.bounds.max);
        [(a.x, a.z), (b.x, a.z), (b.x, b.z), (a.x, b.z)]
    }

    fn set_planes(&mut self, plane: HeightPlane, below: f32, above: f32) {
        self.minimum_plane = plane.offset(below);
        self.maximum_plane = plane.offset(above);
        let footprint = self.footprint();
        for (i, &(x, z)) in footprint.iter().enumerate() {
            self.minimum_horizon[i] = Vec3::new(x, self.minimum_plane.height_at(x, z), z);
            self.maximum_horizon[i] = Vec3::new(x, self.maximum_plane.height_at(x, z), z);
        }
    }

    /// Corners of the solid between the two horizon quads
    fn horizon_solid(&self) -> [Vec3; 8] {
        let (lo, hi) = (self.minimum_horizon, self.maximum_horizon);
        [hi[0], hi[1], hi[2], hi[3], lo[0], lo[1], lo[2], lo[3]]
    }
}

const SOLID_EDGES: [(usize, usize); 12] = [
    (0, 1), (1, 2), (2, 3), (3, 0),
    (0, 4), (1, 5), (2, 6), (3, 7),
    (4, 5), (5, 6), (6, 7), (7, 4),
];

/// Counters from one traversal
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TraversalStats {
    pub nodes_visited: u32,
    pub frustum_culled: u32,
    /// Nodes pruned by the horizon test
    pub occlusion_success: u32,
    /// Horizon tests that found the node visible
    pub occlusion_failure: u32,
}

#[derive(Clone, Debug, Default)]
pub struct SpatialTree {
    nodes: Vec<SpatialNode>,
    root: Option<usize>,
    max_depth: u32,
}

impl SpatialTree {
    /// Depth at which every leaf holds a single block
    pub fn auto_depth(layout: (u32, u32)) -> u32 {
        let longest = layout.0.max(layout.1).max(1);
        u32::BITS - (longest - 1).leading_zeros()
    }

    /// Build over a `layout.0 x layout.1` block grid stored row-major in
    /// `blocks`. A `max_depth` of 0 picks [`Self::auto_depth`].
    pub fn build(blocks: &[TerrainBlock], layout: (u32, u32), max_depth: u32) -> Self {
        let max_depth = if max_depth == 0 { Self::auto_depth(layout) } else { max_depth };
        let mut tree = Self { nodes: Vec::new(), root: None, max_depth };
        if layout.0 > 0 && layout.1 > 0 && blocks.len() as u32 >= layout.0 * layout.1 {
            tree.root = Some(tree.build_node(blocks, layout.0, (0, 0, layout.0, layout.1), 0));
        }
        log::debug!(
            "Compiled landscape spatial tree: {} nodes, {} leaves, depth {}",
            tree.nodes.len(),
            tree.leaf_count(),
            tree.max_depth
        );
        tree
    }

    fn build_node(&mut self, blocks: &[TerrainBlock], stride: u32, area: (u32, u32, u32, u32), depth: u32) -> usize {
        let (x0, z0, x1, z1) = area;
        let index = self.nodes.len();
        self.nodes.push(SpatialNode {
            bounds: Aabb::EMPTY,
            depth,
            kind: NodeKind::Leaf(LandscapeCell::default()),
            sums: LeastSquaresSums::default(),
            minimum_plane: HeightPlane::default(),
            maximum_plane: HeightPlane::default(),
            minimum_horizon: [Vec3::ZERO; 4],
            maximum_horizon: [Vec3::ZERO; 4],
        });

        let (w, h) = (x1 - x0, z1 - z0);
        if depth >= self.max_depth || (w <= 1 && h <= 1) {
            self.build_leaf(index, blocks, stride, area);
            return index;
        }

        let xs: Vec<(u32, u32)> = if w > 1 { vec![(x0, x0 + w / 2), (x0 + w / 2, x1)] } else { vec![(x0, x1)] };
        let zs: Vec<(u32, u32)> = if h > 1 { vec![(z0, z0 + h / 2), (z0 + h / 2, z1)] } else { vec![(z0, z1)] };
        let mut children = Vec::with_capacity(xs.len() * zs.len());
        for &(cz0, cz1) in &zs {
            for &(cx0, cx1) in &xs {
                children.push(self.build_node(blocks, stride, (cx0, cz0, cx1, cz1), depth + 1));
            }
        }

        let mut bounds = Aabb::EMPTY;
        let mut sums = LeastSquaresSums::default();
        for &child in &children {
            bounds = bounds.merged(&self.nodes[child].bounds);
            sums.merge(&self.nodes[child].sums);
        }
        let plane = sums.fit();

        // Children's planes bound their own footprints, and the difference
        // of two planes peaks at a footprint corner.
        let (mut below, mut above) = (f32::MAX, f32::MIN);
        for &child in &children {
            let node = &self.nodes[child];
            for &(x, z) in &node.footprint() {
                let fitted = plane.height_at(x, z);
                below = below.min(node.minimum_plane.height_at(x, z) - fitted);
                above = above.max(node.maximum_plane.height_at(x, z) - fitted);
            }
        }

        let split_x = (w > 1).then(|| self.nodes[children[0]].bounds.max.x);
        let split_z = (h > 1).then(|| self.nodes[children[0]].bounds.max.z);
        let node = &mut self.nodes[index];
        node.bounds = bounds;
        node.sums = sums;
        node.kind = NodeKind::Branch { children, split: [split_x, split_z] };
        node.set_planes(plane, below, above);
        index
    }

    fn build_leaf(&mut self, index: usize, blocks: &[TerrainBlock], stride: u32, area: (u32, u32, u32, u32)) {
        let (x0, z0, x1, z1) = area;
        let mut cell = LandscapeCell::default();
        let mut bounds = Aabb::EMPTY;
        let mut sums = LeastSquaresSums::default();
        for z in z0..z1 {
            for x in x0..x1 {
                let block = &blocks[(x + z * stride) as usize];
                cell.blocks.push(block.index());
                bounds = bounds.merged(block.bounds());
                for v in block.grid_vertices() {
                    sums.add(v.position[0], v.position[1], v.position[2]);
                }
            }
        }
        let plane = sums.fit();
        let (mut below, mut above) = (f32::MAX, f32::MIN);
        for &block in &cell.blocks {
            for v in blocks[block].grid_vertices() {
                let residual = v.position[1] - plane.height_at(v.position[0], v.position[2]);
                below = below.min(residual);
                above = above.max(residual);
            }
        }
        if below > above {
            // No samples; fall back to the bounding box
            below = bounds.min.y - plane.c;
            above = bounds.max.y - plane.c;
        }

        let node = &mut self.nodes[index];
        node.bounds = bounds;
        node.sums = sums;
        node.kind = NodeKind::Leaf(cell);
        node.set_planes(plane, below, above);
    }

    pub fn root(&self) -> Option<usize> {
        self.root
    }

    pub fn node(&self, index: usize) -> &SpatialNode {
        &self.nodes[index]
    }

    pub fn nodes(&self) -> &[SpatialNode] {
        &self.nodes
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Blocks in leaves whose XZ footprint overlaps `bounds`
    pub fn collect_blocks(&self, bounds: &Aabb, out: &mut Vec<usize>) {
        let mut stack: Vec<usize> = self.root.into_iter().collect();
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            if !node.bounds.intersects_xz(bounds) {
                continue;
            }
            match &node.kind {
                NodeKind::Branch { children, .. } => stack.extend(children.iter().copied()),
                NodeKind::Leaf(cell) => out.extend(cell.blocks.iter().copied()),
            }
        }
    }

    /// Fill `visibility` with the leaves and blocks visible from `frustum`.
    /// When `horizon` is given, nodes are tested against it and visible
    /// leaves raise it as they are found.
    pub fn compute_visibility(
        &self,
        frustum: &Frustum,
        mut horizon: Option<&mut HorizonBuffer>,
        visibility: &mut VisibilitySet,
    ) -> TraversalStats {
        let mut stats = TraversalStats::default();
        if let Some(horizon) = horizon.as_deref_mut() {
            horizon.reset();
        }
        if let Some(root) = self.root {
            self.visit(root, frustum, false, &mut horizon, visibility, &mut stats);
        }
        stats
    }

    fn visit(
        &self,
        index: usize,
        frustum: &Frustum,
        inside: bool,
        horizon: &mut Option<&mut HorizonBuffer>,
        visibility: &mut VisibilitySet,
        stats: &mut TraversalStats,
    ) {
        let node = &self.nodes[index];
        stats.nodes_visited += 1;

        let inside = if inside {
            true
        } else {
            match frustum.classify_aabb(&node.bounds) {
                Visibility::Invisible => {
                    stats.frustum_culled += 1;
                    return;
                }
                Visibility::PartiallyVisible => false,
                Visibility::FullyVisible => true,
            }
        };

        let view_projection = &frustum.view_projection;
        if let Some(buffer) = horizon.as_deref() {
            if !buffer.is_empty() {
                match buffer.test_solid(view_projection, &node.horizon_solid(), &SOLID_EDGES) {
                    HorizonResult::Occluded => {
                        stats.occlusion_success += 1;
                        return;
                    }
                    _ => stats.occlusion_failure += 1,
                }
            }
        }

        match &node.kind {
            NodeKind::Leaf(cell) => {
                visibility.add_leaf(index);
                for &block in &cell.blocks {
                    visibility.add_block(block);
                }
                if let Some(buffer) = horizon.as_deref_mut() {
                    buffer.draw_polygon(view_projection, &node.minimum_horizon);
                }
            }
            NodeKind::Branch { children, split } => {
                for child in self.front_to_back(children, *split, frustum.origin) {
                    self.visit(child, frustum, inside, horizon, visibility, stats);
                }
            }
        }
    }

    /// Order children by how many split lines separate them from the eye.
    /// Along any ray leaving the eye this visits nearer children first.
    fn front_to_back(&self, children: &[usize], split: [Option<f32>; 2], eye: Vec3) -> Vec<usize> {
        let mut ordered: Vec<(u8, usize)> = children
            .iter()
            .map(|&child| {
                let center = self.nodes[child].bounds.center();
                let mut crossings = 0u8;
                if let Some(x) = split[0] {
                    crossings += ((eye.x < x) != (center.x < x)) as u8;
                }
                if let Some(z) = split[1] {
                    crossings += ((eye.z < z) != (center.z < z)) as u8;
                }
                (crossings, child)
            })
            .collect();
        ordered.sort_by_key(|&(crossings, child)| (crossings, child));
        ordered.into_iter().map(|(_, child)| child).collect()
    }

    /// Project every leaf's maximum horizon and return the leaves whose
    /// quad is entirely behind the eye. Used by tests and diagnostics.
    pub fn leaves_behind(&self, view_projection: &Mat4) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.is_leaf())
            .filter(|(_, node)| {
                node.maximum_horizon.iter().all(|p| (*view_projection * p.extend(1.0)).w <= 0.0)
            })
            .map(|(i, _)| i)
            .collect()
    }
}
