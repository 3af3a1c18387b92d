//! Shared geo-mipmap index layouts
//!
//! Every block of a landscape has the same vertex grid, so the index buffers
//! for each detail level are built once and shared. A level holds the
//! interior triangle list plus, for each edge, one skirt per coarser (or
//! equal) neighbour level that stitches this level's edge down to the
//! neighbour's vertex spacing.

use crate::core::error::Error;
use crate::core::types::Result;
use crate::render::driver::{IndexBufferHandle, ResourceManager};

/// Maximum number of detail levels a landscape can use
pub const MAX_LANDSCAPE_LOD: usize = 7;

/// Block edge. North is the minimum-Z row of the block grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Edge {
    North = 0,
    East = 1,
    South = 2,
    West = 3,
}

impl Edge {
    pub const ALL: [Edge; 4] = [Edge::North, Edge::East, Edge::South, Edge::West];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn opposite(self) -> Edge {
        match self {
            Edge::North => Edge::South,
            Edge::East => Edge::West,
            Edge::South => Edge::North,
            Edge::West => Edge::East,
        }
    }

    /// Grid coordinate of the `i`th vertex along this edge of a block with
    /// `quads` quads per side
    pub fn vertex(self, i: u32, quads: u32) -> (u32, u32) {
        match self {
            Edge::North => (i, 0),
            Edge::South => (i, quads),
            Edge::West => (0, i),
            Edge::East => (quads, i),
        }
    }
}

/// A sub-range of a level's index buffer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SkirtRange {
    pub index_start: u32,
    pub primitive_count: u32,
}

/// Skirts for one edge, indexed by `neighbour_level - level`
#[derive(Clone, Debug, Default)]
pub struct BlockSkirt {
    pub levels: Vec<SkirtRange>,
}

/// Index layout for one detail level
#[derive(Clone, Debug)]
pub struct TerrainLod {
    pub level: usize,
    /// Vertex spacing in grid units (`2^level`)
    pub step: u32,
    /// Leading vertices of the mip-ordered vertex buffer used by the interior
    pub vertex_count: u32,
    pub interior_primitive_count: u32,
    pub skirts: [BlockSkirt; 4],
    pub indices: Vec<u32>,
    pub index_buffer: Option<IndexBufferHandle>,
}

impl TerrainLod {
    /// Skirt that joins this level to a neighbour at `neighbour_level`
    pub fn skirt(&self, edge: Edge, neighbour_level: usize) -> Option<SkirtRange> {
        let offset = neighbour_level.checked_sub(self.level)?;
        self.skirts[edge.index()].levels.get(offset).copied()
    }
}

/// Number of detail levels for a block with `quads` quads per edge
pub fn lod_count_for(quads: u32) -> usize {
    (quads.trailing_zeros() as usize + 1).min(MAX_LANDSCAPE_LOD)
}

/// Map each grid vertex to its slot in the vertex buffer so that the
/// vertices used by coarser levels form a prefix of the buffer.
pub fn build_mip_lookup(verts: u32, lod_count: usize) -> Vec<u32> {
    let v = verts as usize;
    let mut lookup = vec![u32::MAX; v * v];
    let mut next = 0u32;
    for level in (0..lod_count).rev() {
        let step = 1usize << level;
        for z in (0..v).step_by(step) {
            for x in (0..v).step_by(step) {
                let slot = &mut lookup[x + z * v];
                if *slot == u32::MAX {
                    *slot = next;
                    next += 1;
                }
            }
        }
    }
    lookup
}

/// Index of the skirt-bottom vertex below the `i`th vertex of `edge`
pub fn skirt_vertex(verts: u32, edge: Edge, i: u32) -> u32 {
    verts * verts + edge.index() as u32 * verts + i
}

/// Detail levels shared by all blocks of one shape
#[derive(Clone, Debug)]
pub struct LodTable {
    verts: u32,
    mip_lookup: Vec<u32>,
    levels: Vec<TerrainLod>,
}

impl LodTable {
    /// Build index layouts for blocks with `block_verts` vertices per edge.
    /// `block_verts - 1` must be a power of two.
    pub fn build(block_verts: u32) -> Result<Self> {
        let quads = block_verts.saturating_sub(1);
        if quads == 0 || !quads.is_power_of_two() {
            return Err(Error::Layout(format!(
                "block size {} must be a power of two plus one",
                block_verts
            )));
        }
        let lod_count = lod_count_for(quads);
        let mut table = Self {
            verts: block_verts,
            mip_lookup: build_mip_lookup(block_verts, lod_count),
            levels: Vec::with_capacity(lod_count),
        };
        for level in 0..lod_count {
            let lod = table.build_lod_level(level, lod_count);
            table.levels.push(lod);
        }
        log::debug!(
            "Built {} LOD levels for {}x{} blocks ({} indices at level 0)",
            lod_count,
            block_verts,
            block_verts,
            table.levels[0].indices.len()
        );
        Ok(table)
    }

    fn grid(&self, x: u32, z: u32) -> u32 {
        self.mip_lookup[(x + z * self.verts) as usize]
    }

    fn build_lod_level(&self, level: usize, lod_count: usize) -> TerrainLod {
        let quads = self.verts - 1;
        let step = 1u32 << level;
        let mut indices = Vec::new();

        for z in (0..quads).step_by(step as usize) {
            for x in (0..quads).step_by(step as usize) {
                let tl = self.grid(x, z);
                let tr = self.grid(x + step, z);
                let bl = self.grid(x, z + step);
                let br = self.grid(x + step, z + step);
                // Split along the top-left/bottom-right diagonal
                indices.extend_from_slice(&[tl, br, tr, tl, bl, br]);
            }
        }
        let interior_primitive_count = (indices.len() / 3) as u32;
        let cells = quads / step + 1;

        let mut skirts: [BlockSkirt; 4] = Default::default();
        for edge in Edge::ALL {
            for neighbour in level..lod_count {
                let index_start = indices.len() as u32;
                self.build_skirt(&mut indices, edge, step, 1 << neighbour);
                skirts[edge.index()].levels.push(SkirtRange {
                    index_start,
                    primitive_count: (indices.len() as u32 - index_start) / 3,
                });
            }
        }

        TerrainLod {
            level,
            step,
            vertex_count: cells * cells,
            interior_primitive_count,
            skirts,
            indices,
            index_buffer: None,
        }
    }

    /// Fan the fine edge vertices of each coarse segment down to the skirt
    /// vertices at the segment ends.
    fn build_skirt(&self, indices: &mut Vec<u32>, edge: Edge, fine: u32, coarse: u32) {
        let quads = self.verts - 1;
        let top = |i: u32| {
            let (x, z) = edge.vertex(i, quads);
            self.grid(x, z)
        };
        let flip = matches!(edge, Edge::East | Edge::South);
        let mut push = |a: u32, b: u32, c: u32| {
            if flip {
                indices.extend_from_slice(&[a, c, b]);
            } else {
                indices.extend_from_slice(&[a, b, c]);
            }
        };

        let sub = coarse / fine;
        let half = sub / 2;
        for start in (0..quads).step_by(coarse as usize) {
            let bottom_a = skirt_vertex(self.verts, edge, start);
            let bottom_b = skirt_vertex(self.verts, edge, start + coarse);
            for j in 0..sub {
                let anchor = if j < half { bottom_a } else { bottom_b };
                push(top(start + j * fine), top(start + (j + 1) * fine), anchor);
            }
            push(top(start + half * fine), bottom_b, bottom_a);
        }
    }

    /// Upload every level's index buffer
    pub fn create_resources<R: ResourceManager + ?Sized>(&mut self, resources: &mut R) -> Result<()> {
        for lod in &mut self.levels {
            if lod.index_buffer.is_none() {
                lod.index_buffer = Some(resources.create_index_buffer(&lod.indices)?);
            }
        }
        Ok(())
    }

    pub fn release<R: ResourceManager + ?Sized>(&mut self, resources: &mut R) {
        for lod in &mut self.levels {
            if let Some(buffer) = lod.index_buffer.take() {
                resources.destroy_index_buffer(buffer);
            }
        }
    }

    pub fn lod_count(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, level: usize) -> &TerrainLod {
        &self.levels[level.min(self.levels.len() - 1)]
    }

    pub fn levels(&self) -> &[TerrainLod] {
        &self.levels
    }

    pub fn mip_lookup(&self) -> &[u32] {
        &self.mip_lookup
    }

    pub fn verts_per_edge(&self) -> u32 {
        self.verts
    }

    pub fn quads_per_edge(&self) -> u32 {
        self.verts - 1
    }

    /// Grid vertices plus one skirt vertex per edge vertex
    pub fn total_vertex_count(&self) -> u32 {
        self.verts * self.verts + 4 * self.verts
    }
}
