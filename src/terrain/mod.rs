//! Block-based landscape: height data, geo-mipmapped blocks, culling and
//! layer blending

pub mod heightmap;
pub mod lod;
pub mod config;
pub mod block;
pub mod material;
pub mod paint;
pub mod texture_data;
pub mod procedural;
pub mod occlusion;
pub mod spatial_tree;
pub mod landscape;

pub use heightmap::{HeightMap, RawFormat};
pub use lod::{Edge, LodTable, TerrainLod};
pub use config::{LandscapeConfig, LodConfig, OcclusionConfig, RenderConfig};
pub use block::{BlockContext, BlockDrawStats, TerrainBlock};
pub use material::{LayerMaterial, MaterialId, MaterialLibrary};
pub use paint::{PaintParams, PaintType};
pub use texture_data::LandscapeTextureData;
pub use procedural::{ProceduralDrawBatch, ProceduralLayer};
pub use occlusion::{HorizonBuffer, HorizonResult, OcclusionScheduler};
pub use spatial_tree::{SpatialTree, TraversalStats};
pub use landscape::{Landscape, LandscapeFlags, LandscapeImportParams, LandscapeRenderMethod, RenderStats};
