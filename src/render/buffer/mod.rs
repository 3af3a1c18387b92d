//! GPU-layout vertex and constant buffer structures

pub mod terrain_buffer;

pub use terrain_buffer::{
    TerrainVertex, CtLayerData, CtProceduralData, CbTerrainBaseData,
    CbTerrainLayerData, CbTerrainProcData, CbTerrainPaintData,
    MAX_PASS_LAYERS, MAX_PROCEDURAL_PASS_LAYERS,
};
