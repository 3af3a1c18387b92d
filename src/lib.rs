//! geomip - block-based terrain with geo-mipmapping, horizon occlusion
//! culling and painted layer blending

pub mod core;
pub mod math;
pub mod render;
pub mod terrain;
pub mod streaming;
