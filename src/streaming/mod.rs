//! Landscape persistence

pub mod records;
pub mod store;
pub mod disk_io;

pub use records::{BlockRecord, LandscapeHeader, PaintedLayerRecord};
pub use store::{LandscapeStore, MemoryStore};
pub use disk_io::DiskStore;
