//! Render driver interfaces consumed by the landscape

pub mod driver;
pub mod buffer;
pub mod headless;
pub mod visibility;

pub use driver::{
    RenderDriver, ResourceManager, RenderMode, RenderState, BlendMode,
    VertexBufferHandle, IndexBufferHandle, TextureHandle, ConstantBufferHandle,
};
pub use headless::{HeadlessDriver, DriverCommand};
pub use visibility::{IssuerId, VisibilityFlags, VisibilitySet};
