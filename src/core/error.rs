//! Error types for the landscape engine

use thiserror::Error;

/// Main error type for the engine
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Heightmap error: {0}")]
    HeightMap(String),

    #[error("Invalid landscape layout: {0}")]
    Layout(String),

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}
