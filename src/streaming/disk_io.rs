//! Directory-backed landscape storage
//!
//! Layout under the store root:
//!
//! ```text
//! landscape_{id}/header.json
//! landscape_{id}/procedural.json
//! landscape_{id}/blocks/block_{index}.lzb
//! ```

use std::path::{Path, PathBuf};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::terrain::procedural::ProceduralLayer;
use super::records::{BlockRecord, LandscapeHeader};
use super::store::LandscapeStore;

pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn landscape_dir(&self, landscape_id: u32) -> PathBuf {
        self.root.join(format!("landscape_{}", landscape_id))
    }

    pub fn header_path(&self, landscape_id: u32) -> PathBuf {
        self.landscape_dir(landscape_id).join("header.json")
    }

    pub fn procedural_path(&self, landscape_id: u32) -> PathBuf {
        self.landscape_dir(landscape_id).join("procedural.json")
    }

    pub fn block_path(&self, landscape_id: u32, block_index: u32) -> PathBuf {
        self.landscape_dir(landscape_id)
            .join("blocks")
            .join(format!("block_{}.lzb", block_index))
    }

    /// Check if a block record exists on disk
    pub fn block_exists(&self, landscape_id: u32, block_index: u32) -> bool {
        self.block_path(landscape_id, block_index).exists()
    }
}

fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}

impl LandscapeStore for DiskStore {
    fn load_header(&self, landscape_id: u32) -> Result<LandscapeHeader> {
        let json = std::fs::read_to_string(self.header_path(landscape_id))?;
        Ok(serde_json::from_str(&json)?)
    }

    fn save_header(&mut self, header: &LandscapeHeader) -> Result<()> {
        let json = serde_json::to_string_pretty(header)?;
        write_file(&self.header_path(header.landscape_id), json.as_bytes())
    }

    fn load_block(&self, landscape_id: u32, block_index: u32) -> Result<BlockRecord> {
        let path = self.block_path(landscape_id, block_index);
        let data = std::fs::read(&path).map_err(|e| {
            Error::Persistence(format!("{}: {}", path.display(), e))
        })?;
        BlockRecord::from_bytes(&data)
    }

    fn save_block(&mut self, landscape_id: u32, record: &BlockRecord) -> Result<()> {
        let data = record.to_bytes()?;
        write_file(&self.block_path(landscape_id, record.block_index), &data)
    }

    fn load_procedural_layers(&self, landscape_id: u32) -> Result<Vec<ProceduralLayer>> {
        let path = self.procedural_path(landscape_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    fn save_procedural_layers(&mut self, landscape_id: u32, layers: &[ProceduralLayer]) -> Result<()> {
        let json = serde_json::to_string_pretty(layers)?;
        write_file(&self.procedural_path(landscape_id), json.as_bytes())
    }
}
