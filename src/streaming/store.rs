//! Storage backends for landscape data

use std::collections::HashMap;

use crate::core::error::Error;
use crate::core::types::Result;
use crate::terrain::procedural::ProceduralLayer;
use super::records::{BlockRecord, LandscapeHeader};

/// Load and save landscape data keyed by landscape id and block index
pub trait LandscapeStore {
    fn load_header(&self, landscape_id: u32) -> Result<LandscapeHeader>;
    fn save_header(&mut self, header: &LandscapeHeader) -> Result<()>;

    fn load_block(&self, landscape_id: u32, block_index: u32) -> Result<BlockRecord>;
    fn save_block(&mut self, landscape_id: u32, record: &BlockRecord) -> Result<()>;

    fn load_procedural_layers(&self, landscape_id: u32) -> Result<Vec<ProceduralLayer>>;
    fn save_procedural_layers(&mut self, landscape_id: u32, layers: &[ProceduralLayer]) -> Result<()>;
}

/// In-memory store. Blocks are kept in their encoded form so the same
/// validation path runs as for disk data.
#[derive(Debug, Default)]
pub struct MemoryStore {
    headers: HashMap<u32, LandscapeHeader>,
    blocks: HashMap<(u32, u32), Vec<u8>>,
    procedural: HashMap<u32, Vec<ProceduralLayer>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw encoded block bytes
    pub fn insert_raw_block(&mut self, landscape_id: u32, block_index: u32, bytes: Vec<u8>) {
        self.blocks.insert((landscape_id, block_index), bytes);
    }

    pub fn block_count(&self, landscape_id: u32) -> usize {
        self.blocks.keys().filter(|(id, _)| *id == landscape_id).count()
    }
}

impl LandscapeStore for MemoryStore {
    fn load_header(&self, landscape_id: u32) -> Result<LandscapeHeader> {
        self.headers
            .get(&landscape_id)
            .cloned()
            .ok_or_else(|| Error::Persistence(format!("landscape {} not found", landscape_id)))
    }

    fn save_header(&mut self, header: &LandscapeHeader) -> Result<()> {
        self.headers.insert(header.landscape_id, header.clone());
        Ok(())
    }

    fn load_block(&self, landscape_id: u32, block_index: u32) -> Result<BlockRecord> {
        let bytes = self.blocks.get(&(landscape_id, block_index)).ok_or_else(|| {
            Error::Persistence(format!("landscape {} block {} not found", landscape_id, block_index))
        })?;
        BlockRecord::from_bytes(bytes)
    }

    fn save_block(&mut self, landscape_id: u32, record: &BlockRecord) -> Result<()> {
        self.blocks.insert((landscape_id, record.block_index), record.to_bytes()?);
        Ok(())
    }

    fn load_procedural_layers(&self, landscape_id: u32) -> Result<Vec<ProceduralLayer>> {
        Ok(self.procedural.get(&landscape_id).cloned().unwrap_or_default())
    }

    fn save_procedural_layers(&mut self, landscape_id: u32, layers: &[ProceduralLayer]) -> Result<()> {
        self.procedural.insert(landscape_id, layers.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_entries() {
        let store = MemoryStore::new();
        assert!(store.load_header(1).is_err());
        assert!(store.load_block(1, 0).is_err());
        assert!(store.load_procedural_layers(1).unwrap().is_empty());
    }

    #[test]
    fn test_block_round_trip() {
        let mut store = MemoryStore::new();
        let record = BlockRecord {
            block_index: 2,
            width: 2,
            height: 2,
            heights: vec![0, 1, 2, 3],
            colors: Vec::new(),
            layers: Vec::new(),
        };
        store.save_block(5, &record).unwrap();
        assert_eq!(store.load_block(5, 2).unwrap(), record);
        assert_eq!(store.block_count(5), 1);
        assert_eq!(store.block_count(6), 0);
    }
}
