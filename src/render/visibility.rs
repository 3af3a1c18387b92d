//! Visibility set filled by landscape culling

use std::collections::{BTreeSet, HashSet};

/// Identifies the camera, light or other object a visibility search runs
/// for. Searches from different issuers keep separate occlusion schedules.
pub type IssuerId = u32;

/// What a visibility search is for
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct VisibilityFlags(u32);

impl VisibilityFlags {
    pub const NONE: VisibilityFlags = VisibilityFlags(0);
    /// Objects that will be drawn to the issuer's target
    pub const MUST_RENDER: VisibilityFlags = VisibilityFlags(0x1);
    /// Shadow casters for a light; horizon occlusion is not applied
    pub const MUST_CAST_SHADOWS: VisibilityFlags = VisibilityFlags(0x2);
    /// Also record the materials used by the visible blocks
    pub const COLLECT_MATERIALS: VisibilityFlags = VisibilityFlags(0x100);

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: VisibilityFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for VisibilityFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Blocks and spatial-tree leaves found visible for one camera
#[derive(Clone, Debug, Default)]
pub struct VisibilitySet {
    blocks: Vec<usize>,
    block_lookup: HashSet<usize>,
    leaves: Vec<usize>,
    materials: BTreeSet<u32>,
}

impl VisibilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
        self.block_lookup.clear();
        self.leaves.clear();
        self.materials.clear();
    }

    /// Add a block once, preserving first-seen (front-to-back) order
    pub fn add_block(&mut self, block: usize) {
        if self.block_lookup.insert(block) {
            self.blocks.push(block);
        }
    }

    pub fn add_leaf(&mut self, leaf: usize) {
        self.leaves.push(leaf);
    }

    pub fn contains_block(&self, block: usize) -> bool {
        self.block_lookup.contains(&block)
    }

    /// Visible blocks in traversal order
    pub fn blocks(&self) -> &[usize] {
        &self.blocks
    }

    /// Visible spatial-tree leaves in traversal order
    pub fn leaves(&self) -> &[usize] {
        &self.leaves
    }

    pub fn add_material(&mut self, material: u32) {
        self.materials.insert(material);
    }

    /// Materials collected for the visible blocks, in id order
    pub fn materials(&self) -> impl Iterator<Item = u32> + '_ {
        self.materials.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_deduplicated_in_order() {
        let mut set = VisibilitySet::new();
        set.add_block(3);
        set.add_block(1);
        set.add_block(3);
        set.add_material(7);
        set.add_material(2);
        set.add_material(7);
        assert_eq!(set.blocks(), &[3, 1]);
        assert!(set.contains_block(1));
        assert_eq!(set.materials().collect::<Vec<_>>(), vec![2, 7]);
        set.clear();
        assert!(set.is_empty());
        assert_eq!(set.materials().count(), 0);
    }

    #[test]
    fn test_flags() {
        let flags = VisibilityFlags::MUST_RENDER | VisibilityFlags::COLLECT_MATERIALS;
        assert_eq!(flags.bits(), 0x101);
        assert!(flags.contains(VisibilityFlags::MUST_RENDER));
        assert!(!flags.contains(VisibilityFlags::MUST_CAST_SHADOWS));
        assert_eq!(VisibilityFlags::from_bits(0x2), VisibilityFlags::MUST_CAST_SHADOWS);
    }
}
