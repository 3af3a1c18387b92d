//! Layer materials referenced by painted and procedural layers

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::render::buffer::CtLayerData;
use crate::render::driver::TextureHandle;

/// Identifier of a [`LayerMaterial`] within a [`MaterialLibrary`]
pub type MaterialId = u32;

/// Texturing parameters of one terrain layer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerMaterial {
    pub id: MaterialId,
    pub name: String,
    #[serde(skip)]
    pub color_texture: Option<TextureHandle>,
    #[serde(skip)]
    pub normal_texture: Option<TextureHandle>,
    /// Texture repeats per world unit
    pub scale: [f32; 2],
    /// Scale of the low-frequency base sample used for tiling reduction
    pub base_scale: [f32; 2],
    pub offset: [f32; 2],
    /// Rotation about Y in radians
    pub rotation: f32,
    pub tiling_reduction: bool,
}

impl Default for LayerMaterial {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            color_texture: None,
            normal_texture: None,
            scale: [0.1, 0.1],
            base_scale: [0.01, 0.01],
            offset: [0.0, 0.0],
            rotation: 0.0,
            tiling_reduction: false,
        }
    }
}

impl LayerMaterial {
    pub fn new(id: MaterialId, name: impl Into<String>) -> Self {
        Self { id, name: name.into(), ..Default::default() }
    }

    /// Constant buffer entry for this layer reading `channel` of a blend map
    /// that is `blend_map_size` texels square
    pub fn layer_data(&self, channel: usize, blend_map_size: u32) -> CtLayerData {
        let size = blend_map_size.max(1) as f32;
        let (sin, cos) = self.rotation.sin_cos();
        CtLayerData {
            texture_size: [size, size, 1.0 / size, 1.0 / size],
            scale: self.scale,
            base_scale: self.base_scale,
            rotation: [cos, sin, -sin, cos],
            offset: self.offset,
            tiling_reduction: if self.tiling_reduction { 1.0 } else { 0.0 },
            channel: channel as f32,
        }
    }
}

/// Materials available to a landscape, keyed by id
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterialLibrary {
    materials: BTreeMap<MaterialId, LayerMaterial>,
    next_id: MaterialId,
}

impl MaterialLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new material and return its id
    pub fn create(&mut self, name: impl Into<String>) -> MaterialId {
        self.next_id += 1;
        let id = self.next_id;
        self.materials.insert(id, LayerMaterial::new(id, name));
        id
    }

    /// Insert or replace a material under its own id
    pub fn insert(&mut self, material: LayerMaterial) {
        self.next_id = self.next_id.max(material.id);
        self.materials.insert(material.id, material);
    }

    pub fn remove(&mut self, id: MaterialId) -> Option<LayerMaterial> {
        self.materials.remove(&id)
    }

    pub fn get(&self, id: MaterialId) -> Option<&LayerMaterial> {
        self.materials.get(&id)
    }

    pub fn get_mut(&mut self, id: MaterialId) -> Option<&mut LayerMaterial> {
        self.materials.get_mut(&id)
    }

    pub fn contains(&self, id: MaterialId) -> bool {
        self.materials.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    /// Materials in id order
    pub fn iter(&self) -> impl Iterator<Item = &LayerMaterial> {
        self.materials.values()
    }

    /// Layer constants for a material, falling back to defaults (and a
    /// warning) when the id is unknown
    pub fn layer_data(&self, id: MaterialId, channel: usize, blend_map_size: u32) -> CtLayerData {
        match self.get(id) {
            Some(material) => material.layer_data(channel, blend_map_size),
            None => {
                log::warn!("Unknown layer material {}; using defaults", id);
                LayerMaterial::default().layer_data(channel, blend_map_size)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_assigns_increasing_ids() {
        let mut library = MaterialLibrary::new();
        let grass = library.create("grass");
        let rock = library.create("rock");
        assert!(rock > grass);
        assert_eq!(library.get(grass).unwrap().name, "grass");

        library.insert(LayerMaterial::new(10, "snow"));
        assert_eq!(library.create("sand"), 11);
        assert_eq!(library.len(), 4);
    }

    #[test]
    fn test_layer_data() {
        let mut material = LayerMaterial::new(1, "dirt");
        material.rotation = std::f32::consts::FRAC_PI_2;
        material.tiling_reduction = true;
        let data = material.layer_data(2, 64);
        assert_eq!(data.channel, 2.0);
        assert_eq!(data.texture_size, [64.0, 64.0, 1.0 / 64.0, 1.0 / 64.0]);
        assert!((data.rotation[1] - 1.0).abs() < 1e-6);
        assert_eq!(data.tiling_reduction, 1.0);
    }

    #[test]
    fn test_unknown_material_falls_back() {
        let library = MaterialLibrary::new();
        let data = library.layer_data(42, 1, 32);
        assert_eq!(data.scale, LayerMaterial::default().scale);
        assert_eq!(data.channel, 1.0);
    }

    #[test]
    fn test_serde_skips_texture_handles() {
        let mut library = MaterialLibrary::new();
        let id = library.create("grass");
        library.get_mut(id).unwrap().color_texture = Some(TextureHandle(7));

        let json = serde_json::to_string(&library).unwrap();
        let back: MaterialLibrary = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get(id).unwrap().color_texture, None);
        assert_eq!(back.get(id).unwrap().name, "grass");
    }
}
