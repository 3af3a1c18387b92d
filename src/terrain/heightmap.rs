//! 16-bit height field storage, sampling and import

use std::io::Read;
use std::path::Path;

use crate::core::error::Error;
use crate::core::types::{Result, Vec3};
use crate::math::Rect;

/// Lowest representable cell height
pub const MIN_CELL_HEIGHT: i16 = -32767;
/// Highest representable cell height
pub const MAX_CELL_HEIGHT: i16 = 32767;

/// Pixel layout of a RAW heightmap file
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RawFormat {
    /// One unsigned byte per sample, scaled up to the cell range
    Gray8,
    /// One little-endian signed 16-bit value per sample
    Gray16,
}

impl RawFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            RawFormat::Gray8 => 1,
            RawFormat::Gray16 => 2,
        }
    }
}

/// Grid of signed 16-bit height samples, row-major with row 0 at minimum Z
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HeightMap {
    width: u32,
    height: u32,
    data: Vec<i16>,
}

impl HeightMap {
    /// Create a zero-filled height map
    pub fn new(width: u32, height: u32) -> Self {
        Self::flat(width, height, 0)
    }

    /// Create a height map where every sample holds `value`
    pub fn flat(width: u32, height: u32, value: i16) -> Self {
        Self {
            width,
            height,
            data: vec![value; width as usize * height as usize],
        }
    }

    /// Wrap existing sample data, validating its length
    pub fn from_data(width: u32, height: u32, data: Vec<i16>) -> Result<Self> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(Error::HeightMap(format!(
                "expected {} samples for {}x{}, got {}",
                expected, width, height, data.len()
            )));
        }
        Ok(Self { width, height, data })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[i16] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [i16] {
        &mut self.data
    }

    pub fn bounds(&self) -> Rect {
        Rect::from_size(self.width as i32, self.height as i32)
    }

    /// Sample at a pixel; coordinates are clamped to the map edge
    pub fn cell(&self, x: i32, y: i32) -> i16 {
        if self.data.is_empty() {
            return 0;
        }
        let x = x.clamp(0, self.width as i32 - 1) as usize;
        let y = y.clamp(0, self.height as i32 - 1) as usize;
        self.data[x + y * self.width as usize]
    }

    /// Overwrite a sample. Out-of-range writes are ignored.
    pub fn set_cell(&mut self, x: i32, y: i32, value: i16) {
        if let Some(index) = self.index_of(x, y) {
            self.data[index] = value;
        } else {
            log::warn!("set_cell({}, {}) outside {}x{} height map", x, y, self.width, self.height);
        }
    }

    /// Raise or lower a sample, clamping to the cell range
    pub fn offset_cell(&mut self, x: i32, y: i32, offset: i32) {
        if let Some(index) = self.index_of(x, y) {
            let value = self.data[index] as i32 + offset;
            self.data[index] = clamp_cell(value);
        }
    }

    fn index_of(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return None;
        }
        Some(x as usize + y as usize * self.width as usize)
    }

    /// Height at a fractional pixel position.
    ///
    /// Each quad is split along its top-left to bottom-right diagonal, matching
    /// the triangulation used by the block meshes, so the result lies exactly
    /// on the rendered surface at full detail.
    pub fn interpolated(&self, x: f32, y: f32) -> f32 {
        if self.width < 2 || self.height < 2 {
            return self.cell(x as i32, y as i32) as f32;
        }
        let max_x = (self.width - 1) as f32;
        let max_y = (self.height - 1) as f32;
        let x = x.clamp(0.0, max_x);
        let y = y.clamp(0.0, max_y);

        let ix = (x.floor() as i32).min(self.width as i32 - 2);
        let iy = (y.floor() as i32).min(self.height as i32 - 2);
        let px = x - ix as f32;
        let py = y - iy as f32;

        let top_left = self.cell(ix, iy) as f32;
        let bottom_right = self.cell(ix + 1, iy + 1) as f32;
        let (top_right, bottom_left) = if px < py {
            let bottom_left = self.cell(ix, iy + 1) as f32;
            (top_left + (bottom_right - bottom_left), bottom_left)
        } else {
            let top_right = self.cell(ix + 1, iy) as f32;
            (top_right, top_left + (bottom_right - top_right))
        };

        let top = top_left + (top_right - top_left) * px;
        let bottom = bottom_left + (bottom_right - bottom_left) * px;
        top + (bottom - top) * py
    }

    /// Surface normal at a pixel from central differences, given the world
    /// spacing between samples
    pub fn normal(&self, x: i32, y: i32, scale: Vec3) -> Vec3 {
        let x0 = (x - 1).max(0);
        let x1 = (x + 1).min(self.width as i32 - 1);
        let y0 = (y - 1).max(0);
        let y1 = (y + 1).min(self.height as i32 - 1);

        let dx = ((x1 - x0).max(1)) as f32 * scale.x;
        let dz = ((y1 - y0).max(1)) as f32 * scale.z;
        let slope_x = (self.cell(x1, y) as f32 - self.cell(x0, y) as f32) * scale.y / dx;
        let slope_z = (self.cell(x, y1) as f32 - self.cell(x, y0) as f32) * scale.y / dz;

        Vec3::new(-slope_x, 1.0, -slope_z).normalize_or(Vec3::Y)
    }

    /// Lowest and highest sample inside a rectangle (clipped to the map)
    pub fn range(&self, rect: &Rect) -> (i16, i16) {
        let rect = rect.intersect(&self.bounds());
        let mut min = MAX_CELL_HEIGHT;
        let mut max = MIN_CELL_HEIGHT;
        for y in rect.top..rect.bottom {
            let row = y as usize * self.width as usize;
            for &value in &self.data[row + rect.left as usize..row + rect.right as usize] {
                min = min.min(value);
                max = max.max(value);
            }
        }
        if min > max { (0, 0) } else { (min, max) }
    }

    /// Remap every sample linearly into `[min, max]`. Flat maps are left alone.
    pub fn normalize(&mut self, min: i32, max: i32) {
        let (orig_min, orig_max) = self.range(&self.bounds());
        if orig_min == orig_max {
            return;
        }
        let scale = (max - min) as f32 / (orig_max as i32 - orig_min as i32) as f32;
        for value in &mut self.data {
            let mapped = ((*value as i32 - orig_min as i32) as f32 * scale) as i32 + min;
            *value = clamp_cell(mapped);
        }
    }

    /// Multiply every sample by an integer factor, clamping to the cell range
    pub fn scale(&mut self, factor: i32) {
        for value in &mut self.data {
            *value = clamp_cell(*value as i32 * factor);
        }
    }

    /// Copy out a sub-region
    pub fn section(&self, rect: &Rect) -> Result<HeightMap> {
        if rect.is_empty() || rect.intersect(&self.bounds()) != *rect {
            return Err(Error::HeightMap(format!(
                "section {:?} outside {}x{} height map",
                rect, self.width, self.height
            )));
        }
        let mut data = Vec::with_capacity((rect.width() * rect.height()) as usize);
        for y in rect.top..rect.bottom {
            let row = y as usize * self.width as usize;
            data.extend_from_slice(&self.data[row + rect.left as usize..row + rect.right as usize]);
        }
        HeightMap::from_data(rect.width() as u32, rect.height() as u32, data)
    }

    /// Load a RAW heightmap of known dimensions
    pub fn load_raw<R: Read>(mut reader: R, width: u32, height: u32, format: RawFormat) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::HeightMap("RAW dimensions must be non-zero".into()));
        }
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::from_raw_bytes(&bytes, width, height, format)
    }

    /// Load a RAW heightmap whose square dimensions are inferred from its length
    pub fn load_square_raw<R: Read>(mut reader: R, format: RawFormat) -> Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let samples = bytes.len() / format.bytes_per_sample();
        let side = (samples as f64).sqrt() as u32;
        Self::from_raw_bytes(&bytes, side, side, format)
    }

    fn from_raw_bytes(bytes: &[u8], width: u32, height: u32, format: RawFormat) -> Result<Self> {
        let expected = width as usize * height as usize * format.bytes_per_sample();
        if bytes.len() != expected || expected == 0 {
            return Err(Error::HeightMap(format!(
                "RAW data size {} did not match the expected {} for {}x{} {:?}",
                bytes.len(), expected, width, height, format
            )));
        }
        let data = match format {
            RawFormat::Gray8 => bytes.iter().map(|&b| gray8_to_cell(b)).collect(),
            RawFormat::Gray16 => bytes
                .chunks_exact(2)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
                .collect(),
        };
        Self::from_data(width, height, data)
    }

    /// Load an 8 or 16-bit grayscale image (any format the `image` crate reads)
    pub fn load_image(path: &Path) -> Result<Self> {
        let image = image::open(path)?;
        let (width, height) = (image.width(), image.height());
        let data = match image {
            image::DynamicImage::ImageLuma16(gray) => {
                gray.into_raw().into_iter().map(|v| (v >> 1) as i16).collect()
            }
            other => other.to_luma8().into_raw().into_iter().map(gray8_to_cell).collect(),
        };
        log::info!("Loaded {}x{} heightmap from {}", width, height, path.display());
        Self::from_data(width, height, data)
    }
}

fn clamp_cell(value: i32) -> i16 {
    value.clamp(MIN_CELL_HEIGHT as i32, MAX_CELL_HEIGHT as i32) as i16
}

fn gray8_to_cell(value: u8) -> i16 {
    (value as i32 * (MAX_CELL_HEIGHT as i32 / 255)) as i16
}
