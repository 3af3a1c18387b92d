//! Landscape importer - builds a landscape from a height map and writes it
//! to a directory store.
//!
//! Usage: cargo run --release --bin import_landscape -- <HEIGHTMAP> <OUT_DIR> [OPTIONS]
//!
//! The height map is any grayscale image the `image` crate reads, or a
//! square RAW file (`.raw` = 16-bit little endian, `.r8` = 8-bit).
//!
//! Options:
//!   --id <N>             Landscape id (default: 0)
//!   --block-verts <N>    Vertices per block edge, 2^n + 1 (default: 33)
//!   --blend-size <N>     Blend-map texels per block edge (default: block quads)
//!   --scale <XZ>         World units per sample (default: 1.0)
//!   --height-scale <Y>   World units per height unit (default: 0.01)
//!   --config <PATH>      Landscape config JSON (default: built-in defaults)
//!   --verbose            Log at debug level
//!
//! Output structure:
//!   <OUT_DIR>/landscape_<id>/
//!     header.json
//!     procedural.json
//!     blocks/block_<n>.lzb

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Instant;

use glam::Vec3;

use geomip::core::logging;
use geomip::core::types::Result;
use geomip::render::HeadlessDriver;
use geomip::streaming::DiskStore;
use geomip::terrain::{HeightMap, Landscape, LandscapeConfig, LandscapeImportParams, RawFormat};

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--verbose") {
        logging::init_with_default("debug");
    } else {
        logging::init();
    }

    if args.len() < 3 || args[1].starts_with("--") || args[2].starts_with("--") {
        eprintln!("Usage: import_landscape <HEIGHTMAP> <OUT_DIR> [--id N] [--block-verts N] [--blend-size N] [--scale XZ] [--height-scale Y] [--config PATH] [--verbose]");
        std::process::exit(2);
    }

    if let Err(e) = run(&args) {
        log::error!("Import failed: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &[String]) -> Result<()> {
    let input = PathBuf::from(&args[1]);
    let output = PathBuf::from(&args[2]);
    let id = parse_u32_arg(args, "--id").unwrap_or(0);
    let block_verts = parse_u32_arg(args, "--block-verts").unwrap_or(33);
    let scale = parse_f32_arg(args, "--scale").unwrap_or(1.0);
    let height_scale = parse_f32_arg(args, "--height-scale").unwrap_or(0.01);

    let start = Instant::now();
    let height_map = load_height_map(&input)?;

    let mut params = LandscapeImportParams::new(id, height_map, block_verts)?;
    params.scale = Vec3::new(scale, height_scale, scale);
    if let Some(size) = parse_u32_arg(args, "--blend-size") {
        params.blend_map_size = size;
    }
    if let Some(path) = parse_str_arg(args, "--config") {
        params.config = LandscapeConfig::load(Path::new(&path))?;
    }

    let mut driver = HeadlessDriver::new();
    let landscape = Landscape::import(params, &mut driver)?;
    let bounds = landscape.bounds();
    log::info!(
        "Built {} blocks ({}x{}) in {:.2}s, height range {:.1}..{:.1}",
        landscape.blocks().len(),
        landscape.block_layout().0,
        landscape.block_layout().1,
        start.elapsed().as_secs_f32(),
        bounds.min.y,
        bounds.max.y
    );

    let mut store = DiskStore::open(&output)?;
    landscape.save(&mut store)?;
    log::info!("Wrote {}", store.landscape_dir(id).display());
    Ok(())
}

fn load_height_map(path: &Path) -> Result<HeightMap> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("raw") => HeightMap::load_square_raw(BufReader::new(File::open(path)?), RawFormat::Gray16),
        Some("r8") => HeightMap::load_square_raw(BufReader::new(File::open(path)?), RawFormat::Gray8),
        _ => HeightMap::load_image(path),
    }
}

fn parse_f32_arg(args: &[String], flag: &str) -> Option<f32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_u32_arg(args: &[String], flag: &str) -> Option<u32> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
