// THEORY:
// The `tiler` module walks the source image on a fixed-size, fixed-stride
// grid and decides, per candidate region, whether it earns an identification
// call. It is the bridge between one large raster and the tile-based paradigm
// of everything downstream.
//
// Key architectural principles:
// 1.  **Exhaustive enumeration, cheap rejection**: every grid offset is
//     visited in row-major order (top-to-bottom, then left-to-right) and
//     scored by the `salience` module. Rejection happens before any pixel
//     leaves memory, so dead wall space costs nothing but the score.
// 2.  **Overlap by stride, not by logic**: a stride smaller than the tile
//     size yields overlapping tiles and therefore denser coverage. Duplicate
//     detections across overlapping tiles are left to downstream consumers.
// 3.  **Deterministic artifacts**: tile files are named from their offset
//     (`{x}_{y}.{ext}`), which cannot collide within a run, and the admitted
//     sequence is fully determined by input pixels plus configuration.
//
// Partial tiles are never produced: offsets where the remaining span is
// smaller than the tile size are simply not visited.

use std::fs;
use std::io::BufWriter;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::{RgbImage, imageops};

use crate::core_modules::salience::{self, Thresholds};
use crate::core_modules::tile_store::TileRecord;
use crate::error::Result;

/// On-disk encoding for tile files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileFormat {
    Jpg { quality: u8 },
    Png,
}

impl TileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpg { .. } => "jpg",
            Self::Png => "png",
        }
    }
}

/// Tiling configuration: geometry, admission thresholds, cap, and encoding.
#[derive(Debug, Clone)]
pub struct TilerConfig {
    pub tile_w: u32,
    pub tile_h: u32,
    pub stride_x: u32,
    pub stride_y: u32,
    pub thresholds: Thresholds,
    /// Stop enumerating once this many tiles were admitted. 0 = unlimited.
    pub max_tiles: usize,
    pub format: TileFormat,
}

/// All grid offsets for the given image and tile geometry, row-major.
///
/// `y` steps from 0 to `H - th` inclusive, and for each `y`, `x` steps from 0
/// to `W - tw` inclusive. An image smaller than one tile yields no offsets.
/// Strides are clamped to at least 1.
pub fn grid_offsets(w: u32, h: u32, tw: u32, th: u32, sx: u32, sy: u32) -> Vec<(u32, u32)> {
    if w < tw || h < th || tw == 0 || th == 0 {
        return Vec::new();
    }
    let sx = sx.max(1) as usize;
    let sy = sy.max(1) as usize;
    let mut offsets = Vec::new();
    for y in (0..=h - th).step_by(sy) {
        for x in (0..=w - tw).step_by(sx) {
            offsets.push((x, y));
        }
    }
    offsets
}

/// Slices the source image, admitting salient tiles and saving each admitted
/// tile as an image file under `tiles_dir`. Returns the admitted records in
/// enumeration order.
pub fn slice_image(img: &RgbImage, tiles_dir: &Path, config: &TilerConfig) -> Result<Vec<TileRecord>> {
    fs::create_dir_all(tiles_dir)?;

    let (w, h) = img.dimensions();
    let mut records = Vec::new();

    for (x, y) in grid_offsets(w, h, config.tile_w, config.tile_h, config.stride_x, config.stride_y) {
        let tile = imageops::crop_imm(img, x, y, config.tile_w, config.tile_h).to_image();
        let scores = salience::score(&tile);
        if !scores.admitted(&config.thresholds) {
            continue;
        }

        let name = format!("{x}_{y}.{}", config.format.extension());
        save_tile(&tile, &tiles_dir.join(&name), config.format)?;
        records.push(TileRecord {
            thumbnail: name,
            x,
            y,
            tile_w: config.tile_w,
            tile_h: config.tile_h,
            mean_brightness: round3(scores.mean_brightness),
            edge_mean: round3(scores.edge_mean),
        });

        if config.max_tiles > 0 && records.len() >= config.max_tiles {
            break;
        }
    }

    Ok(records)
}

fn save_tile(tile: &RgbImage, path: &Path, format: TileFormat) -> Result<()> {
    match format {
        TileFormat::Jpg { quality } => {
            let file = fs::File::create(path)?;
            let mut out = BufWriter::new(file);
            let encoder = JpegEncoder::new_with_quality(&mut out, quality);
            tile.write_with_encoder(encoder)?;
        }
        TileFormat::Png => tile.save(path)?,
    }
    Ok(())
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
