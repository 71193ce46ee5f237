//! Optional contact sheet: a square-ish mosaic of admitted tile thumbnails
//! for quick visual triage. Cosmetic output; the pipeline logs and continues
//! when it cannot be built.

use std::fs;
use std::io::BufWriter;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use crate::core_modules::tile_store::TileRecord;
use crate::error::Result;

const THUMB_SIZE: u32 = 120;
/// Column count is derived from at most this many cells.
const MAX_CELLS: usize = 400;
const BACKGROUND: Rgb<u8> = Rgb([24, 24, 24]);
const JPEG_QUALITY: u8 = 90;

/// Builds the mosaic from saved tile files. A no-op for an empty record set.
pub fn render(tiles_dir: &Path, records: &[TileRecord], path: &Path) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }

    let cols = ((records.len().min(MAX_CELLS) as f64).sqrt().floor() as usize).max(1);
    let rows = records.len().div_ceil(cols);
    let mut sheet = RgbImage::from_pixel((cols as u32) * THUMB_SIZE, (rows as u32) * THUMB_SIZE, BACKGROUND);

    for (index, record) in records.iter().enumerate() {
        let tile = image::open(tiles_dir.join(&record.thumbnail))?.to_rgb8();
        let thumb = imageops::resize(&tile, THUMB_SIZE, THUMB_SIZE, FilterType::Lanczos3);
        let cx = ((index % cols) as u32) * THUMB_SIZE;
        let cy = ((index / cols) as u32) * THUMB_SIZE;
        imageops::replace(&mut sheet, &thumb, i64::from(cx), i64::from(cy));
    }

    let file = fs::File::create(path)?;
    let mut out = BufWriter::new(file);
    let encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    sheet.write_with_encoder(encoder)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn save_tile(dir: &Path, name: &str) {
        let tile = RgbImage::from_pixel(40, 40, Rgb([200, 60, 60]));
        tile.save(dir.join(name)).expect("save tile");
    }

    fn record(name: &str) -> TileRecord {
        TileRecord {
            thumbnail: name.to_string(),
            x: 0,
            y: 0,
            tile_w: 40,
            tile_h: 40,
            mean_brightness: 90.0,
            edge_mean: 9.0,
        }
    }

    #[test]
    fn lays_out_thumbnails_on_a_square_grid() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["a.png", "b.png", "c.png", "d.png", "e.png"] {
            save_tile(dir.path(), name);
        }
        let records: Vec<TileRecord> =
            ["a.png", "b.png", "c.png", "d.png", "e.png"].iter().map(|n| record(n)).collect();
        let sheet_path = dir.path().join("contact_sheet.jpg");

        render(dir.path(), &records, &sheet_path).expect("render");

        // floor(sqrt(5)) = 2 columns, ceil(5/2) = 3 rows.
        let sheet = image::open(&sheet_path).expect("reopen").to_rgb8();
        assert_eq!(sheet.dimensions(), (2 * THUMB_SIZE, 3 * THUMB_SIZE));
    }

    #[test]
    fn empty_records_write_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sheet_path = dir.path().join("contact_sheet.jpg");

        render(dir.path(), &[], &sheet_path).expect("render");

        assert!(!sheet_path.exists());
    }
}
