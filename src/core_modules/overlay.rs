//! Full-size annotated audit image: one rectangle and coordinate label per
//! admitted tile, drawn over a copy of the source. Lets a human check at a
//! glance which regions survived admission and where overlaps landed.

use std::env;
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::core_modules::tile_store::TileRecord;
use crate::error::Result;

const RECT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const LABEL_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const LABEL_SCALE: f32 = 20.0;
const LABEL_INSET: i32 = 5;
const JPEG_QUALITY: u8 = 90;

/// Candidate font locations, tried after the `SCOUT_FONT` env override.
const FONT_PATHS: [&str; 4] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Renders the overlay to `path`. Rectangles are always drawn; coordinate
/// labels require a resolvable TrueType font and are skipped (with one
/// warning) when none is found.
pub fn render(img: &RgbImage, records: &[TileRecord], path: &Path) -> Result<()> {
    let mut map = img.clone();
    let font = load_font();
    if font.is_none() {
        tracing::warn!("no TrueType font found; drawing tile rectangles without labels");
    }

    for record in records {
        draw_tile_rect(&mut map, record);
        if let Some(font) = &font {
            draw_text_mut(
                &mut map,
                LABEL_COLOR,
                record.x as i32 + LABEL_INSET,
                record.y as i32 + LABEL_INSET,
                PxScale::from(LABEL_SCALE),
                font,
                &format!("{},{}", record.x, record.y),
            );
        }
    }

    let file = fs::File::create(path)?;
    let mut out = BufWriter::new(file);
    let encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    map.write_with_encoder(encoder)?;
    Ok(())
}

/// Two nested hollow rectangles make a 2-pixel border.
fn draw_tile_rect(map: &mut RgbImage, record: &TileRecord) {
    let outer = Rect::at(record.x as i32, record.y as i32).of_size(record.tile_w, record.tile_h);
    draw_hollow_rect_mut(map, outer, RECT_COLOR);
    if record.tile_w > 2 && record.tile_h > 2 {
        let inner = Rect::at(record.x as i32 + 1, record.y as i32 + 1)
            .of_size(record.tile_w - 2, record.tile_h - 2);
        draw_hollow_rect_mut(map, inner, RECT_COLOR);
    }
}

fn load_font() -> Option<FontVec> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Ok(path) = env::var("SCOUT_FONT") {
        candidates.push(PathBuf::from(path));
    }
    candidates.extend(FONT_PATHS.iter().map(PathBuf::from));

    for path in candidates {
        if let Ok(bytes) = fs::read(&path)
            && let Ok(font) = FontVec::try_from_vec(bytes)
        {
            return Some(font);
        }
    }
    None
}
