// THEORY:
// The `accumulator` module drives the per-tile identification loop and treats
// the output table as a log: open, append one tile's rows, flush, close,
// every time. A crash mid-run therefore loses at most the in-flight tile,
// and a rerun can append to the same table (duplicate appends on rerun are
// the caller's concern, deliberately not guarded here).
//
// Key architectural principles:
// 1.  **The raw table is the itinerary**: tiles are processed in raw-table
//     order, read fully into memory up front. Memory is bounded by the
//     admitted-tile count, never by image size.
// 2.  **Failure becomes data**: the identification boundary converts every
//     per-tile failure into a placeholder finding, so this loop contains no
//     failure-handling logic of its own and never aborts on one tile.
// 3.  **Strictly sequential pacing**: one external call in flight, and an
//     inter-tile delay derived from the rate limit, slept only after the
//     tile's writes are complete.

use std::fs::OpenOptions;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use crate::core_modules::identify::{Finding, Identifier};
use crate::core_modules::tile_store::{BASE_FIELDS, TileRecord};
use crate::error::Result;

/// Columns appended to the raw schema by identification.
pub const AI_FIELDS: [&str; 7] = [
    "name",
    "category",
    "notes",
    "confidence",
    "website",
    "model",
    "tile_index",
];

/// How tile thumbnails are rendered into the output table.
#[derive(Debug, Clone)]
pub struct ThumbnailStyle {
    /// Base URL joined with the tile file name; empty keeps the bare name.
    pub base_url: String,
    /// Spreadsheet image display mode.
    pub mode: u32,
    pub width: u32,
    pub height: u32,
}

/// One output row: a tile's fields merged with one finding's fields. A tile
/// with N findings yields N rows sharing the tile fields.
#[derive(Debug, Clone, Serialize)]
struct OutputRow {
    thumbnail: String,
    x: u32,
    y: u32,
    tile_w: u32,
    tile_h: u32,
    mean_brightness: f64,
    edge_mean: f64,
    name: String,
    category: String,
    notes: String,
    confidence: Option<f64>,
    website: String,
    model: String,
    tile_index: usize,
}

impl OutputRow {
    fn merge(record: &TileRecord, finding: &Finding, formula: &str, model: &str, index: usize) -> Self {
        Self {
            thumbnail: formula.to_string(),
            x: record.x,
            y: record.y,
            tile_w: record.tile_w,
            tile_h: record.tile_h,
            mean_brightness: record.mean_brightness,
            edge_mean: record.edge_mean,
            name: finding.name.clone(),
            category: finding.category.clone(),
            notes: finding.notes.clone(),
            confidence: finding.confidence,
            website: finding.website.clone(),
            model: model.to_string(),
            tile_index: index,
        }
    }
}

/// Full output-table header, raw columns first.
pub fn output_fields() -> Vec<&'static str> {
    BASE_FIELDS.iter().chain(AI_FIELDS.iter()).copied().collect()
}

/// Joins a base URL and a file name with exactly one slash between them.
pub fn join_url(base: &str, name: &str) -> String {
    if base.is_empty() {
        return name.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), name.trim_start_matches('/'))
}

/// Spreadsheet-embeddable image reference.
pub fn image_formula(url: &str, mode: u32, width: u32, height: u32) -> String {
    format!("=IMAGE(\"{url}\", {mode}, {width}, {height})")
}

/// Creates the output table with a header only when it does not already
/// exist. An existing table is never truncated, which is what makes
/// append-style reruns possible.
pub fn ensure_output_table(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(output_fields())?;
    writer.flush()?;
    Ok(())
}

fn append_rows(path: &Path, rows: &[OutputRow]) -> Result<()> {
    let file = OpenOptions::new().append(true).create(true).open(path)?;
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Runs the identification loop over `records` in order, appending durable
/// rows per tile. Guarantees at least one row per record.
pub async fn accumulate<I: Identifier>(
    client: &I,
    model: &str,
    records: &[TileRecord],
    tiles_dir: &Path,
    out_csv: &Path,
    style: &ThumbnailStyle,
    inter_tile_delay: Duration,
) -> Result<()> {
    ensure_output_table(out_csv)?;

    let total = records.len();
    for (i, record) in records.iter().enumerate() {
        let tile_path = tiles_dir.join(&record.thumbnail);
        let identification = client.identify(&tile_path).await;

        let raw_url = join_url(&style.base_url, &record.thumbnail);
        let formula = image_formula(&raw_url, style.mode, style.width, style.height);
        let rows: Vec<OutputRow> = identification
            .findings()
            .iter()
            .enumerate()
            .map(|(index, finding)| OutputRow::merge(record, finding, &formula, model, index))
            .collect();
        append_rows(out_csv, &rows)?;

        println!("[{}/{}] {} -> {} item(s)", i + 1, total, record.thumbnail, rows.len());
        tracing::info!(
            index = i + 1,
            total,
            tile = %record.thumbnail,
            findings = rows.len(),
            outcome = identification.label(),
            "tile identified"
        );

        tokio::time::sleep(inter_tile_delay).await;
    }

    Ok(())
}

/// Inter-tile pacing from a tiles-per-time-unit rate limit.
pub fn delay_from_rate_limit(rate_limit: f64) -> Duration {
    Duration::from_secs_f64(1.0 / rate_limit.max(0.001))
}
