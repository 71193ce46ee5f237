// THEORY:
// The `tile_store` module owns the raw tile table, the single source of truth
// between the tiling stage and the identification stage. The contract is
// append-once, then read-only: the tiler writes the header and one row per
// admitted tile in enumeration order, and every downstream consumer re-reads
// the full table as an ordered sequence. Order is significant; it drives
// progress reporting and makes reruns deterministic.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Column schema of the raw tile table, in writing order.
pub const BASE_FIELDS: [&str; 7] = [
    "thumbnail",
    "x",
    "y",
    "tile_w",
    "tile_h",
    "mean_brightness",
    "edge_mean",
];

/// One admitted tile. Identity is the `(x, y)` offset pair, unique per run.
/// Immutable after creation; persisted exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileRecord {
    /// Tile image file name, `{x}_{y}.{ext}`.
    pub thumbnail: String,
    /// Left edge of the tile in source-image pixels.
    pub x: u32,
    /// Top edge of the tile in source-image pixels.
    pub y: u32,
    pub tile_w: u32,
    pub tile_h: u32,
    /// Salience brightness metric, rounded to 3 decimal places.
    pub mean_brightness: f64,
    /// Salience edge metric, rounded to 3 decimal places.
    pub edge_mean: f64,
}

/// Writes the full raw table: header, then rows in the given order.
pub fn write_raw_table(path: &Path, records: &[TileRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    // serialize() only emits the header alongside the first row, so an empty
    // run still needs one explicitly.
    if records.is_empty() {
        writer.write_record(BASE_FIELDS)?;
    }
    writer.flush()?;
    Ok(())
}

/// Re-reads the full table into memory, preserving row order.
pub fn read_raw_table(path: &Path) -> Result<Vec<TileRecord>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut records = Vec::new();
    for row in reader.deserialize() {
        records.push(row?);
    }
    Ok(records)
}
