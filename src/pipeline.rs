// THEORY:
// The `pipeline` module is the final, top-level API for the entire engine.
// It encapsulates the full stack into a single entry point: configuration in,
// durable artifacts out. Its purpose is to keep the stage wiring in one place
// so that each core module stays a pure stage with explicit inputs.
//
// The configuration is one immutable value handed to each stage. No ambient
// mutable state exists in the core; the only globals are the process
// environment reads done once while building the identification client.

use std::fs;
use std::path::PathBuf;

use crate::core_modules::accumulator::{self, ThumbnailStyle};
use crate::core_modules::identify::VisionClient;
use crate::core_modules::tiler::{self, TilerConfig};
use crate::core_modules::{contact_sheet, overlay, tile_store};
use crate::error::Result;

/// Name of the tile directory under the output directory.
const TILES_DIR: &str = "tiles";
const OVERLAY_NAME: &str = "map_with_grid.jpg";
const CONTACT_SHEET_NAME: &str = "contact_sheet.jpg";

/// Configuration for one scouting run, allowing for tunable behavior.
#[derive(Debug, Clone)]
pub struct ScoutConfig {
    /// Source wall image.
    pub input: PathBuf,
    /// Directory receiving tiles, tables, the overlay, and the log.
    pub outdir: PathBuf,
    pub tiler: TilerConfig,
    /// Raw tile table file name, relative to `outdir`.
    pub raw_csv: String,
    /// Enriched output table file name, relative to `outdir`.
    pub out_csv: String,
    /// Whether to also build the contact sheet.
    pub contact_sheet: bool,
    /// Vision model identifier, recorded in every output row.
    pub model: String,
    /// Instruction sent with each tile.
    pub prompt: String,
    /// Tiles per second sent to the identification service.
    pub rate_limit: f64,
    pub thumbnails: ThumbnailStyle,
}

/// Runs the full pipeline. Returns the path of the enriched output table.
///
/// Only configuration errors and source-image/table I/O errors surface here;
/// per-tile identification failures are absorbed into placeholder rows.
pub async fn run(config: &ScoutConfig) -> Result<PathBuf> {
    fs::create_dir_all(&config.outdir)?;
    let tiles_dir = config.outdir.join(TILES_DIR);

    // Stage 0: Credential check, before any pixel is processed.
    let client = VisionClient::from_env(config.model.clone(), config.prompt.clone())?;

    // Stage 1: Slice the source into salient tiles.
    let img = image::open(&config.input)?.to_rgb8();
    let records = tiler::slice_image(&img, &tiles_dir, &config.tiler)?;
    let raw_csv = config.outdir.join(&config.raw_csv);
    tile_store::write_raw_table(&raw_csv, &records)?;
    tracing::info!(admitted = records.len(), raw_table = %raw_csv.display(), "sliced source image");

    // Stage 2: Human-audit artifacts.
    overlay::render(&img, &records, &config.outdir.join(OVERLAY_NAME))?;
    if config.contact_sheet {
        let sheet_path = config.outdir.join(CONTACT_SHEET_NAME);
        if let Err(error) = contact_sheet::render(&tiles_dir, &records, &sheet_path) {
            tracing::warn!(%error, "contact sheet could not be built");
        }
    }

    // Stage 3: Identify and accumulate, driven by the persisted raw table
    // rather than the in-memory records. The table is the source of truth.
    let records = tile_store::read_raw_table(&raw_csv)?;
    let out_csv = config.outdir.join(&config.out_csv);
    accumulator::accumulate(
        &client,
        &config.model,
        &records,
        &tiles_dir,
        &out_csv,
        &config.thumbnails,
        accumulator::delay_from_rate_limit(config.rate_limit),
    )
    .await?;

    Ok(out_csv)
}
