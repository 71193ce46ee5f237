use std::path::PathBuf;

use clap::Parser;

use sticker_scout::core_modules::accumulator::ThumbnailStyle;
use sticker_scout::core_modules::identify::DEFAULT_PROMPT;
use sticker_scout::core_modules::salience::Thresholds;
use sticker_scout::core_modules::tiler::{TileFormat, TilerConfig};
use sticker_scout::pipeline::ScoutConfig;

const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Top-level CLI parser for the `sticker_scout` binary.
#[derive(Debug, Parser)]
#[command(
    name = "sticker_scout",
    version,
    about = "Slice a wall image, identify stickers, and produce CSV plus a map with grid overlay"
)]
pub struct Cli {
    /// Source wall image
    #[arg(long)]
    pub input: PathBuf,

    /// Output directory for tiles, tables, overlay, and log
    #[arg(long, default_value = "scout_out")]
    pub outdir: PathBuf,

    /// Tile width in pixels
    #[arg(long, default_value_t = 300)]
    pub tile_w: u32,

    /// Tile height in pixels
    #[arg(long, default_value_t = 300)]
    pub tile_h: u32,

    /// Horizontal stride; smaller than tile width means overlap
    #[arg(long, default_value_t = 200)]
    pub stride_x: u32,

    /// Vertical stride; smaller than tile height means overlap
    #[arg(long, default_value_t = 200)]
    pub stride_y: u32,

    /// Minimum mean brightness for a tile to be admitted
    #[arg(long, default_value_t = 8.0)]
    pub min_brightness: f64,

    /// Minimum edge-convolution mean for a tile to be admitted
    #[arg(long, default_value_t = 2.0)]
    pub min_edge_mean: f64,

    /// Stop after admitting this many tiles (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    pub max_tiles: usize,

    /// Tile file encoding
    #[arg(long, value_enum, default_value = "jpg")]
    pub format: FormatArg,

    /// JPEG quality for tile files
    #[arg(long, default_value_t = 95)]
    pub quality: u8,

    /// Raw tile table file name (inside outdir)
    #[arg(long, default_value = "tiles.csv")]
    pub raw_csv: String,

    /// Enriched output table file name (inside outdir)
    #[arg(long, default_value = "tiles_identified.csv")]
    pub out_csv: String,

    /// Also build a contact sheet of admitted tiles
    #[arg(long)]
    pub contact_sheet: bool,

    /// Vision model; defaults to $SCOUT_VISION_MODEL, then gpt-4o-mini
    #[arg(long)]
    pub model: Option<String>,

    /// Tiles per second sent to the identification service
    #[arg(long, default_value_t = 1.0)]
    pub rate_limit: f64,

    /// Instruction sent with each tile
    #[arg(long)]
    pub prompt: Option<String>,

    /// Base raw URL for tiles in the output table. Example:
    /// https://raw.githubusercontent.com/.../tiles
    #[arg(long, default_value = "")]
    pub thumbnail_base_url: String,

    /// Spreadsheet image display mode
    #[arg(long, default_value_t = 4)]
    pub image_mode: u32,

    /// Thumbnail display width
    #[arg(long, default_value_t = 100)]
    pub image_width: u32,

    /// Thumbnail display height
    #[arg(long, default_value_t = 100)]
    pub image_height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum FormatArg {
    Jpg,
    Png,
}

impl Cli {
    /// Resolves flags and environment fallbacks into the immutable run
    /// configuration.
    pub fn into_config(self) -> ScoutConfig {
        let format = match self.format {
            FormatArg::Jpg => TileFormat::Jpg { quality: self.quality },
            FormatArg::Png => TileFormat::Png,
        };
        let model = self
            .model
            .or_else(|| std::env::var("SCOUT_VISION_MODEL").ok())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        ScoutConfig {
            input: self.input,
            outdir: self.outdir,
            tiler: TilerConfig {
                tile_w: self.tile_w,
                tile_h: self.tile_h,
                stride_x: self.stride_x,
                stride_y: self.stride_y,
                thresholds: Thresholds {
                    min_brightness: self.min_brightness,
                    min_edge_mean: self.min_edge_mean,
                },
                max_tiles: self.max_tiles,
                format,
            },
            raw_csv: self.raw_csv,
            out_csv: self.out_csv,
            contact_sheet: self.contact_sheet,
            model,
            prompt: self.prompt.unwrap_or_else(|| DEFAULT_PROMPT.to_string()),
            rate_limit: self.rate_limit,
            thumbnails: ThumbnailStyle {
                base_url: self.thumbnail_base_url,
                mode: self.image_mode,
                width: self.image_width,
                height: self.image_height,
            },
        }
    }
}
