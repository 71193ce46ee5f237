// THEORY:
// This file is the main entry point for the `sticker_scout` library crate.
// It follows the standard Rust convention of using `lib.rs` to define the public
// API that will be exposed to external consumers (like the `sticker_scout`
// binary).
//
// The primary goal is to export the `pipeline` module and its configuration
// (`ScoutConfig`, `run`) as the clean, high-level interface for the entire
// tiling-and-identification engine. The internal stages (`core_modules`) are
// re-exported for direct use where a consumer only needs one stage, such as
// slicing without identification.

pub mod core_modules;
pub mod error;
pub mod pipeline;

pub use error::{Result, ScoutError};
