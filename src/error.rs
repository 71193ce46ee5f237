//! Crate error types.

use thiserror::Error;

/// Errors that can terminate a scouting run.
///
/// Per-tile identification failures are deliberately NOT represented here.
/// They are converted into placeholder findings at the identification
/// boundary so the main loop never aborts on a single tile.
#[derive(Debug, Error)]
pub enum ScoutError {
    /// Filesystem error while reading the source image or writing outputs.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The source image could not be decoded, or a tile could not be encoded.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// A tabular read or write failed.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// HTTP transport error while talking to the identification service.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The identification service returned a non-success status code.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code returned by the service.
        status: u16,
        /// Error message or response body.
        message: String,
    },

    /// Required credential is absent from the environment and `.env`.
    #[error("OPENAI_API_KEY missing. Add it to .env")]
    MissingApiKey,
}

pub type Result<T> = std::result::Result<T, ScoutError>;
