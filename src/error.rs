use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the photometry pipeline and its persistence helpers.
#[derive(Error, Debug)]
pub enum PhotometryError {
    #[error("No apertures supplied")]
    NoApertures,

    #[error("Invalid aperture '{name}': {reason}")]
    InvalidAperture { name: String, reason: String },

    #[error("Failed to read image {index} ({})", .path.display())]
    ImageRead {
        index: usize,
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error(
        "Aperture '{aperture}' out of image bounds in {image}: box ({x1}, {y1}) size {size} \
         does not fit {width}x{height}"
    )]
    OutOfBounds {
        image: String,
        aperture: String,
        x1: i64,
        y1: i64,
        size: usize,
        width: usize,
        height: usize,
    },

    #[error("Aperture '{aperture}' has an empty background annulus in {image}")]
    EmptyBackground { image: String, aperture: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session format error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Export error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, PhotometryError>;
