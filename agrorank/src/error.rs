//! Error types for agrorank

use thiserror::Error;

/// Errors raised by the pipeline stages, codecs and collaborators.
///
/// Every variant is terminal for the job that produced it: no stage retries
/// or substitutes defaults, the orchestrator reports the message and stops.
#[derive(Error, Debug)]
pub enum Error {
    /// Empty or invalid boundary / grid geometry
    #[error("Geometry error: {0}")]
    Geometry(String),

    /// Raster lacks the bands a formula needs
    #[error("Raster has {available} band(s) but band {required} is required")]
    BandCount { required: usize, available: usize },

    /// Read, write or format failure on a raster
    #[error("Raster I/O error: {0}")]
    RasterIo(String),

    /// Raster and vector spatial references differ and were not reconciled
    #[error("CRS mismatch: raster is {raster}, vector is {vector}")]
    CrsMismatch { raster: String, vector: String },

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<tiff::TiffError> for Error {
    fn from(e: tiff::TiffError) -> Self {
        Error::RasterIo(e.to_string())
    }
}

impl From<geojson::Error> for Error {
    fn from(e: geojson::Error) -> Self {
        Error::Geometry(e.to_string())
    }
}

/// Result type alias for agrorank operations
pub type Result<T> = std::result::Result<T, Error>;
