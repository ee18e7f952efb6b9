//! Error types for frost operations.

use thiserror::Error;

/// Main error type for frost operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid grid dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Shape mismatch: expected {expected} values, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Time axis is empty")]
    EmptyTimeAxis,

    #[error("Time axis is not strictly increasing at step {index}")]
    TimeNotIncreasing { index: usize },

    #[error("Only one calendar year is supported, found {years:?}")]
    MultipleYears { years: Vec<i32> },

    #[error("No time step has valid coverage above {threshold} (best fraction {best:.3})")]
    CoverageThresholdNeverMet { threshold: f64, best: f64 },

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Unsupported EPSG code {0}: must be UTM north (326xx) or lat/lon (4326)")]
    UnsupportedEpsg(u32),

    #[error("Resolution {res_m} m is too fine, must be greater than {min_res} m")]
    ResolutionTooFine { res_m: f64, min_res: f64 },

    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("Cannot derive grid cell id from file name {0:?}")]
    BadFileName(String),

    #[error("Grid cells are inconsistent: {0}")]
    InconsistentCells(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("year {year}: {source}")]
    Year {
        year: i32,
        #[source]
        source: Box<Error>,
    },
}

/// Result type alias for frost operations.
pub type Result<T> = std::result::Result<T, Error>;
