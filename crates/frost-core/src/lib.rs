//! Forcing and output preparation for a permafrost land-surface model.
//!
//! The centre of the crate is the snow-melt day detection pipeline in
//! [`melt`]. Everything else prepares its inputs (scene compositing, catalog
//! seams, layer post-processing) or reshapes model forcing and outputs.

pub mod crs;
pub mod cube;
pub mod error;
pub mod fetch;
pub mod forcing;
pub mod layers;
pub mod matlab;
pub mod melt;
pub mod outputs;
pub mod parallel;
pub mod raster;
pub mod scene;

pub use cube::ClassificationCube;
pub use error::{Error, Result};
pub use melt::{melt_day, melt_day_by_year, DayOfYearRaster, MeltParams};
