//! Snow-melt day detection.
//!
//! Turns a single-year classification cube into a per-pixel day of year on
//! which sustained snow cover ends.
//!
//! Pipeline:
//!   coverage trim → snow mask → melt window → backfill → day of year.

pub mod backfill;
pub mod coverage;
pub mod doy;
pub mod melt_window;
pub mod snow_mask;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cube::{single_year, ClassificationCube};
use crate::error::{Error, Result};

pub use backfill::{backfill, MeltMask};
pub use coverage::drop_poor_coverage_at_end;
pub use doy::{max_day_of_year, DayOfYearRaster};
pub use melt_window::isolate_melt_window;
pub use snow_mask::{build_snow_mask, SnowCover, SnowMask, SCL_SNOW_ICE};

/// Tunables of the melt-day pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeltParams {
    /// Class code meaning "snow or ice". Default 11 (Sentinel-2 SCL).
    pub snow_code: u8,
    /// Minimum valid-pixel fraction for the last retained time step. Default 0.9.
    pub coverage_threshold: f64,
    /// Rolling OR window in time steps used to find the melt minimum. Default 10.
    pub smoothing_window: usize,
}

impl Default for MeltParams {
    fn default() -> Self {
        Self {
            snow_code: SCL_SNOW_ICE,
            coverage_threshold: 0.9,
            smoothing_window: 10,
        }
    }
}

impl MeltParams {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.coverage_threshold) {
            return Err(Error::InvalidParameter {
                name: "coverage_threshold",
                value: self.coverage_threshold.to_string(),
                reason: "must lie in [0, 1]".into(),
            });
        }
        if self.smoothing_window == 0 {
            return Err(Error::InvalidParameter {
                name: "smoothing_window",
                value: "0".into(),
                reason: "must be at least one time step".into(),
            });
        }
        Ok(())
    }
}

/// Melt day of year for a single-year cube.
pub fn melt_day(cube: &ClassificationCube, params: &MeltParams) -> Result<DayOfYearRaster> {
    params.validate()?;
    let year = single_year(cube.times())?;

    let trimmed = drop_poor_coverage_at_end(cube, params.coverage_threshold)?;
    let mask = build_snow_mask(&trimmed, params.snow_code);
    let window = isolate_melt_window(&mask, params.smoothing_window)?;
    let filled = backfill(&window);
    let raster = max_day_of_year(&filled)?.with_params(*params);

    info!(
        year,
        steps_in = cube.n_times(),
        steps_trimmed = trimmed.n_times(),
        steps_window = window.n_times(),
        pixels_with_melt_day = raster.n_valid(),
        "snow melt day computed"
    );
    Ok(raster)
}

/// Split a cube by calendar year and compute one melt-day raster per year,
/// ascending by year.
pub fn melt_day_by_year(
    cube: &ClassificationCube,
    params: &MeltParams,
) -> Result<Vec<DayOfYearRaster>> {
    let parts = cube.split_by_year();
    let run = |(year, part): &(i32, ClassificationCube)| {
        melt_day(part, params).map_err(|e| Error::Year { year: *year, source: Box::new(e) })
    };

    #[cfg(feature = "threading")]
    let rasters = {
        use rayon::prelude::*;
        parts.par_iter().map(run).collect::<Result<Vec<_>>>()
    };
    #[cfg(not(feature = "threading"))]
    let rasters = parts.iter().map(run).collect::<Result<Vec<_>>>();

    rasters
}
