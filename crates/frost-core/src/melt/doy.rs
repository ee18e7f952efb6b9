//! Day-of-year extraction: the last day each pixel is snow-covered.

use chrono::Datelike;
use serde::{Deserialize, Serialize};

use super::backfill::MeltMask;
use super::MeltParams;
use crate::crs::GridGeometry;
use crate::cube::single_year;
use crate::error::Result;

/// Per-pixel day of year on which snow cover ends.
///
/// `data` is row-major over `(x, y)`. NaN marks pixels with no melt day
/// (never snow-covered in the melt window) and serializes as `null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayOfYearRaster {
    pub width: usize,
    pub height: usize,
    pub year: i32,
    #[serde(deserialize_with = "crate::raster::null_as_nan_vec")]
    pub data: Vec<f32>,
    /// Time steps left in the melt window.
    pub n_steps: usize,
    /// Parameters the raster was produced with, when run through the pipeline.
    #[serde(default)]
    pub params: Option<MeltParams>,
    #[serde(default)]
    pub geometry: Option<GridGeometry>,
}

impl DayOfYearRaster {
    /// Melt day at `(x, y)`, `None` where no melt day was detected.
    pub fn get(&self, x: usize, y: usize) -> Option<f32> {
        let v = self.data[y * self.width + x];
        (!v.is_nan()).then_some(v)
    }

    pub fn with_params(mut self, params: MeltParams) -> Self {
        self.params = Some(params);
        self
    }

    /// Number of pixels with a detected melt day.
    pub fn n_valid(&self) -> usize {
        self.data.iter().filter(|v| !v.is_nan()).count()
    }
}

/// Latest day of year at which each pixel's mask is `true`.
///
/// The mask must cover exactly one calendar year.
pub fn max_day_of_year(mask: &MeltMask) -> Result<DayOfYearRaster> {
    let year = single_year(&mask.times)?;
    let n_pix = mask.n_pixels();
    let doys: Vec<f32> = mask.times.iter().map(|t| t.ordinal() as f32).collect();

    let mut data = vec![f32::NAN; n_pix];
    for (p, out) in data.iter_mut().enumerate() {
        // Times increase, so the last true step holds the maximum day.
        if let Some(t) = (0..mask.n_times()).rev().find(|&t| mask.data[t * n_pix + p]) {
            *out = doys[t];
        }
    }

    Ok(DayOfYearRaster {
        width: mask.width,
        height: mask.height,
        year,
        data,
        n_steps: mask.n_times(),
        params: None,
        geometry: mask.geometry.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::tests::ts;
    use crate::error::Error;
    use approx::assert_relative_eq;

    fn mask(times: Vec<chrono::NaiveDateTime>, width: usize, data: Vec<bool>) -> MeltMask {
        MeltMask { width, height: 1, times, data, geometry: None }
    }

    #[test]
    fn takes_last_true_day() {
        let times = vec![ts(2021, 1, 1), ts(2021, 2, 1), ts(2021, 12, 31)];
        // pixel 0: true, true, false; pixel 1: all false; pixel 2: all true
        let data = vec![true, false, true, true, false, true, false, false, true];
        let r = max_day_of_year(&mask(times, 3, data)).unwrap();
        assert_relative_eq!(r.get(0, 0).unwrap(), 32.0);
        assert!(r.get(1, 0).is_none());
        assert_relative_eq!(r.get(2, 0).unwrap(), 365.0);
        assert_eq!(r.year, 2021);
        assert_eq!(r.n_valid(), 2);
    }

    #[test]
    fn leap_year_reaches_366() {
        let r = max_day_of_year(&mask(vec![ts(2020, 12, 31)], 1, vec![true])).unwrap();
        assert_relative_eq!(r.get(0, 0).unwrap(), 366.0);
    }

    #[test]
    fn rejects_multi_year_mask() {
        let times = vec![ts(2020, 12, 31), ts(2021, 1, 1)];
        let err = max_day_of_year(&mask(times, 1, vec![true, true])).unwrap_err();
        assert!(matches!(err, Error::MultipleYears { .. }));
    }

    #[test]
    fn rejects_empty_time_axis() {
        let err = max_day_of_year(&mask(vec![], 1, vec![])).unwrap_err();
        assert!(matches!(err, Error::EmptyTimeAxis));
    }

    #[test]
    fn no_value_serializes_as_null() {
        let r = max_day_of_year(&mask(vec![ts(2021, 3, 1)], 2, vec![true, false])).unwrap();
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains("\"data\":[60.0,null]"), "{json}");
        let back: DayOfYearRaster = serde_json::from_str(&json).unwrap();
        assert!(back.get(1, 0).is_none());
        assert_relative_eq!(back.get(0, 0).unwrap(), 60.0);
    }
}
