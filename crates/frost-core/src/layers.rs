//! Post-processing of fetched geophysical layers: DEM, land cover, albedo,
//! emissivity. Inputs arrive already on the target grid.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::{Error, Result};
use crate::raster::{smooth_box, Grid};

/// MODIS MCD43A3 albedo integer scale factor.
pub const MODIS_ALBEDO_SCALE: f32 = 0.001;

/// Months (June to September) and percentile of the snow-free albedo composite.
pub const MODIS_ALBEDO_MONTHS: std::ops::RangeInclusive<u32> = 6..=9;
pub const MODIS_ALBEDO_PERCENTILE: f64 = 10.0;

/// ASTER GED emissivity integer scale factor.
pub const ASTER_EMISSIVITY_SCALE: f32 = 1.0 / 1000.0;

/// ASTER GED thermal bands 10–14 and their centre wavelengths in µm.
pub const ASTER_BANDS: [u8; 5] = [10, 11, 12, 13, 14];
pub const ASTER_BAND_CENTERS_UM: [f32; 5] = [8.3, 8.65, 9.1, 10.6, 11.3];

fn check_stack(frames: &[Grid]) -> Result<(usize, usize)> {
    let first = frames.first().ok_or(Error::EmptyTimeAxis)?;
    let (w, h) = (first.width, first.height);
    for f in frames {
        if f.width != w || f.height != h {
            return Err(Error::ShapeMismatch { expected: w * h, actual: f.width * f.height });
        }
    }
    Ok((w, h))
}

/// Reduce a stack of grids cell by cell over the valid values.
fn reduce_stack(frames: &[Grid], f: impl Fn(&[f32]) -> f32) -> Result<Grid> {
    let (w, h) = check_stack(frames)?;
    let mut out = Grid::new(w, h, f32::NAN);
    out.geometry = frames[0].geometry.clone();
    let mut valid = Vec::with_capacity(frames.len());
    for i in 0..w * h {
        valid.clear();
        valid.extend(frames.iter().map(|g| g.data[i]).filter(|v| !v.is_nan()));
        if !valid.is_empty() {
            out.data[i] = f(&valid);
        }
    }
    Ok(out)
}

/// Mean over a stack of DEM tiles, then box smoothing.
///
/// Defaults used by the fetch path: `smoothing_iters = 2`, `smoothing_size = 3`.
pub fn dem_from_stack(frames: &[Grid], smoothing_iters: usize, smoothing_size: usize) -> Result<Grid> {
    let mean = reduce_stack(frames, |v| v.iter().sum::<f32>() / v.len() as f32)?;
    info!(tiles = frames.len(), smoothing_iters, smoothing_size, "DEM composited");
    smooth_box(&mean, smoothing_size, smoothing_iters)
}

/// `q`-th percentile of sorted values, linearly interpolated between ranks.
fn percentile_sorted(sorted: &[f32], q: f64) -> f32 {
    let rank = q / 100.0 * (sorted.len() - 1) as f64;
    let (lo, hi) = (rank.floor() as usize, rank.ceil() as usize);
    let frac = (rank - lo as f64) as f32;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Per-pixel `q`-th percentile (0–100) over the valid values of a stack.
pub fn percentile_from_stack(frames: &[Grid], q: f64) -> Result<Grid> {
    if !(0.0..=100.0).contains(&q) {
        return Err(Error::InvalidParameter {
            name: "percentile",
            value: q.to_string(),
            reason: "must lie in [0, 100]".into(),
        });
    }
    reduce_stack(frames, |v| {
        let mut sorted = v.to_vec();
        sorted.sort_by(f32::total_cmp);
        percentile_sorted(&sorted, q)
    })
}

/// Land cover from a stack of tiles: the per-pixel maximum class code.
pub fn land_cover_from_stack(frames: &[Grid]) -> Result<Grid> {
    reduce_stack(frames, |v| v.iter().cloned().fold(f32::NEG_INFINITY, f32::max))
}

/// Land cover class table, used for legends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandCoverClasses {
    pub class_values: Vec<i64>,
    pub class_descriptions: Vec<String>,
    /// `#rrggbb` colours.
    pub class_colors: Vec<String>,
}

impl LandCoverClasses {
    /// Parse a STAC `classification:classes` array.
    ///
    /// Older catalog versions spell keys with dashes (`color-hint`); both
    /// spellings are accepted.
    pub fn from_stac_classes(classes: &Value) -> Result<Self> {
        let entries = classes
            .as_array()
            .ok_or_else(|| Error::MissingField("classification:classes".into()))?;

        let mut out = Self { class_values: vec![], class_descriptions: vec![], class_colors: vec![] };
        for entry in entries {
            let obj = entry
                .as_object()
                .ok_or_else(|| Error::MissingField("classification:classes[]".into()))?;
            let field = |name: &str| {
                obj.iter()
                    .find(|(k, _)| k.replace('-', "_") == name)
                    .map(|(_, v)| v)
                    .ok_or_else(|| Error::MissingField(name.to_string()))
            };
            let value = field("value")?
                .as_i64()
                .ok_or_else(|| Error::MissingField("value".into()))?;
            let description = field("description")?.as_str().unwrap_or_default().to_string();
            let color = field("color_hint")?.as_str().unwrap_or_default();

            out.class_values.push(value);
            out.class_descriptions.push(description);
            out.class_colors.push(format!("#{color}"));
        }
        Ok(out)
    }
}

/// MODIS integer albedo → fraction.
pub fn scale_albedo(raw: &Grid) -> Grid {
    raw.map_valid(|v| v * MODIS_ALBEDO_SCALE)
}

/// Snow-free albedo: the per-pixel 10th percentile of June–September scenes,
/// scaled to a fraction. Scenes from other months are ignored.
pub fn modis_summer_albedo(scenes: &[(NaiveDate, Grid)]) -> Result<Grid> {
    let summer: Vec<Grid> = scenes
        .iter()
        .filter(|(date, _)| MODIS_ALBEDO_MONTHS.contains(&date.month()))
        .map(|(_, g)| g.clone())
        .collect();
    info!(scenes = scenes.len(), summer = summer.len(), "MODIS albedo composite");
    Ok(scale_albedo(&percentile_from_stack(&summer, MODIS_ALBEDO_PERCENTILE)?))
}

/// Emissivity bands with their centre wavelengths, plus the ASTER GED
/// elevation layer when it was fetched alongside.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Emissivity {
    pub bands: Vec<u8>,
    pub band_centers_um: Vec<f32>,
    pub data: Vec<Grid>,
    #[serde(default)]
    pub elevation: Option<Grid>,
}

/// Scale ASTER GED emissivity bands 10–14 and smooth each twice with a 3×3 box.
///
/// `elevation` is passed through unsmoothed; it must share the band grid.
pub fn aster_emissivity(raw_bands: &[Grid; 5], elevation: Option<Grid>) -> Result<Emissivity> {
    let (w, h) = check_stack(raw_bands)?;
    if let Some(e) = &elevation {
        if (e.width, e.height) != (w, h) {
            return Err(Error::ShapeMismatch { expected: w * h, actual: e.width * e.height });
        }
    }
    let data = raw_bands
        .iter()
        .map(|b| smooth_box(&b.map_valid(|v| v * ASTER_EMISSIVITY_SCALE), 3, 2))
        .collect::<Result<Vec<_>>>()?;
    Ok(Emissivity {
        bands: ASTER_BANDS.to_vec(),
        band_centers_um: ASTER_BAND_CENTERS_UM.to_vec(),
        data,
        elevation,
    })
}
