//! Sentinel-2 scene classification: granule compositing and per-year
//! acquisition windows feeding the melt-day pipeline.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::crs::{res_in_proj_units, BBox, DEFAULT_EPSG};
use crate::cube::ClassificationCube;
use crate::error::{Error, Result};
use crate::fetch::{CubeRequest, CubeSource, SearchRequest};
use crate::melt::{melt_day, DayOfYearRaster, MeltParams};

pub const SENTINEL2_COLLECTION: &str = "sentinel-2-l2a";
pub const SCL_ASSET: &str = "SCL";
/// Native SCL resolution in metres; requested grids must be coarser.
pub const SENTINEL2_MIN_RES_M: f64 = 10.0;
/// Cloud-cover ceiling (%) for raw scene fetches.
pub const DEFAULT_MAX_CLOUD_COVER: f64 = 5.0;
/// Cloud-cover ceiling (%) when fetching for melt-day detection.
pub const MELT_MAX_CLOUD_COVER: f64 = 10.0;

// ── Granules ──────────────────────────────────────────────────────────────────

/// One classified granule on the target grid. Code 0 is no-data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Granule {
    pub time: NaiveDateTime,
    pub width: usize,
    pub height: usize,
    /// Row-major class codes.
    pub data: Vec<u8>,
}

/// Merge granules into a time-sorted cube.
///
/// Granules sharing a timestamp are combined with the per-pixel maximum so
/// codes are never averaged; a composite code of 0 becomes missing.
pub fn composite_granules(granules: &[Granule]) -> Result<ClassificationCube> {
    let first = granules.first().ok_or(Error::EmptyTimeAxis)?;
    let (width, height) = (first.width, first.height);
    let n = width.checked_mul(height).ok_or(Error::InvalidDimensions { width, height })?;

    let mut by_time: BTreeMap<NaiveDateTime, Vec<u8>> = BTreeMap::new();
    for g in granules {
        if g.width != width || g.height != height {
            return Err(Error::ShapeMismatch { expected: n, actual: g.width.saturating_mul(g.height) });
        }
        if g.data.len() != n {
            return Err(Error::ShapeMismatch { expected: n, actual: g.data.len() });
        }
        by_time
            .entry(g.time)
            .and_modify(|acc| acc.iter_mut().zip(&g.data).for_each(|(a, &v)| *a = (*a).max(v)))
            .or_insert_with(|| g.data.clone());
    }

    let times: Vec<NaiveDateTime> = by_time.keys().copied().collect();
    let data = by_time
        .into_values()
        .flatten()
        .map(|code| (code > 0).then_some(code))
        .collect();
    info!(granules = granules.len(), steps = times.len(), "granules composited");
    ClassificationCube::new(width, height, times, data)
}

// ── Acquisition windows ───────────────────────────────────────────────────────

/// Sentinel-2 SCL request for one area, replicated per year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneQuery {
    pub bbox: BBox,
    pub epsg: u32,
    pub res_m: f64,
    pub max_cloud_cover: f64,
}

impl SceneQuery {
    /// 30 m in UTM 43N with the raw-fetch cloud ceiling.
    pub fn new(bbox: BBox) -> Self {
        Self { bbox, epsg: DEFAULT_EPSG, res_m: 30.0, max_cloud_cover: DEFAULT_MAX_CLOUD_COVER }
    }

    /// Same area with the melt-detection cloud ceiling.
    pub fn for_melt_detection(mut self) -> Self {
        self.max_cloud_cover = MELT_MAX_CLOUD_COVER;
        self
    }

    /// Acquisition window for `year`: January 1st to November 15th, by which
    /// point the melt season is over.
    pub fn window(year: i32) -> Result<(NaiveDate, NaiveDate)> {
        let date = |m, d| {
            NaiveDate::from_ymd_opt(year, m, d).ok_or_else(|| Error::InvalidParameter {
                name: "year",
                value: year.to_string(),
                reason: "outside the supported calendar range".into(),
            })
        };
        Ok((date(1, 1)?, date(11, 15)?))
    }

    pub fn search_request(&self, year: i32) -> Result<SearchRequest> {
        let (start, end) = Self::window(year)?;
        Ok(SearchRequest::new(SENTINEL2_COLLECTION, self.bbox)
            .with_dates(start, end)
            .with_max_cloud_cover(self.max_cloud_cover))
    }

    pub fn cube_request(&self, year: i32) -> Result<CubeRequest> {
        let (start, end) = Self::window(year)?;
        Ok(CubeRequest {
            collection: SENTINEL2_COLLECTION.into(),
            asset: SCL_ASSET.into(),
            bbox: self.bbox,
            start,
            end,
            epsg: self.epsg,
            resolution: res_in_proj_units(self.res_m, self.epsg, SENTINEL2_MIN_RES_M)?,
            max_cloud_cover: self.max_cloud_cover,
        })
    }
}

/// Melt day of year for each requested year, fetched through `source`.
pub fn snow_melt_doy(
    source: &impl CubeSource,
    query: &SceneQuery,
    years: &[i32],
    params: &MeltParams,
) -> Result<Vec<DayOfYearRaster>> {
    years
        .iter()
        .map(|&year| {
            let run = || -> Result<DayOfYearRaster> {
                let request = query.cube_request(year)?;
                info!(
                    year,
                    resolution = request.resolution,
                    max_cloud_cover = request.max_cloud_cover,
                    "fetching SCL cube"
                );
                let cube = source.classification_cube(&request)?;
                melt_day(&cube, params)
            };
            run().map_err(|e| Error::Year { year, source: Box::new(e) })
        })
        .collect()
}
