//! Classification cube: per-pixel, per-time-step class codes.

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::crs::GridGeometry;
use crate::error::{Error, Result};

/// A `(x, y, time)` cube of small-integer classification codes.
///
/// Storage is time-major then row-major: `index = t * (width * height) + y * width + x`.
/// `None` marks a cell with no observation (no-data, outside the swath, masked).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CubeRecord")]
pub struct ClassificationCube {
    width: usize,
    height: usize,
    times: Vec<NaiveDateTime>,
    data: Vec<Option<u8>>,
    geometry: Option<GridGeometry>,
}

/// Unvalidated wire form of a cube.
#[derive(Deserialize)]
struct CubeRecord {
    width: usize,
    height: usize,
    times: Vec<NaiveDateTime>,
    data: Vec<Option<u8>>,
    #[serde(default)]
    geometry: Option<GridGeometry>,
}

impl TryFrom<CubeRecord> for ClassificationCube {
    type Error = Error;

    fn try_from(r: CubeRecord) -> Result<Self> {
        let cube = Self::new(r.width, r.height, r.times, r.data)?;
        Ok(match r.geometry {
            Some(g) => cube.with_geometry(g),
            None => cube,
        })
    }
}

impl ClassificationCube {
    /// Build a cube, validating the shape and that `times` strictly increases.
    pub fn new(
        width: usize,
        height: usize,
        times: Vec<NaiveDateTime>,
        data: Vec<Option<u8>>,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidDimensions { width, height });
        }
        let expected = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(times.len()))
            .ok_or(Error::InvalidDimensions { width, height })?;
        if data.len() != expected {
            return Err(Error::ShapeMismatch { expected, actual: data.len() });
        }
        if let Some(index) = times.windows(2).position(|w| w[1] <= w[0]) {
            return Err(Error::TimeNotIncreasing { index: index + 1 });
        }
        Ok(Self { width, height, times, data, geometry: None })
    }

    /// Attach georeferencing; carried through to derived rasters untouched.
    pub fn with_geometry(mut self, geometry: GridGeometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Pixels per time step.
    pub fn n_pixels(&self) -> usize {
        self.width * self.height
    }

    pub fn n_times(&self) -> usize {
        self.times.len()
    }

    pub fn times(&self) -> &[NaiveDateTime] {
        &self.times
    }

    pub fn data(&self) -> &[Option<u8>] {
        &self.data
    }

    pub fn geometry(&self) -> Option<&GridGeometry> {
        self.geometry.as_ref()
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, t: usize) -> Option<u8> {
        self.data[t * self.n_pixels() + y * self.width + x]
    }

    /// All pixels of one time step, row-major.
    pub fn frame(&self, t: usize) -> &[Option<u8>] {
        let n = self.n_pixels();
        &self.data[t * n..(t + 1) * n]
    }

    /// Keep time steps `0..=last`.
    pub fn truncate_through(&self, last: usize) -> Self {
        let keep = (last + 1).min(self.n_times());
        Self {
            width: self.width,
            height: self.height,
            times: self.times[..keep].to_vec(),
            data: self.data[..keep * self.n_pixels()].to_vec(),
            geometry: self.geometry.clone(),
        }
    }

    /// Calendar years present on the time axis, ascending.
    pub fn years(&self) -> Vec<i32> {
        years_of(&self.times)
    }

    /// Split into one cube per calendar year, ascending by year.
    pub fn split_by_year(&self) -> Vec<(i32, ClassificationCube)> {
        let n = self.n_pixels();
        self.years()
            .into_iter()
            .map(|year| {
                let mut times = Vec::new();
                let mut data = Vec::new();
                for (t, ts) in self.times.iter().enumerate() {
                    if ts.year() == year {
                        times.push(*ts);
                        data.extend_from_slice(&self.data[t * n..(t + 1) * n]);
                    }
                }
                let cube = Self {
                    width: self.width,
                    height: self.height,
                    times,
                    data,
                    geometry: self.geometry.clone(),
                };
                (year, cube)
            })
            .collect()
    }
}

fn years_of(times: &[NaiveDateTime]) -> Vec<i32> {
    times
        .iter()
        .map(|t| t.year())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// The single calendar year spanned by `times`.
///
/// Fails on an empty axis or when more than one year is present.
pub fn single_year(times: &[NaiveDateTime]) -> Result<i32> {
    match years_of(times).as_slice() {
        [] => Err(Error::EmptyTimeAxis),
        [year] => Ok(*year),
        years => Err(Error::MultipleYears { years: years.to_vec() }),
    }
}
