//! Snow masking.
//!
//! Class codes become a tri-state per cell: snow, bare, or unobserved.
//! Unobserved cells stay distinct so the backfill stage can fill them.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::crs::GridGeometry;
use crate::cube::ClassificationCube;

/// Sentinel-2 scene classification code for "snow or ice".
pub const SCL_SNOW_ICE: u8 = 11;

/// Per-cell snow state. `Missing` (unobserved) is not the same as `Bare`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnowCover {
    Missing,
    Bare,
    Snow,
}

impl SnowCover {
    #[inline]
    pub fn is_snow(self) -> bool {
        self == SnowCover::Snow
    }
}

/// Tri-state snow mask with the same layout as [`ClassificationCube`].
#[derive(Debug, Clone, PartialEq)]
pub struct SnowMask {
    pub width: usize,
    pub height: usize,
    pub times: Vec<NaiveDateTime>,
    /// Time-major, row-major, length = `width × height × times.len()`.
    pub cells: Vec<SnowCover>,
    pub geometry: Option<GridGeometry>,
}

impl SnowMask {
    pub fn n_pixels(&self) -> usize {
        self.width * self.height
    }

    pub fn n_times(&self) -> usize {
        self.times.len()
    }

    /// Keep time steps `0..=last`.
    pub fn truncate_through(&self, last: usize) -> Self {
        let keep = (last + 1).min(self.n_times());
        Self {
            width: self.width,
            height: self.height,
            times: self.times[..keep].to_vec(),
            cells: self.cells[..keep * self.n_pixels()].to_vec(),
            geometry: self.geometry.clone(),
        }
    }
}

/// Map class codes to snow states: `snow_code` → Snow, any other code → Bare,
/// no observation → Missing.
pub fn build_snow_mask(cube: &ClassificationCube, snow_code: u8) -> SnowMask {
    let cells = cube
        .data()
        .iter()
        .map(|c| match c {
            Some(code) if *code == snow_code => SnowCover::Snow,
            Some(_) => SnowCover::Bare,
            None => SnowCover::Missing,
        })
        .collect();

    SnowMask {
        width: cube.width(),
        height: cube.height(),
        times: cube.times().to_vec(),
        cells,
        geometry: cube.geometry().cloned(),
    }
}
