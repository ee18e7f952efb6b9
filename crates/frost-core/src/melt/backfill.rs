//! Backward gap filling over the melt window.
//!
//! Within the melt-down window snow cover is assumed to be monotonically
//! non-increasing: a pixel seen snow-covered at `t2` is presumed snow-covered
//! at every earlier `t1` in the window, whatever was (or was not) observed there.

use chrono::NaiveDateTime;

use super::snow_mask::{SnowCover, SnowMask};
use crate::crs::GridGeometry;

/// Boolean snow mask with no missing cells.
#[derive(Debug, Clone, PartialEq)]
pub struct MeltMask {
    pub width: usize,
    pub height: usize,
    pub times: Vec<NaiveDateTime>,
    /// Time-major, row-major, length = `width × height × times.len()`.
    pub data: Vec<bool>,
    pub geometry: Option<GridGeometry>,
}

impl MeltMask {
    pub fn n_pixels(&self) -> usize {
        self.width * self.height
    }

    pub fn n_times(&self) -> usize {
        self.times.len()
    }
}

impl From<&MeltMask> for SnowMask {
    fn from(m: &MeltMask) -> Self {
        SnowMask {
            width: m.width,
            height: m.height,
            times: m.times.clone(),
            cells: m
                .data
                .iter()
                .map(|&s| if s { SnowCover::Snow } else { SnowCover::Bare })
                .collect(),
            geometry: m.geometry.clone(),
        }
    }
}

/// Fill each missing cell with the next later observed state of the same pixel.
///
/// Trailing missing cells (no later observation) stay `Missing`.
pub fn backward_fill(mask: &SnowMask) -> SnowMask {
    let n_pix = mask.n_pixels();
    let mut cells = mask.cells.clone();
    for p in 0..n_pix {
        let mut next = SnowCover::Missing;
        for t in (0..mask.n_times()).rev() {
            let cell = &mut cells[t * n_pix + p];
            if *cell == SnowCover::Missing {
                *cell = next;
            } else {
                next = *cell;
            }
        }
    }
    SnowMask { cells, ..mask.clone() }
}

/// Backfill, then mark a cell `true` when snow is present at or after it.
pub fn backfill(mask: &SnowMask) -> MeltMask {
    let filled = backward_fill(mask);
    let n_pix = filled.n_pixels();
    let mut data = vec![false; filled.cells.len()];
    for p in 0..n_pix {
        let mut snow_later = false;
        for t in (0..filled.n_times()).rev() {
            let idx = t * n_pix + p;
            snow_later |= filled.cells[idx].is_snow();
            data[idx] = snow_later;
        }
    }
    MeltMask {
        width: filled.width,
        height: filled.height,
        times: filled.times,
        data,
        geometry: filled.geometry,
    }
}
