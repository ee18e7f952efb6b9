use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::crs::GridGeometry;
use crate::error::{Error, Result};

/// Deserialize a JSON array where `null` stands for no-data.
pub(crate) fn null_as_nan_vec<'de, D: serde::Deserializer<'de>>(
    d: D,
) -> std::result::Result<Vec<f32>, D::Error> {
    let v: Vec<Option<f32>> = Vec::deserialize(d)?;
    Ok(v.into_iter().map(|x| x.unwrap_or(f32::NAN)).collect())
}

/// Smoothing applied to a grid, kept for provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Smoothing {
    pub kernel: String,
    pub size: usize,
    pub iterations: usize,
}

/// A 2D `f32` grid, row-major. NaN marks no-data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "GridRecord")]
pub struct Grid {
    pub data: Vec<f32>,
    pub width: usize,
    pub height: usize,
    pub geometry: Option<GridGeometry>,
    pub smoothing: Option<Smoothing>,
}

/// Unvalidated wire form of a grid.
#[derive(Deserialize)]
struct GridRecord {
    #[serde(deserialize_with = "null_as_nan_vec")]
    data: Vec<f32>,
    width: usize,
    height: usize,
    #[serde(default)]
    geometry: Option<GridGeometry>,
    #[serde(default)]
    smoothing: Option<Smoothing>,
}

impl TryFrom<GridRecord> for Grid {
    type Error = Error;

    fn try_from(r: GridRecord) -> Result<Self> {
        let mut grid = Self::from_vec(r.width, r.height, r.data)?;
        grid.geometry = r.geometry;
        grid.smoothing = r.smoothing;
        Ok(grid)
    }
}

impl Grid {
    /// Create a grid filled with the given value.
    pub fn new(width: usize, height: usize, fill: f32) -> Self {
        Self {
            data: vec![fill; width * height],
            width,
            height,
            geometry: None,
            smoothing: None,
        }
    }

    pub fn from_vec(width: usize, height: usize, data: Vec<f32>) -> Result<Self> {
        let expected = width
            .checked_mul(height)
            .ok_or(Error::InvalidDimensions { width, height })?;
        if data.len() != expected {
            return Err(Error::ShapeMismatch { expected, actual: data.len() });
        }
        Ok(Self { data, width, height, geometry: None, smoothing: None })
    }

    pub fn with_geometry(mut self, geometry: GridGeometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: f32) {
        self.data[row * self.width + col] = val;
    }

    /// Apply `f` to every valid cell; NaN stays NaN.
    pub fn map_valid(&self, f: impl Fn(f32) -> f32) -> Self {
        Self {
            data: self.data.iter().map(|&v| if v.is_nan() { v } else { f(v) }).collect(),
            ..self.clone()
        }
    }

    pub fn n_valid(&self) -> usize {
        self.data.iter().filter(|v| !v.is_nan()).count()
    }
}

/// One pass of a centred `k × k` box mean. Only valid neighbours contribute;
/// a cell whose whole window is NaN stays NaN.
fn box_mean_pass(grid: &Grid, k: usize) -> Vec<f32> {
    let (w, h) = (grid.width, grid.height);
    let before = k / 2;
    let after = k - 1 - before;
    let mut out = vec![f32::NAN; w * h];
    for r in 0..h {
        let (r0, r1) = (r.saturating_sub(before), (r + after).min(h - 1));
        for c in 0..w {
            let (c0, c1) = (c.saturating_sub(before), (c + after).min(w - 1));
            let mut sum = 0.0f64;
            let mut n = 0u32;
            for rr in r0..=r1 {
                for &v in &grid.data[rr * w + c0..=rr * w + c1] {
                    if !v.is_nan() {
                        sum += v as f64;
                        n += 1;
                    }
                }
            }
            if n > 0 {
                out[r * w + c] = (sum / n as f64) as f32;
            }
        }
    }
    out
}

/// Box-kernel smoothing repeated `n_iters` times.
///
/// `n_iters == 0` returns the grid unchanged (no provenance recorded).
pub fn smooth_box(grid: &Grid, kernel_size: usize, n_iters: usize) -> Result<Grid> {
    if kernel_size == 0 {
        return Err(Error::InvalidParameter {
            name: "kernel_size",
            value: "0".into(),
            reason: "must be at least one pixel".into(),
        });
    }
    if n_iters == 0 || grid.data.is_empty() {
        return Ok(grid.clone());
    }
    if grid.n_valid() == 0 {
        warn!(width = grid.width, height = grid.height, "smoothing an all-NaN grid");
    }

    let mut out = grid.clone();
    for _ in 0..n_iters {
        out.data = box_mean_pass(&out, kernel_size);
    }
    out.smoothing = Some(Smoothing {
        kernel: "box_kernel".into(),
        size: kernel_size,
        iterations: n_iters,
    });
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn constant_grid_is_fixed_point() {
        let g = Grid::new(5, 4, 7.0);
        let s = smooth_box(&g, 3, 2).unwrap();
        for &v in &s.data {
            assert_relative_eq!(v, 7.0);
        }
        assert_eq!(s.smoothing.as_ref().map(|m| m.iterations), Some(2));
    }

    #[test]
    fn edges_use_clipped_window() {
        // 3×1 row [0, 3, 6]; left edge averages (0, 3), centre all three.
        let g = Grid::from_vec(3, 1, vec![0.0, 3.0, 6.0]).unwrap();
        let s = smooth_box(&g, 3, 1).unwrap();
        assert_relative_eq!(s.get(0, 0), 1.5);
        assert_relative_eq!(s.get(0, 1), 3.0);
        assert_relative_eq!(s.get(0, 2), 4.5);
    }

    #[test]
    fn nan_cells_are_skipped_and_filled() {
        let g = Grid::from_vec(3, 1, vec![2.0, f32::NAN, 4.0]).unwrap();
        let s = smooth_box(&g, 3, 1).unwrap();
        assert_relative_eq!(s.get(0, 1), 3.0);
        assert_relative_eq!(s.get(0, 0), 2.0);
    }

    #[test]
    fn all_nan_window_stays_nan() {
        let g = Grid::from_vec(4, 1, vec![f32::NAN, f32::NAN, f32::NAN, 1.0]).unwrap();
        let s = smooth_box(&g, 3, 1).unwrap();
        assert!(s.get(0, 0).is_nan());
        assert_relative_eq!(s.get(0, 2), 1.0);
    }

    #[test]
    fn deserialize_checks_length() {
        let ok: Grid = serde_json::from_str(r#"{"data":[1.0,null],"width":2,"height":1}"#).unwrap();
        assert!(ok.get(0, 1).is_nan(), "null reads back as no-data");
        assert!(ok.geometry.is_none());

        let short = serde_json::from_str::<Grid>(r#"{"data":[1.0],"width":2,"height":2}"#);
        assert!(short.is_err(), "a short data array must not reach the smoothing kernels");
        let huge = serde_json::from_str::<Grid>(r#"{"data":[],"width":4294967296,"height":4294967296}"#);
        assert!(huge.is_err());
    }

    #[test]
    fn zero_iterations_is_identity() {
        let g = Grid::from_vec(2, 1, vec![1.0, 5.0]).unwrap();
        let s = smooth_box(&g, 3, 0).unwrap();
        assert_eq!(s.data, g.data);
        assert!(s.smoothing.is_none());
    }
}
