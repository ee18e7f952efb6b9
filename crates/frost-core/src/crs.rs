//! Target grid: supported projections, resolution and georeferencing.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Metres per degree used for lat/lon resolution conversion.
const METRES_PER_DEGREE: f64 = 111_111.0;

/// Default target projection: UTM 43N (Pamir region).
pub const DEFAULT_EPSG: u32 = 32643;

/// Bounding box in geographic coordinates, ordered west, south, east, north.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BBox {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self { west, south, east, north }
    }

    /// `[west, south, east, north]`, the order catalog APIs expect.
    pub fn to_wsen(self) -> [f64; 4] {
        [self.west, self.south, self.east, self.north]
    }
}

/// North-up affine georeferencing of a row-major grid.
///
/// `(origin_x, origin_y)` is the outer corner of the top-left pixel;
/// rows run southward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridGeometry {
    pub epsg: u32,
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_size: f64,
}

impl GridGeometry {
    /// Projected coordinate of a pixel centre.
    pub fn pixel_center(&self, col: usize, row: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.pixel_size,
            self.origin_y - (row as f64 + 0.5) * self.pixel_size,
        )
    }

    /// Pixel containing a projected coordinate, if it falls within `width × height`.
    pub fn locate(&self, x: f64, y: f64, width: usize, height: usize) -> Option<(usize, usize)> {
        let fc = (x - self.origin_x) / self.pixel_size;
        let fr = (self.origin_y - y) / self.pixel_size;
        if fc < 0.0 || fr < 0.0 {
            return None;
        }
        let (col, row) = (fc.floor() as usize, fr.floor() as usize);
        (col < width && row < height).then_some((col, row))
    }
}

/// Accept UTM north zones (326xx) and WGS84 lat/lon (4326).
pub fn check_epsg(epsg: u32) -> Result<()> {
    let is_utm_north = (32601..=32660).contains(&epsg);
    if is_utm_north || epsg == 4326 {
        Ok(())
    } else {
        Err(Error::UnsupportedEpsg(epsg))
    }
}

/// Convert a resolution in metres to projection units.
///
/// The resolution must be strictly coarser than `min_res` (the collection's
/// native resolution). Lat/lon grids get degrees, projected grids metres.
pub fn res_in_proj_units(res_m: f64, epsg: u32, min_res: f64) -> Result<f64> {
    check_epsg(epsg)?;
    if !(res_m > min_res) {
        return Err(Error::ResolutionTooFine { res_m, min_res });
    }
    Ok(if epsg == 4326 { res_m / METRES_PER_DEGREE } else { res_m })
}
