//! ERA5 → legacy MATLAB forcing layout.
//!
//! The legacy reader wants `lon × lat (× level) × time` arrays, MATLAB
//! datenums, and most variables stored as scaled 16-bit integers.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::matlab::datenums;

const GRAVITY: f32 = 9.81;
const KELVIN_OFFSET: f32 = 273.15;
const SECONDS_PER_HOUR: f32 = 3600.0;

/// Variables on single levels, shaped `(time, lat, lon)`.
pub const SINGLE_LEVEL_VARS: [&str; 9] = ["u10", "v10", "sp", "d2m", "t2m", "ssrd", "strd", "tisr", "tp"];
/// Variables on pressure levels, shaped `(time, level, lat, lon)`.
pub const PRESSURE_LEVEL_VARS: [&str; 5] = ["t", "z", "q", "u", "v"];
/// Surface geopotential, shaped `(lat, lon)`; downloaded for a single date.
pub const SURFACE_GEOPOTENTIAL: &str = "Zs";

// ── Input ─────────────────────────────────────────────────────────────────────

/// Merged ERA5 single- and pressure-level download.
///
/// Arrays are flattened in C order over `(time, [level,] lat, lon)`; `null`
/// marks no-data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Era5Dataset {
    pub longitude: Vec<f64>,
    pub latitude: Vec<f64>,
    /// Pressure levels in hPa.
    #[serde(default)]
    pub level: Vec<f64>,
    pub time: Vec<NaiveDateTime>,
    pub variables: BTreeMap<String, Vec<Option<f32>>>,
}

impl Era5Dataset {
    fn variable(&self, name: &str, expected: usize) -> Result<Vec<f32>> {
        let raw = self
            .variables
            .get(name)
            .ok_or_else(|| Error::MissingField(name.to_string()))?;
        if raw.len() != expected {
            return Err(Error::ShapeMismatch { expected, actual: raw.len() });
        }
        Ok(raw.iter().map(|v| v.unwrap_or(f32::NAN)).collect())
    }

    fn dims(&self) -> Dims {
        Dims {
            n_time: self.time.len(),
            n_level: self.level.len(),
            n_lat: self.latitude.len(),
            n_lon: self.longitude.len(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Dims {
    n_time: usize,
    n_level: usize,
    n_lat: usize,
    n_lon: usize,
}

impl Dims {
    /// Values per `(lat, lon)` slice.
    fn surface(&self) -> Result<usize> {
        self.n_lat
            .checked_mul(self.n_lon)
            .ok_or(Error::InvalidDimensions { width: self.n_lon, height: self.n_lat })
    }

    fn single(&self) -> Result<usize> {
        self.surface()?
            .checked_mul(self.n_time)
            .ok_or(Error::InvalidDimensions { width: self.n_lon, height: self.n_lat })
    }

    fn pressure(&self) -> Result<usize> {
        self.single()?
            .checked_mul(self.n_level)
            .ok_or(Error::InvalidDimensions { width: self.n_lon, height: self.n_lat })
    }
}

/// `(time, level, lat, lon)` → `(lon, lat, level, time)`. Single-level data
/// passes `n_level = 1`.
fn to_lon_lat_level_time(src: &[f32], d: Dims, n_level: usize) -> Vec<f32> {
    let mut out = vec![0.0; src.len()];
    for t in 0..d.n_time {
        for k in 0..n_level {
            for j in 0..d.n_lat {
                for i in 0..d.n_lon {
                    let from = ((t * n_level + k) * d.n_lat + j) * d.n_lon + i;
                    let to = ((i * d.n_lat + j) * n_level + k) * d.n_time + t;
                    out[to] = src[from];
                }
            }
        }
    }
    out
}

/// `(lat, lon)` → `(lon, lat)`.
fn to_lon_lat(src: &[f32], n_lat: usize, n_lon: usize) -> Vec<f32> {
    let mut out = vec![0.0; src.len()];
    for j in 0..n_lat {
        for i in 0..n_lon {
            out[i * n_lat + j] = src[j * n_lon + i];
        }
    }
    out
}

// ── Output ────────────────────────────────────────────────────────────────────

/// Integer scale factors; stored value = physical value / factor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleFactors {
    pub wind_sf: f32,
    pub q_sf: f32,
    pub ps_sf: f32,
    pub rad_sf: f32,
    #[serde(rename = "T_sf")]
    pub t_sf: f32,
    #[serde(rename = "P_sf")]
    pub p_sf: f32,
}

impl Default for ScaleFactors {
    fn default() -> Self {
        Self { wind_sf: 1e-2, q_sf: 1e-6, ps_sf: 1e2, rad_sf: 1e-1, t_sf: 1e-2, p_sf: 1e-2 }
    }
}

/// Quantize to `i16`: truncation toward zero, saturating, NaN → 0.
pub fn quantize_i16(values: &[f32], scale: f32) -> Vec<i16> {
    values.iter().map(|&v| (v / scale) as i16).collect()
}

/// Quantize to `u16`: truncation toward zero, saturating, NaN → 0.
pub fn quantize_u16(values: &[f32], scale: f32) -> Vec<u16> {
    values.iter().map(|&v| (v / scale) as u16).collect()
}

/// Forcing in the layout the legacy model reader expects.
///
/// Gridded arrays are flattened in C order over `lon × lat (× level) × time`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyForcing {
    pub dims: String,
    /// Column vector `[lat × 1]`.
    pub lat: Vec<f64>,
    /// Column vector `[lon × 1]`.
    pub lon: Vec<f64>,
    /// Pressure levels in Pa, row vector.
    #[serde(rename = "p")]
    pub pressure_levels: Vec<f64>,
    /// MATLAB datenums, row vector.
    #[serde(rename = "t")]
    pub time: Vec<f64>,
    /// Surface geopotential height in m, `lon × lat`.
    #[serde(rename = "Zs")]
    pub surface_height: Vec<f32>,

    pub u10: Vec<i16>,
    pub v10: Vec<i16>,
    pub ps: Vec<u16>,
    #[serde(rename = "Td2")]
    pub td2: Vec<i16>,
    #[serde(rename = "T2")]
    pub t2: Vec<i16>,
    #[serde(rename = "SW")]
    pub sw: Vec<u16>,
    #[serde(rename = "LW")]
    pub lw: Vec<u16>,
    #[serde(rename = "S_TOA")]
    pub s_toa: Vec<u16>,
    #[serde(rename = "P")]
    pub precip: Vec<u16>,

    #[serde(rename = "T")]
    pub temperature: Vec<i16>,
    #[serde(rename = "Z")]
    pub geopotential_height: Vec<i16>,
    pub q: Vec<u16>,
    pub u: Vec<i16>,
    pub v: Vec<i16>,

    #[serde(flatten)]
    pub scale: ScaleFactors,
}

/// Convert a merged ERA5 dataset to the legacy forcing layout.
pub fn era5_to_legacy(ds: &Era5Dataset) -> Result<LegacyForcing> {
    let d = ds.dims();
    let sf = ScaleFactors::default();
    debug!(n_time = d.n_time, n_level = d.n_level, n_lat = d.n_lat, n_lon = d.n_lon, "ERA5 dims");

    let single = |name: &str| -> Result<Vec<f32>> {
        Ok(to_lon_lat_level_time(&ds.variable(name, d.single()?)?, d, 1))
    };
    let pressure = |name: &str| -> Result<Vec<f32>> {
        Ok(to_lon_lat_level_time(&ds.variable(name, d.pressure()?)?, d, d.n_level))
    };
    let map = |mut v: Vec<f32>, f: fn(f32) -> f32| {
        v.iter_mut().for_each(|x| *x = f(*x));
        v
    };

    let zs = ds.variable(SURFACE_GEOPOTENTIAL, d.surface()?)?;
    let surface_height = map(to_lon_lat(&zs, d.n_lat, d.n_lon), |z| z / GRAVITY);

    let td2 = map(single("d2m")?, |k| k - KELVIN_OFFSET);
    let t2 = map(single("t2m")?, |k| k - KELVIN_OFFSET);
    let sw = map(single("ssrd")?, |r| r / SECONDS_PER_HOUR);
    let lw = map(single("strd")?, |r| r / SECONDS_PER_HOUR);
    let s_toa = map(single("tisr")?, |r| r / SECONDS_PER_HOUR);
    let precip = map(single("tp")?, |m| m * 1000.0);

    let temperature = map(pressure("t")?, |k| k - KELVIN_OFFSET);
    let z = map(pressure("z")?, |z| z / GRAVITY);

    let out = LegacyForcing {
        dims: "lon x lat (x pressure_levels) x time".into(),
        lat: ds.latitude.clone(),
        lon: ds.longitude.clone(),
        pressure_levels: ds.level.iter().map(|l| l * 100.0).collect(),
        time: datenums(&ds.time),
        surface_height,
        u10: quantize_i16(&single("u10")?, sf.wind_sf),
        v10: quantize_i16(&single("v10")?, sf.wind_sf),
        ps: quantize_u16(&single("sp")?, sf.ps_sf),
        td2: quantize_i16(&td2, sf.t_sf),
        t2: quantize_i16(&t2, sf.t_sf),
        sw: quantize_u16(&sw, sf.rad_sf),
        lw: quantize_u16(&lw, sf.rad_sf),
        s_toa: quantize_u16(&s_toa, sf.rad_sf),
        precip: quantize_u16(&precip, sf.p_sf),
        temperature: quantize_i16(&temperature, sf.t_sf),
        geopotential_height: quantize_i16(&z, 1.0),
        q: quantize_u16(&pressure("q")?, sf.q_sf),
        u: quantize_i16(&pressure("u")?, sf.wind_sf),
        v: quantize_i16(&pressure("v")?, sf.wind_sf),
        scale: sf,
    };
    info!(n_time = d.n_time, n_level = d.n_level, "ERA5 converted to legacy forcing");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::tests::ts;

    /// 2 times, 1 level, 1 lat, 2 lon; every variable filled with `fill`.
    fn dataset(fill: f32) -> Era5Dataset {
        let mut variables = BTreeMap::new();
        for name in SINGLE_LEVEL_VARS {
            variables.insert(name.to_string(), vec![Some(fill); 4]);
        }
        for name in PRESSURE_LEVEL_VARS {
            variables.insert(name.to_string(), vec![Some(fill); 4]);
        }
        variables.insert(SURFACE_GEOPOTENTIAL.to_string(), vec![Some(9810.0); 2]);
        Era5Dataset {
            longitude: vec![72.0, 72.25],
            latitude: vec![38.5],
            level: vec![500.0],
            time: vec![ts(2020, 1, 1), ts(2020, 1, 2)],
            variables,
        }
    }

    #[test]
    fn quantization_truncates_and_saturates() {
        assert_eq!(quantize_i16(&[-0.015, 1000.0, -1000.0, f32::NAN], 1e-2), vec![-1, 32767, -32768, 0]);
        assert_eq!(quantize_u16(&[-5.0, 1e9, f32::NAN, 2.0], 1.0), vec![0, 65535, 0, 2]);
    }

    #[test]
    fn layout_is_lon_lat_time() {
        let mut ds = dataset(0.0);
        // u10 over (time, lat, lon): t0 = [1, 2], t1 = [3, 4] m/s.
        ds.variables.insert("u10".into(), vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)]);
        let out = era5_to_legacy(&ds).unwrap();
        // lon0: t0, t1 then lon1: t0, t1
        assert_eq!(out.u10, vec![100, 300, 200, 400]);
    }

    #[test]
    fn unit_conversions() {
        let mut ds = dataset(0.0);
        ds.variables.insert("tp".into(), vec![Some(0.002); 4]);
        ds.variables.insert("ssrd".into(), vec![Some(3_600_000.0); 4]);
        ds.variables.insert("t2m".into(), vec![Some(300.0); 4]);
        ds.variables.insert("z".into(), vec![Some(49_050.0); 4]);
        let out = era5_to_legacy(&ds).unwrap();

        // 2 mm / 0.01
        assert!((out.precip[0] as i32 - 200).abs() <= 1, "P = {}", out.precip[0]);
        // 1000 W/m² / 0.1
        assert_eq!(out.sw[0], 10_000);
        // 26.85 °C / 0.01
        assert!((out.t2[0] as i32 - 2685).abs() <= 1, "T2 = {}", out.t2[0]);
        assert!((out.geopotential_height[0] - 5000).abs() <= 1);
        assert!((out.surface_height[0] - 1000.0).abs() < 1e-3);
        assert_eq!(out.pressure_levels, vec![50_000.0]);
        assert_eq!(out.time.len(), 2);
        assert!((out.time[1] - out.time[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn missing_variable_is_named() {
        let mut ds = dataset(0.0);
        ds.variables.remove("strd");
        assert!(matches!(era5_to_legacy(&ds), Err(Error::MissingField(ref n)) if n == "strd"));
    }

    #[test]
    fn wrong_length_rejected() {
        let mut ds = dataset(0.0);
        ds.variables.insert("q".into(), vec![Some(0.0); 3]);
        assert!(matches!(era5_to_legacy(&ds), Err(Error::ShapeMismatch { expected: 4, actual: 3 })));
    }

    #[test]
    fn overflowing_axes_rejected() {
        let big = usize::MAX / 2;
        let d = Dims { n_time: 3, n_level: 1, n_lat: big, n_lon: 3 };
        assert!(matches!(d.surface(), Err(Error::InvalidDimensions { .. })));
        let d = Dims { n_lat: 1, n_lon: big, ..d };
        assert_eq!(d.surface().unwrap(), big);
        assert!(matches!(d.single(), Err(Error::InvalidDimensions { .. })), "time axis pushes past usize");
        let d = Dims { n_time: 1, n_level: 4, ..d };
        assert!(matches!(d.pressure(), Err(Error::InvalidDimensions { .. })));
    }

    #[test]
    fn serializes_legacy_names() {
        let out = era5_to_legacy(&dataset(0.0)).unwrap();
        let json = serde_json::to_value(&out).unwrap();
        for key in ["p", "t", "Zs", "Td2", "T2", "SW", "LW", "S_TOA", "P", "T", "Z", "wind_sf", "T_sf", "P_sf"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }
}
