//! Reassembly of per-grid-cell model output files.
//!
//! Each output file holds a flat struct of 2D matrices: `depths` (cell
//! elevations per depth layer), `timestamp` (MATLAB datenums) and one
//! `depth × time` matrix per output variable.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::matlab::datenum_to_datetime;
use crate::parallel::map_files;

pub const DEFAULT_DEPTH_RANGE: (f64, f64) = (1.5, -5.0);
pub const DEFAULT_MAX_DEPTH: f64 = 5.0;

const DEPTHS_FIELD: &str = "depths";
const TIMESTAMP_FIELD: &str = "timestamp";

// ── Struct decoding ───────────────────────────────────────────────────────────

/// A 2D numeric matrix, column-major as MATLAB stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl Matrix {
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        let expected = rows
            .checked_mul(cols)
            .ok_or(Error::InvalidDimensions { width: cols, height: rows })?;
        if data.len() != expected {
            return Err(Error::ShapeMismatch { expected, actual: data.len() });
        }
        Ok(Self { rows, cols, data })
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[col * self.rows + row]
    }

    /// Values of a matrix with a singleton dimension, as a vector.
    pub fn squeeze(&self, name: &str) -> Result<Vec<f64>> {
        if self.rows == 1 || self.cols == 1 {
            Ok(self.data.clone())
        } else {
            Err(Error::InvalidParameter {
                name: "matrix",
                value: format!("{name}: {}x{}", self.rows, self.cols),
                reason: "expected a vector".into(),
            })
        }
    }
}

/// Top-level fields of a flat struct.
pub type FlatStruct = BTreeMap<String, Matrix>;

/// Decodes one model output file into its flat struct of matrices.
pub trait StructReader {
    fn read_flat(&self, path: &Path) -> Result<FlatStruct>;
}

/// Reads `{"name": {"rows": r, "cols": c, "data": [...]}, ...}` JSON files.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonStructReader;

impl StructReader for JsonStructReader {
    fn read_flat(&self, path: &Path) -> Result<FlatStruct> {
        let raw: FlatStruct = serde_json::from_str(&fs::read_to_string(path)?)?;
        raw.into_iter()
            .map(|(k, m)| Ok((k, Matrix::new(m.rows, m.cols, m.data)?)))
            .collect()
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Grid-cell id: the second-to-last `_`-separated token of the file stem,
/// e.g. `OUT_cluster_17_2020.mat` → 17.
pub fn gridcell_from_path(path: &Path) -> Result<i64> {
    let bad = || Error::BadFileName(path.display().to_string());
    let stem = path.file_stem().and_then(|s| s.to_str()).ok_or_else(bad)?;
    let tokens: Vec<&str> = stem.split('_').collect();
    if tokens.len() < 2 {
        return Err(bad());
    }
    tokens[tokens.len() - 2].parse().map_err(|_| bad())
}

/// `n` evenly spaced values from `start` to `end` inclusive.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => vec![],
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

fn take_field(data: &mut FlatStruct, name: &str) -> Result<Vec<f64>> {
    data.remove(name)
        .ok_or_else(|| Error::MissingField(name.to_string()))?
        .squeeze(name)
}

fn to_times(datenums: &[f64]) -> Result<Vec<NaiveDateTime>> {
    datenums.iter().map(|&d| datenum_to_datetime(d)).collect()
}

/// Re-lay a `depth × time` matrix as `(time, depth)` `f32`, keeping `n_time` steps.
fn time_by_depth(name: &str, m: &Matrix, n_depth: usize, n_time: usize) -> Result<Vec<f32>> {
    if m.rows != n_depth || m.cols < n_time {
        return Err(Error::InvalidParameter {
            name: "matrix",
            value: format!("{name}: {}x{}", m.rows, m.cols),
            reason: format!("expected {n_depth} depths by at least {n_time} steps"),
        });
    }
    let mut out = Vec::with_capacity(n_time * n_depth);
    for t in 0..n_time {
        out.extend((0..n_depth).map(|d| m.get(d, t) as f32));
    }
    Ok(out)
}

// ── Cluster runs ──────────────────────────────────────────────────────────────

/// One grid cell's output. Variables are row-major `(time, depth)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellOutput {
    pub gridcell: i64,
    pub times: Vec<NaiveDateTime>,
    /// Elevation of each depth layer.
    pub elevation: Vec<f32>,
    pub variables: BTreeMap<String, Vec<f32>>,
}

impl CellOutput {
    pub fn n_depth(&self) -> usize {
        self.elevation.len()
    }
}

/// Read one cluster output file. The final time step is dropped.
pub fn read_cluster_cell(path: &Path, reader: &impl StructReader) -> Result<CellOutput> {
    let gridcell = gridcell_from_path(path)?;
    let mut data = reader.read_flat(path)?;

    let elevation: Vec<f32> = take_field(&mut data, DEPTHS_FIELD)?.into_iter().map(|e| e as f32).collect();
    let mut times = to_times(&take_field(&mut data, TIMESTAMP_FIELD)?)?;
    if times.pop().is_none() {
        return Err(Error::EmptyTimeAxis);
    }

    let n_depth = elevation.len();
    let variables = data
        .iter()
        .map(|(name, m)| Ok((name.clone(), time_by_depth(name, m, n_depth, times.len())?)))
        .collect::<Result<BTreeMap<_, _>>>()?;

    debug!(gridcell, n_time = times.len(), n_depth, n_vars = variables.len(), "read cluster cell");
    Ok(CellOutput { gridcell, times, elevation, variables })
}

/// All grid cells of a cluster run stacked together.
///
/// Variables are row-major `(gridcell, time, depth)`; `elevation` is `(gridcell, depth)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterDataset {
    pub gridcells: Vec<i64>,
    pub times: Vec<NaiveDateTime>,
    pub depth: Vec<f64>,
    pub elevation: Vec<f32>,
    pub variables: BTreeMap<String, Vec<f32>>,
}

impl ClusterDataset {
    /// Value of `var` at `(gridcell index, time index, depth index)`.
    pub fn get(&self, var: &str, cell: usize, t: usize, d: usize) -> Option<f32> {
        let (nt, nd) = (self.times.len(), self.depth.len());
        self.variables.get(var).map(|v| v[(cell * nt + t) * nd + d])
    }
}

fn check_consistent(first: &CellOutput, other: &CellOutput) -> Result<()> {
    let why = if other.times != first.times {
        "time axes differ"
    } else if other.n_depth() != first.n_depth() {
        "depth counts differ"
    } else if !other.variables.keys().eq(first.variables.keys()) {
        "variable names differ"
    } else {
        return Ok(());
    };
    Err(Error::InconsistentCells(format!(
        "gridcell {} vs {}: {why}",
        other.gridcell, first.gridcell
    )))
}

/// Read and stack a set of cluster output files, one per grid cell.
///
/// Files are read in parallel under the `threading` feature. The depth
/// coordinate runs linearly from `depth_range.0` to `depth_range.1`.
pub fn read_cluster_parallel<R>(paths: &[PathBuf], depth_range: (f64, f64), reader: &R) -> Result<ClusterDataset>
where
    R: StructReader + Sync,
{
    let mut cells = map_files(paths, |p| read_cluster_cell(p, reader))?;
    cells.sort_by_key(|c| c.gridcell);
    if let Some(pair) = cells.windows(2).find(|w| w[0].gridcell == w[1].gridcell) {
        return Err(Error::InconsistentCells(format!(
            "gridcell {} appears in more than one file",
            pair[0].gridcell
        )));
    }

    let first = cells
        .first()
        .ok_or_else(|| Error::InconsistentCells("no output files".into()))?;
    for cell in &cells[1..] {
        check_consistent(first, cell)?;
    }

    let mut variables: BTreeMap<String, Vec<f32>> = BTreeMap::new();
    for cell in &cells {
        for (name, values) in &cell.variables {
            variables.entry(name.clone()).or_default().extend_from_slice(values);
        }
    }

    let out = ClusterDataset {
        gridcells: cells.iter().map(|c| c.gridcell).collect(),
        times: first.times.clone(),
        depth: linspace(depth_range.0, depth_range.1, first.n_depth()),
        elevation: cells.iter().flat_map(|c| c.elevation.iter().copied()).collect(),
        variables,
    };
    info!(n_cells = out.gridcells.len(), n_time = out.times.len(), "cluster outputs merged");
    Ok(out)
}

// ── Point runs ────────────────────────────────────────────────────────────────

/// A single-point run. Variables are row-major `(time, depth)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointOutput {
    pub filename: String,
    /// Surface elevation: the layer whose depth is closest to zero.
    pub elevation: f64,
    pub depth: Vec<f64>,
    pub times: Vec<NaiveDateTime>,
    pub variables: BTreeMap<String, Vec<f32>>,
}

/// Read a point-run output file.
///
/// Depths are `elev - min(elev) - max_depth`, so the deepest layer sits at
/// `-max_depth`.
pub fn read_point_file(path: &Path, max_depth: f64, reader: &impl StructReader) -> Result<PointOutput> {
    let mut data = reader.read_flat(path)?;
    let elev = take_field(&mut data, DEPTHS_FIELD)?;
    let times = to_times(&take_field(&mut data, TIMESTAMP_FIELD)?)?;

    let min = elev.iter().copied().fold(f64::INFINITY, f64::min);
    let depth: Vec<f64> = elev.iter().map(|e| e - min - max_depth).collect();
    let surface = depth
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, d)| match best {
            Some((_, b)) if b <= d.abs() => best,
            _ => Some((i, d.abs())),
        })
        .map(|(i, _)| i)
        .ok_or_else(|| Error::MissingField(DEPTHS_FIELD.into()))?;

    let variables = data
        .iter()
        .map(|(name, m)| Ok((name.clone(), time_by_depth(name, m, depth.len(), times.len())?)))
        .collect::<Result<BTreeMap<_, _>>>()?;

    Ok(PointOutput {
        filename: path.display().to_string(),
        elevation: elev[surface],
        depth,
        times,
        variables,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matlab::datetime_to_datenum;
    use crate::cube::tests::ts;
    use approx::assert_relative_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory reader keyed by file name.
    struct MemReader {
        files: BTreeMap<String, FlatStruct>,
        reads: AtomicUsize,
    }

    impl StructReader for MemReader {
        fn read_flat(&self, path: &Path) -> Result<FlatStruct> {
            self.reads.fetch_add(1, Ordering::Relaxed);
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            self.files.get(name).cloned().ok_or_else(|| Error::MissingField(name.into()))
        }
    }

    fn row(values: Vec<f64>) -> Matrix {
        Matrix::new(1, values.len(), values).unwrap()
    }

    /// 2 depths × 3 steps; `T` at (d, t) = base + 10 d + t.
    fn cell_struct(base: f64) -> FlatStruct {
        let mut s = FlatStruct::new();
        s.insert("depths".into(), Matrix::new(2, 1, vec![4000.0, 3999.0]).unwrap());
        let stamps = (1..=3).map(|d| datetime_to_datenum(ts(2020, 1, d))).collect();
        s.insert("timestamp".into(), row(stamps));
        let mut t = vec![];
        for step in 0..3 {
            for d in 0..2 {
                t.push(base + 10.0 * d as f64 + step as f64);
            }
        }
        s.insert("T".into(), Matrix::new(2, 3, t).unwrap());
        s
    }

    fn reader(files: Vec<(&str, FlatStruct)>) -> MemReader {
        MemReader {
            files: files.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            reads: AtomicUsize::new(0),
        }
    }

    #[test]
    fn gridcell_ids() {
        assert_eq!(gridcell_from_path(Path::new("/a_b/OUT_cluster_17_2020.mat")).unwrap(), 17);
        assert!(matches!(gridcell_from_path(Path::new("plain.mat")), Err(Error::BadFileName(_))));
        assert!(gridcell_from_path(Path::new("OUT_x_2020.mat")).is_err());
    }

    #[test]
    fn linspace_endpoints() {
        let d = linspace(1.5, -5.0, 14);
        assert_relative_eq!(d[0], 1.5);
        assert_relative_eq!(d[13], -5.0);
        assert_relative_eq!(d[1] - d[0], -0.5);
        assert_eq!(linspace(1.5, -5.0, 1), vec![1.5]);
    }

    #[test]
    fn cell_drops_last_step_and_transposes() {
        let r = reader(vec![("OUT_c_3_2020.json", cell_struct(0.0))]);
        let cell = read_cluster_cell(Path::new("OUT_c_3_2020.json"), &r).unwrap();
        assert_eq!(cell.gridcell, 3);
        assert_eq!(cell.times, vec![ts(2020, 1, 1), ts(2020, 1, 2)]);
        assert_eq!(cell.elevation, vec![4000.0, 3999.0]);
        // (time, depth): t0 = [0, 10], t1 = [1, 11]
        assert_eq!(cell.variables["T"], vec![0.0, 10.0, 1.0, 11.0]);
    }

    #[test]
    fn missing_timestamp_is_named() {
        let mut s = cell_struct(0.0);
        s.remove("timestamp");
        let r = reader(vec![("OUT_c_3_2020.json", s)]);
        let err = read_cluster_cell(Path::new("OUT_c_3_2020.json"), &r).unwrap_err();
        assert!(matches!(err, Error::MissingField(ref f) if f == "timestamp"));
    }

    #[test]
    fn cluster_sorted_by_gridcell() {
        let r = reader(vec![("OUT_c_9_2020.json", cell_struct(900.0)), ("OUT_c_2_2020.json", cell_struct(200.0))]);
        let paths = vec![PathBuf::from("OUT_c_9_2020.json"), PathBuf::from("OUT_c_2_2020.json")];
        let ds = read_cluster_parallel(&paths, DEFAULT_DEPTH_RANGE, &r).unwrap();
        assert_eq!(ds.gridcells, vec![2, 9]);
        assert_eq!(ds.depth, vec![1.5, -5.0]);
        assert_eq!(ds.get("T", 0, 1, 1), Some(211.0));
        assert_eq!(ds.get("T", 1, 0, 0), Some(900.0));
        assert_eq!(ds.elevation.len(), 4);
        assert_eq!(r.reads.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn cluster_rejects_mismatched_cells() {
        let mut other = cell_struct(0.0);
        other.insert("W".into(), Matrix::new(2, 3, vec![0.0; 6]).unwrap());
        let r = reader(vec![("OUT_c_1_2020.json", cell_struct(0.0)), ("OUT_c_2_2020.json", other)]);
        let paths = vec![PathBuf::from("OUT_c_1_2020.json"), PathBuf::from("OUT_c_2_2020.json")];
        let err = read_cluster_parallel(&paths, DEFAULT_DEPTH_RANGE, &r).unwrap_err();
        assert!(matches!(err, Error::InconsistentCells(_)));
    }

    #[test]
    fn cluster_rejects_duplicate_gridcells() {
        let r = reader(vec![("OUT_a_4_2020.json", cell_struct(0.0)), ("OUT_b_4_2021.json", cell_struct(1.0))]);
        let paths = vec![PathBuf::from("OUT_a_4_2020.json"), PathBuf::from("OUT_b_4_2021.json")];
        match read_cluster_parallel(&paths, DEFAULT_DEPTH_RANGE, &r) {
            Err(Error::InconsistentCells(msg)) => assert!(msg.contains("gridcell 4"), "{msg}"),
            other => panic!("expected a duplicate-cell error, got {other:?}"),
        }
    }

    #[test]
    fn cluster_needs_files() {
        let r = reader(vec![]);
        assert!(matches!(read_cluster_parallel(&[], DEFAULT_DEPTH_RANGE, &r), Err(Error::InconsistentCells(_))));
    }

    #[test]
    fn point_depth_and_surface_elevation() {
        let mut s = cell_struct(0.0);
        // Layers at 4005, 4001, 4000 m: depths 0, -4, -5 with max_depth 5.
        s.insert("depths".into(), Matrix::new(3, 1, vec![4005.0, 4001.0, 4000.0]).unwrap());
        s.insert("T".into(), Matrix::new(3, 3, (0..9).map(f64::from).collect()).unwrap());
        let r = reader(vec![("point.json", s)]);
        let p = read_point_file(Path::new("point.json"), DEFAULT_MAX_DEPTH, &r).unwrap();
        assert_eq!(p.depth, vec![0.0, -4.0, -5.0]);
        assert_relative_eq!(p.elevation, 4005.0);
        assert_eq!(p.times.len(), 3);
        assert_eq!(p.filename, "point.json");
        // column-major 3x3: (d, t) = 3 t + d → t0 = [0, 1, 2]
        assert_eq!(&p.variables["T"][..3], &[0.0, 1.0, 2.0]);
    }

    #[test]
    fn json_reader_validates_shape() {
        let dir = std::env::temp_dir().join(format!("frost_outputs_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let good = dir.join("good.json");
        fs::write(&good, r#"{"depths": {"rows": 2, "cols": 1, "data": [1.0, 2.0]}}"#).unwrap();
        let s = JsonStructReader.read_flat(&good).unwrap();
        assert_eq!(s["depths"].rows, 2);

        let bad = dir.join("bad.json");
        fs::write(&bad, r#"{"depths": {"rows": 2, "cols": 2, "data": [1.0]}}"#).unwrap();
        assert!(matches!(JsonStructReader.read_flat(&bad), Err(Error::ShapeMismatch { .. })));
        fs::remove_dir_all(&dir).ok();
    }
}
