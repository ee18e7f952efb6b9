//! Seams to the data-fetch collaborators: catalog search, cube download,
//! and grid alignment. Network clients live outside this crate and plug in
//! through [`CatalogClient`] and [`CubeSource`].

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use chrono::{NaiveDate, NaiveDateTime};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::crs::BBox;
use crate::cube::ClassificationCube;
use crate::error::{Error, Result};
use crate::raster::Grid;

// ── Catalog ───────────────────────────────────────────────────────────────────

/// Well-known STAC endpoints plus custom ones.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogEndpoint {
    PlanetaryComputer,
    Custom(String),
}

impl CatalogEndpoint {
    /// Full POST `/search` URL.
    pub fn search_url(&self) -> String {
        match self {
            Self::PlanetaryComputer => {
                "https://planetarycomputer.microsoft.com/api/stac/v1/search".to_string()
            }
            Self::Custom(base) => {
                let base = base.trim_end_matches('/');
                if base.ends_with("/search") {
                    base.to_string()
                } else {
                    format!("{base}/search")
                }
            }
        }
    }
}

/// A catalog search for one collection over a bbox and optional date range.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub collection: String,
    pub bbox: BBox,
    pub dates: Option<(NaiveDate, NaiveDate)>,
    /// Property filters in STAC query syntax, e.g. `{"eo:cloud_cover": {"lt": 5}}`.
    pub query: BTreeMap<String, Value>,
}

impl SearchRequest {
    pub fn new(collection: impl Into<String>, bbox: BBox) -> Self {
        Self { collection: collection.into(), bbox, dates: None, query: BTreeMap::new() }
    }

    pub fn with_dates(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.dates = Some((start, end));
        self
    }

    pub fn with_max_cloud_cover(mut self, percent: f64) -> Self {
        self.query.insert("eo:cloud_cover".into(), json!({ "lt": percent }));
        self
    }

    pub fn with_product_version(mut self, key: &str, version: &str) -> Self {
        self.query.insert(key.into(), json!({ "eq": version }));
        self
    }

    /// STAC API search body.
    pub fn to_stac_body(&self) -> Value {
        let mut body = json!({
            "collections": [self.collection],
            "bbox": self.bbox.to_wsen(),
        });
        if let Some((start, end)) = self.dates {
            body["datetime"] = json!(format!("{start}/{end}"));
        }
        if !self.query.is_empty() {
            body["query"] = json!(self.query);
        }
        body
    }
}

/// One catalog item: id, acquisition time, and asset hrefs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    pub datetime: Option<NaiveDateTime>,
    pub assets: BTreeMap<String, String>,
    pub properties: Value,
}

impl CatalogItem {
    /// Build from a STAC feature JSON object.
    pub fn from_stac_feature(feature: &Value) -> Result<Self> {
        let id = feature["id"]
            .as_str()
            .ok_or_else(|| Error::MissingField("id".into()))?
            .to_string();
        let properties = feature["properties"].clone();
        let datetime = properties["datetime"]
            .as_str()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.naive_utc());
        let assets = feature["assets"]
            .as_object()
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v["href"].as_str().map(|h| (k.clone(), h.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self { id, datetime, assets, properties })
    }
}

/// Catalog search, implemented by network clients outside the crate.
pub trait CatalogClient {
    fn search(&self, request: &SearchRequest) -> Result<Vec<CatalogItem>>;
}

// ── Cube source and caching ───────────────────────────────────────────────────

/// A request for a classification cube on a chosen grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CubeRequest {
    pub collection: String,
    pub asset: String,
    pub bbox: BBox,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub epsg: u32,
    /// Resolution in projection units.
    pub resolution: f64,
    pub max_cloud_cover: f64,
}

/// Hashable identity of a [`CubeRequest`]; floats compared bitwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CubeKey {
    collection: String,
    asset: String,
    bbox: [u64; 4],
    start: NaiveDate,
    end: NaiveDate,
    epsg: u32,
    resolution: u64,
    max_cloud_cover: u64,
}

impl From<&CubeRequest> for CubeKey {
    fn from(r: &CubeRequest) -> Self {
        Self {
            collection: r.collection.clone(),
            asset: r.asset.clone(),
            bbox: r.bbox.to_wsen().map(f64::to_bits),
            start: r.start,
            end: r.end,
            epsg: r.epsg,
            resolution: r.resolution.to_bits(),
            max_cloud_cover: r.max_cloud_cover.to_bits(),
        }
    }
}

/// Produces classification cubes already on the requested grid.
pub trait CubeSource {
    fn classification_cube(&self, request: &CubeRequest) -> Result<ClassificationCube>;
}

/// LRU cache in front of a [`CubeSource`], keyed on the full request.
pub struct CachedCubeSource<S> {
    inner: S,
    cache: Mutex<LruCache<CubeKey, ClassificationCube>>,
}

impl<S: CubeSource> CachedCubeSource<S> {
    /// Cache up to `capacity` cubes (at least one).
    pub fn new(inner: S, capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { inner, cache: Mutex::new(LruCache::new(cap)) }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S: CubeSource> CubeSource for CachedCubeSource<S> {
    fn classification_cube(&self, request: &CubeRequest) -> Result<ClassificationCube> {
        let key = CubeKey::from(request);
        if let Some(hit) = self.cache.lock().unwrap_or_else(|e| e.into_inner()).get(&key) {
            debug!(collection = %request.collection, start = %request.start, "cube cache hit");
            return Ok(hit.clone());
        }
        let cube = self.inner.classification_cube(request)?;
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .put(key, cube.clone());
        Ok(cube)
    }
}

// ── Grid alignment ────────────────────────────────────────────────────────────

/// Aligns a raster onto another raster's grid.
pub trait Reprojector {
    fn reproject_match(&self, src: &Grid, target: &Grid) -> Result<Grid>;
}

/// Nearest-neighbour resampling between grids in the same projection.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestNeighbour;

impl Reprojector for NearestNeighbour {
    fn reproject_match(&self, src: &Grid, target: &Grid) -> Result<Grid> {
        let sg = src.geometry.as_ref().ok_or_else(|| Error::MissingField("source geometry".into()))?;
        let tg = target.geometry.as_ref().ok_or_else(|| Error::MissingField("target geometry".into()))?;
        if sg.epsg != tg.epsg {
            // Cross-projection warping belongs to an external service.
            return Err(Error::UnsupportedEpsg(sg.epsg));
        }

        let mut out = Grid::new(target.width, target.height, f32::NAN).with_geometry(tg.clone());
        for row in 0..target.height {
            for col in 0..target.width {
                let (x, y) = tg.pixel_center(col, row);
                if let Some((sc, sr)) = sg.locate(x, y, src.width, src.height) {
                    out.set(row, col, src.get(sr, sc));
                }
            }
        }
        Ok(out)
    }
}
