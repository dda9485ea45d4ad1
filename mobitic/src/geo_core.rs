use anyhow::{Context, Result};
use geo::{Coord, CoordsIter, MapCoords, MultiPolygon, Point};
use geojson::{FeatureCollection, JsonObject};
use proj::Proj;

use crate::error::PipelineError;
use crate::geometric::reconcile::{Reconcile, Reconciled};

/// Lambert-93, the projected CRS of IGN and INSEE products for mainland France
pub const LAMBERT93_EPSG: i32 = 2154;
/// WGS84 longitude/latitude, the CRS web maps expect
pub const WGS84_EPSG: i32 = 4326;

/// Base struct for CRS handling
/// Holds the target geographic CRS every geometry is reconciled into, and the
/// bounding box of the study area when one is known.
#[derive(Debug, Clone)]
pub struct GeoCore {
    /// Target EPSG code
    pub epsg: i32,
    /// Bounding box of the study area (longitude/latitude)
    pub bbox: Option<BoundingBox>,
}

impl Default for GeoCore {
    /// Default to EPSG:4326 (WGS84)
    fn default() -> Self {
        GeoCore::new(WGS84_EPSG)
    }
}

impl GeoCore {
    /// Create a new GeoCore targeting the given EPSG
    pub fn new(epsg: i32) -> Self {
        GeoCore { epsg, bbox: None }
    }

    /// Get EPSG code
    pub fn get_epsg(&self) -> i32 {
        self.epsg
    }

    /// Set EPSG code
    pub fn set_epsg(&mut self, epsg: i32) {
        self.epsg = epsg;
    }

    /// Get bounding box
    pub fn get_bbox(&self) -> Option<BoundingBox> {
        self.bbox
    }

    /// Set bounding box
    pub fn set_bbox(&mut self, bbox: Option<BoundingBox>) {
        self.bbox = bbox;
    }

    /// Transform coordinates from one CRS to another
    pub fn transform_coords(from_epsg: i32, to_epsg: i32, x: f64, y: f64) -> Result<(f64, f64)> {
        let from_crs = format!("EPSG:{}", from_epsg);
        let to_crs = format!("EPSG:{}", to_epsg);

        let proj = Proj::new_known_crs(&from_crs, &to_crs, None)
            .context("Failed to create Proj transformation")?;

        let result = proj
            .convert((x, y))
            .context("Failed to transform coordinates")?;

        Ok(result)
    }

    /// Transform a Point from one CRS to another
    pub fn transform_point(from_epsg: i32, to_epsg: i32, point: Point<f64>) -> Result<Point<f64>> {
        let (x, y) = Self::transform_coords(from_epsg, to_epsg, point.x(), point.y())?;
        Ok(Point::new(x, y))
    }

    /// Build the transformation from `source_epsg` into this GeoCore's CRS.
    ///
    /// Identical systems give an identity reprojector that never touches PROJ.
    pub fn reprojector(&self, source_epsg: i32) -> Result<Reprojector, PipelineError> {
        Reprojector::new(source_epsg, self.epsg)
    }

    /// Coordinate reconciliation: bring every record into the target CRS.
    ///
    /// Records whose coordinates are missing or non-finite are dropped and
    /// counted; fatal errors (an unusable CRS, a transform PROJ rejects) abort.
    pub fn to_geographic<T: Reconcile>(
        &self,
        records: Vec<T>,
        source_epsg: i32,
    ) -> Result<Reconciled<T::Output>, PipelineError> {
        let reprojector = self.reprojector(source_epsg)?;
        Reconciled::from_records(records, &reprojector)
    }
}

/// A ready-to-use transformation between two EPSG codes
pub struct Reprojector {
    from: i32,
    to: i32,
    proj: Option<Proj>,
}

impl Reprojector {
    pub fn new(from: i32, to: i32) -> Result<Self, PipelineError> {
        if from == to {
            return Ok(Reprojector { from, to, proj: None });
        }
        // new_known_crs normalizes axis order, so geographic output is (lon, lat)
        let proj = Proj::new_known_crs(&format!("EPSG:{}", from), &format!("EPSG:{}", to), None)
            .map_err(|e| PipelineError::ReprojectionFailure {
                from,
                to,
                reason: e.to_string(),
            })?;
        Ok(Reprojector {
            from,
            to,
            proj: Some(proj),
        })
    }

    pub fn source_epsg(&self) -> i32 {
        self.from
    }

    pub fn target_epsg(&self) -> i32 {
        self.to
    }

    pub fn is_identity(&self) -> bool {
        self.proj.is_none()
    }

    /// Transform one coordinate
    pub fn coord(&self, coord: Coord<f64>) -> Result<Coord<f64>, PipelineError> {
        let Some(proj) = &self.proj else {
            return Ok(coord);
        };
        let (x, y) = proj
            .convert((coord.x, coord.y))
            .map_err(|e| PipelineError::ReprojectionFailure {
                from: self.from,
                to: self.to,
                reason: e.to_string(),
            })?;
        Ok(Coord { x, y })
    }

    pub fn point(&self, point: Point<f64>) -> Result<Point<f64>, PipelineError> {
        self.coord(point.0).map(Point::from)
    }

    /// Transform every vertex; the ring structure is left untouched.
    pub fn multi_polygon(
        &self,
        geometry: &MultiPolygon<f64>,
    ) -> Result<MultiPolygon<f64>, PipelineError> {
        if self.is_identity() {
            return Ok(geometry.clone());
        }
        geometry.try_map_coords(|c| self.coord(c))
    }
}

/// `true` when every coordinate of the geometry is a finite number
pub fn has_finite_coords<G>(geometry: &G) -> bool
where
    G: CoordsIter<Scalar = f64>,
{
    geometry
        .coords_iter()
        .all(|c| c.x.is_finite() && c.y.is_finite())
}

/// Parse an EPSG code out of the CRS names found in the wild.
///
/// Accepts `EPSG:2154`, `urn:ogc:def:crs:EPSG::2154`,
/// `http://www.opengis.net/def/crs/EPSG/0/2154` and the CRS84 aliases.
pub fn epsg_from_crs_name(name: &str) -> Option<i32> {
    let name = name.trim();
    let upper = name.to_ascii_uppercase();
    if upper.ends_with("CRS84") || upper.ends_with("CRS:84") {
        return Some(WGS84_EPSG);
    }
    if !upper.contains("EPSG") {
        return None;
    }
    name.rsplit(|c| c == ':' || c == '/')
        .find(|part| !part.is_empty())
        .and_then(|code| code.parse().ok())
}

/// EPSG code declared by a GeoJSON legacy `crs` member, if any
/// (`{"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::2154"}}`).
pub fn declared_epsg(foreign_members: Option<&JsonObject>) -> Option<i32> {
    let crs = foreign_members?.get("crs")?;
    let name = crs.get("properties")?.get("name")?.as_str()?;
    epsg_from_crs_name(name)
}

/// CRS of a feature collection: its declared `crs` member, else `hint`
pub fn collection_epsg(fc: &FeatureCollection, hint: i32) -> i32 {
    match declared_epsg(fc.foreign_members.as_ref()) {
        Some(epsg) => {
            if epsg != hint {
                log::info!("Collection declares EPSG:{}, overriding EPSG:{}", epsg, hint);
            }
            epsg
        }
        None => hint,
    }
}

/// Bounding box structure
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BoundingBox {
    pub min_x: f64, // min longitude
    pub min_y: f64, // min latitude
    pub max_x: f64, // max longitude
    pub max_y: f64, // max latitude
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        BoundingBox {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Build from a `[min_x, min_y, max_x, max_y]` array
    pub fn from_array(values: [f64; 4]) -> Self {
        BoundingBox::new(values[0], values[1], values[2], values[3])
    }
}
