use geo::{BoundingRect, Centroid, Contains, MultiPolygon, Point};
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, JsonValue};
use rstar::{RTree, AABB};

use crate::error::PipelineError;
use crate::geo_core::{has_finite_coords, Reprojector};
use crate::geometric::facility::Facility;
use crate::geometric::reconcile::{record_error, Reconcile};
use crate::geometric::region::RegionCoded;
use crate::schema::{
    property_string, require_column, resolve_column, ZONE_CODE_CANDIDATES, ZONE_COUNT_CANDIDATES,
    ZONE_NAME_CANDIDATES,
};

/// Property holding the per-zone facility count in persisted collections
pub const FACILITY_COUNT_PROPERTY: &str = "nb_equipements";

/// An IRIS boundary as loaded, geometry still in the source CRS.
/// `geometry` is `None` for missing or non-areal geometries.
#[derive(Debug, Clone, PartialEq)]
pub struct RawZone {
    pub code: String,
    pub name: Option<String>,
    pub geometry: Option<MultiPolygon<f64>>,
    pub facility_count: Option<u64>,
    pub attributes: JsonObject,
}

/// IRIS zone in the target geographic CRS
#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    /// IRIS code (9 characters, starting with the commune code)
    pub code: String,
    pub name: Option<String>,
    pub geometry: MultiPolygon<f64>,
    /// Facilities located in the zone, when known
    pub facility_count: Option<u64>,
    /// Source attributes, unchanged
    pub attributes: JsonObject,
}

impl Zone {
    /// Name for tooltips, falling back to the code
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.code)
    }

    pub fn centroid(&self) -> Option<Point<f64>> {
        self.geometry.centroid()
    }
}

impl RegionCoded for RawZone {
    fn region_code(&self) -> &str {
        &self.code
    }
}

impl Reconcile for RawZone {
    type Output = Zone;

    fn reconcile(self, index: usize, reprojector: &Reprojector) -> Result<Zone, PipelineError> {
        let geometry = match self.geometry {
            Some(geometry) if !geometry.0.is_empty() && has_finite_coords(&geometry) => geometry,
            Some(_) => {
                return Err(PipelineError::InvalidGeometry {
                    index,
                    reason: format!("zone {} has an empty or non-finite geometry", self.code),
                })
            }
            None => {
                return Err(PipelineError::InvalidGeometry {
                    index,
                    reason: format!("zone {} has no polygon geometry", self.code),
                })
            }
        };

        let geometry = reprojector
            .multi_polygon(&geometry)
            .map_err(|e| record_error(index, e))?;
        if !has_finite_coords(&geometry) {
            return Err(PipelineError::InvalidGeometry {
                index,
                reason: format!("zone {} falls outside the source CRS domain", self.code),
            });
        }

        Ok(Zone {
            code: self.code,
            name: self.name,
            geometry,
            facility_count: self.facility_count,
            attributes: self.attributes,
        })
    }
}

/// One `RawZone` per feature, in feature order
pub fn raw_zones_from_features(fc: &FeatureCollection) -> Result<Vec<RawZone>, PipelineError> {
    let code_column = require_column(fc, ZONE_CODE_CANDIDATES, "zone code")?;
    let name_column = resolve_column(fc, ZONE_NAME_CANDIDATES);
    let count_column = resolve_column(fc, ZONE_COUNT_CANDIDATES);
    log::debug!(
        "Zone columns: code={}, name={:?}, count={:?}",
        code_column,
        name_column,
        count_column
    );

    Ok(fc
        .features
        .iter()
        .map(|feature| {
            let attributes = feature.properties.clone().unwrap_or_default();
            RawZone {
                code: property_string(&attributes, code_column).unwrap_or_default(),
                name: name_column.and_then(|c| property_string(&attributes, c)),
                geometry: feature.geometry.as_ref().and_then(to_multi_polygon),
                facility_count: count_column
                    .and_then(|c| attributes.get(c))
                    .and_then(JsonValue::as_u64),
                attributes,
            }
        })
        .collect())
}

/// Polygon and MultiPolygon geometries; anything else is `None`
fn to_multi_polygon(geometry: &Geometry) -> Option<MultiPolygon<f64>> {
    let geometry: geo::Geometry<f64> = geometry.try_into().ok()?;
    match geometry {
        geo::Geometry::Polygon(polygon) => Some(MultiPolygon::new(vec![polygon])),
        geo::Geometry::MultiPolygon(multi_polygon) => Some(multi_polygon),
        _ => None,
    }
}

/// Fill `facility_count` for zones that have none, counting facilities
/// strictly inside each zone (points on a boundary are not counted).
///
/// Returns the number of zones that were counted.
pub fn count_facilities(zones: &mut [Zone], facilities: &[Facility]) -> usize {
    if zones.iter().all(|zone| zone.facility_count.is_some()) {
        return 0;
    }

    let tree: RTree<[f64; 2]> = RTree::bulk_load(
        facilities
            .iter()
            .map(|f| [f.location.x(), f.location.y()])
            .collect(),
    );

    let mut counted = 0;
    for zone in zones.iter_mut().filter(|z| z.facility_count.is_none()) {
        let count = match zone.geometry.bounding_rect() {
            Some(rect) => {
                let envelope =
                    AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);
                tree.locate_in_envelope(&envelope)
                    .filter(|p| zone.geometry.contains(&Point::new(p[0], p[1])))
                    .count() as u64
            }
            None => 0,
        };
        zone.facility_count = Some(count);
        counted += 1;
    }
    log::info!(
        "Counted {} facilities over {} zones",
        facilities.len(),
        counted
    );
    counted
}

/// Mean of the zone centroids, as a map center
pub fn mean_centroid(zones: &[Zone]) -> Option<Point<f64>> {
    let centroids: Vec<Point<f64>> = zones.iter().filter_map(Zone::centroid).collect();
    if centroids.is_empty() {
        return None;
    }
    let n = centroids.len() as f64;
    let (sum_x, sum_y) = centroids
        .iter()
        .fold((0.0, 0.0), |(x, y), p| (x + p.x(), y + p.y()));
    Some(Point::new(sum_x / n, sum_y / n))
}

/// Polygon features with every source attribute plus `nb_equipements` when known
pub fn to_feature_collection(zones: &[Zone]) -> FeatureCollection {
    let features = zones
        .iter()
        .map(|zone| {
            let mut properties = zone.attributes.clone();
            if let Some(count) = zone.facility_count {
                properties.insert(FACILITY_COUNT_PROPERTY.to_string(), JsonValue::from(count));
            }
            Feature {
                bbox: None,
                geometry: Some(Geometry::new(geojson::Value::from(&zone.geometry))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_core::{GeoCore, LAMBERT93_EPSG, WGS84_EPSG};
    use geo::polygon;

    fn square(min_x: f64, min_y: f64, size: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: min_x, y: min_y),
            (x: min_x + size, y: min_y),
            (x: min_x + size, y: min_y + size),
            (x: min_x, y: min_y + size),
            (x: min_x, y: min_y),
        ]])
    }

    fn zone(code: &str, geometry: MultiPolygon<f64>) -> Zone {
        Zone {
            code: code.to_string(),
            name: None,
            geometry,
            facility_count: None,
            attributes: JsonObject::new(),
        }
    }

    fn facility_at(x: f64, y: f64) -> Facility {
        Facility {
            type_code: "D201".to_string(),
            region_code: "69123".to_string(),
            commune: None,
            location: Point::new(x, y),
            category: None,
            attributes: JsonObject::new(),
        }
    }

    fn feature_collection(json: &str) -> FeatureCollection {
        json.parse::<geojson::GeoJson>().unwrap().try_into().unwrap()
    }

    #[test]
    fn test_raw_zones_from_features() {
        let fc = feature_collection(
            r#"{
                "type": "FeatureCollection",
                "features": [
                    {"type": "Feature",
                     "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]},
                     "properties": {"CODE_IRIS": "691230101", "NOM_IRIS": "Bellecour 1", "nb_equipements": 12}},
                    {"type": "Feature", "geometry": null,
                     "properties": {"CODE_IRIS": "691230102"}},
                    {"type": "Feature",
                     "geometry": {"type": "Point", "coordinates": [0.5, 0.5]},
                     "properties": {"CODE_IRIS": 691230103}}
                ]
            }"#,
        );
        let zones = raw_zones_from_features(&fc).unwrap();
        assert_eq!(zones.len(), 3);
        assert_eq!(zones[0].code, "691230101");
        assert_eq!(zones[0].name.as_deref(), Some("Bellecour 1"));
        assert_eq!(zones[0].facility_count, Some(12));
        assert_eq!(zones[0].geometry.as_ref().map(|g| g.0.len()), Some(1));
        assert!(zones[1].geometry.is_none());
        assert_eq!(zones[2].code, "691230103");
        assert!(zones[2].geometry.is_none());

        let reconciled = GeoCore::default().to_geographic(zones, WGS84_EPSG).unwrap();
        assert_eq!(reconciled.records.len(), 1);
        assert_eq!(reconciled.excluded, 2);
    }

    #[test]
    fn test_missing_zone_code_is_schema_mismatch() {
        let fc = feature_collection(
            r#"{"type": "FeatureCollection", "features": [
                {"type": "Feature", "geometry": null, "properties": {"insee_com": "69123"}}
            ]}"#,
        );
        match raw_zones_from_features(&fc) {
            Err(PipelineError::SchemaMismatch { field, available, .. }) => {
                assert_eq!(field, "zone code");
                assert_eq!(available, vec!["insee_com"]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_lambert_zone_is_reprojected() {
        let raw = RawZone {
            code: "691230101".to_string(),
            name: None,
            geometry: Some(square(842_000.0, 6_519_000.0, 500.0)),
            facility_count: None,
            attributes: JsonObject::new(),
        };
        let zones = GeoCore::default()
            .to_geographic(vec![raw], LAMBERT93_EPSG)
            .unwrap()
            .records;
        let centroid = zones[0].centroid().unwrap();
        assert!((centroid.x() - 4.83).abs() < 0.1);
        assert!((centroid.y() - 45.76).abs() < 0.1);
    }

    #[test]
    fn test_count_facilities() {
        let mut zones = vec![
            zone("691230101", square(0.0, 0.0, 10.0)),
            zone("691230102", square(10.0, 0.0, 10.0)),
            Zone {
                facility_count: Some(42),
                ..zone("691230103", square(20.0, 0.0, 10.0))
            },
        ];
        let facilities = vec![
            facility_at(1.0, 1.0),
            facility_at(5.0, 5.0),
            facility_at(15.0, 5.0),
            // on the shared edge, counted by neither zone
            facility_at(10.0, 5.0),
            facility_at(50.0, 50.0),
        ];
        assert_eq!(count_facilities(&mut zones, &facilities), 2);
        assert_eq!(zones[0].facility_count, Some(2));
        assert_eq!(zones[1].facility_count, Some(1));
        assert_eq!(zones[2].facility_count, Some(42));
    }

    #[test]
    fn test_mean_centroid() {
        let zones = vec![
            zone("691230101", square(0.0, 0.0, 2.0)),
            zone("691230102", square(2.0, 0.0, 2.0)),
        ];
        let center = mean_centroid(&zones).unwrap();
        assert!((center.x() - 2.0).abs() < 1e-9);
        assert!((center.y() - 1.0).abs() < 1e-9);
        assert_eq!(mean_centroid(&[]), None);
    }

    #[test]
    fn test_to_feature_collection() {
        let mut counted = zone("691230101", square(4.8, 45.7, 0.01));
        counted.facility_count = Some(3);
        let fc = to_feature_collection(&[counted, zone("691230102", square(4.9, 45.7, 0.01))]);
        assert_eq!(fc.features.len(), 2);
        let properties = fc.features[0].properties.as_ref().unwrap();
        assert_eq!(properties.get(FACILITY_COUNT_PROPERTY), Some(&JsonValue::from(3)));
        assert!(fc.features[1]
            .properties
            .as_ref()
            .unwrap()
            .get(FACILITY_COUNT_PROPERTY)
            .is_none());
    }
}
