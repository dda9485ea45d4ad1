use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Cursor;
use std::path::Path;

use geo::Point;
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, JsonValue};
use polars::prelude::*;

use crate::commons::basic_functions::{decode_text, extension_of, require_exists};
use crate::config::categories::{CategoryTaxonomy, OTHER_CATEGORY};
use crate::error::PipelineError;
use crate::geo_core::Reprojector;
use crate::geometric::reconcile::{record_error, Reconcile};
use crate::geometric::region::RegionCoded;
use crate::schema::{
    property_string, require_column, resolve_column, ColumnSet, FACILITY_COMMUNE_CANDIDATES,
    FACILITY_REGION_CANDIDATES, FACILITY_TYPE_CANDIDATES, FACILITY_X_CANDIDATES,
    FACILITY_Y_CANDIDATES,
};

/// Property holding the derived category in persisted collections
pub const CATEGORY_PROPERTY: &str = "categorie";

/// A census row as loaded, before coordinate reconciliation.
/// `x`/`y` are in the source CRS and absent when the row has no usable position.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFacility {
    /// BPE facility type (`TYPEQU`), e.g. `D201`
    pub type_code: String,
    /// Administrative code read by the regional filter
    pub region_code: String,
    pub commune: Option<String>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    /// Category already assigned upstream (persisted collections)
    pub category: Option<String>,
    /// Every source attribute, unchanged
    pub attributes: JsonObject,
}

/// A facility located in the target geographic CRS
#[derive(Debug, Clone, PartialEq)]
pub struct Facility {
    pub type_code: String,
    pub region_code: String,
    pub commune: Option<String>,
    /// Longitude/latitude
    pub location: Point<f64>,
    /// Assigned by `categorize_all`; only persisted collections carry one in
    pub category: Option<String>,
    pub attributes: JsonObject,
}

impl Facility {
    pub fn category_name(&self) -> &str {
        self.category.as_deref().unwrap_or(OTHER_CATEGORY)
    }
}

impl RegionCoded for RawFacility {
    fn region_code(&self) -> &str {
        &self.region_code
    }
}

impl Reconcile for RawFacility {
    type Output = Facility;

    fn reconcile(self, index: usize, reprojector: &Reprojector) -> Result<Facility, PipelineError> {
        let (x, y) = match (self.x, self.y) {
            (Some(x), Some(y)) if x.is_finite() && y.is_finite() => (x, y),
            (x, y) => {
                return Err(PipelineError::InvalidGeometry {
                    index,
                    reason: format!(
                        "{} in {} has coordinates ({:?}, {:?})",
                        self.type_code, self.region_code, x, y
                    ),
                })
            }
        };

        let location = reprojector
            .point(Point::new(x, y))
            .map_err(|e| record_error(index, e))?;
        if !(location.x().is_finite() && location.y().is_finite()) {
            return Err(PipelineError::InvalidGeometry {
                index,
                reason: format!("({}, {}) is outside the source CRS domain", x, y),
            });
        }

        Ok(Facility {
            type_code: self.type_code,
            region_code: self.region_code,
            commune: self.commune,
            location,
            category: self.category,
            attributes: self.attributes,
        })
    }
}

/// Column names resolved on a census table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FacilityColumns {
    pub type_code: &'static str,
    pub region: &'static str,
    pub commune: Option<&'static str>,
    pub x: &'static str,
    pub y: &'static str,
}

impl FacilityColumns {
    pub fn resolve<D: ColumnSet + ?Sized>(dataset: &D) -> Result<Self, PipelineError> {
        Ok(FacilityColumns {
            type_code: require_column(dataset, FACILITY_TYPE_CANDIDATES, "facility type")?,
            region: require_column(dataset, FACILITY_REGION_CANDIDATES, "facility region code")?,
            commune: resolve_column(dataset, FACILITY_COMMUNE_CANDIDATES),
            x: require_column(dataset, FACILITY_X_CANDIDATES, "planar x")?,
            y: require_column(dataset, FACILITY_Y_CANDIDATES, "planar y")?,
        })
    }
}

/// Read a census table from Parquet or CSV.
///
/// CSV columns are all read as strings so codes such as `01002` keep their
/// leading zeros.
pub fn read_table(path: &Path) -> Result<DataFrame, PipelineError> {
    require_exists(path)?;
    let df = match extension_of(path).as_str() {
        "parquet" => ParquetReader::new(File::open(path)?).finish()?,
        "csv" | "txt" => {
            let bytes = fs::read(path)?;
            let text = decode_text(&bytes).into_owned();
            let separator = sniff_separator(&text);
            CsvReadOptions::default()
                .with_has_header(true)
                .with_infer_schema_length(Some(0))
                .map_parse_options(|options| options.with_separator(separator))
                .into_reader_with_file_handle(Cursor::new(text.into_bytes()))
                .finish()?
        }
        _ => {
            return Err(PipelineError::UnsupportedFormat {
                path: path.to_path_buf(),
            })
        }
    };
    log::info!(
        "Loaded {} rows x {} columns from {}",
        df.height(),
        df.width(),
        path.display()
    );
    Ok(df)
}

/// `;` for INSEE exports, `,` otherwise
fn sniff_separator(text: &str) -> u8 {
    let header = text.lines().next().unwrap_or("");
    [b';', b'\t', b',']
        .into_iter()
        .max_by_key(|&sep| header.bytes().filter(|&b| b == sep).count())
        .filter(|&sep| header.as_bytes().contains(&sep))
        .unwrap_or(b',')
}

/// One `RawFacility` per table row, in row order
pub fn raw_facilities(
    df: &DataFrame,
    columns: &FacilityColumns,
) -> Result<Vec<RawFacility>, PipelineError> {
    let type_codes = string_values(df, columns.type_code)?;
    let region_codes = string_values(df, columns.region)?;
    let communes = match columns.commune {
        Some(name) => string_values(df, name)?,
        None => vec![None; df.height()],
    };
    let xs = string_values(df, columns.x)?;
    let ys = string_values(df, columns.y)?;
    let attributes = row_attributes(df)?;

    Ok(attributes
        .into_iter()
        .enumerate()
        .map(|(i, attributes)| RawFacility {
            type_code: type_codes[i].clone().unwrap_or_default(),
            region_code: region_codes[i].clone().unwrap_or_default(),
            commune: communes[i].clone(),
            x: parse_coordinate(xs[i].as_deref()),
            y: parse_coordinate(ys[i].as_deref()),
            category: None,
            attributes,
        })
        .collect())
}

/// Point features, either a raw GeoJSON census or a persisted collection.
/// Features without a point geometry keep empty coordinates and are dropped
/// by the reconciler.
pub fn raw_facilities_from_features(
    fc: &FeatureCollection,
) -> Result<Vec<RawFacility>, PipelineError> {
    let type_column = require_column(fc, FACILITY_TYPE_CANDIDATES, "facility type")?;
    let region_column = require_column(fc, FACILITY_REGION_CANDIDATES, "facility region code")?;
    let commune_column = resolve_column(fc, FACILITY_COMMUNE_CANDIDATES);

    Ok(fc
        .features
        .iter()
        .map(|feature| {
            let mut attributes = feature.properties.clone().unwrap_or_default();
            let category = attributes
                .remove(CATEGORY_PROPERTY)
                .and_then(|v| v.as_str().map(str::to_string));
            let (x, y) = match feature.geometry.as_ref().map(|g| &g.value) {
                Some(geojson::Value::Point(position)) if position.len() >= 2 => {
                    (Some(position[0]), Some(position[1]))
                }
                _ => (None, None),
            };
            RawFacility {
                type_code: property_string(&attributes, type_column).unwrap_or_default(),
                region_code: property_string(&attributes, region_column).unwrap_or_default(),
                commune: commune_column.and_then(|c| property_string(&attributes, c)),
                x,
                y,
                category,
                attributes,
            }
        })
        .collect())
}

/// Facility categorizer: tag every facility with its category, keeping order
pub fn categorize_all(facilities: Vec<Facility>, taxonomy: &CategoryTaxonomy) -> Vec<Facility> {
    facilities
        .into_iter()
        .map(|mut facility| {
            facility.category = Some(taxonomy.classify(&facility.type_code).to_string());
            facility
        })
        .collect()
}

/// Facilities per category, most frequent first (ties by name)
pub fn category_counts(facilities: &[Facility]) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for facility in facilities {
        *counts.entry(facility.category_name()).or_insert(0) += 1;
    }
    let mut counts: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(name, count)| (name.to_string(), count))
        .collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    counts
}

/// Point features with every source attribute plus `categorie`
pub fn to_feature_collection(facilities: &[Facility]) -> FeatureCollection {
    let features = facilities
        .iter()
        .map(|facility| {
            let mut properties = facility.attributes.clone();
            properties.insert(
                CATEGORY_PROPERTY.to_string(),
                JsonValue::from(facility.category_name()),
            );
            Feature {
                bbox: None,
                geometry: Some(Geometry::new(geojson::Value::from(&facility.location))),
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

fn string_values(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>, PipelineError> {
    let series = df
        .column(name)?
        .as_materialized_series()
        .cast(&DataType::String)?;
    let values = series
        .str()?
        .into_iter()
        .map(|value| value.map(|v| v.trim().to_string()))
        .collect();
    Ok(values)
}

/// Decimal commas appear in some CSV exports
fn parse_coordinate(value: Option<&str>) -> Option<f64> {
    let value = value?.trim();
    if value.is_empty() {
        return None;
    }
    value.replace(',', ".").parse().ok()
}

fn row_attributes(df: &DataFrame) -> Result<Vec<JsonObject>, PipelineError> {
    let mut rows = vec![JsonObject::new(); df.height()];
    for column in df.get_columns() {
        let series = column.as_materialized_series();
        let name = series.name().to_string();
        for (i, row) in rows.iter_mut().enumerate() {
            row.insert(name.clone(), any_value_to_json(series.get(i)?));
        }
    }
    Ok(rows)
}

fn any_value_to_json(value: AnyValue) -> JsonValue {
    match value {
        AnyValue::Null => JsonValue::Null,
        AnyValue::Boolean(v) => JsonValue::from(v),
        AnyValue::String(v) => JsonValue::from(v),
        AnyValue::StringOwned(v) => JsonValue::from(v.as_str()),
        AnyValue::Int32(v) => JsonValue::from(v),
        AnyValue::Int64(v) => JsonValue::from(v),
        AnyValue::UInt32(v) => JsonValue::from(v),
        AnyValue::UInt64(v) => JsonValue::from(v),
        // serde_json maps NaN to null
        AnyValue::Float32(v) => JsonValue::from(v as f64),
        AnyValue::Float64(v) => JsonValue::from(v),
        other => JsonValue::from(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_core::{GeoCore, LAMBERT93_EPSG, WGS84_EPSG};

    fn raw(type_code: &str, x: Option<f64>, y: Option<f64>) -> RawFacility {
        RawFacility {
            type_code: type_code.to_string(),
            region_code: "69123".to_string(),
            commune: Some("69123".to_string()),
            x,
            y,
            category: None,
            attributes: JsonObject::new(),
        }
    }

    #[test]
    fn test_missing_coordinates_are_excluded_before_categorization() {
        let records = vec![
            raw("D201", Some(842_000.0), Some(6_519_000.0)),
            raw("B104", None, Some(6_519_000.0)),
            raw("C108", Some(f64::NAN), Some(6_519_000.0)),
            raw("F101", Some(843_000.0), Some(6_520_000.0)),
        ];
        let reconciled = GeoCore::default()
            .to_geographic(records, LAMBERT93_EPSG)
            .unwrap();
        assert_eq!(reconciled.excluded, 2);

        let facilities = categorize_all(reconciled.records, &CategoryTaxonomy::default());
        let types: Vec<&str> = facilities.iter().map(|f| f.type_code.as_str()).collect();
        assert_eq!(types, vec!["D201", "F101"]);
        for facility in &facilities {
            assert!((4.0..6.0).contains(&facility.location.x()));
            assert!((45.0..46.5).contains(&facility.location.y()));
        }
    }

    #[test]
    fn test_out_of_domain_point_is_excluded() {
        let records = vec![
            raw("D101", Some(4.83), Some(45.76)),
            raw("F101", Some(4.83), Some(1e30)),
        ];
        let reconciled = GeoCore::new(LAMBERT93_EPSG)
            .to_geographic(records, WGS84_EPSG)
            .unwrap();
        assert_eq!(reconciled.excluded, 1);
        assert_eq!(reconciled.records.len(), 1);
        assert_eq!(reconciled.records[0].type_code, "D101");
    }

    #[test]
    fn test_categorize_all_preserves_count_and_order() {
        let records = vec![
            raw("F101", Some(4.8), Some(45.7)),
            raw("Z999", Some(4.9), Some(45.8)),
            raw("D101", Some(4.7), Some(45.6)),
        ];
        let facilities = GeoCore::default()
            .to_geographic(records, WGS84_EPSG)
            .unwrap()
            .records;
        let categorized = categorize_all(facilities, &CategoryTaxonomy::default());
        let categories: Vec<&str> = categorized.iter().map(|f| f.category_name()).collect();
        assert_eq!(categories, vec!["Sports & Loisirs", "Autres", "Santé"]);
        assert_eq!(categorized[0].location, Point::new(4.8, 45.7));
    }

    #[test]
    fn test_category_counts() {
        let records = vec![
            raw("F101", Some(4.8), Some(45.7)),
            raw("D101", Some(4.7), Some(45.6)),
            raw("F102", Some(4.9), Some(45.8)),
        ];
        let facilities = categorize_all(
            GeoCore::default().to_geographic(records, WGS84_EPSG).unwrap().records,
            &CategoryTaxonomy::default(),
        );
        assert_eq!(
            category_counts(&facilities),
            vec![("Sports & Loisirs".to_string(), 2), ("Santé".to_string(), 1)]
        );
    }

    #[test]
    fn test_read_csv_table_keeps_codes_as_strings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bpe.csv");
        // Windows-1252 encoded, `;` separated, decimal commas
        let mut content = b"TYPEQU;DEPCOM;LAMBERT_X;LAMBERT_Y;LIBELLE\n".to_vec();
        content.extend_from_slice(b"D201;69123;842000,5;6519000;Cabinet m\xE9dical\n");
        content.extend_from_slice(b"B104;01002;;;Boulangerie\n");
        fs::write(&path, content).unwrap();

        let df = read_table(&path).unwrap();
        assert_eq!(df.height(), 2);
        let columns = FacilityColumns::resolve(&df).unwrap();
        assert_eq!(columns.region, "DEPCOM");
        assert_eq!(columns.commune, Some("DEPCOM"));

        let records = raw_facilities(&df, &columns).unwrap();
        assert_eq!(records[0].x, Some(842_000.5));
        assert_eq!(records[0].y, Some(6_519_000.0));
        assert_eq!(records[1].region_code, "01002");
        assert_eq!(records[1].x, None);
        assert_eq!(
            records[0].attributes.get("LIBELLE"),
            Some(&JsonValue::from("Cabinet médical"))
        );
    }

    #[test]
    fn test_read_parquet_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bpe.parquet");
        let mut df = df! [
            "TYPEQU" => ["D201", "B104"],
            "DEPCOM" => ["69123", "69266"],
            "LAMBERT_X" => [Some(842_000.0), None],
            "LAMBERT_Y" => [Some(6_519_000.0), Some(6_520_000.0)],
        ]
        .unwrap();
        ParquetWriter::new(File::create(&path).unwrap())
            .finish(&mut df)
            .unwrap();

        let df = read_table(&path).unwrap();
        let columns = FacilityColumns::resolve(&df).unwrap();
        let records = raw_facilities(&df, &columns).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].x, Some(842_000.0));
        assert_eq!(records[1].x, None);
        assert_eq!(
            records[0].attributes.get("LAMBERT_X"),
            Some(&JsonValue::from(842_000.0))
        );
    }

    #[test]
    fn test_read_table_rejects_unknown_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bpe.xlsx");
        fs::write(&path, b"").unwrap();
        assert!(matches!(
            read_table(&path),
            Err(PipelineError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_missing_coordinate_column_is_schema_mismatch() {
        let df = df! [
            "TYPEQU" => ["D201"],
            "DEPCOM" => ["69123"],
        ]
        .unwrap();
        match FacilityColumns::resolve(&df) {
            Err(PipelineError::SchemaMismatch { field, .. }) => assert_eq!(field, "planar x"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_feature_collection_round_trip_keeps_category() {
        let facilities = categorize_all(
            GeoCore::default()
                .to_geographic(
                    vec![RawFacility {
                        attributes: serde_json::from_str(
                            r#"{"TYPEQU": "D201", "DEPCOM": "69123"}"#,
                        )
                        .unwrap(),
                        ..raw("D201", Some(4.83), Some(45.76))
                    }],
                    WGS84_EPSG,
                )
                .unwrap()
                .records,
            &CategoryTaxonomy::default(),
        );
        let fc = to_feature_collection(&facilities);
        let properties = fc.features[0].properties.as_ref().unwrap();
        assert_eq!(properties.get("categorie"), Some(&JsonValue::from("Autres")));

        let reloaded = raw_facilities_from_features(&fc).unwrap();
        assert_eq!(reloaded[0].type_code, "D201");
        assert_eq!(reloaded[0].category.as_deref(), Some("Autres"));
        assert_eq!(reloaded[0].x, Some(4.83));
        assert!(!reloaded[0].attributes.contains_key(CATEGORY_PROPERTY));
    }

    #[test]
    fn test_sniff_separator() {
        assert_eq!(sniff_separator("TYPEQU;DEPCOM\n"), b';');
        assert_eq!(sniff_separator("TYPEQU,DEPCOM\n"), b',');
        assert_eq!(sniff_separator("TYPEQU\n"), b',');
    }
}
