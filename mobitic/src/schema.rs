//! Column discovery across source files whose exact naming varies between
//! vintages (upper/lower case, renamed fields).

use std::collections::BTreeSet;

use geojson::{FeatureCollection, JsonObject, JsonValue};
use polars::prelude::DataFrame;

use crate::error::PipelineError;

/// Facility type code (BPE `TYPEQU`)
pub const FACILITY_TYPE_CANDIDATES: &[&str] = &["TYPEQU", "typequ"];
/// Administrative code the regional filter reads on facilities
pub const FACILITY_REGION_CANDIDATES: &[&str] = &["DEPCOM", "depcom", "CODGEO", "DEP", "dep"];
/// Commune code shown in marker popups
pub const FACILITY_COMMUNE_CANDIDATES: &[&str] = &["DEPCOM", "depcom", "CODGEO"];
/// Planar Lambert-93 coordinates
pub const FACILITY_X_CANDIDATES: &[&str] = &["LAMBERT_X", "lambert_x", "X"];
pub const FACILITY_Y_CANDIDATES: &[&str] = &["LAMBERT_Y", "lambert_y", "Y"];

/// IRIS zone code
pub const ZONE_CODE_CANDIDATES: &[&str] = &["code_iris", "CODE_IRIS", "IRIS", "DCOMIRIS"];
/// IRIS display name
pub const ZONE_NAME_CANDIDATES: &[&str] = &["nom_iris", "NOM_IRIS", "nom", "libelle", "LIBELLE"];
/// Facility count per zone, when already aggregated upstream
pub const ZONE_COUNT_CANDIDATES: &[&str] = &["nb_equipements"];

/// Anything exposing a set of column names
pub trait ColumnSet {
    fn column_names(&self) -> Vec<String>;

    fn has_column(&self, name: &str) -> bool {
        self.column_names().iter().any(|c| c == name)
    }
}

impl ColumnSet for DataFrame {
    fn column_names(&self) -> Vec<String> {
        self.get_column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect()
    }
}

/// Columns of a feature collection are the union of its property keys.
impl ColumnSet for FeatureCollection {
    fn column_names(&self) -> Vec<String> {
        let names: BTreeSet<&String> = self
            .features
            .iter()
            .filter_map(|feature| feature.properties.as_ref())
            .flat_map(|properties| properties.keys())
            .collect();
        names.into_iter().cloned().collect()
    }
}

impl ColumnSet for [String] {
    fn column_names(&self) -> Vec<String> {
        self.to_vec()
    }
}

/// First candidate present in the dataset, in the caller's priority order
pub fn resolve_column<'a, D>(dataset: &D, candidates: &[&'a str]) -> Option<&'a str>
where
    D: ColumnSet + ?Sized,
{
    let columns = dataset.column_names();
    candidates
        .iter()
        .copied()
        .find(|candidate| columns.iter().any(|c| c == candidate))
}

/// Like `resolve_column` but a missing column is a `SchemaMismatch`
pub fn require_column<'a, D>(
    dataset: &D,
    candidates: &[&'a str],
    field: &str,
) -> Result<&'a str, PipelineError>
where
    D: ColumnSet + ?Sized,
{
    resolve_column(dataset, candidates).ok_or_else(|| PipelineError::SchemaMismatch {
        field: field.to_string(),
        candidates: candidates.iter().map(|c| c.to_string()).collect(),
        available: dataset.column_names(),
    })
}

/// A property read as text; numeric codes (`69123`) are rendered as written
pub fn property_string(properties: &JsonObject, key: &str) -> Option<String> {
    match properties.get(key)? {
        JsonValue::String(s) => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
