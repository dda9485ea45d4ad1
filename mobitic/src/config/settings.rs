use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::collect::global_variables::{
    BPE_URL, DATA_PATH, FACILITIES_ARTIFACT, FACILITIES_RAW_FILE, IGN_WFS_URL, IRIS_TYPENAME,
    OUTPUT_MAP_FILE, REQUEST_TIMEOUT_SECS, ZONES_ARTIFACT, ZONES_RAW_FILE,
};
use crate::commons::basic_functions::require_exists;
use crate::config::categories::Category;
use crate::geo_core::{BoundingBox, LAMBERT93_EPSG, WGS84_EPSG};

/// Whole-run configuration, loaded once and passed by reference
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub region: RegionConfig,
    pub crs: CrsConfig,
    pub sources: SourcesConfig,
    pub map: MapConfig,
    /// Replaces the built-in taxonomy when non-empty
    pub categories: Vec<Category>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding the normalized artifacts
    pub data_dir: PathBuf,
    /// Downloaded census table (.parquet, .csv or .geojson)
    pub facilities_raw: PathBuf,
    /// Downloaded boundary file (.geojson)
    pub zones_raw: PathBuf,
    /// Rendered HTML map
    pub output_map: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from(DATA_PATH);
        PathsConfig {
            facilities_raw: data_dir.join(FACILITIES_RAW_FILE),
            zones_raw: data_dir.join(ZONES_RAW_FILE),
            data_dir,
            output_map: PathBuf::from(OUTPUT_MAP_FILE),
        }
    }
}

impl PathsConfig {
    /// Normalized facility collection
    pub fn facilities_artifact(&self) -> PathBuf {
        self.data_dir.join(FACILITIES_ARTIFACT)
    }

    /// Normalized, filtered zone collection
    pub fn zones_artifact(&self) -> PathBuf {
        self.data_dir.join(ZONES_ARTIFACT)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    /// Short name of the study area, used in titles and logs
    pub label: String,
    /// Allowed department codes
    pub departments: Vec<String>,
    /// Number of leading characters of an administrative code forming the region prefix
    pub prefix_len: usize,
}

impl Default for RegionConfig {
    fn default() -> Self {
        RegionConfig {
            label: "lyon".to_string(),
            // Rhône / Métropole de Lyon
            departments: vec!["69".to_string()],
            prefix_len: 2,
        }
    }
}

impl RegionConfig {
    pub fn allowed_prefixes(&self) -> BTreeSet<String> {
        self.departments.iter().map(|d| d.trim().to_string()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrsConfig {
    /// CRS of raw planar coordinates and of boundary files that declare none
    pub source_epsg: i32,
    /// CRS of every normalized artifact
    pub target_epsg: i32,
}

impl Default for CrsConfig {
    fn default() -> Self {
        CrsConfig {
            source_epsg: LAMBERT93_EPSG,
            target_epsg: WGS84_EPSG,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub facilities_url: String,
    pub zones: ZoneSource,
    pub timeout_secs: u64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        SourcesConfig {
            facilities_url: BPE_URL.to_string(),
            zones: ZoneSource::default(),
            timeout_secs: REQUEST_TIMEOUT_SECS,
        }
    }
}

/// Where the IRIS boundaries come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ZoneSource {
    /// IGN Géoplateforme WFS GetFeature, paged
    Wfs {
        url: String,
        typename: String,
        /// `[min_lon, min_lat, max_lon, max_lat]`
        bbox: [f64; 4],
        #[serde(default)]
        cql_filter: Option<String>,
        #[serde(default = "default_page_size")]
        page_size: usize,
    },
    /// Zip archive containing one GeoJSON file
    Archive { url: String },
    /// Plain GeoJSON file
    Url { url: String },
}

fn default_page_size() -> usize {
    5000
}

impl Default for ZoneSource {
    fn default() -> Self {
        ZoneSource::Wfs {
            url: IGN_WFS_URL.to_string(),
            typename: IRIS_TYPENAME.to_string(),
            // Département du Rhône
            bbox: [4.24, 45.45, 5.16, 46.31],
            cql_filter: None,
            page_size: default_page_size(),
        }
    }
}

impl ZoneSource {
    pub fn bbox(&self) -> Option<BoundingBox> {
        match self {
            ZoneSource::Wfs { bbox, .. } => Some(BoundingBox::from_array(*bbox)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    pub title: String,
    /// `[lat, lon]`; the mean of zone centroids when unset
    pub center: Option<[f64; 2]>,
    pub zoom: u8,
    /// Markers drawn at most; larger collections are sampled
    pub max_markers: usize,
    /// Color zones by facility count when counts exist
    pub choropleth: bool,
    /// Count facilities per zone when the boundary file carries no count
    pub count_facilities: bool,
    pub tiles_url: String,
    pub tiles_attribution: String,
}

impl Default for MapConfig {
    fn default() -> Self {
        MapConfig {
            title: "Équipements de la région lyonnaise".to_string(),
            center: None,
            zoom: 11,
            max_markers: 5000,
            choropleth: true,
            count_facilities: true,
            tiles_url: "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png".to_string(),
            tiles_attribution: "&copy; OpenStreetMap contributors".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file; missing sections take their defaults
    pub fn load_from_file(path: &Path) -> Result<Self> {
        require_exists(path)?;
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML configuration: {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot select anything
    pub fn validate(&self) -> Result<()> {
        if self.region.prefix_len == 0 {
            anyhow::bail!("region.prefix_len must be at least 1");
        }
        if self.region.departments.is_empty() {
            anyhow::bail!("region.departments must list at least one code");
        }
        if let Some(short) = self
            .region
            .departments
            .iter()
            .find(|d| d.trim().chars().count() != self.region.prefix_len)
        {
            log::warn!(
                "Department code {:?} does not have prefix_len={} characters and will never match",
                short,
                self.region.prefix_len
            );
        }
        if self.crs.target_epsg != WGS84_EPSG {
            anyhow::bail!(
                "crs.target_epsg must be {} (longitude/latitude), got {}",
                WGS84_EPSG,
                self.crs.target_epsg
            );
        }
        if self.map.max_markers == 0 {
            anyhow::bail!("map.max_markers must be at least 1");
        }
        Ok(())
    }
}
