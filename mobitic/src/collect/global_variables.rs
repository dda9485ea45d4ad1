/// Default directory of raw downloads and normalized artifacts
pub const DATA_PATH: &str = "data/lyon";

/// Downloaded census table
pub const FACILITIES_RAW_FILE: &str = "bpe.parquet";
/// Downloaded IRIS boundaries
pub const ZONES_RAW_FILE: &str = "iris.geojson";

/// Normalized facilities, one point feature per facility (EPSG:4326)
pub const FACILITIES_ARTIFACT: &str = "bpe_region.geojson";
/// Normalized IRIS zones restricted to the region (EPSG:4326)
pub const ZONES_ARTIFACT: &str = "iris_region.geojson";

pub const OUTPUT_MAP_FILE: &str = "carte_lyon_interactive.html";

/// Base Permanente des Équipements 2024 (INSEE)
pub const BPE_URL: &str = "https://www.insee.fr/fr/statistiques/fichier/8217525/BPE24.parquet";

/// Géoplateforme WFS endpoint
pub const IGN_WFS_URL: &str = "https://data.geopf.fr/wfs/ows";
pub const IRIS_TYPENAME: &str = "STATISTICALUNITS.IRIS:contours_iris";

pub const REQUEST_TIMEOUT_SECS: u64 = 180;

/// Map center `[lat, lon]` when neither the configuration nor the zones give one (Lyon)
pub const DEFAULT_MAP_CENTER: [f64; 2] = [45.764, 4.836];
