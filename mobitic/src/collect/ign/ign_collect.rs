use std::path::Path;

use anyhow::{Context, Result};
use geojson::{FeatureCollection, GeoJson, JsonObject};
use reqwest::blocking::Client;
use url::Url;

use crate::commons::basic_functions::{persist, stage_file};
use crate::geo_core::{BoundingBox, GeoCore};

/// Pages fetched at most, whatever the page size
const MAX_PAGES: usize = 200;

/// IGN Géoplateforme WFS 2.0 client for one feature type (IRIS contours).
///
/// Features are requested in `geo_core`'s CRS and merged page by page into a
/// single collection.
pub struct IgnCollect {
    client: Client,
    /// Service endpoint, e.g. `https://data.geopf.fr/wfs/ows`
    pub url: String,
    /// WFS type name, e.g. `STATISTICALUNITS.IRIS:contours_iris`
    pub typename: String,
    /// Longitude/latitude extent of the request
    pub bbox: Option<BoundingBox>,
    /// ECQL filter; replaces the bbox when set (the service rejects both)
    pub cql_filter: Option<String>,
    pub page_size: usize,
    /// CRS the features are requested in
    pub geo_core: GeoCore,
}

impl IgnCollect {
    pub fn new(client: Client, url: &str, typename: &str) -> Self {
        IgnCollect {
            client,
            url: url.to_string(),
            typename: typename.to_string(),
            bbox: None,
            cql_filter: None,
            page_size: 5000,
            geo_core: GeoCore::default(),
        }
    }

    /// Set bounding box from coordinates
    pub fn set_bbox(&mut self, min_x: f64, min_y: f64, max_x: f64, max_y: f64) {
        self.bbox = Some(BoundingBox::new(min_x, min_y, max_x, max_y));
    }

    pub fn set_cql_filter(&mut self, cql_filter: Option<String>) {
        self.cql_filter = cql_filter;
    }

    /// GetFeature URL for the page starting at `start_index`
    pub fn request_url(&self, start_index: usize) -> Result<Url> {
        let base = self.url.split('?').next().unwrap_or(&self.url);
        let mut request_url = format!(
            "{}?SERVICE=WFS&VERSION=2.0.0&REQUEST=GetFeature&TYPENAMES={}&OUTPUTFORMAT=application/json&SRSNAME=EPSG:{}",
            base,
            urlencoding::encode(&self.typename),
            self.geo_core.get_epsg()
        );

        match (&self.cql_filter, &self.bbox) {
            (Some(cql_filter), _) => {
                request_url.push_str(&format!("&CQL_FILTER={}", urlencoding::encode(cql_filter)));
            }
            // WFS 2.0 reads EPSG:4326 extents in latitude/longitude order
            (None, Some(bbox)) => request_url.push_str(&format!(
                "&BBOX={},{},{},{},EPSG:4326",
                bbox.min_y, bbox.min_x, bbox.max_y, bbox.max_x
            )),
            (None, None) => anyhow::bail!("Bounding box or CQL filter must be set before a WFS request"),
        }

        request_url.push_str(&format!(
            "&STARTINDEX={}&COUNT={}",
            start_index, self.page_size
        ));
        Url::parse(&request_url).with_context(|| format!("Invalid WFS URL: {}", request_url))
    }

    /// One GetFeature page
    pub fn fetch_page(&self, start_index: usize) -> Result<FeatureCollection> {
        let url = self.request_url(start_index)?;
        log::debug!("Request URL WFS: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .context("Failed to send WFS request to IGN API")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            anyhow::bail!("IGN API returned error {}: {}", status, body);
        }

        let body = response.text().context("Failed to read response body")?;
        let geojson: GeoJson = body
            .parse()
            .context("Failed to parse GeoJSON from IGN API response")?;
        FeatureCollection::try_from(geojson).context("IGN API response is not a FeatureCollection")
    }

    /// Every page of the request, merged. The `crs` member of the first page
    /// is kept so the declared CRS survives the merge.
    pub fn fetch_all(&self) -> Result<FeatureCollection> {
        let mut merged = FeatureCollection {
            bbox: None,
            features: Vec::new(),
            foreign_members: None,
        };

        for page in 0..MAX_PAGES {
            let collection = self.fetch_page(merged.features.len())?;
            let received = collection.features.len();
            if page == 0 {
                merged.foreign_members = crs_member(collection.foreign_members.as_ref());
            }
            merged.features.extend(collection.features);
            log::info!(
                "WFS page {}: {} features ({} total)",
                page + 1,
                received,
                merged.features.len()
            );
            if received < self.page_size {
                return Ok(merged);
            }
        }

        log::warn!(
            "Stopped after {} WFS pages; the collection may be incomplete",
            MAX_PAGES
        );
        Ok(merged)
    }

    /// Fetch everything and write it as GeoJSON to `destination`
    pub fn to_geojson(&self, destination: &Path) -> Result<usize> {
        let collection = self.fetch_all()?;
        let count = collection.features.len();
        if count == 0 {
            anyhow::bail!("IGN API returned no {} features", self.typename);
        }
        let staged = stage_file(destination, GeoJson::from(collection).to_string().as_bytes())?;
        persist(staged, destination)?;
        log::info!("{} {} features saved to {}", count, self.typename, destination.display());
        Ok(count)
    }
}

fn crs_member(foreign_members: Option<&JsonObject>) -> Option<JsonObject> {
    let crs = foreign_members?.get("crs")?.clone();
    let mut members = JsonObject::new();
    members.insert("crs".to_string(), crs);
    Some(members)
}
