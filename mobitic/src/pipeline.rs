use std::path::PathBuf;

use anyhow::{Context, Result};
use geojson::GeoJson;

use crate::collect::download::{extract_first_matching, file_name_from_url, Downloader};
use crate::collect::ign::ign_collect::IgnCollect;
use crate::commons::basic_functions::{
    extension_of, persist, read_feature_collection, require_exists, stage_file,
};
use crate::config::categories::CategoryTaxonomy;
use crate::config::settings::{AppConfig, ZoneSource};
use crate::error::PipelineError;
use crate::geo_core::{collection_epsg, GeoCore};
use crate::geometric::facility::{self, Facility, FacilityColumns};
use crate::geometric::region::RegionFilter;
use crate::geometric::zone::{self, Zone};
use crate::render::map::InteractiveMap;

/// Normalized collections, as persisted by `prepare` or loaded by `render`
#[derive(Debug)]
pub struct Prepared {
    pub facilities: Vec<Facility>,
    pub zones: Vec<Zone>,
    /// Records dropped for missing or non-finite coordinates
    pub excluded_facilities: usize,
    pub excluded_zones: usize,
}

/// The batch pipeline: download, prepare, render
pub struct Pipeline {
    config: AppConfig,
    taxonomy: CategoryTaxonomy,
    region: RegionFilter,
    geo_core: GeoCore,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        let taxonomy = CategoryTaxonomy::from_config(&config.categories);
        let region = RegionFilter::new(config.region.allowed_prefixes(), config.region.prefix_len);
        let mut geo_core = GeoCore::new(config.crs.target_epsg);
        geo_core.set_bbox(config.sources.zones.bbox());
        Pipeline {
            config,
            taxonomy,
            region,
            geo_core,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn taxonomy(&self) -> &CategoryTaxonomy {
        &self.taxonomy
    }

    /// Fetch the census table and the IRIS boundaries into `paths`
    pub fn download(&self, force: bool) -> Result<()> {
        let paths = &self.config.paths;
        let sources = &self.config.sources;
        let downloader = Downloader::new(sources.timeout_secs)?;

        downloader
            .fetch_to_file(&sources.facilities_url, &paths.facilities_raw, force)
            .context("Failed to download the facilities census")?;

        match &sources.zones {
            ZoneSource::Wfs {
                url,
                typename,
                cql_filter,
                page_size,
                ..
            } => {
                if paths.zones_raw.exists() && !force {
                    log::info!(
                        "{} already present, skipping download (use --force to refresh)",
                        paths.zones_raw.display()
                    );
                    return Ok(());
                }
                let mut ign = IgnCollect::new(downloader.client().clone(), url, typename);
                ign.bbox = self.geo_core.get_bbox();
                ign.set_cql_filter(cql_filter.clone());
                ign.page_size = *page_size;
                ign.geo_core.set_epsg(self.config.crs.source_epsg);
                ign.to_geojson(&paths.zones_raw)
                    .context("Failed to download IRIS boundaries from the WFS service")?;
            }
            ZoneSource::Archive { url } => {
                let archive = paths
                    .data_dir
                    .join(file_name_from_url(url).unwrap_or_else(|| "iris.zip".to_string()));
                let fetched = downloader.fetch_to_file(url, &archive, force)?;
                if fetched || !paths.zones_raw.exists() {
                    extract_first_matching(&archive, &["geojson", "json"], &paths.zones_raw)?;
                }
            }
            ZoneSource::Url { url } => {
                downloader.fetch_to_file(url, &paths.zones_raw, force)?;
            }
        }
        Ok(())
    }

    /// Normalize both raw inputs and persist them as GeoJSON artifacts.
    ///
    /// Nothing is written unless both collections are complete. The zones are
    /// published first; if the facilities rename then fails, the zones
    /// artifact is newer than the facilities one and an error is logged.
    pub fn prepare(&self) -> Result<Prepared, PipelineError> {
        let paths = &self.config.paths;
        require_exists(&paths.facilities_raw)?;
        require_exists(&paths.zones_raw)?;

        let (facilities, excluded_facilities) = self.prepare_facilities()?;
        let (mut zones, excluded_zones) = self.prepare_zones()?;
        if self.config.map.count_facilities {
            zone::count_facilities(&mut zones, &facilities);
        }

        let facilities_path = paths.facilities_artifact();
        let zones_path = paths.zones_artifact();
        let staged_facilities = stage_file(
            &facilities_path,
            GeoJson::from(facility::to_feature_collection(&facilities))
                .to_string()
                .as_bytes(),
        )?;
        let staged_zones = stage_file(
            &zones_path,
            GeoJson::from(zone::to_feature_collection(&zones))
                .to_string()
                .as_bytes(),
        )?;
        persist(staged_zones, &zones_path)?;
        if let Err(e) = persist(staged_facilities, &facilities_path) {
            log::error!(
                "{} was updated but {} was not; run prepare again",
                zones_path.display(),
                facilities_path.display()
            );
            return Err(e);
        }
        log::info!(
            "Saved {} facilities to {} and {} zones to {}",
            facilities.len(),
            facilities_path.display(),
            zones.len(),
            zones_path.display()
        );

        Ok(Prepared {
            facilities,
            zones,
            excluded_facilities,
            excluded_zones,
        })
    }

    fn prepare_facilities(&self) -> Result<(Vec<Facility>, usize), PipelineError> {
        let path = &self.config.paths.facilities_raw;
        let source_epsg = self.config.crs.source_epsg;

        let (raw, epsg) = match extension_of(path).as_str() {
            "geojson" | "json" => {
                let fc = read_feature_collection(path)?;
                let epsg = collection_epsg(&fc, source_epsg);
                let raw = facility::raw_facilities_from_features(&fc)?;
                (self.region.filter(raw, "facilities")?, epsg)
            }
            _ => {
                let df = facility::read_table(path)?;
                let columns = FacilityColumns::resolve(&df)?;
                let df = self.region.filter_table(&df, columns.region, "facilities")?;
                (facility::raw_facilities(&df, &columns)?, source_epsg)
            }
        };

        let reconciled = self.geo_core.to_geographic(raw, epsg)?;
        if reconciled.records.is_empty() {
            log::warn!("No facility of the region has usable coordinates");
        }
        let facilities = facility::categorize_all(reconciled.records, &self.taxonomy);

        log::info!("Facilities per category:");
        for (name, count) in facility::category_counts(&facilities).iter().take(10) {
            log::info!("  {}: {}", name, count);
        }
        Ok((facilities, reconciled.excluded))
    }

    fn prepare_zones(&self) -> Result<(Vec<Zone>, usize), PipelineError> {
        let fc = read_feature_collection(&self.config.paths.zones_raw)?;
        let epsg = collection_epsg(&fc, self.config.crs.source_epsg);
        let raw = zone::raw_zones_from_features(&fc)?;
        let raw = self.region.filter(raw, "zones")?;
        let reconciled = self.geo_core.to_geographic(raw, epsg)?;
        Ok((reconciled.records, reconciled.excluded))
    }

    /// Load the persisted artifacts; both must exist
    pub fn load_artifacts(&self) -> Result<Prepared, PipelineError> {
        let paths = &self.config.paths;
        let target_epsg = self.geo_core.get_epsg();

        let fc = read_feature_collection(&paths.facilities_artifact())?;
        let raw = facility::raw_facilities_from_features(&fc)?;
        let facilities = self
            .geo_core
            .to_geographic(raw, collection_epsg(&fc, target_epsg))?;

        let fc = read_feature_collection(&paths.zones_artifact())?;
        let raw = zone::raw_zones_from_features(&fc)?;
        let zones = self
            .geo_core
            .to_geographic(raw, collection_epsg(&fc, target_epsg))?;

        // artifacts written by older runs may lack the category
        let facilities = facilities
            .records
            .into_iter()
            .map(|mut f| {
                if f.category.is_none() {
                    f.category = Some(self.taxonomy.classify(&f.type_code).to_string());
                }
                f
            })
            .collect();

        Ok(Prepared {
            facilities,
            zones: zones.records,
            excluded_facilities: 0,
            excluded_zones: 0,
        })
    }

    /// Draw the persisted artifacts into the HTML map
    pub fn render(&self) -> Result<PathBuf> {
        let prepared = self
            .load_artifacts()
            .context("Run `prepare` before `render`")?;
        let output = &self.config.paths.output_map;
        InteractiveMap::new(&self.config.map, &self.taxonomy).save(
            &prepared.zones,
            &prepared.facilities,
            output,
        )?;
        Ok(output.clone())
    }

    /// download, prepare and render in order
    pub fn run(&self, force: bool) -> Result<PathBuf> {
        self.download(force)?;
        self.prepare()?;
        self.render()
    }
}
