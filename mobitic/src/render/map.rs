use std::path::Path;

use anyhow::{Context, Result};
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, JsonValue};
use serde::Serialize;

use crate::collect::global_variables::DEFAULT_MAP_CENTER;
use crate::commons::basic_functions::{persist, stage_file};
use crate::config::categories::{CategoryTaxonomy, OTHER_CATEGORY};
use crate::config::settings::MapConfig;
use crate::geometric::facility::Facility;
use crate::geometric::zone::{mean_centroid, Zone};

/// ColorBrewer YlOrRd, 6 classes
pub const YLORRD: [&str; 6] = [
    "#ffffb2", "#fed976", "#feb24c", "#fd8d3c", "#f03b20", "#bd0026",
];

#[derive(Debug, Serialize)]
struct MarkerData<'a> {
    lat: f64,
    lon: f64,
    #[serde(rename = "type")]
    type_code: &'a str,
    category: &'a str,
    commune: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct LayerData<'a> {
    name: &'a str,
    color: &'a str,
    icon: &'a str,
    markers: Vec<MarkerData<'a>>,
}

#[derive(Debug, Serialize)]
struct ScaleClass {
    color: &'static str,
    label: String,
}

#[derive(Debug, Serialize)]
struct MapData<'a> {
    center: [f64; 2],
    zoom: u8,
    tiles_url: &'a str,
    tiles_attribution: &'a str,
    zones: FeatureCollection,
    choropleth: bool,
    scale: Vec<ScaleClass>,
    layers: Vec<LayerData<'a>>,
}

/// Standalone Leaflet page: zone layer, one marker cluster per category,
/// legend and layer control.
pub struct InteractiveMap<'a> {
    config: &'a MapConfig,
    taxonomy: &'a CategoryTaxonomy,
}

impl<'a> InteractiveMap<'a> {
    pub fn new(config: &'a MapConfig, taxonomy: &'a CategoryTaxonomy) -> Self {
        InteractiveMap { config, taxonomy }
    }

    /// At most `max_markers` facilities, evenly spaced over the input so
    /// repeated renders draw the same markers
    pub fn sample<'f>(&self, facilities: &'f [Facility]) -> Vec<&'f Facility> {
        let total = facilities.len();
        let max = self.config.max_markers.max(1);
        if total <= max {
            return facilities.iter().collect();
        }
        log::info!(
            "Display of a subsample of {} facilities (out of {})",
            max,
            total
        );
        (0..max).map(|i| &facilities[i * total / max]).collect()
    }

    /// `[lat, lon]`: configured center, else the mean of zone centroids
    pub fn center(&self, zones: &[Zone]) -> [f64; 2] {
        if let Some(center) = self.config.center {
            return center;
        }
        mean_centroid(zones)
            .map(|p| [p.y(), p.x()])
            .unwrap_or(DEFAULT_MAP_CENTER)
    }

    /// Build the HTML document
    pub fn render(&self, zones: &[Zone], facilities: &[Facility]) -> Result<String> {
        let counts: Vec<u64> = zones.iter().filter_map(|z| z.facility_count).collect();
        let edges = if self.config.choropleth && !counts.is_empty() {
            class_edges(&counts)
        } else {
            Vec::new()
        };

        let data = MapData {
            center: self.center(zones),
            zoom: self.config.zoom,
            tiles_url: &self.config.tiles_url,
            tiles_attribution: &self.config.tiles_attribution,
            zones: self.zone_layer(zones, &edges),
            choropleth: !edges.is_empty(),
            scale: scale_legend(&edges),
            layers: self.marker_layers(&self.sample(facilities)),
        };
        let json = serde_json::to_string(&data).context("Failed to serialize map data")?;
        log::info!(
            "{} zones and {} markers added to the map",
            zones.len(),
            data.layers.iter().map(|l| l.markers.len()).sum::<usize>()
        );

        Ok(TEMPLATE
            .replace("{{TITLE}}", &escape_html(&self.config.title))
            .replace("{{LEGEND_TITLE}}", "Catégories d'équipements")
            .replace("{{DATA}}", &escape_script(&json)))
    }

    /// Render and write the page to `path`
    pub fn save(&self, zones: &[Zone], facilities: &[Facility], path: &Path) -> Result<()> {
        let html = self.render(zones, facilities)?;
        let staged = stage_file(path, html.as_bytes())?;
        persist(staged, path).with_context(|| format!("Failed to write map to {:?}", path))?;
        log::info!("Map saved: {}", path.display());
        Ok(())
    }

    fn zone_layer(&self, zones: &[Zone], edges: &[f64]) -> FeatureCollection {
        let features = zones
            .iter()
            .map(|zone| {
                let mut properties = JsonObject::new();
                properties.insert("code".to_string(), JsonValue::from(zone.code.as_str()));
                properties.insert("name".to_string(), JsonValue::from(zone.label()));
                if let Some(count) = zone.facility_count {
                    properties.insert("count".to_string(), JsonValue::from(count));
                    if !edges.is_empty() {
                        properties.insert(
                            "fill".to_string(),
                            JsonValue::from(class_color(count, edges)),
                        );
                    }
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

    /// One layer per declared category then `Autres`, even when empty
    fn marker_layers<'f>(&self, facilities: &[&'f Facility]) -> Vec<LayerData<'f>>
    where
        'a: 'f,
    {
        let mut layers: Vec<LayerData<'f>> = self
            .taxonomy
            .category_names()
            .into_iter()
            .map(|name| LayerData {
                name,
                color: self.taxonomy.color_of(name),
                icon: self.taxonomy.icon_of(name),
                markers: Vec::new(),
            })
            .collect();

        for facility in facilities {
            let category = facility.category_name();
            // categories unknown to the taxonomy go to the `Autres` layer
            let position = layers
                .iter()
                .position(|layer| layer.name == category)
                .or_else(|| layers.iter().position(|layer| layer.name == OTHER_CATEGORY))
                .unwrap_or(layers.len() - 1);
            layers[position].markers.push(MarkerData {
                lat: facility.location.y(),
                lon: facility.location.x(),
                type_code: &facility.type_code,
                category,
                commune: facility.commune.as_deref(),
            });
        }
        layers
    }
}

/// Six equal-width classes over the observed counts: 7 edges
fn class_edges(counts: &[u64]) -> Vec<f64> {
    let min = counts.iter().copied().min().unwrap_or(0) as f64;
    let max = counts.iter().copied().max().unwrap_or(0) as f64;
    let step = (max - min) / YLORRD.len() as f64;
    (0..=YLORRD.len()).map(|i| min + step * i as f64).collect()
}

fn class_color(count: u64, edges: &[f64]) -> &'static str {
    let value = count as f64;
    let class = edges[1..edges.len() - 1]
        .iter()
        .take_while(|&&edge| value > edge)
        .count();
    YLORRD[class.min(YLORRD.len() - 1)]
}

fn scale_legend(edges: &[f64]) -> Vec<ScaleClass> {
    edges
        .windows(2)
        .zip(YLORRD)
        .map(|(bounds, color)| ScaleClass {
            color,
            label: format!("{:.0} – {:.0}", bounds[0], bounds[1]),
        })
        .collect()
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// JSON inside a `<script>` element must not contain `</`
fn escape_script(json: &str) -> String {
    json.replace("</", "<\\/")
}

const TEMPLATE: &str = r##"<!DOCTYPE html>
<html lang="fr">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>{{TITLE}}</title>
<link rel="stylesheet" href="https://unpkg.com/leaflet@1.9.4/dist/leaflet.css">
<link rel="stylesheet" href="https://unpkg.com/leaflet.markercluster@1.5.3/dist/MarkerCluster.css">
<link rel="stylesheet" href="https://unpkg.com/leaflet.markercluster@1.5.3/dist/MarkerCluster.Default.css">
<link rel="stylesheet" href="https://cdnjs.cloudflare.com/ajax/libs/Leaflet.awesome-markers/2.0.2/leaflet.awesome-markers.css">
<link rel="stylesheet" href="https://netdna.bootstrapcdn.com/bootstrap/3.0.0/css/bootstrap-glyphicons.css">
<style>
html, body, #map { height: 100%; width: 100%; margin: 0; padding: 0; }
.legend { position: fixed; top: 10px; right: 10px; width: 220px; background-color: white;
  border: 2px solid grey; z-index: 9999; font-size: 14px; padding: 10px; font-family: sans-serif; }
.legend h4 { margin-top: 0; }
.legend p { margin: 4px 0; }
.legend .swatch { display: inline-block; width: 12px; height: 12px; margin-right: 6px; border-radius: 6px; }
.legend .box { display: inline-block; width: 18px; height: 12px; margin-right: 6px; }
</style>
</head>
<body>
<div id="map"></div>
<div class="legend" id="legend"><h4>{{LEGEND_TITLE}}</h4></div>
<script src="https://unpkg.com/leaflet@1.9.4/dist/leaflet.js"></script>
<script src="https://unpkg.com/leaflet.markercluster@1.5.3/dist/leaflet.markercluster.js"></script>
<script src="https://cdnjs.cloudflare.com/ajax/libs/Leaflet.awesome-markers/2.0.2/leaflet.awesome-markers.js"></script>
<script>
const data = {{DATA}};

const map = L.map("map", { center: data.center, zoom: data.zoom });
L.tileLayer(data.tiles_url, { attribution: data.tiles_attribution, maxZoom: 19 }).addTo(map);
L.control.scale().addTo(map);

function escapeHtml(value) {
  return String(value).replace(/[&<>"']/g, c => ({ "&": "&amp;", "<": "&lt;", ">": "&gt;", '"': "&quot;", "'": "&#39;" }[c]));
}

function zoneStyle(feature) {
  if (data.choropleth && feature.properties.fill) {
    return { fillColor: feature.properties.fill, color: "#555555", weight: 1, fillOpacity: 0.6 };
  }
  return { fillColor: "lightblue", color: "blue", weight: 1, fillOpacity: 0.1 };
}

const zones = L.geoJSON(data.zones, {
  style: zoneStyle,
  onEachFeature: (feature, layer) => {
    let tooltip = "<b>Nom:</b> " + escapeHtml(feature.properties.name) +
      "<br><b>Code:</b> " + escapeHtml(feature.properties.code);
    if (feature.properties.count !== undefined) {
      tooltip += "<br><b>Équipements:</b> " + feature.properties.count;
    }
    layer.bindTooltip(tooltip);
    layer.on("mouseover", () => layer.setStyle({ fillColor: "yellow", fillOpacity: 0.3 }));
    layer.on("mouseout", () => zones.resetStyle(layer));
  }
}).addTo(map);

const overlays = { "Contours IRIS": zones };
const legend = document.getElementById("legend");

for (const group of data.layers) {
  const cluster = L.markerClusterGroup();
  const icon = L.AwesomeMarkers.icon({ icon: group.icon, markerColor: group.color, prefix: "glyphicon" });
  for (const m of group.markers) {
    let popup = "<b>Type:</b> " + escapeHtml(m.type) + "<br><b>Catégorie:</b> " + escapeHtml(m.category) + "<br>";
    if (m.commune) {
      popup += "<b>Commune:</b> " + escapeHtml(m.commune) + "<br>";
    }
    L.marker([m.lat, m.lon], { icon: icon })
      .bindPopup(popup, { maxWidth: 200 })
      .bindTooltip(escapeHtml(m.category + " - " + m.type))
      .addTo(cluster);
  }
  cluster.addTo(map);
  overlays[escapeHtml(group.name) + " (" + group.markers.length + ")"] = cluster;
  legend.insertAdjacentHTML("beforeend",
    '<p><span class="swatch" style="background:' + escapeHtml(group.color) + '"></span>' + escapeHtml(group.name) + "</p>");
}

if (data.choropleth) {
  legend.insertAdjacentHTML("beforeend", "<h4>Équipements par IRIS</h4>");
  for (const c of data.scale) {
    legend.insertAdjacentHTML("beforeend",
      '<p><span class="box" style="background:' + escapeHtml(c.color) + '"></span>' + escapeHtml(c.label) + "</p>");
  }
}

L.control.layers(null, overlays, { collapsed: false }).addTo(map);
</script>
</body>
</html>
"##;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::categories::Category;
    use geo::{polygon, MultiPolygon, Point};

    fn facility(type_code: &str, category: &str, x: f64) -> Facility {
        Facility {
            type_code: type_code.to_string(),
            region_code: "69123".to_string(),
            commune: Some("69123".to_string()),
            location: Point::new(x, 45.76),
            category: Some(category.to_string()),
            attributes: JsonObject::new(),
        }
    }

    fn zone(count: Option<u64>) -> Zone {
        Zone {
            code: "691230101".to_string(),
            name: Some("Bellecour <1>".to_string()),
            geometry: MultiPolygon::new(vec![polygon![
                (x: 4.80, y: 45.74),
                (x: 4.86, y: 45.74),
                (x: 4.86, y: 45.78),
                (x: 4.80, y: 45.78),
                (x: 4.80, y: 45.74),
            ]]),
            facility_count: count,
            attributes: JsonObject::new(),
        }
    }

    #[test]
    fn test_sample_is_deterministic_and_bounded() {
        let config = MapConfig {
            max_markers: 3,
            ..MapConfig::default()
        };
        let taxonomy = CategoryTaxonomy::default();
        let map = InteractiveMap::new(&config, &taxonomy);
        let facilities: Vec<Facility> = (0..10)
            .map(|i| facility(&format!("F1{:02}", i), "Sports & Loisirs", 4.8 + i as f64 * 0.001))
            .collect();

        let sample = map.sample(&facilities);
        assert_eq!(sample.len(), 3);
        let types: Vec<&str> = sample.iter().map(|f| f.type_code.as_str()).collect();
        assert_eq!(types, vec!["F100", "F103", "F106"]);
        assert_eq!(map.sample(&facilities[..2]).len(), 2);
    }

    #[test]
    fn test_center() {
        let taxonomy = CategoryTaxonomy::default();
        let config = MapConfig::default();
        let map = InteractiveMap::new(&config, &taxonomy);
        let center = map.center(&[zone(None)]);
        assert!((center[0] - 45.76).abs() < 1e-6);
        assert!((center[1] - 4.83).abs() < 1e-6);
        assert_eq!(map.center(&[]), DEFAULT_MAP_CENTER);

        let config = MapConfig {
            center: Some([45.0, 5.0]),
            ..MapConfig::default()
        };
        assert_eq!(InteractiveMap::new(&config, &taxonomy).center(&[]), [45.0, 5.0]);
    }

    #[test]
    fn test_class_colors() {
        let edges = class_edges(&[0, 60]);
        assert_eq!(edges.len(), 7);
        assert_eq!(class_color(0, &edges), YLORRD[0]);
        assert_eq!(class_color(10, &edges), YLORRD[0]);
        assert_eq!(class_color(11, &edges), YLORRD[1]);
        assert_eq!(class_color(60, &edges), YLORRD[5]);

        // a single observed value still maps to a class
        let flat = class_edges(&[4, 4]);
        assert_eq!(class_color(4, &flat), YLORRD[0]);
        assert_eq!(scale_legend(&edges).len(), 6);
    }

    #[test]
    fn test_render_contains_layers_and_escapes_data() {
        let taxonomy = CategoryTaxonomy::default();
        let config = MapConfig::default();
        let map = InteractiveMap::new(&config, &taxonomy);
        let facilities = vec![
            facility("D101", "Santé", 4.83),
            facility("Z999", "Inconnue</script>", 4.84),
        ];
        let html = map.render(&[zone(Some(2))], &facilities).unwrap();

        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<title>Équipements de la région lyonnaise</title>"));
        assert!(html.contains("\"name\":\"Santé\""));
        assert!(html.contains("\"name\":\"Autres\""));
        assert!(html.contains("\"choropleth\":true"));
        assert!(html.contains("Inconnue<\\/script>"));
        assert!(!html.contains("{{DATA}}"));
        // closing tags of the template only
        assert_eq!(html.matches("</script>").count(), 4);
    }

    #[test]
    fn test_unknown_category_goes_to_other_layer() {
        let taxonomy = CategoryTaxonomy::default();
        let config = MapConfig::default();
        let map = InteractiveMap::new(&config, &taxonomy);
        let facilities = vec![facility("Z999", "Inconnue", 4.84)];
        let refs: Vec<&Facility> = facilities.iter().collect();
        let layers = map.marker_layers(&refs);
        assert_eq!(layers.len(), 10);
        assert_eq!(layers[9].name, "Autres");
        assert_eq!(layers[9].markers.len(), 1);
        assert_eq!(layers[9].color, "gray");
    }

    #[test]
    fn test_declared_other_category_gets_a_single_layer() {
        let taxonomy = CategoryTaxonomy::new(vec![
            Category::new("Autres", "black", "star", &["Z999"]),
            Category::new("Santé", "red", "plus-sign", &["D101"]),
        ]);
        let config = MapConfig::default();
        let map = InteractiveMap::new(&config, &taxonomy);
        let facilities = vec![
            facility("D101", "Santé", 4.83),
            facility("Y001", "Inconnue", 4.84),
        ];
        let refs: Vec<&Facility> = facilities.iter().collect();
        let layers = map.marker_layers(&refs);
        let names: Vec<&str> = layers.iter().map(|l| l.name).collect();
        assert_eq!(names, vec!["Autres", "Santé"]);
        assert_eq!(layers[0].markers.len(), 1);
        assert_eq!(layers[0].markers[0].type_code, "Y001");
        assert_eq!(layers[1].markers.len(), 1);
    }

    #[test]
    fn test_legend_colors_are_escaped() {
        for line in TEMPLATE.lines().filter(|l| l.contains("style=\"background:")) {
            assert!(
                line.contains("escapeHtml(group.color)") || line.contains("escapeHtml(c.color)"),
                "unescaped color in {}",
                line
            );
        }
        assert_eq!(TEMPLATE.matches("escapeHtml(group.color)").count(), 1);
        assert_eq!(TEMPLATE.matches("escapeHtml(c.color)").count(), 1);
    }

    #[test]
    fn test_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("carte.html");
        let taxonomy = CategoryTaxonomy::default();
        let config = MapConfig {
            choropleth: false,
            ..MapConfig::default()
        };
        InteractiveMap::new(&config, &taxonomy)
            .save(&[zone(Some(1))], &[], &path)
            .unwrap();
        let html = std::fs::read_to_string(&path).unwrap();
        assert!(html.contains("\"choropleth\":false"));
        assert!(html.contains("\"name\":\"Bellecour <1>\""));
    }
}
