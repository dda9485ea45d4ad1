use std::path::Path;

use anyhow::Result;
use mobitic::collect::download::Downloader;
use mobitic::collect::global_variables::{IGN_WFS_URL, IRIS_TYPENAME};
use mobitic::collect::ign::ign_collect::IgnCollect;
use mobitic::geo_core::LAMBERT93_EPSG;

/// Example: fetch the IRIS contours of Lyon centre from the IGN WFS service
fn main() -> Result<()> {
    pretty_env_logger::init();
    println!("=== Example: IRIS contours from IGN WFS ===\n");

    let downloader = Downloader::new(120)?;
    let mut ign = IgnCollect::new(downloader.client().clone(), IGN_WFS_URL, IRIS_TYPENAME);
    // Presqu'île, Lyon 1er/2e
    ign.set_bbox(4.815, 45.745, 4.845, 45.775);
    ign.geo_core.set_epsg(LAMBERT93_EPSG);

    println!("Request: {}", ign.request_url(0)?);
    let count = ign.to_geojson(Path::new("./output/iris_presquile.geojson"))?;

    println!("\n{} IRIS saved to ./output/iris_presquile.geojson", count);
    Ok(())
}
