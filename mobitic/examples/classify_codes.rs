use anyhow::Result;
use geo::Point;
use mobitic::geo_core::{GeoCore, LAMBERT93_EPSG, WGS84_EPSG};
use mobitic::CategoryTaxonomy;

/// Example: categorize a few BPE type codes and place them on the map
fn main() -> Result<()> {
    println!("=== Example: BPE codes and Lambert-93 coordinates ===\n");

    let taxonomy = CategoryTaxonomy::default();
    let facilities = [
        ("D101", 842_500.0, 6_519_000.0),
        ("C108", 843_120.0, 6_520_410.0),
        ("F101", 845_800.0, 6_517_900.0),
        ("Z999", 841_000.0, 6_521_000.0),
    ];

    for (code, x, y) in facilities {
        let location =
            GeoCore::transform_point(LAMBERT93_EPSG, WGS84_EPSG, Point::new(x, y))?;
        println!(
            "{} -> {:<20} ({:.5}, {:.5}) marker {}",
            code,
            taxonomy.classify(code),
            location.y(),
            location.x(),
            taxonomy.color_of(taxonomy.classify(code))
        );
    }

    println!("\nCategories: {}", taxonomy.category_names().join(", "));
    Ok(())
}
