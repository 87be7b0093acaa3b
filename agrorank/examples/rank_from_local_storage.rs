use std::sync::Arc;

use anyhow::Result;
use agrorank::collect::storage::{LocalStorage, Storage};
use agrorank::config::PipelineConfig;
use agrorank::geo_core::{Crs, GeoTransform};
use agrorank::geometric::ranking::Category;
use agrorank::io::geotiff;
use agrorank::notify::LogNotifier;
use agrorank::pipeline::{JobRequest, Pipeline};
use agrorank::raster::{RasterDataset, SampleType};

/// Example: rank a 3x3 grid of sub-parcels on a synthetic RGB orthomosaic
/// stored in a local directory
fn main() -> Result<()> {
    println!("=== Example: parcel ranking from local storage ===\n");

    let root = std::path::PathBuf::from("./output");
    let storage = Arc::new(LocalStorage::new(root.join("storage")));

    // 30x30 px at 1 m, greener towards the north-east
    let (width, height) = (30, 30);
    let mut red = Vec::with_capacity(width * height);
    let mut green = Vec::with_capacity(width * height);
    let mut blue = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            red.push(60.0);
            green.push(80.0 + (col + (height - 1 - row)) as f64 * 2.0);
            blue.push(40.0);
        }
    }
    let orthomosaic = RasterDataset::new(
        width,
        height,
        vec![red, green, blue],
        GeoTransform::new(330000.0, 7400030.0, 1.0, -1.0),
        SampleType::U8,
    )?
    .with_crs(Some(Crs::from_epsg(31983)));

    storage.store(
        &geotiff::to_bytes(&orthomosaic)?,
        "Ortomosaicos/demo/ortomosaico.tif",
    )?;
    storage.store(
        boundary_geojson().as_bytes(),
        "talhoes/t-01/poligono.geojson",
    )?;
    storage.store(grid_geojson().as_bytes(), "talhoes/t-01/grade_entrada.geojson")?;
    println!("Inputs written under {:?}", storage.root());

    let config = PipelineConfig {
        work_root: root.join("work"),
        storage_root: root.join("storage"),
        ..PipelineConfig::default()
    };
    let pipeline = Pipeline::new(config, storage, Arc::new(LogNotifier));
    let outcome = pipeline.run(&JobRequest::new("demo", "t-01"))?;

    println!("\nRanking (best first):");
    for cell in outcome.ranked.by_rank() {
        if let (Some(rank), Some(mean)) = (cell.rank, cell.mean()) {
            println!(
                "  #{:<2} cell {:<2} VARI {:.4}  {}",
                rank.rank, cell.cell.id, mean, rank.category
            );
        }
    }

    println!("\nCategories:");
    for category in Category::ALL {
        if let Some(m) = outcome.metrics.category(category) {
            println!(
                "  {:<9} {} cell(s), {:.1}% of the area",
                category.name(),
                m.count,
                m.area_percentage
            );
        }
    }

    println!("\nArtifacts:");
    for artifact in &outcome.artifacts {
        println!("  {} -> {}", artifact.name, artifact.locator);
    }
    Ok(())
}

fn crs_member() -> &'static str {
    r#""crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:EPSG::31983" } }"#
}

fn ring(x0: f64, y0: f64, x1: f64, y1: f64) -> String {
    format!(
        "[[[{x0}, {y0}], [{x1}, {y0}], [{x1}, {y1}], [{x0}, {y1}], [{x0}, {y0}]]]"
    )
}

fn boundary_geojson() -> String {
    format!(
        r#"{{ "type": "FeatureCollection", {}, "features": [
            {{ "type": "Feature", "properties": {{}}, "geometry": {{ "type": "Polygon", "coordinates": {} }} }}
        ] }}"#,
        crs_member(),
        ring(330000.0, 7400000.0, 330030.0, 7400030.0)
    )
}

fn grid_geojson() -> String {
    let mut features = Vec::new();
    for j in 0..3 {
        for i in 0..3 {
            let x = 330000.0 + i as f64 * 10.0;
            let y = 7400000.0 + j as f64 * 10.0;
            features.push(format!(
                r#"{{ "type": "Feature", "properties": {{ "id": {} }}, "geometry": {{ "type": "Polygon", "coordinates": {} }} }}"#,
                j * 3 + i + 1,
                ring(x, y, x + 10.0, y + 10.0)
            ));
        }
    }
    format!(
        r#"{{ "type": "FeatureCollection", {}, "features": [{}] }}"#,
        crs_member(),
        features.join(",")
    )
}
