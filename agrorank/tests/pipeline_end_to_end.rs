use std::sync::{Arc, Mutex};

use agrorank::collect::storage::{LocalStorage, Storage};
use agrorank::config::PipelineConfig;
use agrorank::error::{Error, Result};
use agrorank::geo_core::{Crs, GeoTransform};
use agrorank::geometric::index::IndexFormula;
use agrorank::geometric::ranking::Category;
use agrorank::io::geotiff;
use agrorank::notify::{JobNotification, JobStatus, Notifier};
use agrorank::pipeline::{
    JobRequest, MetricsDocument, Pipeline, CLIPPED_ARTIFACT, GRID_ARTIFACT, METRICS_ARTIFACT,
};
use agrorank::raster::{RasterDataset, SampleType};
use approx::assert_relative_eq;
use tempfile::TempDir;

#[derive(Default)]
struct RecordingNotifier {
    events: Mutex<Vec<JobNotification>>,
}

impl RecordingNotifier {
    fn statuses(&self) -> Vec<JobStatus> {
        self.events.lock().unwrap().iter().map(|n| n.status).collect()
    }

    fn last(&self) -> Option<JobNotification> {
        self.events.lock().unwrap().last().cloned()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &JobNotification) -> Result<()> {
        self.events.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Notifier whose endpoint is always down
struct BrokenNotifier;

impl Notifier for BrokenNotifier {
    fn notify(&self, _notification: &JobNotification) -> Result<()> {
        Err(Error::Notification("connection refused".to_string()))
    }
}

/// 4x4 RGBN orthomosaic over (0,0)-(4,4). Red is 10, blue 0 and green
/// 80 / 60 / 40 / 20 in the NW / NE / SW / SE quadrants.
fn orthomosaic() -> RasterDataset {
    let mut green = Vec::with_capacity(16);
    for row in 0..4 {
        for col in 0..4 {
            green.push(match (col < 2, row < 2) {
                (true, true) => 80.0,
                (false, true) => 60.0,
                (true, false) => 40.0,
                (false, false) => 20.0,
            });
        }
    }
    RasterDataset::new(
        4,
        4,
        vec![vec![10.0; 16], green, vec![0.0; 16], vec![100.0; 16]],
        GeoTransform::new(0.0, 4.0, 1.0, -1.0),
        SampleType::U8,
    )
    .unwrap()
    .with_crs(Some(Crs::from_epsg(31983)))
}

const BOUNDARY: &str = r#"{
    "type": "FeatureCollection",
    "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:EPSG::31983" } },
    "features": [
        { "type": "Feature", "properties": { "talhao": "T-1" }, "geometry": {
            "type": "Polygon",
            "coordinates": [[[0, 0], [4, 0], [4, 4], [0, 4], [0, 0]]]
        } }
    ]
}"#;

const GRID: &str = r#"{
    "type": "FeatureCollection",
    "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:EPSG::31983" } },
    "features": [
        { "type": "Feature", "properties": { "id": 1, "block": "nw" }, "geometry": {
            "type": "Polygon", "coordinates": [[[0, 2], [2, 2], [2, 4], [0, 4], [0, 2]]] } },
        { "type": "Feature", "properties": { "id": 2, "block": "ne" }, "geometry": {
            "type": "Polygon", "coordinates": [[[2, 2], [4, 2], [4, 4], [2, 4], [2, 2]]] } },
        { "type": "Feature", "properties": { "id": 3, "block": "sw" }, "geometry": {
            "type": "Polygon", "coordinates": [[[0, 0], [2, 0], [2, 2], [0, 2], [0, 0]]] } },
        { "type": "Feature", "properties": { "id": 4, "block": "se" }, "geometry": {
            "type": "Polygon", "coordinates": [[[2, 0], [4, 0], [4, 2], [2, 2], [2, 0]]] } }
    ]
}"#;

struct Fixture {
    dir: TempDir,
    storage: Arc<LocalStorage>,
    config: PipelineConfig,
}

/// RGB + red edge + NIR, 16-bit. NIR is 90 / 70 / 50 / 30 in the
/// NW / NE / SW / SE quadrants, red is 10 everywhere.
fn multispectral() -> RasterDataset {
    let mut nir = Vec::with_capacity(16);
    for row in 0..4 {
        for col in 0..4 {
            nir.push(match (col < 2, row < 2) {
                (true, true) => 90.0,
                (false, true) => 70.0,
                (true, false) => 50.0,
                (false, false) => 30.0,
            });
        }
    }
    RasterDataset::new(
        4,
        4,
        vec![
            vec![10.0; 16],
            vec![20.0; 16],
            vec![5.0; 16],
            vec![30.0; 16],
            nir,
        ],
        GeoTransform::new(0.0, 4.0, 1.0, -1.0),
        SampleType::U16,
    )
    .unwrap()
    .with_crs(Some(Crs::from_epsg(31983)))
}

/// The four quadrant cells plus cell 5, which lies outside the orthomosaic
const GRID_WITH_OUTSIDE_CELL: &str = r#"{
    "type": "FeatureCollection",
    "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:EPSG::31983" } },
    "features": [
        { "type": "Feature", "properties": { "id": 1 }, "geometry": {
            "type": "Polygon", "coordinates": [[[0, 2], [2, 2], [2, 4], [0, 4], [0, 2]]] } },
        { "type": "Feature", "properties": { "id": 2 }, "geometry": {
            "type": "Polygon", "coordinates": [[[2, 2], [4, 2], [4, 4], [2, 4], [2, 2]]] } },
        { "type": "Feature", "properties": { "id": 3 }, "geometry": {
            "type": "Polygon", "coordinates": [[[0, 0], [2, 0], [2, 2], [0, 2], [0, 0]]] } },
        { "type": "Feature", "properties": { "id": 4 }, "geometry": {
            "type": "Polygon", "coordinates": [[[2, 0], [4, 0], [4, 2], [2, 2], [2, 0]]] } },
        { "type": "Feature", "properties": { "id": 5, "block": "far" }, "geometry": {
            "type": "Polygon", "coordinates": [[[10, 10], [12, 10], [12, 12], [10, 12], [10, 10]]] } }
    ]
}"#;

fn fixture(with_grid: bool) -> Fixture {
    fixture_with(&orthomosaic(), with_grid.then_some(GRID))
}

fn fixture_with(raster: &RasterDataset, grid: Option<&str>) -> Fixture {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(LocalStorage::new(dir.path().join("storage")));
    storage
        .store(
            &geotiff::to_bytes(raster).unwrap(),
            "Ortomosaicos/proj-1/ortomosaico.tif",
        )
        .unwrap();
    storage
        .store(BOUNDARY.as_bytes(), "talhoes/t-1/poligono.geojson")
        .unwrap();
    if let Some(grid) = grid {
        storage
            .store(grid.as_bytes(), "talhoes/t-1/grade_entrada.geojson")
            .unwrap();
    }

    let config = PipelineConfig {
        work_root: dir.path().join("work"),
        storage_root: dir.path().join("storage"),
        hotspot_percentile: 70.0,
        ..PipelineConfig::default()
    };
    Fixture {
        dir,
        storage,
        config,
    }
}

#[test]
fn test_successful_job_ranks_cells_and_publishes_artifacts() {
    let fx = fixture(true);
    let notifier = Arc::new(RecordingNotifier::default());
    let pipeline = Pipeline::new(fx.config.clone(), fx.storage.clone(), notifier.clone());

    let request = JobRequest::with_job_id("job-1", "proj-1", "t-1");
    let outcome = pipeline.run(&request).unwrap();

    assert_eq!(
        notifier.statuses(),
        vec![JobStatus::Started, JobStatus::Completed]
    );

    // VARI = (G - R) / (G + R - B): 70/90, 50/70, 30/50, 10/30
    let ranked = outcome.ranked.by_rank();
    let ids: Vec<i64> = ranked.iter().map(|c| c.cell.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
    assert_relative_eq!(ranked[0].mean().unwrap(), 70.0 / 90.0, epsilon = 1e-6);
    assert_relative_eq!(ranked[3].mean().unwrap(), 10.0 / 30.0, epsilon = 1e-6);

    let categories: Vec<Category> = ranked
        .iter()
        .map(|c| c.rank.unwrap().category)
        .collect();
    assert_eq!(
        categories,
        vec![
            Category::Good,
            Category::Medium,
            Category::Regular,
            Category::Poor
        ]
    );

    assert_eq!(outcome.metrics.total_cells, 4);
    assert_eq!(outcome.metrics.ranked_cells, 4);
    assert_relative_eq!(outcome.metrics.total_area, 16.0);
    assert_eq!(outcome.metrics.category(Category::Excellent).unwrap().count, 0);
    assert_eq!(outcome.hotspots, vec![1]);
    assert_eq!(outcome.index_summary.unwrap().valid_count, 16);
    assert_eq!(outcome.quality.band_count, 4);

    for name in [CLIPPED_ARTIFACT, "vari.tif", GRID_ARTIFACT, METRICS_ARTIFACT] {
        let artifact = outcome.artifact(name).unwrap();
        assert!(artifact.path.exists(), "{} missing from work dir", name);
        let stored = fx
            .dir
            .path()
            .join("storage/produtos_finais/proj-1")
            .join(name);
        assert!(stored.exists(), "{} missing from storage", name);
    }

    let index = geotiff::read(&outcome.artifact("vari.tif").unwrap().path).unwrap();
    assert_eq!(index.sample_type(), SampleType::F32);
    assert_eq!(index.nodata(), Some(-9999.0));

    let grid_text = std::fs::read_to_string(&outcome.artifact(GRID_ARTIFACT).unwrap().path).unwrap();
    let grid: serde_json::Value = serde_json::from_str(&grid_text).unwrap();
    let first = &grid["features"][0]["properties"];
    assert_eq!(first["id"], 1);
    assert_eq!(first["rank"], 1);
    assert_eq!(first["category"], "Good");
    assert_eq!(first["block"], "nw");
    assert_eq!(first["count"], 4);

    let metrics_text =
        std::fs::read_to_string(&outcome.artifact(METRICS_ARTIFACT).unwrap().path).unwrap();
    let document: MetricsDocument = serde_json::from_str(&metrics_text).unwrap();
    assert_eq!(document.formula, IndexFormula::Vari);
    assert_eq!(document.metrics.ranked_cells, 4);
    assert_eq!(document.hotspots, vec![1]);
    assert_eq!(document.parcel_id, "t-1");
}

#[test]
fn test_missing_grid_fails_job_and_notifies() {
    let fx = fixture(false);
    let notifier = Arc::new(RecordingNotifier::default());
    let pipeline = Pipeline::new(fx.config.clone(), fx.storage.clone(), notifier.clone());

    let request = JobRequest::with_job_id("job-2", "proj-1", "t-1");
    let result = pipeline.run(&request);

    assert!(matches!(result, Err(Error::Storage(_))));
    assert_eq!(
        notifier.statuses(),
        vec![JobStatus::Started, JobStatus::Failed]
    );
    let failed = notifier.last().unwrap();
    assert!(failed.message.unwrap().contains("grade_entrada.geojson"));
    assert!(!fx.dir.path().join("storage/produtos_finais").exists());
}

#[test]
fn test_missing_band_surfaces_band_count_error() {
    let mut fx = fixture(true);
    fx.config.formula = IndexFormula::Ndvi;
    fx.config.band_map.nir = 5;
    let notifier = Arc::new(RecordingNotifier::default());
    let pipeline = Pipeline::new(fx.config.clone(), fx.storage.clone(), notifier.clone());

    let result = pipeline.run(&JobRequest::with_job_id("job-3", "proj-1", "t-1"));
    assert!(matches!(
        result,
        Err(Error::BandCount {
            required: 5,
            available: 4
        })
    ));
    assert_eq!(notifier.last().unwrap().status, JobStatus::Failed);
}

#[test]
fn test_notifier_failure_does_not_mask_result() {
    let fx = fixture(true);
    let pipeline = Pipeline::new(fx.config.clone(), fx.storage.clone(), Arc::new(BrokenNotifier));
    let outcome = pipeline
        .run(&JobRequest::with_job_id("job-4", "proj-1", "t-1"))
        .unwrap();
    assert_eq!(outcome.metrics.ranked_cells, 4);
}

#[test]
fn test_work_dir_removed_when_not_kept() {
    let mut fx = fixture(true);
    fx.config.keep_work_dir = false;
    let notifier = Arc::new(RecordingNotifier::default());
    let pipeline = Pipeline::new(fx.config.clone(), fx.storage.clone(), notifier.clone());

    let outcome = pipeline
        .run(&JobRequest::with_job_id("job-5", "proj-1", "t-1"))
        .unwrap();
    assert!(!fx.dir.path().join("work/job-5").exists());
    assert!(!outcome.artifact(GRID_ARTIFACT).unwrap().path.exists());
    assert!(fx
        .dir
        .path()
        .join("storage/produtos_finais/proj-1")
        .join(GRID_ARTIFACT)
        .exists());
}

#[test]
fn test_five_band_orthomosaic_with_ndvi() {
    let mut fx = fixture_with(&multispectral(), Some(GRID));
    fx.config.formula = IndexFormula::Ndvi;
    fx.config.band_map.nir = 5;
    let notifier = Arc::new(RecordingNotifier::default());
    let pipeline = Pipeline::new(fx.config.clone(), fx.storage.clone(), notifier.clone());

    let outcome = pipeline
        .run(&JobRequest::with_job_id("job-6", "proj-1", "t-1"))
        .unwrap();
    assert_eq!(
        notifier.statuses(),
        vec![JobStatus::Started, JobStatus::Completed]
    );

    // NDVI = (NIR - R) / (NIR + R): 0.8, 0.75, 0.667, 0.5
    let ranked = outcome.ranked.by_rank();
    let ids: Vec<i64> = ranked.iter().map(|c| c.cell.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
    assert_relative_eq!(ranked[0].mean().unwrap(), 0.8, epsilon = 1e-6);
    assert_relative_eq!(ranked[3].mean().unwrap(), 0.5, epsilon = 1e-6);

    let clipped = geotiff::read(&outcome.artifact(CLIPPED_ARTIFACT).unwrap().path).unwrap();
    assert_eq!(clipped.band_count(), 5);
    assert_eq!(clipped.sample_type(), SampleType::U16);
    assert_eq!(clipped.band(5).unwrap(), multispectral().band(5).unwrap());
    assert!(outcome.artifact("ndvi.tif").is_some());
}

#[test]
fn test_cell_outside_orthomosaic_kept_unranked() {
    let fx = fixture_with(&orthomosaic(), Some(GRID_WITH_OUTSIDE_CELL));
    let notifier = Arc::new(RecordingNotifier::default());
    let pipeline = Pipeline::new(fx.config.clone(), fx.storage.clone(), notifier.clone());

    let outcome = pipeline
        .run(&JobRequest::with_job_id("job-7", "proj-1", "t-1"))
        .unwrap();
    assert_eq!(outcome.metrics.total_cells, 5);
    assert_eq!(outcome.metrics.ranked_cells, 4);
    assert_relative_eq!(outcome.metrics.total_area, 20.0);

    let outside = &outcome.ranked.cells()[4];
    assert_eq!(outside.cell.id, 5);
    assert!(outside.stats.is_none());
    assert!(outside.rank.is_none());

    let grid_text =
        std::fs::read_to_string(&outcome.artifact(GRID_ARTIFACT).unwrap().path).unwrap();
    let grid: serde_json::Value = serde_json::from_str(&grid_text).unwrap();
    let features = grid["features"].as_array().unwrap();
    assert_eq!(features.len(), 5);

    let props = features[4]["properties"].as_object().unwrap();
    assert_eq!(props["id"], 5);
    assert_eq!(props["block"], "far");
    assert_eq!(props["count"], 0);
    for key in [
        "min",
        "max",
        "mean",
        "median",
        "std",
        "rank",
        "percentile",
        "category",
    ] {
        assert!(props.contains_key(key), "{} missing", key);
        assert!(props[key].is_null(), "{} should be null", key);
    }
    assert_eq!(features[3]["properties"]["rank"], 4);
}
