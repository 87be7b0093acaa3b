use std::path::PathBuf;

/// Root of the per-job working directories
pub const WORK_ROOT: &str = "./work";

/// Nodata sentinel written to index rasters
pub const INDEX_NODATA: f64 = -9999.0;

/// Floor applied to index denominators before division
pub const DENOMINATOR_EPSILON: f64 = 1e-10;

/// Nodata used for clipped rasters that declare none
pub const DEFAULT_CLIP_NODATA: f64 = 0.0;

pub const DEFAULT_ORTHOMOSAIC_LOCATOR: &str = "Ortomosaicos/{project}/ortomosaico.tif";
pub const DEFAULT_BOUNDARY_LOCATOR: &str = "talhoes/{parcel}/poligono.geojson";
pub const DEFAULT_GRID_LOCATOR: &str = "talhoes/{parcel}/grade_entrada.geojson";
pub const DEFAULT_OUTPUT_PREFIX: &str = "produtos_finais/{project}";

pub fn get_work_root() -> PathBuf {
    PathBuf::from(WORK_ROOT)
}
