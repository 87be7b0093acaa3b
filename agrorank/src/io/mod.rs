//! Encoding and decoding of the pipeline's raster and vector artifacts

pub mod geojson_io;
pub mod geotiff;
