//! In-memory multi-band raster

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geo_core::{BoundingBox, Crs, GeoTransform};

/// On-disk sample type of a raster band.
///
/// Samples are always held as `f64` in memory; the sample type only decides
/// how a dataset is encoded when it is written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleType {
    U8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl SampleType {
    pub fn is_float(&self) -> bool {
        matches!(self, SampleType::F32 | SampleType::F64)
    }
}

/// Raster dataset: ordered bands sharing one grid, transform and CRS
#[derive(Debug, Clone, PartialEq)]
pub struct RasterDataset {
    width: usize,
    height: usize,
    bands: Vec<Vec<f64>>,
    transform: GeoTransform,
    crs: Option<Crs>,
    nodata: Option<f64>,
    sample_type: SampleType,
}

impl RasterDataset {
    /// Create a dataset from row-major bands, each `width * height` samples long
    pub fn new(
        width: usize,
        height: usize,
        bands: Vec<Vec<f64>>,
        transform: GeoTransform,
        sample_type: SampleType,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::RasterIo(format!(
                "Invalid raster dimensions: {}x{}",
                width, height
            )));
        }
        if bands.is_empty() {
            return Err(Error::RasterIo("Raster has no bands".to_string()));
        }
        if let Some((idx, band)) = bands
            .iter()
            .enumerate()
            .find(|(_, b)| b.len() != width * height)
        {
            return Err(Error::RasterIo(format!(
                "Band {} has {} samples, expected {}",
                idx + 1,
                band.len(),
                width * height
            )));
        }

        Ok(RasterDataset {
            width,
            height,
            bands,
            transform,
            crs: None,
            nodata: None,
            sample_type,
        })
    }

    pub fn with_crs(mut self, crs: Option<Crs>) -> Self {
        self.crs = crs;
        self
    }

    pub fn with_nodata(mut self, nodata: Option<f64>) -> Self {
        self.nodata = nodata;
        self
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// Get a band by its 1-based index
    pub fn band(&self, index: usize) -> Result<&[f64]> {
        if index == 0 {
            return Err(Error::InvalidParameter {
                name: "band",
                value: "0".to_string(),
                reason: "band indices are 1-based".to_string(),
            });
        }
        self.bands
            .get(index - 1)
            .map(|b| b.as_slice())
            .ok_or(Error::BandCount {
                required: index,
                available: self.bands.len(),
            })
    }

    pub fn bands(&self) -> &[Vec<f64>] {
        &self.bands
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn crs(&self) -> Option<&Crs> {
        self.crs.as_ref()
    }

    pub fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    pub fn sample_type(&self) -> SampleType {
        self.sample_type
    }

    pub fn bounds(&self) -> BoundingBox {
        self.transform.bounds(self.width, self.height)
    }

    /// Sample at (col, row) of a 1-based band, `None` outside the grid
    pub fn get(&self, band: usize, col: usize, row: usize) -> Option<f64> {
        if col >= self.width || row >= self.height || band == 0 {
            return None;
        }
        self.bands
            .get(band - 1)
            .map(|b| b[row * self.width + col])
    }

    /// True for NaN and for values equal to the nodata sentinel
    pub fn is_nodata(&self, value: f64) -> bool {
        is_nodata(value, self.nodata)
    }
}

pub(crate) fn is_nodata(value: f64, nodata: Option<f64>) -> bool {
    if value.is_nan() {
        return true;
    }
    match nodata {
        Some(nd) if nd.is_nan() => false,
        Some(nd) => (value - nd).abs() < f64::EPSILON * nd.abs().max(1.0),
        None => false,
    }
}
