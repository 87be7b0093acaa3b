//! Pixel-wise vegetation indices

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::collect::global_variables::{DENOMINATOR_EPSILON, INDEX_NODATA};
use crate::commons::basic_functions::{mean, median_sorted, percentile_sorted, population_std};
use crate::error::{Error, Result};
use crate::maybe_rayon::*;
use crate::raster::{is_nodata, RasterDataset, SampleType};

/// Vegetation index formula
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexFormula {
    /// Visible Atmospherically Resistant Index: (G - R) / (G + R - B)
    Vari,
    /// Normalized Difference Vegetation Index: (NIR - RED) / (NIR + RED)
    Ndvi,
    /// Green NDVI: (NIR - GREEN) / (NIR + GREEN)
    Gndvi,
}

impl IndexFormula {
    pub fn name(&self) -> &'static str {
        match self {
            IndexFormula::Vari => "vari",
            IndexFormula::Ndvi => "ndvi",
            IndexFormula::Gndvi => "gndvi",
        }
    }

    /// 1-based bands the formula reads, in evaluation order
    pub fn bands(&self, map: &BandMap) -> Vec<usize> {
        match self {
            IndexFormula::Vari => vec![map.red, map.green, map.blue],
            IndexFormula::Ndvi => vec![map.nir, map.red],
            IndexFormula::Gndvi => vec![map.nir, map.green],
        }
    }

    /// Numerator and denominator for samples given in [`IndexFormula::bands`] order
    fn terms(&self, s: &[f64]) -> (f64, f64) {
        match self {
            IndexFormula::Vari => (s[1] - s[0], s[1] + s[0] - s[2]),
            IndexFormula::Ndvi | IndexFormula::Gndvi => (s[0] - s[1], s[0] + s[1]),
        }
    }
}

impl fmt::Display for IndexFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for IndexFormula {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vari" => Ok(IndexFormula::Vari),
            "ndvi" => Ok(IndexFormula::Ndvi),
            "gndvi" => Ok(IndexFormula::Gndvi),
            _ => Err(Error::InvalidParameter {
                name: "formula",
                value: s.to_string(),
                reason: "expected one of vari, ndvi, gndvi".to_string(),
            }),
        }
    }
}

/// 1-based positions of the spectral bands in the source raster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandMap {
    pub red: usize,
    pub green: usize,
    pub blue: usize,
    pub nir: usize,
}

impl Default for BandMap {
    fn default() -> Self {
        BandMap {
            red: 1,
            green: 2,
            blue: 3,
            nir: 4,
        }
    }
}

fn evaluate(formula: IndexFormula, samples: &[f64], nodata: Option<f64>) -> f64 {
    if samples.iter().any(|v| v.is_nan()) {
        return INDEX_NODATA;
    }
    if nodata.is_some() && samples.iter().all(|v| is_nodata(*v, nodata)) {
        return INDEX_NODATA;
    }

    let (numerator, denominator) = formula.terms(samples);
    let denominator = if denominator.abs() < DENOMINATOR_EPSILON {
        DENOMINATOR_EPSILON
    } else {
        denominator
    };
    let value = (numerator / denominator).clamp(-1.0, 1.0);
    // stored as float32
    value as f32 as f64
}

/// Compute a vegetation index raster.
///
/// The output is a single float32 band on the source grid with nodata
/// `-9999`, written wherever every selected band holds the source nodata.
pub fn compute(
    raster: &RasterDataset,
    formula: IndexFormula,
    band_map: &BandMap,
) -> Result<RasterDataset> {
    let indices = formula.bands(band_map);
    if let Some(zero) = indices.iter().find(|i| **i == 0) {
        return Err(Error::InvalidParameter {
            name: "band",
            value: zero.to_string(),
            reason: "band indices are 1-based".to_string(),
        });
    }
    let required = indices.iter().copied().max().unwrap_or(1);
    if required > raster.band_count() {
        return Err(Error::BandCount {
            required,
            available: raster.band_count(),
        });
    }

    let bands = indices
        .iter()
        .map(|i| raster.band(*i))
        .collect::<Result<Vec<&[f64]>>>()?;
    let nodata = raster.nodata();

    log::info!(
        "Computing {} over {}x{} pixels (bands {:?})",
        formula,
        raster.width(),
        raster.height(),
        indices
    );

    let values: Vec<f64> = (0..raster.width() * raster.height())
        .into_par_iter()
        .map(|i| {
            let mut samples = [0.0; 3];
            for (slot, band) in samples.iter_mut().zip(&bands) {
                *slot = band[i];
            }
            evaluate(formula, &samples[..bands.len()], nodata)
        })
        .collect();

    Ok(RasterDataset::new(
        raster.width(),
        raster.height(),
        vec![values],
        *raster.transform(),
        SampleType::F32,
    )?
    .with_crs(raster.crs().cloned())
    .with_nodata(Some(INDEX_NODATA)))
}

/// Distribution of the valid samples of an index raster
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexSummary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub p25: f64,
    pub p75: f64,
    pub valid_count: usize,
}

/// Summarise band 1 of an index raster; `None` when no sample is valid
pub fn summarize(index: &RasterDataset) -> Option<IndexSummary> {
    let mut valid: Vec<f64> = index
        .band(1)
        .ok()?
        .iter()
        .copied()
        .filter(|v| !index.is_nodata(*v))
        .collect();
    if valid.is_empty() {
        return None;
    }
    valid.sort_by(|a, b| a.total_cmp(b));

    let mean = mean(&valid)?;
    Some(IndexSummary {
        min: valid[0],
        max: valid[valid.len() - 1],
        mean,
        median: median_sorted(&valid)?,
        std: population_std(&valid, mean),
        p25: percentile_sorted(&valid, 25.0)?,
        p75: percentile_sorted(&valid, 75.0)?,
        valid_count: valid.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_core::{Crs, GeoTransform};
    use approx::assert_relative_eq;

    fn pixel(values: &[f64], nodata: Option<f64>) -> RasterDataset {
        RasterDataset::new(
            1,
            1,
            values.iter().map(|v| vec![*v]).collect(),
            GeoTransform::new(0.0, 1.0, 1.0, -1.0),
            SampleType::U8,
        )
        .unwrap()
        .with_crs(Some(Crs::from_epsg(31983)))
        .with_nodata(nodata)
    }

    #[test]
    fn test_vari_ndvi_gndvi_values() {
        let raster = pixel(&[50.0, 150.0, 50.0, 200.0], None);
        let map = BandMap::default();

        let vari = compute(&raster, IndexFormula::Vari, &map).unwrap();
        assert_relative_eq!(vari.get(1, 0, 0).unwrap(), 2.0 / 3.0, epsilon = 1e-6);

        let ndvi = compute(&raster, IndexFormula::Ndvi, &map).unwrap();
        assert_relative_eq!(ndvi.get(1, 0, 0).unwrap(), 0.6, epsilon = 1e-6);

        let gndvi = compute(&raster, IndexFormula::Gndvi, &map).unwrap();
        assert_relative_eq!(gndvi.get(1, 0, 0).unwrap(), 50.0 / 350.0, epsilon = 1e-6);
    }

    #[test]
    fn test_output_metadata() {
        let raster = pixel(&[50.0, 150.0, 50.0], None);
        let vari = compute(&raster, IndexFormula::Vari, &BandMap::default()).unwrap();
        assert_eq!(vari.band_count(), 1);
        assert_eq!(vari.sample_type(), SampleType::F32);
        assert_eq!(vari.nodata(), Some(-9999.0));
        assert_eq!(vari.crs(), raster.crs());
        assert_eq!(vari.transform(), raster.transform());
    }

    #[test]
    fn test_zero_denominator_is_clamped() {
        // G + R - B == 0
        let raster = pixel(&[0.0, 100.0, 100.0], None);
        let vari = compute(&raster, IndexFormula::Vari, &BandMap::default()).unwrap();
        assert_eq!(vari.get(1, 0, 0), Some(1.0));

        let raster = pixel(&[0.0, 0.0, 0.0], None);
        let vari = compute(&raster, IndexFormula::Vari, &BandMap::default()).unwrap();
        assert_eq!(vari.get(1, 0, 0), Some(0.0));
    }

    #[test]
    fn test_result_always_in_range() {
        let raster = pixel(&[200.0, 10.0, 250.0], None);
        let vari = compute(&raster, IndexFormula::Vari, &BandMap::default()).unwrap();
        let v = vari.get(1, 0, 0).unwrap();
        assert!((-1.0..=1.0).contains(&v));
    }

    #[test]
    fn test_nodata_propagates() {
        let raster = pixel(&[0.0, 0.0, 0.0], Some(0.0));
        let vari = compute(&raster, IndexFormula::Vari, &BandMap::default()).unwrap();
        assert_eq!(vari.get(1, 0, 0), Some(-9999.0));

        // A single nodata band is still a real measurement
        let raster = pixel(&[50.0, 150.0, 0.0], Some(0.0));
        let vari = compute(&raster, IndexFormula::Vari, &BandMap::default()).unwrap();
        assert_relative_eq!(vari.get(1, 0, 0).unwrap(), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_band_count_error() {
        let raster = pixel(&[1.0, 2.0], None);
        let err = compute(&raster, IndexFormula::Vari, &BandMap::default()).unwrap_err();
        assert!(matches!(
            err,
            Error::BandCount {
                required: 3,
                available: 2
            }
        ));

        let err = compute(&raster, IndexFormula::Ndvi, &BandMap::default()).unwrap_err();
        assert!(matches!(err, Error::BandCount { required: 4, .. }));
    }

    #[test]
    fn test_zero_band_index_rejected() {
        let raster = pixel(&[1.0, 2.0, 3.0], None);
        let map = BandMap {
            red: 0,
            ..BandMap::default()
        };
        assert!(matches!(
            compute(&raster, IndexFormula::Vari, &map),
            Err(Error::InvalidParameter { name: "band", .. })
        ));
    }

    #[test]
    fn test_custom_band_map() {
        // NIR first, red second
        let raster = pixel(&[200.0, 50.0], None);
        let map = BandMap {
            nir: 1,
            red: 2,
            ..BandMap::default()
        };
        let ndvi = compute(&raster, IndexFormula::Ndvi, &map).unwrap();
        assert_relative_eq!(ndvi.get(1, 0, 0).unwrap(), 0.6, epsilon = 1e-6);
    }

    #[test]
    fn test_formula_parsing() {
        assert_eq!("VARI".parse::<IndexFormula>().unwrap(), IndexFormula::Vari);
        assert_eq!(" gndvi ".parse::<IndexFormula>().unwrap(), IndexFormula::Gndvi);
        assert!("evi".parse::<IndexFormula>().is_err());
        assert_eq!(IndexFormula::Ndvi.to_string(), "ndvi");
    }

    #[test]
    fn test_summarize_skips_nodata() {
        let index = RasterDataset::new(
            5,
            1,
            vec![vec![0.1, 0.2, -9999.0, 0.3, 0.4]],
            GeoTransform::default(),
            SampleType::F32,
        )
        .unwrap()
        .with_nodata(Some(-9999.0));

        let summary = summarize(&index).unwrap();
        assert_eq!(summary.valid_count, 4);
        assert_relative_eq!(summary.min, 0.1);
        assert_relative_eq!(summary.max, 0.4);
        assert_relative_eq!(summary.mean, 0.25, epsilon = 1e-12);
        assert_relative_eq!(summary.median, 0.25, epsilon = 1e-12);
        assert_relative_eq!(summary.p25, 0.175, epsilon = 1e-12);
        assert_relative_eq!(summary.p75, 0.325, epsilon = 1e-12);
    }
}
