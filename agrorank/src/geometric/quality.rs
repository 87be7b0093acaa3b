use serde::{Deserialize, Serialize};

use crate::raster::{RasterDataset, SampleType};

/// Default brightness above which a pixel counts as cloud
pub const DEFAULT_CLOUD_THRESHOLD: f64 = 0.2;

/// Basic quality indicators of an orthomosaic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Mean of the absolute pixel width and height, in CRS units
    pub resolution: f64,
    pub band_count: usize,
    pub width: usize,
    pub height: usize,
    pub crs: String,
    /// Fraction of band-1 samples equal to zero
    pub zero_fraction: f64,
    /// Fraction of pixels whose mean RGB brightness exceeds the threshold;
    /// `None` for rasters with fewer than three bands
    pub cloud_cover: Option<f64>,
}

fn full_scale(sample_type: SampleType) -> f64 {
    match sample_type {
        SampleType::U16 => 65535.0,
        _ => 255.0,
    }
}

/// Estimated cloud cover from the first three bands
pub fn cloud_cover(raster: &RasterDataset, threshold: f64) -> Option<f64> {
    if raster.band_count() < 3 {
        return None;
    }
    let bands = raster.bands();
    let scale = full_scale(raster.sample_type());
    let pixels = raster.width() * raster.height();
    let bright = (0..pixels)
        .filter(|i| {
            let brightness = (bands[0][*i] + bands[1][*i] + bands[2][*i]) / (3.0 * scale);
            brightness > threshold
        })
        .count();
    Some(bright as f64 / pixels as f64)
}

/// Assess an orthomosaic; never fails
pub fn assess(raster: &RasterDataset, cloud_threshold: f64) -> QualityReport {
    let transform = raster.transform();
    let band1 = &raster.bands()[0];
    let zeros = band1.iter().filter(|v| **v == 0.0).count();

    let report = QualityReport {
        resolution: (transform.pixel_width.abs() + transform.pixel_height.abs()) / 2.0,
        band_count: raster.band_count(),
        width: raster.width(),
        height: raster.height(),
        crs: raster
            .crs()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
        zero_fraction: zeros as f64 / band1.len() as f64,
        cloud_cover: cloud_cover(raster, cloud_threshold),
    };

    log::info!(
        "Orthomosaic quality: {}x{} px, {} band(s), resolution {:.4}, {:.2}% zeros, cloud cover {}",
        report.width,
        report.height,
        report.band_count,
        report.resolution,
        report.zero_fraction * 100.0,
        report
            .cloud_cover
            .map(|c| format!("{:.2}%", c * 100.0))
            .unwrap_or_else(|| "n/a".to_string())
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_core::{Crs, GeoTransform};
    use approx::assert_relative_eq;

    #[test]
    fn test_assess_rgb() {
        // one dark pixel, one bright, one black (zero) and one mid-grey
        let r = vec![10.0, 250.0, 0.0, 60.0];
        let g = vec![10.0, 250.0, 0.0, 60.0];
        let b = vec![10.0, 250.0, 0.0, 60.0];
        let raster = RasterDataset::new(
            2,
            2,
            vec![r, g, b],
            GeoTransform::new(0.0, 0.0, 0.05, -0.07),
            SampleType::U8,
        )
        .unwrap()
        .with_crs(Some(Crs::from_epsg(31983)));

        let report = assess(&raster, DEFAULT_CLOUD_THRESHOLD);
        assert_relative_eq!(report.resolution, 0.06, epsilon = 1e-12);
        assert_eq!(report.band_count, 3);
        assert_eq!(report.crs, "EPSG:31983");
        assert_relative_eq!(report.zero_fraction, 0.25);
        // 250/255 and 60/255 are above 0.2
        assert_relative_eq!(report.cloud_cover.unwrap(), 0.5);
    }

    #[test]
    fn test_single_band_has_no_cloud_cover() {
        let raster = RasterDataset::new(
            1,
            2,
            vec![vec![0.0, 0.4]],
            GeoTransform::default(),
            SampleType::F32,
        )
        .unwrap();
        let report = assess(&raster, DEFAULT_CLOUD_THRESHOLD);
        assert!(report.cloud_cover.is_none());
        assert_eq!(report.crs, "unknown");
        assert_relative_eq!(report.zero_fraction, 0.5);
    }
}
