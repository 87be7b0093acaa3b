use geo::BoundingRect;

use crate::collect::global_variables::DEFAULT_CLIP_NODATA;
use crate::error::{Error, Result};
use crate::geo_core::{reconcile, BoundingBox};
use crate::geometric::rasterize::{touched_mask, window_for};
use crate::raster::RasterDataset;
use crate::vector::Boundary;

/// Clip a raster to a field boundary.
///
/// The output covers the boundary's bounding box snapped outward to the
/// raster grid. Every pixel touched by the boundary keeps its values, all
/// others are set to the raster nodata (or `0`, which then becomes the
/// output's declared nodata). Band count and sample type are preserved.
pub fn clip(raster: &RasterDataset, boundary: &Boundary) -> Result<RasterDataset> {
    if raster.transform().is_rotated() {
        return Err(Error::Unsupported(
            "Clipping rasters with a rotated geotransform".to_string(),
        ));
    }

    let geometry = reconcile(boundary.geometry(), boundary.crs(), raster.crs())?;

    let bbox = geometry
        .bounding_rect()
        .map(BoundingBox::from_rect)
        .ok_or_else(|| Error::Geometry("Boundary polygon is empty".to_string()))?;
    if !bbox.overlaps(&raster.bounds()) {
        return Err(Error::Geometry(
            "Boundary does not intersect the raster extent".to_string(),
        ));
    }

    let window = window_for(raster.transform(), raster.width(), raster.height(), &geometry)
        .ok_or_else(|| {
            Error::Geometry("Boundary does not intersect the raster extent".to_string())
        })?;
    let mask = touched_mask(raster.transform(), &window, &geometry);
    let kept = mask.iter().filter(|m| **m).count();
    if kept == 0 {
        return Err(Error::Geometry(
            "Boundary does not cover any raster pixel".to_string(),
        ));
    }

    let nodata = raster.nodata().unwrap_or(DEFAULT_CLIP_NODATA);
    let width = raster.width();
    let bands = raster
        .bands()
        .iter()
        .map(|band| {
            let mut out = Vec::with_capacity(window.len());
            for row in 0..window.height {
                let src_row = (window.row_off + row) * width + window.col_off;
                for col in 0..window.width {
                    out.push(if mask[row * window.width + col] {
                        band[src_row + col]
                    } else {
                        nodata
                    });
                }
            }
            out
        })
        .collect();

    log::info!(
        "Clipped raster to {}x{} window at ({}, {}), {} of {} pixels inside the boundary",
        window.width,
        window.height,
        window.col_off,
        window.row_off,
        kept,
        window.len()
    );

    Ok(RasterDataset::new(
        window.width,
        window.height,
        bands,
        raster.transform().shifted(window.col_off, window.row_off),
        raster.sample_type(),
    )?
    .with_crs(raster.crs().cloned())
    .with_nodata(Some(nodata)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_core::{Crs, GeoTransform};
    use crate::raster::SampleType;
    use approx::assert_relative_eq;
    use geo::{polygon, MultiPolygon};

    /// 10x10 RGB raster of 1m pixels with top-left corner at (100, 210)
    fn ortho(nodata: Option<f64>) -> RasterDataset {
        let band = |offset: f64| (0..100).map(|i| offset + i as f64).collect::<Vec<_>>();
        RasterDataset::new(
            10,
            10,
            vec![band(1.0), band(101.0), band(201.0)],
            GeoTransform::new(100.0, 210.0, 1.0, -1.0),
            SampleType::U16,
        )
        .unwrap()
        .with_crs(Some(Crs::from_epsg(31983)))
        .with_nodata(nodata)
    }

    fn boundary(geometry: MultiPolygon<f64>) -> Boundary {
        Boundary::new(geometry, Some(Crs::from_epsg(31983))).unwrap()
    }

    #[test]
    fn test_aligned_square_keeps_exact_window() {
        // Covers cols 2..5, rows 6..9
        let b = boundary(MultiPolygon(vec![polygon![
            (x: 102.0, y: 201.0),
            (x: 105.0, y: 201.0),
            (x: 105.0, y: 204.0),
            (x: 102.0, y: 204.0),
        ]]));
        let clipped = clip(&ortho(None), &b).unwrap();

        assert_eq!((clipped.width(), clipped.height()), (3, 3));
        assert_eq!(clipped.band_count(), 3);
        assert_eq!(clipped.sample_type(), SampleType::U16);
        assert_relative_eq!(clipped.transform().origin_x, 102.0);
        assert_relative_eq!(clipped.transform().origin_y, 204.0);
        assert_eq!(clipped.nodata(), Some(0.0));
        // (col 2, row 6) in the source is index 62, band 1 = 63
        assert_eq!(clipped.get(1, 0, 0), Some(63.0));
        assert!(clipped.band(1).unwrap().iter().all(|v| *v != 0.0));
    }

    #[test]
    fn test_pixels_outside_triangle_become_nodata() {
        let b = boundary(MultiPolygon(vec![polygon![
            (x: 100.0, y: 200.0),
            (x: 104.0, y: 200.0),
            (x: 100.0, y: 204.0),
        ]]));
        let clipped = clip(&ortho(Some(65535.0)), &b).unwrap();
        assert_eq!((clipped.width(), clipped.height()), (4, 4));
        assert_eq!(clipped.nodata(), Some(65535.0));
        // top-right pixel lies above the hypotenuse
        assert_eq!(clipped.get(1, 3, 0), Some(65535.0));
        let kept = clipped
            .band(1)
            .unwrap()
            .iter()
            .filter(|v| **v != 65535.0)
            .count();
        assert_eq!(kept, 10);
    }

    #[test]
    fn test_boundary_outside_raster() {
        let b = boundary(MultiPolygon(vec![polygon![
            (x: 500.0, y: 500.0),
            (x: 510.0, y: 500.0),
            (x: 510.0, y: 510.0),
        ]]));
        assert!(matches!(clip(&ortho(None), &b), Err(Error::Geometry(_))));
    }

    #[test]
    fn test_boundary_touching_edge_only() {
        let b = boundary(MultiPolygon(vec![polygon![
            (x: 110.0, y: 200.0),
            (x: 120.0, y: 200.0),
            (x: 120.0, y: 210.0),
            (x: 110.0, y: 210.0),
        ]]));
        assert!(matches!(clip(&ortho(None), &b), Err(Error::Geometry(_))));
    }

    #[test]
    fn test_rotated_raster_unsupported() {
        let mut gt = GeoTransform::new(100.0, 210.0, 1.0, -1.0);
        gt.row_rotation = 0.3;
        let raster =
            RasterDataset::new(2, 2, vec![vec![1.0; 4]], gt, SampleType::U8).unwrap();
        let b = Boundary::new(
            MultiPolygon(vec![polygon![
                (x: 100.0, y: 209.0),
                (x: 101.0, y: 209.0),
                (x: 101.0, y: 210.0),
            ]]),
            None,
        )
        .unwrap();
        assert!(matches!(clip(&raster, &b), Err(Error::Unsupported(_))));
    }

    #[cfg(not(feature = "proj"))]
    #[test]
    fn test_crs_mismatch() {
        let b = Boundary::new(
            MultiPolygon(vec![polygon![
                (x: 102.0, y: 201.0),
                (x: 105.0, y: 201.0),
                (x: 105.0, y: 204.0),
            ]]),
            Some(Crs::from_epsg(4326)),
        )
        .unwrap();
        assert!(matches!(
            clip(&ortho(None), &b),
            Err(Error::CrsMismatch { .. })
        ));
    }
}
