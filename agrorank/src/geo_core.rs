use std::borrow::Cow;
use std::fmt;

use geo::{MultiPolygon, Rect};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Coordinate Reference System of a raster or vector input
/// Carries the EPSG code when known, plus the textual definition it was parsed from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crs {
    epsg: Option<u32>,
    definition: Option<String>,
}

impl Crs {
    /// Create a CRS from an EPSG code
    pub fn from_epsg(code: u32) -> Self {
        Crs {
            epsg: Some(code),
            definition: None,
        }
    }

    /// Parse a CRS name as found in GeoJSON `crs` members or configuration
    ///
    /// Accepts `EPSG:31983`, `epsg:31983`, `urn:ogc:def:crs:EPSG::31983`
    /// and the OGC CRS84 urn (mapped to EPSG:4326). Anything else is kept
    /// as an opaque definition without EPSG code.
    pub fn parse(name: &str) -> Self {
        let trimmed = name.trim();
        if trimmed.ends_with("CRS84") {
            return Crs {
                epsg: Some(4326),
                definition: Some(trimmed.to_string()),
            };
        }

        let code = trimmed
            .rsplit(':')
            .next()
            .filter(|_| trimmed.to_ascii_uppercase().contains("EPSG"))
            .and_then(|c| c.parse::<u32>().ok());

        Crs {
            epsg: code,
            definition: Some(trimmed.to_string()),
        }
    }

    /// Get EPSG code if known
    pub fn epsg(&self) -> Option<u32> {
        self.epsg
    }

    /// True when both CRSs carry EPSG codes and the codes differ
    pub fn differs_from(&self, other: &Crs) -> bool {
        matches!((self.epsg, other.epsg), (Some(a), Some(b)) if a != b)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.epsg, &self.definition) {
            (Some(code), _) => write!(f, "EPSG:{}", code),
            (None, Some(def)) => write!(f, "{}", def),
            (None, None) => write!(f, "unknown"),
        }
    }
}

/// Bounding box structure
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        BoundingBox {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn from_rect(rect: Rect<f64>) -> Self {
        BoundingBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }

    /// Overlap test with a positive-area intersection (touching edges do not count)
    pub fn overlaps(&self, other: &BoundingBox) -> bool {
        self.min_x < other.max_x
            && other.min_x < self.max_x
            && self.min_y < other.max_y
            && other.min_y < self.max_y
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

/// Affine geotransform in GDAL coefficient order.
///
/// ```text
/// x = origin_x + col * pixel_width + row * row_rotation
/// y = origin_y + col * col_rotation + row * pixel_height
/// ```
///
/// North-up rasters have zero rotations and a negative `pixel_height`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
    pub row_rotation: f64,
    pub col_rotation: f64,
}

impl GeoTransform {
    /// Create a north-up GeoTransform
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        GeoTransform {
            origin_x,
            origin_y,
            pixel_width,
            pixel_height,
            row_rotation: 0.0,
            col_rotation: 0.0,
        }
    }

    /// Create from GDAL-style array [origin_x, pixel_width, row_rotation, origin_y, col_rotation, pixel_height]
    pub fn from_gdal(coeffs: [f64; 6]) -> Self {
        GeoTransform {
            origin_x: coeffs[0],
            pixel_width: coeffs[1],
            row_rotation: coeffs[2],
            origin_y: coeffs[3],
            col_rotation: coeffs[4],
            pixel_height: coeffs[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.origin_x,
            self.pixel_width,
            self.row_rotation,
            self.origin_y,
            self.col_rotation,
            self.pixel_height,
        ]
    }

    pub fn is_rotated(&self) -> bool {
        self.row_rotation.abs() > 1e-12 || self.col_rotation.abs() > 1e-12
    }

    /// Top-left corner of pixel (col, row)
    pub fn pixel_corner(&self, col: usize, row: usize) -> (f64, f64) {
        let c = col as f64;
        let r = row as f64;
        (
            self.origin_x + c * self.pixel_width + r * self.row_rotation,
            self.origin_y + c * self.col_rotation + r * self.pixel_height,
        )
    }

    /// Transform shifted so that pixel (col_off, row_off) becomes the origin
    pub fn shifted(&self, col_off: usize, row_off: usize) -> Self {
        let (origin_x, origin_y) = self.pixel_corner(col_off, row_off);
        GeoTransform {
            origin_x,
            origin_y,
            ..*self
        }
    }

    /// Extent of a `width x height` raster
    pub fn bounds(&self, width: usize, height: usize) -> BoundingBox {
        let corners = [
            self.pixel_corner(0, 0),
            self.pixel_corner(width, 0),
            self.pixel_corner(0, height),
            self.pixel_corner(width, height),
        ];
        let mut bbox = BoundingBox::new(f64::MAX, f64::MAX, f64::MIN, f64::MIN);
        for (x, y) in corners {
            bbox.min_x = bbox.min_x.min(x);
            bbox.min_y = bbox.min_y.min(y);
            bbox.max_x = bbox.max_x.max(x);
            bbox.max_y = bbox.max_y.max(y);
        }
        bbox
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        GeoTransform::new(0.0, 0.0, 1.0, -1.0)
    }
}

/// Bring a vector geometry into the raster CRS.
///
/// Geometries are returned untouched when the CRSs agree or when either side
/// has no known CRS (the missing one is assumed to match). Differing EPSG
/// codes are reprojected with PROJ when the `proj` feature is enabled and
/// rejected with [`Error::CrsMismatch`] otherwise.
pub fn reconcile<'a>(
    geometry: &'a MultiPolygon<f64>,
    vector_crs: Option<&Crs>,
    raster_crs: Option<&Crs>,
) -> Result<Cow<'a, MultiPolygon<f64>>> {
    match (vector_crs, raster_crs) {
        (Some(v), Some(r)) if v.differs_from(r) => {
            log::info!("Reprojecting vector geometry from {} to {}", v, r);
            reproject(geometry, v, r).map(Cow::Owned)
        }
        (Some(v), None) => {
            log::warn!("Raster has no CRS, assuming vector CRS {}", v);
            Ok(Cow::Borrowed(geometry))
        }
        (None, Some(r)) => {
            log::warn!("Vector input has no CRS, assuming raster CRS {}", r);
            Ok(Cow::Borrowed(geometry))
        }
        _ => Ok(Cow::Borrowed(geometry)),
    }
}

/// Reproject a geometry between two CRSs known by EPSG code
#[cfg(feature = "proj")]
pub fn reproject(geometry: &MultiPolygon<f64>, from: &Crs, to: &Crs) -> Result<MultiPolygon<f64>> {
    use geo::MapCoords;
    use proj::Proj;

    let mismatch = || Error::CrsMismatch {
        raster: to.to_string(),
        vector: from.to_string(),
    };

    let transform = Proj::new_known_crs(&from.to_string(), &to.to_string(), None)
        .map_err(|_| mismatch())?;

    geometry
        .try_map_coords(|c| {
            transform
                .convert((c.x, c.y))
                .map(|(x, y)| geo::coord! { x: x, y: y })
        })
        .map_err(|_| mismatch())
}

/// Without PROJ support differing CRSs cannot be reconciled
#[cfg(not(feature = "proj"))]
pub fn reproject(_geometry: &MultiPolygon<f64>, from: &Crs, to: &Crs) -> Result<MultiPolygon<f64>> {
    Err(Error::CrsMismatch {
        raster: to.to_string(),
        vector: from.to_string(),
    })
}
