//! Boundary polygons and sub-parcel grids

use std::collections::HashSet;

use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::{Area, BoundingRect, Coord, Line, LineString, MultiPolygon, Polygon};

use crate::error::{Error, Result};
use crate::geo_core::{BoundingBox, Crs};

/// Field boundary: union of one or more polygons in a single CRS
#[derive(Debug, Clone, PartialEq)]
pub struct Boundary {
    geometry: MultiPolygon<f64>,
    crs: Option<Crs>,
}

impl Boundary {
    /// Create a boundary, rejecting empty or invalid geometry
    pub fn new(geometry: MultiPolygon<f64>, crs: Option<Crs>) -> Result<Self> {
        if geometry.0.is_empty() {
            return Err(Error::Geometry("Boundary polygon is empty".to_string()));
        }
        validate_multipolygon(&geometry)?;
        Ok(Boundary { geometry, crs })
    }

    pub fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }

    pub fn crs(&self) -> Option<&Crs> {
        self.crs.as_ref()
    }

    pub fn bbox(&self) -> Option<BoundingBox> {
        self.geometry.bounding_rect().map(BoundingBox::from_rect)
    }
}

/// One sub-parcel of a grid
#[derive(Debug, Clone, PartialEq)]
pub struct GridCell {
    pub id: i64,
    pub geometry: MultiPolygon<f64>,
    /// Attributes carried over from the input feature
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl GridCell {
    /// Planar area in CRS units
    pub fn area(&self) -> f64 {
        self.geometry.unsigned_area()
    }
}

/// Grid cell as read from input, before identifiers are settled
#[derive(Debug, Clone)]
pub struct CellFeature {
    pub id: Option<i64>,
    pub geometry: MultiPolygon<f64>,
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// Ordered collection of grid cells with unique identifiers
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    cells: Vec<GridCell>,
    crs: Option<Crs>,
}

impl Grid {
    /// Build a grid from input features.
    ///
    /// Features without an identifier receive the next free integer: when no
    /// feature has one this is the dense sequence `1..=N` in iteration order,
    /// otherwise numbering continues after the largest existing id.
    /// Duplicate identifiers are rejected.
    pub fn from_features(features: Vec<CellFeature>, crs: Option<Crs>) -> Result<Self> {
        let mut next_id = features
            .iter()
            .filter_map(|f| f.id)
            .max()
            .map_or(1, |max| max + 1);

        let mut seen = HashSet::new();
        let mut cells = Vec::with_capacity(features.len());

        for feature in features {
            let id = match feature.id {
                Some(id) => id,
                None => {
                    let id = next_id;
                    next_id += 1;
                    id
                }
            };
            if !seen.insert(id) {
                return Err(Error::Geometry(format!("Duplicate grid cell id {}", id)));
            }
            validate_multipolygon(&feature.geometry)
                .map_err(|e| Error::Geometry(format!("Grid cell {}: {}", id, e)))?;
            cells.push(GridCell {
                id,
                geometry: feature.geometry,
                properties: feature.properties,
            });
        }

        Ok(Grid { cells, crs })
    }

    /// Build a grid from bare geometries, numbering cells from 1
    pub fn from_geometries(geometries: Vec<MultiPolygon<f64>>, crs: Option<Crs>) -> Result<Self> {
        let features = geometries
            .into_iter()
            .map(|geometry| CellFeature {
                id: None,
                geometry,
                properties: serde_json::Map::new(),
            })
            .collect();
        Grid::from_features(features, crs)
    }

    pub fn cells(&self) -> &[GridCell] {
        &self.cells
    }

    pub fn crs(&self) -> Option<&Crs> {
        self.crs.as_ref()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Check polygon validity: closed rings with at least three distinct
/// vertices, finite coordinates, non-zero area and no self-intersection.
pub fn validate_multipolygon(geometry: &MultiPolygon<f64>) -> Result<()> {
    if geometry.0.is_empty() {
        return Err(Error::Geometry("empty geometry".to_string()));
    }
    for polygon in &geometry.0 {
        validate_polygon(polygon)?;
    }
    Ok(())
}

fn validate_polygon(polygon: &Polygon<f64>) -> Result<()> {
    validate_ring(polygon.exterior())?;
    for hole in polygon.interiors() {
        validate_ring(hole)?;
    }
    if polygon.unsigned_area() <= 0.0 {
        return Err(Error::Geometry("polygon has zero area".to_string()));
    }
    Ok(())
}

fn validate_ring(ring: &LineString<f64>) -> Result<()> {
    if ring.0.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return Err(Error::Geometry("ring has non-finite coordinates".to_string()));
    }
    if !ring.is_closed() {
        return Err(Error::Geometry("ring is not closed".to_string()));
    }

    let mut distinct: Vec<Coord<f64>> = Vec::new();
    for c in &ring.0 {
        if !distinct.contains(c) {
            distinct.push(*c);
        }
    }
    if distinct.len() < 3 {
        return Err(Error::Geometry(
            "ring needs at least three distinct vertices".to_string(),
        ));
    }

    if ring_self_intersects(ring) {
        return Err(Error::Geometry("ring is self-intersecting".to_string()));
    }
    Ok(())
}

/// Pairwise segment test: non-adjacent segments must not meet, adjacent
/// ones may only share their common vertex
fn ring_self_intersects(ring: &LineString<f64>) -> bool {
    let lines: Vec<Line<f64>> = ring
        .lines()
        .filter(|l| l.start != l.end)
        .collect();
    let n = lines.len();
    for i in 0..n {
        for j in (i + 1)..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            match line_intersection(lines[i], lines[j]) {
                None => {}
                Some(LineIntersection::SinglePoint { .. }) if adjacent => {}
                // a spike folds back over the previous segment
                Some(_) => return true,
            }
        }
    }
    false
}
