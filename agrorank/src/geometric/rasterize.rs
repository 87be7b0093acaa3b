//! All-touched polygon rasterisation
//!
//! A pixel is touched when the interior of its square intersects the
//! polygon: either its centre lies inside (scanline fill) or a ring edge
//! passes through its open interior. Pixels that only share an edge or a
//! corner with the polygon boundary are not touched, so a polygon aligned on
//! the pixel grid touches exactly the pixels it covers.

use geo::{BoundingRect, LineString, MultiPolygon};

use crate::geo_core::GeoTransform;
use crate::maybe_rayon::*;

/// Tolerance (in pixels) absorbing float noise on pixel boundaries
const SNAP_TOLERANCE: f64 = 1e-9;

/// Rectangular block of a raster grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub col_off: usize,
    pub row_off: usize,
    pub width: usize,
    pub height: usize,
}

impl PixelWindow {
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ring edge in window-relative pixel coordinates
#[derive(Debug, Clone, Copy)]
struct PixelEdge {
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
}

fn to_pixel(transform: &GeoTransform, x: f64, y: f64) -> (f64, f64) {
    (
        (x - transform.origin_x) / transform.pixel_width,
        (y - transform.origin_y) / transform.pixel_height,
    )
}

/// Window of a `width x height` grid covering the geometry's bounding box,
/// snapped outward to whole pixels and clamped to the grid.
///
/// Returns `None` when the geometry lies outside the grid.
pub fn window_for(
    transform: &GeoTransform,
    width: usize,
    height: usize,
    geometry: &MultiPolygon<f64>,
) -> Option<PixelWindow> {
    let rect = geometry.bounding_rect()?;
    let (c0, r0) = to_pixel(transform, rect.min().x, rect.max().y);
    let (c1, r1) = to_pixel(transform, rect.max().x, rect.min().y);

    let col_start = (c0.min(c1) + SNAP_TOLERANCE).floor().max(0.0);
    let col_end = (c0.max(c1) - SNAP_TOLERANCE).ceil().min(width as f64);
    let row_start = (r0.min(r1) + SNAP_TOLERANCE).floor().max(0.0);
    let row_end = (r0.max(r1) - SNAP_TOLERANCE).ceil().min(height as f64);

    if !(col_start < col_end && row_start < row_end) {
        return None;
    }

    Some(PixelWindow {
        col_off: col_start as usize,
        row_off: row_start as usize,
        width: (col_end - col_start) as usize,
        height: (row_end - row_start) as usize,
    })
}

fn ring_edges(
    ring: &LineString<f64>,
    transform: &GeoTransform,
    window: &PixelWindow,
    out: &mut Vec<PixelEdge>,
) {
    for line in ring.lines() {
        let (x0, y0) = to_pixel(transform, line.start.x, line.start.y);
        let (x1, y1) = to_pixel(transform, line.end.x, line.end.y);
        out.push(PixelEdge {
            x0: x0 - window.col_off as f64,
            y0: y0 - window.row_off as f64,
            x1: x1 - window.col_off as f64,
            y1: y1 - window.row_off as f64,
        });
    }
}

/// Liang-Barsky test of a segment against an axis-aligned box
fn segment_hits_box(e: &PixelEdge, xmin: f64, xmax: f64, ymin: f64, ymax: f64) -> bool {
    let dx = e.x1 - e.x0;
    let dy = e.y1 - e.y0;
    let mut t0 = 0.0_f64;
    let mut t1 = 1.0_f64;

    for (p, q) in [
        (-dx, e.x0 - xmin),
        (dx, xmax - e.x0),
        (-dy, e.y0 - ymin),
        (dy, ymax - e.y0),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return false;
            }
        } else {
            let t = q / p;
            if p < 0.0 {
                if t > t1 {
                    return false;
                }
                t0 = t0.max(t);
            } else {
                if t < t0 {
                    return false;
                }
                t1 = t1.min(t);
            }
        }
    }
    t0 <= t1
}

fn fill_row(row: usize, width: usize, polygons: &[Vec<PixelEdge>], out: &mut [bool]) {
    let top = row as f64;
    let centre = top + 0.5;

    // Centres inside: even-odd per polygon, OR across polygons
    let mut crossings = Vec::new();
    for edges in polygons {
        crossings.clear();
        for e in edges {
            if (e.y0 > centre) != (e.y1 > centre) {
                crossings.push(e.x0 + (centre - e.y0) * (e.x1 - e.x0) / (e.y1 - e.y0));
            }
        }
        crossings.sort_by(|a, b| a.total_cmp(b));
        for pair in crossings.chunks_exact(2) {
            let start = (pair[0] - 0.5).ceil().max(0.0) as usize;
            let end = ((pair[1] - 0.5).ceil().max(0.0) as usize).min(width);
            for cell in out.iter_mut().take(end).skip(start) {
                *cell = true;
            }
        }
    }

    // Edges crossing the open interior of a pixel of this row
    let band_min = top + SNAP_TOLERANCE;
    let band_max = top + 1.0 - SNAP_TOLERANCE;
    for e in polygons.iter().flatten() {
        let (ey_min, ey_max) = (e.y0.min(e.y1), e.y0.max(e.y1));
        if ey_max <= band_min || ey_min >= band_max {
            continue;
        }

        let (x_lo, x_hi) = if e.y0 == e.y1 {
            (e.x0.min(e.x1), e.x0.max(e.x1))
        } else {
            let ta = ((top - e.y0) / (e.y1 - e.y0)).clamp(0.0, 1.0);
            let tb = ((top + 1.0 - e.y0) / (e.y1 - e.y0)).clamp(0.0, 1.0);
            let xa = e.x0 + ta * (e.x1 - e.x0);
            let xb = e.x0 + tb * (e.x1 - e.x0);
            (xa.min(xb), xa.max(xb))
        };

        if x_hi < 0.0 || x_lo >= width as f64 {
            continue;
        }
        let first = x_lo.floor().max(0.0) as usize;
        let last = (x_hi.floor().max(0.0) as usize).min(width - 1);
        for col in first..=last {
            if out[col] {
                continue;
            }
            let left = col as f64;
            if segment_hits_box(
                e,
                left + SNAP_TOLERANCE,
                left + 1.0 - SNAP_TOLERANCE,
                band_min,
                band_max,
            ) {
                out[col] = true;
            }
        }
    }
}

/// Row-major mask over `window` of the pixels touched by `geometry`
pub fn touched_mask(
    transform: &GeoTransform,
    window: &PixelWindow,
    geometry: &MultiPolygon<f64>,
) -> Vec<bool> {
    let polygons: Vec<Vec<PixelEdge>> = geometry
        .0
        .iter()
        .map(|polygon| {
            let mut edges = Vec::new();
            ring_edges(polygon.exterior(), transform, window, &mut edges);
            for hole in polygon.interiors() {
                ring_edges(hole, transform, window, &mut edges);
            }
            edges
        })
        .collect();

    let width = window.width;
    (0..window.height)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_mask = vec![false; width];
            fill_row(row, width, &polygons, &mut row_mask);
            row_mask
        })
        .collect()
}
