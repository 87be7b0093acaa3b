use std::borrow::Cow;

use geo::MultiPolygon;

use crate::commons::basic_functions::{describe, Summary};
use crate::error::{Error, Result};
use crate::geo_core::{reproject, Crs};
use crate::geometric::rasterize::{touched_mask, window_for};
use crate::maybe_rayon::*;
use crate::raster::RasterDataset;
use crate::vector::{Grid, GridCell};

/// Statistics of the valid index samples falling in one grid cell
pub type ZonalStats = Summary;

/// Grid cell with its zonal statistics; `stats` is `None` when the cell
/// covers no valid sample
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedCell {
    pub cell: GridCell,
    pub stats: Option<ZonalStats>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedGrid {
    cells: Vec<AggregatedCell>,
    crs: Option<Crs>,
}

impl AggregatedGrid {
    pub fn new(cells: Vec<AggregatedCell>, crs: Option<Crs>) -> Self {
        AggregatedGrid { cells, crs }
    }

    pub fn cells(&self) -> &[AggregatedCell] {
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

    /// Number of cells holding at least one valid sample
    pub fn with_data(&self) -> usize {
        self.cells.iter().filter(|c| c.stats.is_some()).count()
    }
}

fn cell_samples(
    index: &RasterDataset,
    band: &[f64],
    cell: &GridCell,
    geometry: &MultiPolygon<f64>,
) -> Vec<f64> {
    let transform = index.transform();
    let window = match window_for(transform, index.width(), index.height(), geometry) {
        Some(w) => w,
        None => {
            log::debug!("Cell {} lies outside the index raster", cell.id);
            return Vec::new();
        }
    };

    let mask = touched_mask(transform, &window, geometry);
    mask.iter()
        .enumerate()
        .filter(|(_, inside)| **inside)
        .map(|(k, _)| {
            let col = window.col_off + k % window.width;
            let row = window.row_off + k / window.width;
            band[row * index.width() + col]
        })
        .filter(|v| !index.is_nodata(*v))
        .collect()
}

/// Aggregate an index raster over every cell of a grid.
///
/// Samples are the pixels touched by the cell, minus nodata and NaN. Cells
/// without valid samples are kept with `stats: None`.
pub fn aggregate(index: &RasterDataset, grid: &Grid) -> Result<AggregatedGrid> {
    if grid.is_empty() {
        return Err(Error::Geometry("Grid has no cells".to_string()));
    }
    if index.transform().is_rotated() {
        return Err(Error::Unsupported(
            "Zonal statistics on a rotated geotransform".to_string(),
        ));
    }
    let band = index.band(1)?;

    let reprojection = match (grid.crs(), index.crs()) {
        (Some(from), Some(to)) if from.differs_from(to) => {
            log::info!("Reprojecting grid cells from {} to {}", from, to);
            Some((from, to))
        }
        (None, Some(to)) => {
            log::warn!("Grid has no CRS, assuming index CRS {}", to);
            None
        }
        (Some(from), None) => {
            log::warn!("Index raster has no CRS, assuming grid CRS {}", from);
            None
        }
        _ => None,
    };

    let cells = grid
        .cells()
        .into_par_iter()
        .map(|cell| -> Result<AggregatedCell> {
            let geometry = match reprojection {
                Some((from, to)) => Cow::Owned(reproject(&cell.geometry, from, to)?),
                None => Cow::Borrowed(&cell.geometry),
            };
            let stats = describe(cell_samples(index, band, cell, &geometry));
            if stats.is_none() {
                log::debug!("Cell {} has no valid samples", cell.id);
            }
            Ok(AggregatedCell {
                cell: cell.clone(),
                stats,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let aggregated = AggregatedGrid::new(cells, grid.crs().cloned());
    log::info!(
        "Aggregated {} cells, {} with valid samples",
        aggregated.len(),
        aggregated.with_data()
    );
    Ok(aggregated)
}
