//! Ranking and classification of aggregated grid cells

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::commons::basic_functions::{describe, sample_std};
use crate::geo_core::Crs;
use crate::geometric::zonal::{AggregatedGrid, ZonalStats};
use crate::vector::GridCell;

/// Ordinal health class derived from a cell's percentile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    Poor,
    Regular,
    Medium,
    Good,
    Excellent,
}

impl Category {
    /// Every category, best first
    pub const ALL: [Category; 5] = [
        Category::Excellent,
        Category::Good,
        Category::Medium,
        Category::Regular,
        Category::Poor,
    ];

    /// Classify a percentile with inclusive lower bounds 80 / 60 / 40 / 20
    pub fn from_percentile(percentile: f64) -> Self {
        if percentile >= 80.0 {
            Category::Excellent
        } else if percentile >= 60.0 {
            Category::Good
        } else if percentile >= 40.0 {
            Category::Medium
        } else if percentile >= 20.0 {
            Category::Regular
        } else {
            Category::Poor
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Category::Excellent => "Excellent",
            Category::Good => "Good",
            Category::Medium => "Medium",
            Category::Regular => "Regular",
            Category::Poor => "Poor",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Position of a cell among all ranked cells
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellRank {
    /// 1 is the highest mean
    pub rank: usize,
    /// `100 * (1 - rank / N)`
    pub percentile: f64,
    pub category: Category,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedCell {
    pub cell: GridCell,
    pub stats: Option<ZonalStats>,
    /// `None` for cells without a valid mean
    pub rank: Option<CellRank>,
}

impl RankedCell {
    pub fn mean(&self) -> Option<f64> {
        self.stats.map(|s| s.mean)
    }
}

/// Ranked cells in the grid's original order
#[derive(Debug, Clone, PartialEq)]
pub struct RankedGrid {
    cells: Vec<RankedCell>,
    crs: Option<Crs>,
}

impl RankedGrid {
    pub fn cells(&self) -> &[RankedCell] {
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

    /// N: number of cells that received a rank
    pub fn ranked_count(&self) -> usize {
        self.cells.iter().filter(|c| c.rank.is_some()).count()
    }

    /// Ranked cells ordered by rank, best first
    pub fn by_rank(&self) -> Vec<&RankedCell> {
        let mut ranked: Vec<&RankedCell> =
            self.cells.iter().filter(|c| c.rank.is_some()).collect();
        ranked.sort_by_key(|c| c.rank.map(|r| r.rank));
        ranked
    }
}

/// Rank cells by descending mean.
///
/// Ties keep their input order. Cells without statistics are left unranked
/// and do not count towards N.
pub fn rank(aggregated: &AggregatedGrid) -> RankedGrid {
    let mut order: Vec<(usize, f64)> = aggregated
        .cells()
        .iter()
        .enumerate()
        .filter_map(|(i, c)| c.stats.map(|s| (i, s.mean)))
        .filter(|(_, mean)| mean.is_finite())
        .collect();
    // stable sort
    order.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    let n = order.len();
    let mut ranks: Vec<Option<CellRank>> = vec![None; aggregated.len()];
    for (position, (i, _)) in order.iter().enumerate() {
        let rank = position + 1;
        let percentile = 100.0 * (n - rank) as f64 / n as f64;
        ranks[*i] = Some(CellRank {
            rank,
            percentile,
            category: Category::from_percentile(percentile),
        });
    }

    let cells = aggregated
        .cells()
        .iter()
        .zip(ranks)
        .map(|(c, rank)| RankedCell {
            cell: c.cell.clone(),
            stats: c.stats,
            rank,
        })
        .collect();

    log::info!("Ranked {} of {} cells", n, aggregated.len());
    RankedGrid {
        cells,
        crs: aggregated.crs().cloned(),
    }
}

/// Count and area of one category
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CategoryMetrics {
    pub category: Category,
    pub count: usize,
    /// Share of ranked cells, in percent
    pub percentage: f64,
    /// Planar area in CRS units
    pub area: f64,
    /// Share of the total grid area, in percent
    pub area_percentage: f64,
}

/// Distribution of the ranked cell means
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    /// Sample standard deviation, `None` with fewer than two cells
    pub std: Option<f64>,
}

/// Field-level summary consumed by the report renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalMetrics {
    pub total_cells: usize,
    pub ranked_cells: usize,
    pub total_area: f64,
    /// One entry per category, best first
    pub categories: Vec<CategoryMetrics>,
    /// `None` when no cell was ranked
    pub value_stats: Option<ValueStats>,
}

impl GlobalMetrics {
    pub fn category(&self, category: Category) -> Option<&CategoryMetrics> {
        self.categories.iter().find(|m| m.category == category)
    }
}

fn percent(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        100.0 * part / whole
    } else {
        0.0
    }
}

/// Summarise a ranked grid
pub fn global_metrics(ranked: &RankedGrid) -> GlobalMetrics {
    let total_area: f64 = ranked.cells().iter().map(|c| c.cell.area()).sum();
    let ranked_cells = ranked.ranked_count();

    let categories = Category::ALL
        .iter()
        .map(|category| {
            let members: Vec<&RankedCell> = ranked
                .cells()
                .iter()
                .filter(|c| c.rank.map(|r| r.category) == Some(*category))
                .collect();
            let area: f64 = members.iter().map(|c| c.cell.area()).sum();
            CategoryMetrics {
                category: *category,
                count: members.len(),
                percentage: percent(members.len() as f64, ranked_cells as f64),
                area,
                area_percentage: percent(area, total_area),
            }
        })
        .collect();

    let means: Vec<f64> = ranked
        .cells()
        .iter()
        .filter(|c| c.rank.is_some())
        .filter_map(RankedCell::mean)
        .collect();
    let value_stats = describe(means.clone()).map(|s| ValueStats {
        min: s.min,
        max: s.max,
        mean: s.mean,
        median: s.median,
        std: sample_std(&means),
    });

    GlobalMetrics {
        total_cells: ranked.len(),
        ranked_cells,
        total_area,
        categories,
        value_stats,
    }
}

/// Ranked cells at or above `min_percentile`, best first
pub fn hotspots(ranked: &RankedGrid, min_percentile: f64) -> Vec<&RankedCell> {
    ranked
        .by_rank()
        .into_iter()
        .filter(|c| c.rank.map_or(false, |r| r.percentile >= min_percentile))
        .collect()
}
