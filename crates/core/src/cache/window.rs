//! Refill request tickets

use std::ops::Range;

use crate::dataset::GridShape;

/// A region of the remote dataset a worker needs resident.
///
/// Not a store of data, only a description of what to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheWindow {
    pub time_index: usize,
    pub rows: Range<usize>,
    pub cols: Range<usize>,
}

fn overlapping(a: &Range<usize>, b: &Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}

fn hull(a: &Range<usize>, b: &Range<usize>) -> Range<usize> {
    a.start.min(b.start)..a.end.max(b.end)
}

impl CacheWindow {
    pub fn new(time_index: usize, rows: Range<usize>, cols: Range<usize>) -> Self {
        Self { time_index, rows, cols }
    }

    /// Same time slice and intersecting spatial footprint.
    pub fn overlaps(&self, other: &CacheWindow) -> bool {
        self.time_index == other.time_index
            && overlapping(&self.rows, &other.rows)
            && overlapping(&self.cols, &other.cols)
    }

    /// Smallest window covering both. Only meaningful for overlapping windows.
    pub fn merge(&self, other: &CacheWindow) -> CacheWindow {
        CacheWindow {
            time_index: self.time_index,
            rows: hull(&self.rows, &other.rows),
            cols: hull(&self.cols, &other.cols),
        }
    }

    /// Whether this window lies entirely inside `other`.
    pub fn within(&self, other: &CacheWindow) -> bool {
        self.time_index == other.time_index
            && other.rows.start <= self.rows.start
            && self.rows.end <= other.rows.end
            && other.cols.start <= self.cols.start
            && self.cols.end <= other.cols.end
    }

    /// Grow by `radius` cells on every side, clipped to the grid.
    pub fn widened(&self, radius: usize, shape: &GridShape) -> CacheWindow {
        CacheWindow {
            time_index: self.time_index,
            rows: self.rows.start.saturating_sub(radius)..(self.rows.end + radius).min(shape.rows),
            cols: self.cols.start.saturating_sub(radius)..(self.cols.end + radius).min(shape.cols),
        }
    }

    /// Time indices fetched for this window when refills span `chunk` slices.
    pub fn time_span(&self, chunk: usize, shape: &GridShape) -> Range<usize> {
        self.time_index..(self.time_index + chunk.max(1)).min(shape.times)
    }
}
