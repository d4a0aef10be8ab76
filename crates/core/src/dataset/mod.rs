//! Environmental field sampler contract
//!
//! The engine only ever talks to gridded environmental data through
//! [`GridDataset`]: it asks for the time axis, locates a point on the grid and
//! reads rectangular blocks of a variable. Topology beyond a rectilinear
//! lat/lon grid is the dataset's business.
//!
//! Variable names in real files vary wildly between producers, so named arrays
//! are mapped onto the canonical [`Variable`]s through an [`AliasTable`].

pub mod regular;

pub use regular::RegularGrid;

use std::ops::Range;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DatasetError {
    #[error("variable {0:?} is not present in the dataset")]
    MissingVariable(Variable),
    #[error("no array matches any alias of '{0}'")]
    UnresolvedAlias(&'static str),
    #[error("{axis} axis is empty or not sorted")]
    BadAxis { axis: &'static str },
    #[error("{variable:?} has {actual} values, expected {expected}")]
    ShapeMismatch {
        variable: Variable,
        expected: usize,
        actual: usize,
    },
    #[error("read of {variable:?} outside the grid at time index {time}")]
    OutOfRange { variable: Variable, time: usize },
}

/// Canonical data variables the engine samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variable {
    U,
    V,
    W,
    Temperature,
    Salinity,
}

impl Variable {
    pub const ALL: [Variable; 5] = [
        Variable::U,
        Variable::V,
        Variable::W,
        Variable::Temperature,
        Variable::Salinity,
    ];

    /// Canonical name, also the key into an [`AliasTable`].
    pub fn name(self) -> &'static str {
        match self {
            Variable::U => "u",
            Variable::V => "v",
            Variable::W => "w",
            Variable::Temperature => "temperature",
            Variable::Salinity => "salinity",
        }
    }

    /// Stable one-byte code used by the on-disk cache.
    pub fn code(self) -> u8 {
        match self {
            Variable::U => 0,
            Variable::V => 1,
            Variable::W => 2,
            Variable::Temperature => 3,
            Variable::Salinity => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.code() == code)
    }

    /// Velocity components must exist; scalars are optional.
    pub fn required(self) -> bool {
        matches!(self, Variable::U | Variable::V)
    }
}

/// Maps canonical names to the names different producers use for them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasTable {
    aliases: FxHashMap<String, Vec<String>>,
}

impl Default for AliasTable {
    fn default() -> Self {
        let defaults: [(&str, &[&str]); 9] = [
            ("u", &["u", "water_u", "eastward_sea_water_velocity", "uo", "U"]),
            ("v", &["v", "water_v", "northward_sea_water_velocity", "vo", "V"]),
            ("w", &["w", "water_w", "upward_sea_water_velocity", "wo", "W"]),
            (
                "temperature",
                &["temp", "temperature", "water_temp", "sea_water_temperature", "thetao"],
            ),
            ("salinity", &["salt", "salinity", "sea_water_salinity", "so"]),
            ("longitude", &["lon", "longitude", "lon_rho", "lon_u", "nav_lon", "x"]),
            ("latitude", &["lat", "latitude", "lat_rho", "lat_u", "nav_lat", "y"]),
            ("depth", &["depth", "z", "level", "s_rho", "deptht"]),
            ("time", &["time", "ocean_time", "time_counter", "t"]),
        ];
        let aliases = defaults
            .into_iter()
            .map(|(k, names)| (k.to_string(), names.iter().map(ToString::to_string).collect()))
            .collect();
        Self { aliases }
    }
}

impl AliasTable {
    /// Table with no entries; every lookup falls back to the canonical name.
    pub fn empty() -> Self {
        Self {
            aliases: FxHashMap::default(),
        }
    }

    /// Add `alias` for `canonical`, taking precedence over existing aliases.
    pub fn with_alias(mut self, canonical: &str, alias: &str) -> Self {
        self.aliases
            .entry(canonical.to_string())
            .or_default()
            .insert(0, alias.to_string());
        self
    }

    pub fn aliases(&self, canonical: &str) -> &[String] {
        self.aliases.get(canonical).map_or(&[], Vec::as_slice)
    }

    /// First alias of `canonical` found among `available` names.
    pub fn resolve<'a, I>(&self, canonical: &str, available: I) -> Option<&'a str>
    where
        I: IntoIterator<Item = &'a str> + Clone,
    {
        let exact = std::iter::once(canonical);
        let candidates = self.aliases(canonical).iter().map(String::as_str);
        for wanted in candidates.chain(exact) {
            if let Some(found) = available.clone().into_iter().find(|name| *name == wanted) {
                return Some(found);
            }
        }
        None
    }
}

/// Index extents of a gridded variable: (times, levels, rows, cols).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridShape {
    pub times: usize,
    pub levels: usize,
    pub rows: usize,
    pub cols: usize,
}

impl GridShape {
    /// Cells in one time slice.
    pub fn slice_len(&self) -> usize {
        self.levels * self.rows * self.cols
    }
}

/// A block of one time slice: level, row and column index ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub levels: Range<usize>,
    pub rows: Range<usize>,
    pub cols: Range<usize>,
}

impl Region {
    pub fn len(&self) -> usize {
        self.levels.len() * self.rows.len() * self.cols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Position of `value` in a sorted axis, nearest neighbor.
pub fn nearest_index(axis: &[f64], value: f64) -> usize {
    if axis.len() < 2 {
        return 0;
    }
    let ascending = axis[0] <= axis[axis.len() - 1];
    let upper = if ascending {
        axis.partition_point(|x| *x < value)
    } else {
        axis.partition_point(|x| *x > value)
    };
    if upper == 0 {
        return 0;
    }
    if upper >= axis.len() {
        return axis.len() - 1;
    }
    if (value - axis[upper - 1]).abs() <= (axis[upper] - value).abs() {
        upper - 1
    } else {
        upper
    }
}

/// Gridded environmental data on a rectilinear lat/lon grid.
///
/// Blocks returned by [`GridDataset::read`] are laid out `[level][row][col]`
/// with missing values as NaN.
pub trait GridDataset: Send + Sync {
    fn times(&self) -> &[DateTime<Utc>];

    /// Depth of each level (m, negative below the surface)
    fn levels(&self) -> &[f64];

    /// Latitude of each row
    fn latitudes(&self) -> &[f64];

    /// Longitude of each column
    fn longitudes(&self) -> &[f64];

    fn has(&self, variable: Variable) -> bool;

    fn read(&self, variable: Variable, time: usize, region: &Region) -> Result<Vec<f32>, DatasetError>;

    fn shape(&self) -> GridShape {
        GridShape {
            times: self.times().len(),
            levels: self.levels().len(),
            rows: self.latitudes().len(),
            cols: self.longitudes().len(),
        }
    }

    /// Variables present in this dataset, in canonical order.
    fn variables(&self) -> Vec<Variable> {
        Variable::ALL.into_iter().filter(|v| self.has(*v)).collect()
    }

    /// Nearest time slice to `time`, clamped to the axis.
    fn nearest_time_index(&self, time: DateTime<Utc>) -> usize {
        let times = self.times();
        let upper = times.partition_point(|t| *t < time);
        if upper == 0 {
            return 0;
        }
        if upper >= times.len() {
            return times.len().saturating_sub(1);
        }
        if time - times[upper - 1] <= times[upper] - time {
            upper - 1
        } else {
            upper
        }
    }

    fn nearest_level_index(&self, depth: f64) -> usize {
        nearest_index(self.levels(), depth)
    }

    /// Nearest (row, col) to a point.
    fn locate(&self, latitude: f64, longitude: f64) -> (usize, usize) {
        (
            nearest_index(self.latitudes(), latitude),
            nearest_index(self.longitudes(), longitude),
        )
    }

    /// Row and column ranges within `radius` cells of a point.
    fn index_window(&self, latitude: f64, longitude: f64, radius: usize) -> (Range<usize>, Range<usize>) {
        let shape = self.shape();
        let (row, col) = self.locate(latitude, longitude);
        (
            row.saturating_sub(radius)..(row + radius + 1).min(shape.rows),
            col.saturating_sub(radius)..(col + radius + 1).min(shape.cols),
        )
    }
}
