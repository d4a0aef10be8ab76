//! In-memory rectilinear grid

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;

use super::{AliasTable, DatasetError, GridDataset, GridShape, Region, Variable};

/// A fully in-memory dataset on 1-D time/level/lat/lon axes.
///
/// Every variable is stored `[time][level][row][col]`.
#[derive(Debug, Clone)]
pub struct RegularGrid {
    times: Vec<DateTime<Utc>>,
    levels: Vec<f64>,
    latitudes: Vec<f64>,
    longitudes: Vec<f64>,
    fields: FxHashMap<Variable, Vec<f32>>,
}

fn monotonic(axis: &[f64]) -> bool {
    axis.windows(2).all(|w| w[0] < w[1]) || axis.windows(2).all(|w| w[0] > w[1])
}

/// `count` evenly spaced values starting at `start`.
pub fn axis(start: f64, step: f64, count: usize) -> Vec<f64> {
    (0..count).map(|i| start + step * i as f64).collect()
}

impl RegularGrid {
    pub fn new(
        times: Vec<DateTime<Utc>>,
        levels: Vec<f64>,
        latitudes: Vec<f64>,
        longitudes: Vec<f64>,
    ) -> Result<Self, DatasetError> {
        if times.is_empty() || !times.windows(2).all(|w| w[0] < w[1]) {
            return Err(DatasetError::BadAxis { axis: "time" });
        }
        for (name, values) in [("level", &levels), ("latitude", &latitudes), ("longitude", &longitudes)] {
            if values.is_empty() || !monotonic(values) {
                return Err(DatasetError::BadAxis { axis: name });
            }
        }
        Ok(Self {
            times,
            levels,
            latitudes,
            longitudes,
            fields: FxHashMap::default(),
        })
    }

    /// Attach `data` for `variable`, laid out `[time][level][row][col]`.
    pub fn with_field(mut self, variable: Variable, data: Vec<f32>) -> Result<Self, DatasetError> {
        let expected = self.shape().times * self.shape().slice_len();
        if data.len() != expected {
            return Err(DatasetError::ShapeMismatch {
                variable,
                expected,
                actual: data.len(),
            });
        }
        self.fields.insert(variable, data);
        Ok(self)
    }

    /// Attach a field holding `value` everywhere.
    pub fn with_constant(self, variable: Variable, value: f32) -> Self {
        let len = self.shape().times * self.shape().slice_len();
        let mut grid = self;
        grid.fields.insert(variable, vec![value; len]);
        grid
    }

    /// Attach a field computed from `(time, level, row, col)` indices.
    pub fn with_fn<F>(self, variable: Variable, f: F) -> Self
    where
        F: Fn(usize, usize, usize, usize) -> f32,
    {
        let shape = self.shape();
        let mut data = Vec::with_capacity(shape.times * shape.slice_len());
        for t in 0..shape.times {
            for k in 0..shape.levels {
                for j in 0..shape.rows {
                    for i in 0..shape.cols {
                        data.push(f(t, k, j, i));
                    }
                }
            }
        }
        let mut grid = self;
        grid.fields.insert(variable, data);
        grid
    }

    /// Build from arrays named the way a data producer named them.
    ///
    /// Each canonical variable is looked up through `aliases`; u and v must
    /// resolve, the rest are attached when found.
    pub fn from_named(
        times: Vec<DateTime<Utc>>,
        levels: Vec<f64>,
        latitudes: Vec<f64>,
        longitudes: Vec<f64>,
        mut arrays: FxHashMap<String, Vec<f32>>,
        aliases: &AliasTable,
    ) -> Result<Self, DatasetError> {
        let mut grid = Self::new(times, levels, latitudes, longitudes)?;
        for variable in Variable::ALL {
            let names: Vec<String> = arrays.keys().cloned().collect();
            let found = aliases
                .resolve(variable.name(), names.iter().map(String::as_str))
                .map(ToString::to_string);
            match found.and_then(|name| arrays.remove(&name)) {
                Some(data) => grid = grid.with_field(variable, data)?,
                None if variable.required() => return Err(DatasetError::UnresolvedAlias(variable.name())),
                None => {}
            }
        }
        Ok(grid)
    }
}

impl GridDataset for RegularGrid {
    fn times(&self) -> &[DateTime<Utc>] {
        &self.times
    }

    fn levels(&self) -> &[f64] {
        &self.levels
    }

    fn latitudes(&self) -> &[f64] {
        &self.latitudes
    }

    fn longitudes(&self) -> &[f64] {
        &self.longitudes
    }

    fn has(&self, variable: Variable) -> bool {
        self.fields.contains_key(&variable)
    }

    fn read(&self, variable: Variable, time: usize, region: &Region) -> Result<Vec<f32>, DatasetError> {
        let data = self
            .fields
            .get(&variable)
            .ok_or(DatasetError::MissingVariable(variable))?;
        let shape: GridShape = self.shape();
        if time >= shape.times
            || region.levels.end > shape.levels
            || region.rows.end > shape.rows
            || region.cols.end > shape.cols
        {
            return Err(DatasetError::OutOfRange { variable, time });
        }

        let slice = &data[time * shape.slice_len()..(time + 1) * shape.slice_len()];
        let mut out = Vec::with_capacity(region.len());
        for k in region.levels.clone() {
            for j in region.rows.clone() {
                let row_start = (k * shape.rows + j) * shape.cols;
                out.extend_from_slice(&slice[row_start + region.cols.start..row_start + region.cols.end]);
            }
        }
        Ok(out)
    }
}
