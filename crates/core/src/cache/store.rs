//! Local cache of staged dataset blocks
//!
//! Holds the parts of the remote dataset fetched so far. Each time index keeps
//! a sparse map of square tiles, allocated only where a refill wrote data, and
//! each tile carries a domain mask (0 = not fetched, 1 = resident). Memory
//! therefore follows the windows actually requested rather than the full grid.
//! The time extent only ever grows.
//!
//! Every write is mirrored to a scratch file on disk: a little-endian append
//! log created on the first write and reopened for append on each later one.
//!
//! ```text
//! header: MAGIC | VERSION u32 | times u32 | levels u32 | rows u32 | cols u32
//!         | n_vars u8 | var codes [u8; n_vars]
//!         | n u32 + level depths f64 | n u32 + latitudes f64
//!         | n u32 + longitudes f64 | n u32 + times i64 (Unix ms)
//! record: time u32 | level start,end u32 | row start,end u32 | col start,end u32
//!         | n_vars blocks of f32 laid out [level][row][col]
//! ```
//!
//! The domain mask is not stored separately: every cell covered by a record
//! is resident, so replaying the records rebuilds it.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::dataset::{DatasetError, GridShape, Region, Variable};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Cache file has wrong magic or version
    #[error("bad magic or version")]
    BadHeader,
    /// Unexpected data length
    #[error("unexpected data length")]
    BadLength,
    #[error("write outside cache bounds at time index {0}")]
    OutOfBounds(usize),
    #[error("dataset read failed: {0}")]
    Dataset(#[from] DatasetError),
    /// A refill this worker was waiting on failed in the controller
    #[error("refill failed: {0}")]
    RefillFailed(String),
    /// The staging controller stopped before serving a request
    #[error("cache controller is no longer running")]
    ControllerGone,
}

const MAGIC: &[u8; 8] = b"DRFTCCH\0";
const VERSION: u32 = 2;

/// Edge length of a cache tile, in grid cells.
pub const TILE: usize = 16;
const TILE_CELLS: usize = TILE * TILE;

/// Coordinate axes of the cached dataset, written into the file header.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheAxes {
    pub times: Vec<DateTime<Utc>>,
    pub levels: Vec<f64>,
    pub latitudes: Vec<f64>,
    pub longitudes: Vec<f64>,
}

/// One `TILE × TILE` patch of a single level.
#[derive(Debug, Clone)]
struct Tile {
    /// One array per cache variable, in [`LocalCache::variables`] order
    fields: Vec<Vec<f32>>,
    domain: Vec<u8>,
}

impl Tile {
    fn new(variables: usize) -> Self {
        Self {
            fields: vec![vec![f32::NAN; TILE_CELLS]; variables],
            domain: vec![0; TILE_CELLS],
        }
    }
}

/// (level, tile row, tile column)
type TileKey = (usize, usize, usize);

#[derive(Debug, Clone, Default)]
struct TimeSlab {
    tiles: FxHashMap<TileKey, Tile>,
}

/// Staged dataset blocks plus their on-disk mirror.
#[derive(Debug)]
pub struct LocalCache {
    path: PathBuf,
    shape: GridShape,
    variables: Vec<Variable>,
    axes: CacheAxes,
    slabs: BTreeMap<usize, TimeSlab>,
    created: bool,
}

impl LocalCache {
    /// Empty cache for a dataset of `shape`. No file is touched until the
    /// first write.
    pub fn new(path: impl Into<PathBuf>, shape: GridShape, variables: Vec<Variable>) -> Self {
        Self {
            path: path.into(),
            shape,
            variables,
            axes: CacheAxes::default(),
            slabs: BTreeMap::new(),
            created: false,
        }
    }

    pub fn with_axes(mut self, axes: CacheAxes) -> Self {
        self.axes = axes;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn shape(&self) -> GridShape {
        self.shape
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn axes(&self) -> &CacheAxes {
        &self.axes
    }

    /// Number of time slices holding any resident data.
    pub fn resident_times(&self) -> usize {
        self.slabs.len()
    }

    /// Cells backed by memory across all tiles, resident or not.
    pub fn allocated_cells(&self) -> usize {
        self.slabs.values().map(|slab| slab.tiles.len() * TILE_CELLS).sum()
    }

    #[inline]
    fn locate(&self, level: usize, row: usize, col: usize) -> Option<(TileKey, usize)> {
        (level < self.shape.levels && row < self.shape.rows && col < self.shape.cols)
            .then(|| ((level, row / TILE, col / TILE), (row % TILE) * TILE + col % TILE))
    }

    fn tile(&self, time: usize, level: usize, row: usize, col: usize) -> Option<(&Tile, usize)> {
        let (key, offset) = self.locate(level, row, col)?;
        let tile = self.slabs.get(&time)?.tiles.get(&key)?;
        (tile.domain[offset] == 1).then_some((tile, offset))
    }

    /// Domain mask at a cell; out-of-grid reads count as not resident.
    pub fn is_resident(&self, time: usize, level: usize, row: usize, col: usize) -> bool {
        self.tile(time, level, row, col).is_some()
    }

    /// Raw value of a resident cell (may be NaN). `None` when not resident.
    pub fn value(&self, variable: Variable, time: usize, level: usize, row: usize, col: usize) -> Option<f32> {
        let index = self.variables.iter().position(|v| *v == variable)?;
        let (tile, offset) = self.tile(time, level, row, col)?;
        Some(tile.fields[index][offset])
    }

    /// Value at a cell, falling back to the mean of the finite resident
    /// values in the surrounding 3×3 block on the same level.
    pub fn sample(&self, variable: Variable, time: usize, level: usize, row: usize, col: usize) -> Option<f64> {
        if let Some(v) = self.value(variable, time, level, row, col) {
            if v.is_finite() {
                return Some(f64::from(v));
            }
        }
        let mut sum = 0.0;
        let mut count = 0_u32;
        for j in row.saturating_sub(1)..=row + 1 {
            for i in col.saturating_sub(1)..=col + 1 {
                if let Some(v) = self.value(variable, time, level, j, i) {
                    if v.is_finite() {
                        sum += f64::from(v);
                        count += 1;
                    }
                }
            }
        }
        (count > 0).then(|| sum / f64::from(count))
    }

    /// Store one block per cache variable for `region` of time slice `time`,
    /// mark it resident and append it to the cache file.
    ///
    /// `blocks` must be in [`LocalCache::variables`] order.
    pub fn write(&mut self, time: usize, region: &Region, blocks: &[Vec<f32>]) -> Result<(), CacheError> {
        self.insert(time, region, blocks)?;
        self.append_record(time, region, blocks)
    }

    fn insert(&mut self, time: usize, region: &Region, blocks: &[Vec<f32>]) -> Result<(), CacheError> {
        if time >= self.shape.times
            || region.levels.end > self.shape.levels
            || region.rows.end > self.shape.rows
            || region.cols.end > self.shape.cols
        {
            return Err(CacheError::OutOfBounds(time));
        }
        if blocks.len() != self.variables.len() || blocks.iter().any(|b| b.len() != region.len()) {
            return Err(CacheError::BadLength);
        }

        let count = self.variables.len();
        let slab = self.slabs.entry(time).or_default();
        let width = region.cols.len();
        let mut row_start = 0;
        for k in region.levels.clone() {
            for j in region.rows.clone() {
                // Split the row at tile boundaries
                let mut i = region.cols.start;
                while i < region.cols.end {
                    let tile_col = i / TILE;
                    let end = ((tile_col + 1) * TILE).min(region.cols.end);
                    let n = end - i;
                    let dst = (j % TILE) * TILE + i % TILE;
                    let src = row_start + (i - region.cols.start);
                    let tile = slab
                        .tiles
                        .entry((k, j / TILE, tile_col))
                        .or_insert_with(|| Tile::new(count));
                    for (field, block) in tile.fields.iter_mut().zip(blocks) {
                        field[dst..dst + n].copy_from_slice(&block[src..src + n]);
                    }
                    tile.domain[dst..dst + n].fill(1);
                    i = end;
                }
                row_start += width;
            }
        }
        Ok(())
    }

    fn write_header<W: Write>(&self, w: &mut W) -> Result<(), CacheError> {
        w.write_all(MAGIC)?;
        w.write_all(&VERSION.to_le_bytes())?;
        for dim in [self.shape.times, self.shape.levels, self.shape.rows, self.shape.cols] {
            w.write_all(&(dim as u32).to_le_bytes())?;
        }
        w.write_all(&[self.variables.len() as u8])?;
        for variable in &self.variables {
            w.write_all(&[variable.code()])?;
        }
        for axis in [&self.axes.levels, &self.axes.latitudes, &self.axes.longitudes] {
            w.write_all(&(axis.len() as u32).to_le_bytes())?;
            for value in axis {
                w.write_all(&value.to_le_bytes())?;
            }
        }
        w.write_all(&(self.axes.times.len() as u32).to_le_bytes())?;
        for time in &self.axes.times {
            w.write_all(&time.timestamp_millis().to_le_bytes())?;
        }
        Ok(())
    }

    fn append_record(&mut self, time: usize, region: &Region, blocks: &[Vec<f32>]) -> Result<(), CacheError> {
        let file = if self.created {
            OpenOptions::new().append(true).open(&self.path)?
        } else {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            File::create(&self.path)?
        };
        let mut w = BufWriter::new(file);
        if !self.created {
            self.write_header(&mut w)?;
            self.created = true;
        }

        w.write_all(&(time as u32).to_le_bytes())?;
        for bound in [
            region.levels.start,
            region.levels.end,
            region.rows.start,
            region.rows.end,
            region.cols.start,
            region.cols.end,
        ] {
            w.write_all(&(bound as u32).to_le_bytes())?;
        }
        for block in blocks {
            for v in block {
                w.write_all(&v.to_le_bytes())?;
            }
        }
        w.flush()?;
        Ok(())
    }

    /// Rebuild a cache by replaying its file.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let path = path.into();
        let mut r = BufReader::new(File::open(&path)?);

        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        if &magic != MAGIC || read_u32(&mut r)? != VERSION {
            return Err(CacheError::BadHeader);
        }
        let shape = GridShape {
            times: read_u32(&mut r)? as usize,
            levels: read_u32(&mut r)? as usize,
            rows: read_u32(&mut r)? as usize,
            cols: read_u32(&mut r)? as usize,
        };
        let count = read_u8(&mut r)?;
        let mut variables = Vec::with_capacity(count as usize);
        for _ in 0..count {
            variables.push(Variable::from_code(read_u8(&mut r)?).ok_or(CacheError::BadHeader)?);
        }

        let levels = read_f64_axis(&mut r)?;
        let latitudes = read_f64_axis(&mut r)?;
        let longitudes = read_f64_axis(&mut r)?;
        let count = read_u32(&mut r)?;
        let mut times = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let millis = i64::from_le_bytes(read_array(&mut r)?);
            times.push(DateTime::from_timestamp_millis(millis).ok_or(CacheError::BadHeader)?);
        }
        let axes = CacheAxes {
            times,
            levels,
            latitudes,
            longitudes,
        };

        let mut cache = Self::new(path, shape, variables).with_axes(axes);
        cache.created = true;
        loop {
            let time = match read_u32(&mut r) {
                Ok(t) => t as usize,
                Err(CacheError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            };
            let mut bounds = [0usize; 6];
            for b in &mut bounds {
                *b = read_u32(&mut r)? as usize;
            }
            let region = Region {
                levels: bounds[0]..bounds[1],
                rows: bounds[2]..bounds[3],
                cols: bounds[4]..bounds[5],
            };
            let mut blocks = Vec::with_capacity(cache.variables.len());
            for _ in 0..cache.variables.len() {
                let mut block = vec![0f32; region.len()];
                for v in &mut block {
                    *v = read_f32(&mut r)?;
                }
                blocks.push(block);
            }
            cache.insert(time, &region, &blocks)?;
        }
        Ok(cache)
    }

    /// Delete the cache file, if one was created.
    pub fn remove_file(&mut self) -> Result<(), CacheError> {
        if self.created {
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            self.created = false;
        }
        Ok(())
    }
}

fn read_array<R: Read, const N: usize>(r: &mut R) -> Result<[u8; N], CacheError> {
    let mut b = [0u8; N];
    r.read_exact(&mut b)?;
    Ok(b)
}
fn read_u8<R: Read>(r: &mut R) -> Result<u8, CacheError> {
    Ok(read_array::<R, 1>(r)?[0])
}
fn read_u32<R: Read>(r: &mut R) -> Result<u32, CacheError> {
    Ok(u32::from_le_bytes(read_array(r)?))
}
fn read_f32<R: Read>(r: &mut R) -> Result<f32, CacheError> {
    Ok(f32::from_le_bytes(read_array(r)?))
}
fn read_f64_axis<R: Read>(r: &mut R) -> Result<Vec<f64>, CacheError> {
    let count = read_u32(r)?;
    let mut axis = Vec::with_capacity(count as usize);
    for _ in 0..count {
        axis.push(f64::from_le_bytes(read_array(r)?));
    }
    Ok(axis)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape() -> GridShape {
        GridShape {
            times: 4,
            levels: 1,
            rows: 3,
            cols: 3,
        }
    }

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("drift-store-{}-{name}", std::process::id()))
            .join("cache.bin")
    }

    fn full() -> Region {
        Region {
            levels: 0..1,
            rows: 0..3,
            cols: 0..3,
        }
    }

    #[test]
    fn test_unwritten_cells_are_not_resident() {
        let mut cache = LocalCache::new(scratch("mask"), shape(), vec![Variable::U]);
        assert!(!cache.is_resident(0, 0, 1, 1));
        assert_eq!(cache.value(Variable::U, 0, 0, 1, 1), None);

        let region = Region {
            levels: 0..1,
            rows: 1..2,
            cols: 1..3,
        };
        cache.write(0, &region, &[vec![0.5, 0.7]]).unwrap();
        assert!(cache.is_resident(0, 0, 1, 1));
        assert!(cache.is_resident(0, 0, 1, 2));
        assert!(!cache.is_resident(0, 0, 0, 0));
        assert!(!cache.is_resident(1, 0, 1, 1));
        assert!(!cache.is_resident(0, 0, 7, 7));
        assert_eq!(cache.value(Variable::U, 0, 0, 1, 2), Some(0.7));
        cache.remove_file().unwrap();
    }

    #[test]
    fn test_nan_falls_back_to_neighborhood_mean() {
        let mut cache = LocalCache::new(scratch("nan"), shape(), vec![Variable::U]);
        let mut block = vec![1.0; 9];
        block[4] = f32::NAN;
        block[0] = 3.0;
        cache.write(0, &full(), &[block]).unwrap();
        assert_eq!(cache.sample(Variable::U, 0, 0, 1, 1), Some(1.25));
        assert_eq!(cache.sample(Variable::U, 0, 0, 0, 0), Some(3.0));

        cache.write(1, &full(), &[vec![f32::NAN; 9]]).unwrap();
        assert_eq!(cache.sample(Variable::U, 1, 0, 1, 1), None);
        cache.remove_file().unwrap();
    }

    #[test]
    fn test_file_replay_matches_memory() {
        let path = scratch("replay");
        let axes = CacheAxes {
            times: (0..4).filter_map(|h| DateTime::from_timestamp(1_388_620_800 + h * 3600, 0)).collect(),
            levels: vec![0.0],
            latitudes: vec![-0.1, 0.0, 0.1],
            longitudes: vec![10.0, 10.1, 10.2],
        };
        let mut cache =
            LocalCache::new(&path, shape(), vec![Variable::U, Variable::Temperature]).with_axes(axes.clone());
        let u: Vec<f32> = (0..9).map(|i| i as f32).collect();
        let t = vec![12.5; 9];
        cache.write(0, &full(), &[u.clone(), t.clone()]).unwrap();
        let corner = Region {
            levels: 0..1,
            rows: 0..1,
            cols: 2..3,
        };
        cache.write(2, &corner, &[vec![-1.0], vec![9.0]]).unwrap();

        let replayed = LocalCache::load(&path).unwrap();
        assert_eq!(replayed.shape(), shape());
        assert_eq!(replayed.variables(), cache.variables());
        assert_eq!(replayed.axes(), &axes);
        assert_eq!(replayed.axes().times.len(), 4);
        assert_eq!(replayed.resident_times(), 2);
        for row in 0..3 {
            for col in 0..3 {
                for time in 0..3 {
                    assert_eq!(
                        replayed.value(Variable::U, time, 0, row, col),
                        cache.value(Variable::U, time, 0, row, col)
                    );
                }
            }
        }
        assert_eq!(replayed.value(Variable::Temperature, 2, 0, 0, 2), Some(9.0));

        cache.remove_file().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_window_allocates_only_touched_tiles() {
        let shape = GridShape {
            times: 10,
            levels: 40,
            rows: 1000,
            cols: 1000,
        };
        let mut cache = LocalCache::new(scratch("sparse"), shape, vec![Variable::U]);
        // 21×21 window straddling tile edges on every level
        let window = Region {
            levels: 0..40,
            rows: 500..521,
            cols: 250..271,
        };
        let block: Vec<f32> = (0..window.len()).map(|i| i as f32).collect();
        cache.write(3, &window, &[block]).unwrap();

        assert!(cache.allocated_cells() <= 40 * 9 * TILE_CELLS);
        assert!(cache.allocated_cells() < shape.levels * shape.rows * shape.cols / 100);
        assert_eq!(cache.value(Variable::U, 3, 0, 500, 250), Some(0.0));
        // Last cell of the first row, then first cell of the second row
        assert_eq!(cache.value(Variable::U, 3, 0, 500, 270), Some(20.0));
        assert_eq!(cache.value(Variable::U, 3, 0, 501, 250), Some(21.0));
        assert_eq!(cache.value(Variable::U, 3, 39, 520, 270), Some((window.len() - 1) as f32));
        assert!(!cache.is_resident(3, 0, 499, 250));
        assert!(!cache.is_resident(3, 0, 500, 271));
        cache.remove_file().unwrap();
    }

    #[test]
    fn test_rejects_bad_blocks() {
        let mut cache = LocalCache::new(scratch("bad"), shape(), vec![Variable::U]);
        assert!(matches!(cache.write(0, &full(), &[vec![0.0; 2]]), Err(CacheError::BadLength)));
        assert!(matches!(cache.write(9, &full(), &[vec![0.0; 9]]), Err(CacheError::OutOfBounds(9))));
        assert!(!cache.path().exists());
    }

    #[test]
    fn test_load_rejects_foreign_file() {
        let path = scratch("foreign");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"not a cache file at all").unwrap();
        assert!(matches!(LocalCache::load(&path), Err(CacheError::BadHeader)));
        fs::remove_file(&path).unwrap();
    }
}
