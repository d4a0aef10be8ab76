//! Data-staging protocol between the cache controller and particle workers
//!
//! One long-lived controller fills the [`LocalCache`] from the remote dataset;
//! many particle workers read from it. All shared state lives in a single
//! [`CacheCoordinator`] handed to every participant.
//!
//! # Protocol
//!
//! - The store sits behind an `RwLock`: workers sample under the read lock, the
//!   controller copies a fetched block in under the write lock. A cell's domain
//!   mask is set in the same critical section as its data, so a reader that
//!   sees a resident cell never sees a half-written one.
//! - A worker about to sample a cell it has not confirmed resident checks the
//!   mask. If unset it takes `request_lock`, checks again (another worker may
//!   have just asked for the same region) and, if still missing, queues a
//!   [`CacheWindow`] ticket. It then sleeps on a condition variable until the
//!   controller marks that ticket served.
//! - Tickets are served FIFO. A request overlapping a still-pending ticket is
//!   merged into it; a request covered by the ticket currently being served
//!   waits on that ticket. No request is ever dropped.
//! - The controller sleeps while the queue is empty and exits once it is the
//!   only worker left running.

use std::collections::VecDeque;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};

use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::store::{CacheAxes, CacheError, LocalCache};
use super::window::CacheWindow;
use crate::core_types::{Location, Velocity};
use crate::dataset::{GridDataset, Region, Variable};
use crate::transport::Environment;

/// How refills are sized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Time slices fetched per refill, starting at the requested one
    pub time_chunk: usize,
    /// Cells added around the requested point on every side
    pub spatial_radius: usize,
    /// Fetch one depth level at a time instead of whole blocks
    pub low_memory: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            time_chunk: 2,
            spatial_radius: 10,
            low_memory: false,
        }
    }
}

#[derive(Debug)]
struct Ticket {
    id: u64,
    window: CacheWindow,
}

#[derive(Debug, Default)]
struct TicketQueue {
    next_id: u64,
    pending: VecDeque<Ticket>,
    in_flight: Option<Ticket>,
    /// Highest ticket id served so far; ids are served in order
    served: u64,
    failures: FxHashMap<u64, String>,
    stopped: bool,
}

impl TicketQueue {
    /// Queue `window`, merging into a pending ticket when possible.
    fn submit(&mut self, window: CacheWindow) -> u64 {
        if let Some(current) = &self.in_flight {
            if window.within(&current.window) {
                return current.id;
            }
        }
        if let Some(ticket) = self.pending.iter_mut().find(|t| t.window.overlaps(&window)) {
            ticket.window = ticket.window.merge(&window);
            return ticket.id;
        }
        self.next_id += 1;
        self.pending.push_back(Ticket {
            id: self.next_id,
            window,
        });
        self.next_id
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cells a single worker has already seen resident: (time, row, col).
///
/// Residency never reverts, so confirmed cells skip the mask check.
pub type Residency = FxHashSet<(usize, usize, usize)>;

/// Shared state for one simulation run.
pub struct CacheCoordinator {
    dataset: Arc<dyn GridDataset>,
    settings: CacheSettings,
    store: RwLock<LocalCache>,
    tickets: Mutex<TicketQueue>,
    /// Signalled when a ticket is queued or a worker exits
    work_ready: Condvar,
    /// Signalled when a ticket is served or the controller stops
    ticket_served: Condvar,
    request_lock: Mutex<()>,
    running: AtomicUsize,
    refills: AtomicUsize,
}

impl std::fmt::Debug for CacheCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheCoordinator")
            .field("settings", &self.settings)
            .field("running", &self.running)
            .field("refills", &self.refills)
            .finish_non_exhaustive()
    }
}

impl CacheCoordinator {
    /// Coordinator staging `dataset` into a cache file at `cache_path`.
    pub fn new(dataset: Arc<dyn GridDataset>, cache_path: impl Into<PathBuf>, settings: CacheSettings) -> Self {
        let axes = CacheAxes {
            times: dataset.times().to_vec(),
            levels: dataset.levels().to_vec(),
            latitudes: dataset.latitudes().to_vec(),
            longitudes: dataset.longitudes().to_vec(),
        };
        let store = LocalCache::new(cache_path, dataset.shape(), dataset.variables()).with_axes(axes);
        Self {
            dataset,
            settings,
            store: RwLock::new(store),
            tickets: Mutex::new(TicketQueue::default()),
            work_ready: Condvar::new(),
            ticket_served: Condvar::new(),
            request_lock: Mutex::new(()),
            running: AtomicUsize::new(0),
            refills: AtomicUsize::new(0),
        }
    }

    pub fn dataset(&self) -> &Arc<dyn GridDataset> {
        &self.dataset
    }

    pub fn settings(&self) -> CacheSettings {
        self.settings
    }

    /// Number of refills the controller has completed.
    pub fn refills(&self) -> usize {
        self.refills.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Record that `count` workers are about to start.
    pub fn workers_started(&self, count: usize) {
        self.running.fetch_add(count, Ordering::SeqCst);
    }

    /// Record that a worker has left its task loop.
    pub fn worker_exited(&self) {
        let _queue = lock(&self.tickets);
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.work_ready.notify_all();
    }

    /// Serve refill tickets until this is the only worker left.
    pub fn run_controller(&self) {
        info!("cache controller started");
        let mut queue = lock(&self.tickets);
        loop {
            if let Some(ticket) = queue.pending.pop_front() {
                let window = ticket.window.clone();
                let id = ticket.id;
                queue.in_flight = Some(ticket);
                drop(queue);

                let result = self.refill(&window);

                queue = lock(&self.tickets);
                queue.in_flight = None;
                queue.served = id;
                if let Err(e) = result {
                    warn!(ticket = id, error = %e, "refill failed");
                    queue.failures.insert(id, e.to_string());
                }
                self.ticket_served.notify_all();
                continue;
            }
            if self.running.load(Ordering::SeqCst) <= 1 {
                break;
            }
            queue = self
                .work_ready
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(queue);
        self.controller_stopped();
        info!(refills = self.refills(), "cache controller stopped");
    }

    /// Fail every current and future wait on a refill.
    ///
    /// Called when the controller leaves its loop, normally or by panic.
    pub fn controller_stopped(&self) {
        let mut queue = lock(&self.tickets);
        queue.stopped = true;
        self.ticket_served.notify_all();
    }

    /// Fetch `window` (widened by the configured radius and time chunk) from
    /// the dataset and copy it into the store.
    fn refill(&self, window: &CacheWindow) -> Result<(), CacheError> {
        let shape = self.dataset.shape();
        let widened = window.widened(self.settings.spatial_radius, &shape);
        let variables = self.dataset.variables();
        let level_blocks: Vec<Range<usize>> = if self.settings.low_memory {
            (0..shape.levels).map(|k| Range { start: k, end: k + 1 }).collect()
        } else {
            vec![0..shape.levels]
        };

        for time in widened.time_span(self.settings.time_chunk, &shape) {
            for levels in &level_blocks {
                let region = Region {
                    levels: levels.clone(),
                    rows: widened.rows.clone(),
                    cols: widened.cols.clone(),
                };
                let blocks = variables
                    .par_iter()
                    .map(|v| self.dataset.read(*v, time, &region))
                    .collect::<Result<Vec<_>, _>>()?;
                let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
                if store.resident_times() == 0 {
                    info!(path = %store.path().display(), "creating local cache");
                }
                store.write(time, &region, &blocks)?;
            }
        }

        let total = self.refills.fetch_add(1, Ordering::SeqCst) + 1;
        let allocated = self.store.read().unwrap_or_else(PoisonError::into_inner).allocated_cells();
        debug!(
            time = window.time_index,
            rows = ?widened.rows,
            cols = ?widened.cols,
            refills = total,
            allocated,
            "refill complete"
        );
        Ok(())
    }

    fn is_resident(&self, time: usize, level: usize, row: usize, col: usize) -> bool {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_resident(time, level, row, col)
    }

    /// Make sure the cell under `location` at time slice `time` is resident,
    /// requesting a refill and blocking until it is served if not.
    ///
    /// Returns `true` when this call had to wait for a refill.
    pub fn ensure_resident(
        &self,
        time: usize,
        location: &Location,
        residency: &mut Residency,
    ) -> Result<bool, CacheError> {
        let (row, col) = self.dataset.locate(location.latitude(), location.longitude());
        if residency.contains(&(time, row, col)) {
            return Ok(false);
        }
        let level = self.dataset.nearest_level_index(location.depth());
        if self.is_resident(time, level, row, col) {
            residency.insert((time, row, col));
            return Ok(false);
        }

        let id = {
            let _guard = lock(&self.request_lock);
            if self.is_resident(time, level, row, col) {
                residency.insert((time, row, col));
                return Ok(false);
            }
            let (rows, cols) = self
                .dataset
                .index_window(location.latitude(), location.longitude(), 0);
            let mut queue = lock(&self.tickets);
            let id = queue.submit(CacheWindow::new(time, rows, cols));
            self.work_ready.notify_all();
            id
        };
        debug!(ticket = id, time, row, col, "refill requested");

        let mut queue = lock(&self.tickets);
        while queue.served < id && !queue.stopped {
            queue = self
                .ticket_served
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if queue.served < id {
            return Err(CacheError::ControllerGone);
        }
        if let Some(reason) = queue.failures.get(&id) {
            return Err(CacheError::RefillFailed(reason.clone()));
        }
        drop(queue);

        residency.insert((time, row, col));
        Ok(true)
    }

    /// Sample every cached variable at `location` for time slice `time`.
    ///
    /// NaN falls back to the mean of the neighborhood; velocity that is still
    /// missing becomes zero.
    pub fn sample(&self, time: usize, location: &Location) -> Environment {
        let (row, col) = self.dataset.locate(location.latitude(), location.longitude());
        let level = self.dataset.nearest_level_index(location.depth());
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        let get = |v: Variable| store.sample(v, time, level, row, col);

        let (u, v, w) = (get(Variable::U), get(Variable::V), get(Variable::W));
        if u.is_none() || v.is_none() {
            warn!(
                time,
                latitude = location.latitude(),
                longitude = location.longitude(),
                "no velocity near particle, using zero"
            );
        }
        Environment {
            velocity: Velocity::new(u.unwrap_or(0.0), v.unwrap_or(0.0), w.unwrap_or(0.0)),
            temperature: get(Variable::Temperature),
            salinity: get(Variable::Salinity),
            floor_depth: None,
        }
    }

    /// Replay the cache file on disk into a fresh store.
    pub fn reload(&self) -> Result<LocalCache, CacheError> {
        let path = self
            .store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .path()
            .to_path_buf();
        LocalCache::load(path)
    }

    /// Delete the cache file at the end of a run.
    pub fn remove_cache_file(&self) -> Result<(), CacheError> {
        self.store
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::regular::{axis, RegularGrid};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::thread;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2014, 1, 1, 0, 0, 0).unwrap()
    }

    fn dataset() -> Arc<dyn GridDataset> {
        let times = (0..6).map(|h| t0() + Duration::hours(h)).collect();
        Arc::new(
            RegularGrid::new(times, vec![0.0, -20.0], axis(0.0, 0.1, 20), axis(0.0, 0.1, 20))
                .unwrap()
                .with_fn(Variable::U, |t, _, j, i| (t * 10_000 + j * 100 + i) as f32)
                .with_constant(Variable::V, 0.0)
                .with_constant(Variable::Temperature, 15.0),
        )
    }

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("drift-coord-{}-{name}", std::process::id()))
            .join("cache.bin")
    }

    fn at(lat: f64, lon: f64) -> Location {
        Location::new(lat, lon, -5.0, t0())
    }

    fn settings() -> CacheSettings {
        CacheSettings {
            time_chunk: 2,
            spatial_radius: 2,
            low_memory: false,
        }
    }

    /// Runs a controller on its own thread with `workers` registered besides it.
    fn with_controller<F: FnOnce(&CacheCoordinator)>(coordinator: &Arc<CacheCoordinator>, f: F) {
        coordinator.workers_started(2);
        let controller = {
            let c = Arc::clone(coordinator);
            thread::spawn(move || {
                c.run_controller();
                c.worker_exited();
            })
        };
        f(coordinator);
        coordinator.worker_exited();
        controller.join().unwrap();
        assert_eq!(coordinator.running(), 0);
    }

    #[test]
    fn test_missing_cell_triggers_exactly_one_refill() {
        let coordinator = Arc::new(CacheCoordinator::new(dataset(), scratch("one"), settings()));
        with_controller(&coordinator, |c| {
            let mut residency = Residency::default();
            let loc = at(1.0, 1.0);
            assert!(c.ensure_resident(0, &loc, &mut residency).unwrap());
            assert_eq!(c.refills(), 1);

            // Same cell, same time: confirmed locally
            assert!(!c.ensure_resident(0, &loc, &mut residency).unwrap());
            // Neighbor within the radius and the next slice of the time chunk
            let mut fresh = Residency::default();
            assert!(!c.ensure_resident(0, &at(1.1, 1.2), &mut fresh).unwrap());
            assert!(!c.ensure_resident(1, &loc, &mut fresh).unwrap());
            assert_eq!(c.refills(), 1);

            // Outside the time chunk
            assert!(c.ensure_resident(2, &loc, &mut residency).unwrap());
            assert_eq!(c.refills(), 2);

            let env = c.sample(0, &loc);
            assert_eq!(env.velocity.x, 1010.0);
            assert_eq!(env.temperature, Some(15.0));
            assert_eq!(env.salinity, None);
        });

        // The file carries the dataset's coordinate axes
        let replayed = LocalCache::load(scratch("one")).unwrap();
        assert_eq!(replayed.axes().levels, vec![0.0, -20.0]);
        assert_eq!(replayed.axes().times.len(), 6);
        assert_eq!(replayed.axes().times[0], t0());
        assert_eq!(replayed.axes().longitudes.len(), 20);
        coordinator.remove_cache_file().unwrap();
    }

    #[test]
    fn test_concurrent_requests_for_same_region_share_a_refill() {
        let coordinator = Arc::new(CacheCoordinator::new(dataset(), scratch("share"), settings()));
        coordinator.workers_started(8);
        let controller = {
            let c = Arc::clone(&coordinator);
            thread::spawn(move || {
                c.run_controller();
                c.worker_exited();
            })
        };
        let workers: Vec<_> = (0..7)
            .map(|_| {
                let c = Arc::clone(&coordinator);
                thread::spawn(move || {
                    let mut residency = Residency::default();
                    c.ensure_resident(3, &at(0.5, 0.5), &mut residency).unwrap();
                    let env = c.sample(3, &at(0.5, 0.5));
                    c.worker_exited();
                    env.velocity.x
                })
            })
            .collect();
        for w in workers {
            assert_eq!(w.join().unwrap(), 30_505.0);
        }
        controller.join().unwrap();
        assert_eq!(coordinator.refills(), 1);
        coordinator.remove_cache_file().unwrap();
    }

    #[test]
    fn test_low_memory_refill_matches_block_refill() {
        let low = CacheSettings {
            low_memory: true,
            ..settings()
        };
        let coordinator = Arc::new(CacheCoordinator::new(dataset(), scratch("low"), low));
        with_controller(&coordinator, |c| {
            let mut residency = Residency::default();
            let deep = Location::new(1.0, 1.0, -20.0, t0());
            c.ensure_resident(4, &deep, &mut residency).unwrap();
            assert_eq!(c.sample(4, &deep).velocity.x, 41_010.0);
            let replayed = c.reload().unwrap();
            assert!(replayed.is_resident(4, 0, 10, 10));
            assert!(replayed.is_resident(5, 1, 10, 10));
        });
        coordinator.remove_cache_file().unwrap();
    }

    #[test]
    fn test_request_after_controller_exit_fails() {
        let coordinator = Arc::new(CacheCoordinator::new(dataset(), scratch("gone"), settings()));
        coordinator.workers_started(1);
        coordinator.run_controller();
        let mut residency = Residency::default();
        let err = coordinator
            .ensure_resident(0, &at(1.0, 1.0), &mut residency)
            .unwrap_err();
        assert!(matches!(err, CacheError::ControllerGone));
    }

    #[test]
    fn test_ticket_queue_merges_and_orders() {
        let mut queue = TicketQueue::default();
        let a = queue.submit(CacheWindow::new(0, 0..3, 0..3));
        let b = queue.submit(CacheWindow::new(0, 2..5, 2..5));
        let c = queue.submit(CacheWindow::new(1, 0..3, 0..3));
        assert_eq!(a, b);
        assert!(c > a);
        assert_eq!(queue.pending.len(), 2);
        assert_eq!(queue.pending[0].window, CacheWindow::new(0, 0..5, 0..5));
    }
}
