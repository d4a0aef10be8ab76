//! Fixed-size worker pool draining one shared task queue
//!
//! Workers pull [`Task`]s off a single channel. The first task submitted is
//! normally [`Task::Stage`], which turns whichever worker takes it into the
//! cache controller for the rest of the run. Every other task is a short job
//! whose result goes back on a separate results channel. A [`Task::Sentinel`]
//! tells the worker that takes it to leave; submitting one sentinel per worker
//! shuts the pool down.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::cache::CacheCoordinator;
use crate::error::DriftError;

pub enum Task<J> {
    /// Run the cache controller until every other worker has exited
    Stage,
    /// A job tagged with the slot its result belongs to
    Job(usize, J),
    Sentinel,
}

/// Result of one job; `None` when the job panicked.
pub type JobResult<R> = (usize, Option<R>);

pub struct WorkerPool<J, R> {
    tasks: Sender<Task<J>>,
    results: Receiver<JobResult<R>>,
    handles: Vec<JoinHandle<()>>,
    exited: Arc<AtomicUsize>,
}

impl<J, R> WorkerPool<J, R>
where
    J: Send + 'static,
    R: Send + 'static,
{
    /// Start `size` workers running `job` for each [`Task::Job`].
    ///
    /// The workers register themselves with `coordinator` so the controller
    /// knows when it is the last one left.
    pub fn spawn<F>(size: usize, coordinator: &Arc<CacheCoordinator>, job: F) -> Result<Self, DriftError>
    where
        F: Fn(J) -> R + Send + Sync + 'static,
    {
        let (task_tx, task_rx) = mpsc::channel::<Task<J>>();
        let (result_tx, result_rx) = mpsc::channel::<JobResult<R>>();
        let task_rx = Arc::new(Mutex::new(task_rx));
        let job = Arc::new(job);
        let exited = Arc::new(AtomicUsize::new(0));

        coordinator.workers_started(size);
        let mut handles = Vec::with_capacity(size);
        for index in 0..size {
            let task_rx = Arc::clone(&task_rx);
            let result_tx = result_tx.clone();
            let job = Arc::clone(&job);
            let worker_coordinator = Arc::clone(coordinator);
            let exited = Arc::clone(&exited);
            let handle = thread::Builder::new()
                .name(format!("drift-worker-{index}"))
                .spawn(move || {
                    worker_loop(index, &task_rx, &result_tx, job.as_ref(), &worker_coordinator);
                    worker_coordinator.worker_exited();
                    exited.fetch_add(1, Ordering::SeqCst);
                })
                .map_err(|err| DriftError::Worker(format!("failed to spawn worker thread: {err}")));
            match handle {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    // Unregister the workers that never started
                    for _ in index..size {
                        coordinator.worker_exited();
                    }
                    for _ in 0..handles.len() {
                        let _ = task_tx.send(Task::Sentinel);
                    }
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(err);
                }
            }
        }

        Ok(Self {
            tasks: task_tx,
            results: result_rx,
            handles,
            exited,
        })
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    pub fn submit(&self, task: Task<J>) -> Result<(), DriftError> {
        self.tasks
            .send(task)
            .map_err(|_| DriftError::Worker("task queue closed".to_string()))
    }

    /// Queue one sentinel per worker.
    pub fn submit_sentinels(&self) -> Result<(), DriftError> {
        for _ in 0..self.size() {
            self.submit(Task::Sentinel)?;
        }
        Ok(())
    }

    /// Collect up to `expected` results.
    ///
    /// Stops early if every worker has exited, in which case the missing
    /// results are simply absent.
    pub fn collect(&self, expected: usize) -> Vec<JobResult<R>> {
        let mut out = Vec::with_capacity(expected);
        while out.len() < expected {
            match self.results.recv_timeout(Duration::from_millis(200)) {
                Ok(result) => out.push(result),
                Err(RecvTimeoutError::Timeout) => {
                    if self.exited.load(Ordering::SeqCst) == self.size() {
                        // Drain anything sent just before the last exit
                        out.extend(self.results.try_iter());
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        out
    }

    /// Wait for every worker to exit and return how many did.
    pub fn join(self) -> Result<usize, DriftError> {
        let mut failed = 0;
        for handle in self.handles {
            if handle.join().is_err() {
                failed += 1;
            }
        }
        if failed > 0 {
            return Err(DriftError::Worker(format!("{failed} worker thread(s) panicked")));
        }
        Ok(self.exited.load(Ordering::SeqCst))
    }
}

fn worker_loop<J, R, F>(
    index: usize,
    tasks: &Mutex<Receiver<Task<J>>>,
    results: &Sender<JobResult<R>>,
    job: &F,
    coordinator: &CacheCoordinator,
) where
    F: Fn(J) -> R,
{
    loop {
        let task = tasks.lock().unwrap_or_else(PoisonError::into_inner).recv();
        match task {
            Ok(Task::Stage) => {
                debug!(worker = index, "running cache controller");
                if panic::catch_unwind(AssertUnwindSafe(|| coordinator.run_controller())).is_err() {
                    warn!(worker = index, "cache controller panicked");
                    coordinator.controller_stopped();
                }
            }
            Ok(Task::Job(slot, input)) => {
                let output = panic::catch_unwind(AssertUnwindSafe(|| job(input))).ok();
                if output.is_none() {
                    warn!(worker = index, slot, "job panicked");
                }
                if results.send((slot, output)).is_err() {
                    break;
                }
            }
            Ok(Task::Sentinel) | Err(_) => break,
        }
    }
    debug!(worker = index, "worker exiting");
}
