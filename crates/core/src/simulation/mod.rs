//! Run orchestration
//!
//! [`Simulation::run`] wires a run together:
//! - validates the configuration
//! - builds the shared [`CacheCoordinator`] and the boundary resolver
//! - releases the particles (optionally scattered around the release point)
//! - seeds the worker pool with one staging task, one force task per particle
//!   and one sentinel per worker
//! - collects a [`TaskOutcome`] for every particle slot and deletes the
//!   scratch cache file
//!
//! Individual particle failures are logged and reported, never propagated.

pub mod forcer;
pub mod pool;

pub use forcer::{Forcer, TaskOutcome};
pub use pool::{Task, WorkerPool};

use std::sync::Arc;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::behavior::LarvaBehavior;
use crate::boundary::{Bathymetry, BoundaryResolver, Shoreline};
use crate::cache::CacheCoordinator;
use crate::config::SimulationConfig;
use crate::core_types::{Location, Particle};
use crate::dataset::GridDataset;
use crate::error::DriftError;
use crate::geodesy;

/// Seed offset for the release scatter stream, keeping it apart from the
/// per-particle streams derived from the same seed.
const RELEASE_SEED_SALT: u64 = 0x5EED_5CA7;

/// Counts describing how a run ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub particles: usize,
    /// Finished neither settled nor dead
    pub alive: usize,
    pub settled: usize,
    pub dead: usize,
    pub failed: usize,
    pub refills: usize,
    pub workers_exited: usize,
}

/// Everything a run produces, one outcome per particle slot in id order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    pub outcomes: Vec<TaskOutcome>,
    pub report: RunReport,
}

impl RunOutput {
    /// Particles that completed every timestep.
    pub fn finished(&self) -> impl Iterator<Item = &Particle> {
        self.outcomes.iter().filter_map(|o| match o {
            TaskOutcome::Finished(p) => Some(p),
            TaskOutcome::Failed { .. } => None,
        })
    }
}

/// A configured run over one dataset.
pub struct Simulation {
    config: SimulationConfig,
    dataset: Arc<dyn GridDataset>,
    shoreline: Option<Arc<dyn Shoreline>>,
    bathymetry: Option<Arc<dyn Bathymetry>>,
    behavior: Option<LarvaBehavior>,
}

impl Simulation {
    pub fn new(config: SimulationConfig, dataset: Arc<dyn GridDataset>) -> Self {
        Self {
            config,
            dataset,
            shoreline: None,
            bathymetry: None,
            behavior: None,
        }
    }

    pub fn with_shoreline(mut self, shoreline: Arc<dyn Shoreline>) -> Self {
        self.shoreline = Some(shoreline);
        self
    }

    pub fn with_bathymetry(mut self, bathymetry: Arc<dyn Bathymetry>) -> Self {
        self.bathymetry = Some(bathymetry);
        self
    }

    pub fn with_behavior(mut self, behavior: LarvaBehavior) -> Self {
        self.behavior = Some(behavior);
        self
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    fn resolver(&self) -> BoundaryResolver {
        let interactions = self.config.interactions;
        let mut resolver = BoundaryResolver::new().with_sea_surface(interactions.sea_surface);
        match (&self.shoreline, interactions.shoreline) {
            (Some(shoreline), true) => {
                resolver = resolver.with_shoreline(Arc::clone(shoreline), self.config.shoreline_reaction);
            }
            (None, true) => warn!("shoreline interaction enabled but no shoreline supplied"),
            _ => {}
        }
        match (&self.bathymetry, interactions.bathymetry) {
            (Some(bathymetry), true) => {
                resolver = resolver.with_bathymetry(Arc::clone(bathymetry), self.config.bathymetry_reaction);
            }
            (None, true) => warn!("bathymetry interaction enabled but no bathymetry supplied"),
            _ => {}
        }
        resolver
    }

    /// Initial particles, scattered uniformly over a disc of the release radius.
    pub fn release(&self) -> Result<Vec<Particle>, DriftError> {
        let release = &self.config.release;
        let origin = Location::new(
            release.latitude,
            release.longitude,
            release.depth,
            self.config.start_time()?,
        );
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ RELEASE_SEED_SALT),
            None => StdRng::from_os_rng(),
        };

        (0..self.config.particles)
            .map(|id| -> Result<Particle, DriftError> {
                if release.radius <= 0.0 {
                    return Ok(Particle::new(id, origin));
                }
                let distance = release.radius * rng.random::<f64>().sqrt();
                let azimuth = rng.random_range(0.0..360.0);
                let p = geodesy::project(origin.latitude(), origin.longitude(), azimuth, distance)?;
                Ok(Particle::new(id, origin.with_position(p.latitude, p.longitude)))
            })
            .collect()
    }

    fn cache_path(&self) -> std::path::PathBuf {
        let stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        self.config
            .cache_dir
            .join(format!("drift-cache-{}-{stamp}.bin", std::process::id()))
    }

    /// Run every particle to completion.
    ///
    /// Only an invalid configuration or a pool that cannot start is an error;
    /// failed particles show up as [`TaskOutcome::Failed`].
    pub fn run(&self) -> Result<RunOutput, DriftError> {
        self.config.validate()?;
        let particles = self.release()?;
        let count = particles.len();
        info!(
            particles = count,
            steps = self.config.steps,
            timestep = self.config.timestep,
            workers = self.config.workers,
            dataset = %self.config.dataset,
            "starting drift simulation"
        );

        let coordinator = Arc::new(CacheCoordinator::new(
            Arc::clone(&self.dataset),
            self.cache_path(),
            self.config.cache,
        ));
        let mut forcer = Forcer::new(
            Arc::clone(&coordinator),
            self.config.dispersion,
            self.resolver(),
            self.config.timestep,
            self.config.steps,
        )
        .with_seed(self.config.seed);
        if let Some(behavior) = &self.behavior {
            forcer = forcer.with_behavior(behavior.clone());
        }
        let forcer = Arc::new(forcer);

        let pool = {
            let forcer = Arc::clone(&forcer);
            WorkerPool::spawn(self.config.workers, &coordinator, move |p: Particle| forcer.force(p))?
        };
        pool.submit(Task::Stage)?;
        for particle in particles {
            pool.submit(Task::Job(particle.id(), particle))?;
        }
        pool.submit_sentinels()?;

        let mut slots: Vec<Option<TaskOutcome>> = vec![None; count];
        for (slot, outcome) in pool.collect(count) {
            if let Some(entry) = slots.get_mut(slot) {
                *entry = Some(outcome.unwrap_or_else(|| TaskOutcome::Failed {
                    id: slot,
                    particle: None,
                    reason: "particle task panicked".to_string(),
                }));
            }
        }
        let workers_exited = pool.join()?;

        if let Err(e) = coordinator.remove_cache_file() {
            warn!(error = %e, "could not remove cache file");
        }

        let outcomes: Vec<TaskOutcome> = slots
            .into_iter()
            .enumerate()
            .map(|(id, outcome)| {
                outcome.unwrap_or_else(|| TaskOutcome::Failed {
                    id,
                    particle: None,
                    reason: "no result returned".to_string(),
                })
            })
            .collect();

        let mut report = RunReport {
            particles: count,
            refills: coordinator.refills(),
            workers_exited,
            ..RunReport::default()
        };
        for outcome in &outcomes {
            match outcome {
                TaskOutcome::Finished(p) if p.settled() => report.settled += 1,
                TaskOutcome::Finished(p) if p.dead() => report.dead += 1,
                TaskOutcome::Finished(_) => report.alive += 1,
                TaskOutcome::Failed { id, reason, .. } => {
                    warn!(particle = id, reason = %reason, "particle failed");
                    report.failed += 1;
                }
            }
        }
        info!(
            alive = report.alive,
            settled = report.settled,
            dead = report.dead,
            failed = report.failed,
            refills = report.refills,
            "drift simulation complete"
        );

        Ok(RunOutput { outcomes, report })
    }
}
