//! Per-particle force loop
//!
//! One [`Forcer`] is shared by every particle task. For each timestep it:
//! 1. finds the nearest dataset time slice to the particle's clock
//! 2. makes sure the cache holds that slice under the particle
//! 3. samples the environment there
//! 4. runs each movement model in turn, resolving boundaries after each
//! 5. records the sample and ages the particle

use std::sync::Arc;

use chrono::Duration;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::behavior::LarvaBehavior;
use crate::boundary::BoundaryResolver;
use crate::cache::{CacheCoordinator, Residency};
use crate::core_types::{Particle, Sample};
use crate::error::DriftError;
use crate::transport::{MovementModel, Transport};

/// What became of one particle task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskOutcome {
    Finished(Particle),
    /// The force loop hit an error. The particle is returned as it stood, if
    /// the task got that far.
    Failed {
        id: usize,
        particle: Option<Particle>,
        reason: String,
    },
}

impl TaskOutcome {
    pub fn particle(&self) -> Option<&Particle> {
        match self {
            TaskOutcome::Finished(p) => Some(p),
            TaskOutcome::Failed { particle, .. } => particle.as_ref(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TaskOutcome::Failed { .. })
    }
}

/// Runs the full timestep loop for one particle at a time.
#[derive(Debug)]
pub struct Forcer {
    coordinator: Arc<CacheCoordinator>,
    transport: Transport,
    behavior: Option<LarvaBehavior>,
    resolver: BoundaryResolver,
    timestep: f64,
    steps: usize,
    seed: Option<u64>,
}

impl Forcer {
    pub fn new(
        coordinator: Arc<CacheCoordinator>,
        transport: Transport,
        resolver: BoundaryResolver,
        timestep: f64,
        steps: usize,
    ) -> Self {
        Self {
            coordinator,
            transport,
            behavior: None,
            resolver,
            timestep,
            steps,
            seed: None,
        }
    }

    pub fn with_behavior(mut self, behavior: LarvaBehavior) -> Self {
        self.behavior = Some(behavior);
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Particle-private RNG; seeded runs give every particle its own stream.
    pub fn rng_for(&self, id: usize) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(id as u64)),
            None => StdRng::from_os_rng(),
        }
    }

    /// Run `particle` through every timestep, capturing any failure.
    pub fn force(&self, mut particle: Particle) -> TaskOutcome {
        match self.run(&mut particle) {
            Ok(()) => TaskOutcome::Finished(particle),
            Err(e) => TaskOutcome::Failed {
                id: particle.id(),
                reason: e.to_string(),
                particle: Some(particle),
            },
        }
    }

    fn run(&self, particle: &mut Particle) -> Result<(), DriftError> {
        let mut rng = self.rng_for(particle.id());
        let behavior = self.behavior.as_ref().map(|b| b.for_particle(&mut rng));
        let mut models: Vec<&dyn MovementModel> = vec![&self.transport];
        if let Some(b) = &behavior {
            models.push(b);
        }

        let dataset = self.coordinator.dataset();
        let mut residency = Residency::default();
        let step_length = Duration::milliseconds((self.timestep * 1000.0).round() as i64);
        let mut refills = 0_usize;

        for step in 0..self.steps {
            let location = *particle.location();
            let step_end = location.time() + step_length;
            let time_index = dataset.nearest_time_index(location.time());
            if self.coordinator.ensure_resident(time_index, &location, &mut residency)? {
                refills += 1;
            }

            let mut environment = self.coordinator.sample(time_index, &location);

            for (i, model) in models.iter().enumerate() {
                // Earlier models may have moved the particle this step
                environment.floor_depth = self.resolver.floor_depth(particle.location());
                let mut movement = model.advance(particle, &environment, self.timestep, &mut rng)?;
                movement.end = movement.end.with_time(step_end);
                if i == 0 {
                    particle.push_location(movement.end);
                } else {
                    particle.update_location(movement.end);
                }
                self.resolver.resolve(particle, &movement, &mut rng)?;
            }

            particle.record_sample(&Sample {
                u: Some(environment.velocity.x),
                v: Some(environment.velocity.y),
                w: Some(environment.velocity.z),
                temperature: environment.temperature,
                salinity: environment.salinity,
            });
            particle.add_age(self.timestep);
            debug!(
                particle = particle.id(),
                step,
                latitude = particle.location().latitude(),
                longitude = particle.location().longitude(),
                depth = particle.location().depth(),
                "step complete"
            );
        }

        debug!(particle = particle.id(), refills, "particle finished");
        Ok(())
    }
}
