//! Biological behavior pipeline
//!
//! A particle's development is a chain of [`LifeStage`]s followed by a terminal
//! dead state. The active stage is `floor(lifestage_progress)`; once progress
//! reaches the number of configured stages the particle is dead.
//!
//! Each step the active stage:
//! 1. records ambient temperature/salinity on the particle
//! 2. picks the diel rule whose trigger is soonest after the particle's clock
//! 3. sums settlement, diel and taxis contributions (in that order)
//! 4. limits the vertical component to the stage's swimming capability
//! 5. projects the displacement
//! 6. grows the particle

pub mod capability;
pub mod diel;
pub mod lifestage;
pub mod settlement;
pub mod sun;
pub mod taxis;

pub use capability::{Capability, SpeedSampling};
pub use diel::{DepthBand, Diel, DielTrigger, SunEvent};
pub use lifestage::{LifeStage, LinearGrowth};
pub use settlement::{Settlement, SettlementKind};
pub use sun::{FixedDaylight, SunCycle, SunTimes};
pub use taxis::{Taxis, TaxisVariable};

use std::sync::Arc;

use rand::rngs::StdRng;

use crate::core_types::Particle;
use crate::error::DriftError;
use crate::transport::{Environment, Movement, MovementModel};

/// The state selected by a particle's life-stage progress.
#[derive(Debug, Clone, Copy)]
pub enum ActiveStage<'a> {
    Living(usize, &'a LifeStage),
    Dead,
}

/// Life-stage state machine driving biological movement.
///
/// Cloned once per particle so each particle carries its own sampled swim
/// speeds (see [`LarvaBehavior::for_particle`]).
#[derive(Clone)]
pub struct LarvaBehavior {
    stages: Vec<LifeStage>,
    sun: Arc<dyn SunCycle>,
}

impl std::fmt::Debug for LarvaBehavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LarvaBehavior")
            .field("stages", &self.stages)
            .finish_non_exhaustive()
    }
}

impl LarvaBehavior {
    pub fn new(stages: Vec<LifeStage>, sun: Arc<dyn SunCycle>) -> Self {
        Self { stages, sun }
    }

    pub fn stages(&self) -> &[LifeStage] {
        &self.stages
    }

    /// Number of states including the terminal dead state.
    pub fn state_count(&self) -> usize {
        self.stages.len() + 1
    }

    pub fn active_stage(&self, particle: &Particle) -> ActiveStage<'_> {
        let index = particle.lifestage_index();
        match self.stages.get(index) {
            Some(stage) => ActiveStage::Living(index, stage),
            None => ActiveStage::Dead,
        }
    }

    /// Copy with every stage's swim speed drawn afresh.
    pub fn for_particle(&self, rng: &mut StdRng) -> Self {
        let mut copy = self.clone();
        for stage in &mut copy.stages {
            stage.recompute_capability(rng);
        }
        copy
    }
}

impl MovementModel for LarvaBehavior {
    fn name(&self) -> &'static str {
        "behavior"
    }

    fn advance(
        &self,
        particle: &mut Particle,
        environment: &Environment,
        dt: f64,
        _rng: &mut StdRng,
    ) -> Result<Movement, DriftError> {
        match self.active_stage(particle) {
            ActiveStage::Living(_, stage) => Ok(stage.advance(particle, environment, dt, self.sun.as_ref())?),
            ActiveStage::Dead => {
                if !particle.settled() {
                    particle.die();
                }
                particle.set_ambient(environment.temperature, environment.salinity);
                Ok(Movement::stationary(*particle.location(), dt))
            }
        }
    }
}
