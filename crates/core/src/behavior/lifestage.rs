//! Life stages and growth

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::capability::Capability;
use super::diel::{self, Diel};
use super::settlement::Settlement;
use super::sun::SunCycle;
use super::taxis::Taxis;
use crate::core_types::{Particle, Velocity};
use crate::geodesy::GeodesyError;
use crate::transport::{displace, Environment, Movement};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Temperature-dependent stage duration: `duration_days = a × T + b`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearGrowth {
    pub a: f64,
    pub b: f64,
}

/// One phase of a particle's development.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifeStage {
    pub name: String,
    /// Stage duration used when no temperature law applies (days)
    pub duration_days: f64,
    #[serde(default)]
    pub linear_growth: Option<LinearGrowth>,
    #[serde(default)]
    pub capability: Option<Capability>,
    #[serde(default)]
    pub diel: Vec<Diel>,
    #[serde(default)]
    pub taxis: Vec<Taxis>,
    #[serde(default)]
    pub settlement: Option<Settlement>,
}

impl LifeStage {
    pub fn new(name: impl Into<String>, duration_days: f64) -> Self {
        Self {
            name: name.into(),
            duration_days,
            linear_growth: None,
            capability: None,
            diel: Vec::new(),
            taxis: Vec::new(),
            settlement: None,
        }
    }

    pub fn with_linear_growth(mut self, a: f64, b: f64) -> Self {
        self.linear_growth = Some(LinearGrowth { a, b });
        self
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capability = Some(capability);
        self
    }

    pub fn with_diel(mut self, rule: Diel) -> Self {
        self.diel.push(rule);
        self
    }

    pub fn with_taxis(mut self, rule: Taxis) -> Self {
        self.taxis.push(rule);
        self
    }

    pub fn with_settlement(mut self, settlement: Settlement) -> Self {
        self.settlement = Some(settlement);
        self
    }

    /// Draw a fresh swim speed for this stage.
    pub fn recompute_capability(&mut self, rng: &mut StdRng) {
        if let Some(capability) = self.capability.as_mut() {
            capability.recompute(rng);
        }
    }

    /// Maximum vertical swim speed; unlimited without a capability.
    pub fn swim_speed(&self) -> f64 {
        self.capability.as_ref().map_or(f64::INFINITY, Capability::speed)
    }

    /// Life-stage progress gained over `dt` seconds at ambient `temperature`.
    pub fn growth(&self, temperature: Option<f64>, dt: f64) -> f64 {
        let dt_days = dt / SECONDS_PER_DAY;
        let stage_days = match (self.linear_growth, temperature) {
            (Some(law), Some(t)) => law.a * t + law.b,
            _ => self.duration_days,
        };
        if stage_days > 0.0 {
            dt_days / stage_days
        } else {
            0.0
        }
    }

    /// Run one timestep of this stage's behaviors and project the result.
    pub fn advance(
        &self,
        particle: &mut Particle,
        environment: &Environment,
        dt: f64,
        sun: &dyn SunCycle,
    ) -> Result<Movement, GeodesyError> {
        particle.set_ambient(environment.temperature, environment.salinity);
        let previous = *particle.location();
        let active_diel = diel::select_active(&self.diel, &previous, sun);

        let mut origin = previous;
        if let Some(settlement) = &self.settlement {
            if let Some(depth) = settlement.attempt(particle, environment.floor_depth) {
                debug!(particle = particle.id(), stage = %self.name, depth, "settled");
                origin = origin.with_depth(depth);
            }
        }

        let mut velocity = Velocity::zeros();
        if let Some(rule) = active_diel {
            velocity += rule.contribution(particle, self.swim_speed(), dt);
        }
        for rule in &self.taxis {
            velocity += rule.contribution(particle);
        }
        if let Some(capability) = &self.capability {
            velocity.z = capability.limit(velocity.z);
        }
        if particle.halted() {
            velocity = Velocity::zeros();
        }

        let mut movement = displace(&origin, velocity, dt)?;
        movement.start = previous;

        particle.grow(self.growth(particle.ambient_temperature(), dt));
        Ok(movement)
    }
}
