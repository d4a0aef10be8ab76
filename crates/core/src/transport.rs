//! Passive transport with turbulent dispersion
//!
//! Converts a sampled current (u east, v north, w up) plus random turbulent
//! jitter into a geodesic displacement. Horizontal motion is projected along the
//! ellipsoid with Vincenty's direct solution; vertical motion is added to depth.
//!
//! # Turbulent jitter
//!
//! Each component receives an independent random-walk kick scaled by the
//! dispersion coefficient D (m²/s):
//!
//! ```text
//! u' = u + r × sqrt(2 × D / dt),   r ~ U[-1, 1]
//! ```

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core_types::{Location, Particle, Velocity};
use crate::error::DriftError;
use crate::geodesy::{self, GeodesyError};

/// Everything a movement model may read about the water around a particle.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Environment {
    pub velocity: Velocity,
    pub temperature: Option<f64>,
    pub salinity: Option<f64>,
    /// Sea-floor depth under the particle (negative below the surface), if known
    pub floor_depth: Option<f64>,
}

/// A tentative displacement produced by a movement model, before boundary checks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Movement {
    pub start: Location,
    pub end: Location,
    /// Velocity actually applied (after jitter or behavior composition)
    pub velocity: Velocity,
    /// Compass bearing of travel (degrees)
    pub azimuth: f64,
    /// Compass bearing from `end` back towards `start` (degrees)
    pub reverse_azimuth: f64,
    /// Mathematical angle of travel (degrees, 0 = east, counter-clockwise)
    pub angle: f64,
    pub horizontal_distance: f64,
    pub vertical_distance: f64,
}

impl Movement {
    /// A movement that leaves the particle where it is, only advancing the clock.
    pub fn stationary(start: Location, dt: f64) -> Self {
        Self {
            start,
            end: start.advanced(dt),
            velocity: Velocity::zeros(),
            azimuth: 0.0,
            reverse_azimuth: 180.0,
            angle: 90.0,
            horizontal_distance: 0.0,
            vertical_distance: 0.0,
        }
    }
}

/// A model that moves a particle for one timestep.
///
/// Models run in order each step; the boundary resolver is applied after each.
pub trait MovementModel: Send + Sync {
    fn name(&self) -> &'static str;

    fn advance(
        &self,
        particle: &mut Particle,
        environment: &Environment,
        dt: f64,
        rng: &mut StdRng,
    ) -> Result<Movement, DriftError>;
}

/// Project `start` by `velocity` over `dt` seconds.
///
/// Horizontal speed and bearing come from `hypot`/`atan2` on (u, v); the
/// vertical displacement `w × dt` is added straight to depth.
pub fn displace(start: &Location, velocity: Velocity, dt: f64) -> Result<Movement, GeodesyError> {
    let (u, v, w) = (velocity.x, velocity.y, velocity.z);
    let speed = u.hypot(v);
    let angle = geodesy::normalize_azimuth(v.atan2(u).to_degrees());
    let azimuth = geodesy::angle_to_azimuth(angle);
    let horizontal_distance = speed * dt;
    let vertical_distance = w * dt;

    let projection = geodesy::project(start.latitude(), start.longitude(), azimuth, horizontal_distance)?;
    let end = Location::new(
        projection.latitude,
        projection.longitude,
        start.depth() + vertical_distance,
        start.time(),
    )
    .advanced(dt);

    Ok(Movement {
        start: *start,
        end,
        velocity,
        azimuth,
        reverse_azimuth: projection.azimuth_reverse,
        angle,
        horizontal_distance,
        vertical_distance,
    })
}

/// Passive advection by the sampled current plus turbulent dispersion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Transport {
    /// Horizontal dispersion coefficient (m²/s)
    pub horizontal_dispersion: f64,
    /// Vertical dispersion coefficient (m²/s)
    pub vertical_dispersion: f64,
}

impl Transport {
    pub fn new(horizontal_dispersion: f64, vertical_dispersion: f64) -> Self {
        Self {
            horizontal_dispersion,
            vertical_dispersion,
        }
    }

    #[inline]
    fn jitter(coefficient: f64, dt: f64, rng: &mut StdRng) -> f64 {
        if coefficient <= 0.0 || dt <= 0.0 {
            return 0.0;
        }
        rng.random_range(-1.0..=1.0) * (2.0 * coefficient / dt).sqrt()
    }

    /// Move a particle with current `velocity` for `dt` seconds.
    ///
    /// Halted particles see a zero current and receive no jitter.
    pub fn move_particle(
        &self,
        particle: &Particle,
        velocity: Velocity,
        dt: f64,
        rng: &mut StdRng,
    ) -> Result<Movement, GeodesyError> {
        let start = particle.location();
        if particle.halted() {
            return displace(start, Velocity::zeros(), dt);
        }
        let jittered = Velocity::new(
            velocity.x + Self::jitter(self.horizontal_dispersion, dt, rng),
            velocity.y + Self::jitter(self.horizontal_dispersion, dt, rng),
            velocity.z + Self::jitter(self.vertical_dispersion, dt, rng),
        );
        displace(start, jittered, dt)
    }
}

impl MovementModel for Transport {
    fn name(&self) -> &'static str {
        "transport"
    }

    fn advance(
        &self,
        particle: &mut Particle,
        environment: &Environment,
        dt: f64,
        rng: &mut StdRng,
    ) -> Result<Movement, DriftError> {
        Ok(self.move_particle(particle, environment.velocity, dt, rng)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::{TimeZone, Utc};
    use rand::SeedableRng;

    fn particle() -> Particle {
        Particle::new(
            0,
            Location::new(0.0, 0.0, -10.0, Utc.with_ymd_and_hms(2014, 1, 2, 0, 0, 0).unwrap()),
        )
    }

    #[test]
    fn test_due_east_without_dispersion() {
        let mut rng = StdRng::seed_from_u64(1);
        let m = Transport::default()
            .move_particle(&particle(), Velocity::new(0.1, 0.0, 0.0), 3600.0, &mut rng)
            .unwrap();
        assert_abs_diff_eq!(m.horizontal_distance, 360.0, epsilon = 1e-9);
        assert_abs_diff_eq!(m.azimuth, 90.0, epsilon = 1e-9);
        assert_abs_diff_eq!(m.angle, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(m.end.latitude(), 0.0, epsilon = 1e-9);
        assert!(m.end.longitude() > 0.0);
        assert_eq!(m.end.depth(), -10.0);
        assert_eq!(m.end.time(), m.start.time() + chrono::Duration::hours(1));
    }

    #[test]
    fn test_vertical_displacement_added_to_depth() {
        let mut rng = StdRng::seed_from_u64(1);
        let m = Transport::default()
            .move_particle(&particle(), Velocity::new(0.0, 0.0, 0.001), 1000.0, &mut rng)
            .unwrap();
        assert_abs_diff_eq!(m.end.depth(), -9.0, epsilon = 1e-12);
        assert_eq!(m.end.latitude(), 0.0);
        assert_eq!(m.end.longitude(), 0.0);
    }

    #[test]
    fn test_halted_particle_does_not_move() {
        let mut p = particle();
        p.halt();
        let mut rng = StdRng::seed_from_u64(1);
        let m = Transport::new(10.0, 1.0)
            .move_particle(&p, Velocity::new(1.0, 1.0, 0.1), 600.0, &mut rng)
            .unwrap();
        assert_eq!(m.end.latitude(), m.start.latitude());
        assert_eq!(m.end.longitude(), m.start.longitude());
        assert_eq!(m.end.depth(), m.start.depth());
    }

    #[test]
    fn test_jitter_bounded_by_dispersion() {
        let mut rng = StdRng::seed_from_u64(99);
        let dt: f64 = 100.0;
        let bound = (2.0 * 0.5 / dt).sqrt();
        for _ in 0..200 {
            let m = Transport::new(0.5, 0.5)
                .move_particle(&particle(), Velocity::zeros(), dt, &mut rng)
                .unwrap();
            assert!(m.velocity.x.abs() <= bound);
            assert!(m.velocity.y.abs() <= bound);
            assert!(m.velocity.z.abs() <= bound);
        }
    }
}
