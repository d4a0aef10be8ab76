//! Boundary interaction: shoreline, sea floor and sea surface
//!
//! After every movement model runs, the tentative end point is checked against
//! the domain boundaries in a fixed order, each check free to overwrite the end
//! point chosen by the previous one:
//!
//! 1. **Shoreline** - a segment crossing land stops at the coastline and either
//!    backs off along the reverse bearing or sticks to the coast
//! 2. **Bathymetry** - a particle below the sea floor either hovers 1 m above it
//!    or returns to where the step started
//! 3. **Sea surface** - depth is clamped to at most 0

pub mod bathymetry;
pub mod shoreline;

pub use bathymetry::{Bathymetry, ConstantBathymetry};
pub use shoreline::{Intersection, LandPolygon, PolygonShoreline, Shoreline, ShorelineError};

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core_types::{Location, Particle};
use crate::error::DriftError;
use crate::geodesy;
use crate::transport::Movement;

/// Height above the sea floor a hovering particle is kept at (m)
pub const HOVER_HEIGHT: f64 = 1.0;

/// Distance a reversing particle backs off the coastline (m)
pub const DEFAULT_REVERSE_DISTANCE: f64 = 100.0;

/// What a particle does when it reaches the coast.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShorelineReaction {
    /// Back off `distance` meters along the reverse bearing, with the bearing
    /// jittered uniformly by up to `jitter_degrees` either way
    Reverse { distance: f64, jitter_degrees: f64 },
    /// Stay at the hit point
    Stick,
}

impl Default for ShorelineReaction {
    fn default() -> Self {
        ShorelineReaction::Reverse {
            distance: DEFAULT_REVERSE_DISTANCE,
            jitter_degrees: 0.0,
        }
    }
}

/// What a particle does when it would end up below the sea floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BathymetryReaction {
    /// Sit [`HOVER_HEIGHT`] above the floor at the end point.
    ///
    /// Uses the floor under the end point, not under the true crossing point.
    #[default]
    Hover,
    /// Return to the start of the step
    Reverse,
}

/// Applies the ordered boundary checks to each movement.
///
/// A disabled boundary is simply absent.
#[derive(Clone, Default)]
pub struct BoundaryResolver {
    shoreline: Option<Arc<dyn Shoreline>>,
    shoreline_reaction: ShorelineReaction,
    bathymetry: Option<Arc<dyn Bathymetry>>,
    bathymetry_reaction: BathymetryReaction,
    sea_surface: bool,
}

impl std::fmt::Debug for BoundaryResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundaryResolver")
            .field("shoreline", &self.shoreline.is_some())
            .field("shoreline_reaction", &self.shoreline_reaction)
            .field("bathymetry", &self.bathymetry.is_some())
            .field("bathymetry_reaction", &self.bathymetry_reaction)
            .field("sea_surface", &self.sea_surface)
            .finish()
    }
}

impl BoundaryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shoreline(mut self, shoreline: Arc<dyn Shoreline>, reaction: ShorelineReaction) -> Self {
        self.shoreline = Some(shoreline);
        self.shoreline_reaction = reaction;
        self
    }

    pub fn with_bathymetry(mut self, bathymetry: Arc<dyn Bathymetry>, reaction: BathymetryReaction) -> Self {
        self.bathymetry = Some(bathymetry);
        self.bathymetry_reaction = reaction;
        self
    }

    pub fn with_sea_surface(mut self, enabled: bool) -> Self {
        self.sea_surface = enabled;
        self
    }

    /// Floor depth at a point, when bathymetry is enabled.
    pub fn floor_depth(&self, location: &Location) -> Option<f64> {
        self.bathymetry
            .as_ref()
            .map(|b| b.depth_at(location.latitude(), location.longitude()))
    }

    /// Resolve `movement` against all enabled boundaries.
    ///
    /// The particle's current location is overwritten with the result, which is
    /// also returned.
    pub fn resolve(
        &self,
        particle: &mut Particle,
        movement: &Movement,
        rng: &mut StdRng,
    ) -> Result<Location, DriftError> {
        let mut end = movement.end;

        if let Some(shoreline) = &self.shoreline {
            end = self.react_to_shoreline(shoreline.as_ref(), particle, movement, end, rng)?;
        }

        if let Some(bathymetry) = &self.bathymetry {
            let floor = bathymetry.depth_at(end.latitude(), end.longitude());
            if end.depth() < floor {
                end = match self.bathymetry_reaction {
                    BathymetryReaction::Hover => end.with_depth(floor + HOVER_HEIGHT),
                    BathymetryReaction::Reverse => movement.start.with_time(end.time()),
                };
                debug!(particle = particle.id(), floor, depth = end.depth(), "sea floor reaction");
                particle.note(format!("hit sea floor ({floor:.1} m)"));
            }
        }

        if self.sea_surface && end.depth() > 0.0 {
            end = end.with_depth(0.0);
        }

        particle.update_location(end);
        Ok(end)
    }

    fn react_to_shoreline(
        &self,
        shoreline: &dyn Shoreline,
        particle: &mut Particle,
        movement: &Movement,
        end: Location,
        rng: &mut StdRng,
    ) -> Result<Location, DriftError> {
        let Some(hit) = shoreline.intersect(&movement.start, &end)? else {
            return Ok(end);
        };
        let hit_point = end.with_position(hit.latitude, hit.longitude);
        particle.update_location(hit_point);
        particle.note(format!("hit shoreline ({})", hit.feature));

        match self.shoreline_reaction {
            ShorelineReaction::Stick => Ok(hit_point),
            ShorelineReaction::Reverse {
                distance,
                jitter_degrees,
            } => {
                let jitter = if jitter_degrees > 0.0 {
                    rng.random_range(-jitter_degrees..=jitter_degrees)
                } else {
                    0.0
                };
                let bearing = geodesy::normalize_azimuth(movement.reverse_azimuth + jitter);
                let back = geodesy::project(hit.latitude, hit.longitude, bearing, distance)?;
                let candidate = hit_point.with_position(back.latitude, back.longitude);
                if shoreline.on_land(&candidate) {
                    debug!(particle = particle.id(), "reverse point on land, sticking to coast");
                    Ok(hit_point)
                } else {
                    Ok(candidate)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::Velocity;
    use crate::transport::displace;
    use approx::assert_abs_diff_eq;
    use chrono::{TimeZone, Utc};
    use rand::SeedableRng;

    fn start(depth: f64) -> Location {
        Location::new(0.0, 0.0, depth, Utc.with_ymd_and_hms(2014, 1, 2, 0, 0, 0).unwrap())
    }

    fn step(particle: &mut Particle, velocity: Velocity, dt: f64) -> Movement {
        let m = displace(particle.location(), velocity, dt).unwrap();
        particle.push_location(m.end);
        m
    }

    fn island() -> Arc<dyn Shoreline> {
        // Coast 0.01° (~1.1 km) east of the origin
        Arc::new(PolygonShoreline::new(vec![LandPolygon::rectangle(
            "mainland", 0.01, -1.0, 1.0, 1.0,
        )]))
    }

    #[test]
    fn test_stick_leaves_particle_at_coast() {
        let resolver = BoundaryResolver::new().with_shoreline(island(), ShorelineReaction::Stick);
        let mut p = Particle::new(0, start(-1.0));
        let m = step(&mut p, Velocity::new(1.0, 0.0, 0.0), 3600.0);
        let mut rng = StdRng::seed_from_u64(0);
        let end = resolver.resolve(&mut p, &m, &mut rng).unwrap();
        assert_abs_diff_eq!(end.longitude(), 0.01, epsilon = 1e-6);
        assert!(end.longitude() < 0.01);
        assert_eq!(*p.location(), end);
        assert_eq!(p.locations().len(), 2);
    }

    #[test]
    fn test_reverse_backs_off_coast() {
        let resolver = BoundaryResolver::new().with_shoreline(island(), ShorelineReaction::default());
        let mut p = Particle::new(0, start(-1.0));
        let m = step(&mut p, Velocity::new(1.0, 0.0, 0.0), 3600.0);
        let mut rng = StdRng::seed_from_u64(0);
        let end = resolver.resolve(&mut p, &m, &mut rng).unwrap();
        let from_coast = geodesy::distance_and_azimuth(0.0, 0.01, end.latitude(), end.longitude()).unwrap();
        assert_abs_diff_eq!(from_coast.distance, DEFAULT_REVERSE_DISTANCE, epsilon = 0.1);
        assert!(end.longitude() < 0.01);
    }

    #[test]
    fn test_reverse_onto_far_bank_sticks_at_hit() {
        // Channel about 670 m wide between a western and an eastern bank
        let channel: Arc<dyn Shoreline> = Arc::new(PolygonShoreline::new(vec![
            LandPolygon::rectangle("west bank", -1.0, -1.0, 0.004, 1.0),
            LandPolygon::rectangle("east bank", 0.01, -1.0, 1.0, 1.0),
        ]));
        let reaction = ShorelineReaction::Reverse {
            distance: 1000.0,
            jitter_degrees: 0.0,
        };
        let resolver = BoundaryResolver::new().with_shoreline(Arc::clone(&channel), reaction);
        let mut p = Particle::new(0, start(-1.0).with_position(0.0, 0.005));
        let m = step(&mut p, Velocity::new(1.0, 0.0, 0.0), 3600.0);
        let mut rng = StdRng::seed_from_u64(0);
        let end = resolver.resolve(&mut p, &m, &mut rng).unwrap();

        assert_abs_diff_eq!(end.longitude(), 0.01, epsilon = 1e-6);
        assert!(!channel.on_land(&end));
        assert_eq!(*p.location(), end);
    }

    #[test]
    fn test_debug_lists_active_boundaries() {
        let resolver = BoundaryResolver::new()
            .with_shoreline(island(), ShorelineReaction::Stick)
            .with_sea_surface(true);
        let text = format!("{resolver:?}");
        assert!(text.contains("shoreline: true"));
        assert!(text.contains("bathymetry: false"));
        assert!(text.contains("sea_surface: true"));
    }

    #[test]
    fn test_start_on_land_is_fatal() {
        let resolver = BoundaryResolver::new().with_shoreline(island(), ShorelineReaction::Stick);
        let mut p = Particle::new(0, start(-1.0).with_position(0.0, 0.5));
        let m = step(&mut p, Velocity::new(1.0, 0.0, 0.0), 60.0);
        let mut rng = StdRng::seed_from_u64(0);
        let err = resolver.resolve(&mut p, &m, &mut rng).unwrap_err();
        assert!(matches!(err, DriftError::Shoreline(ShorelineError::StartOnLand { .. })));
    }

    #[test]
    fn test_hover_above_floor_at_end_point() {
        // Floor shoals eastwards; hover uses the floor under the end point
        let floor = |_: f64, lon: f64| -100.0 + lon * 1000.0;
        let resolver = BoundaryResolver::new().with_bathymetry(Arc::new(floor), BathymetryReaction::Hover);
        let mut p = Particle::new(0, start(-99.0));
        let m = step(&mut p, Velocity::new(1.0, 0.0, -0.01), 3600.0);
        let mut rng = StdRng::seed_from_u64(0);
        let end = resolver.resolve(&mut p, &m, &mut rng).unwrap();
        assert_abs_diff_eq!(end.depth(), floor(0.0, end.longitude()) + HOVER_HEIGHT, epsilon = 1e-9);
    }

    #[test]
    fn test_reverse_returns_to_start() {
        let resolver = BoundaryResolver::new()
            .with_bathymetry(Arc::new(ConstantBathymetry(-50.0)), BathymetryReaction::Reverse);
        let mut p = Particle::new(0, start(-45.0));
        let m = step(&mut p, Velocity::new(0.5, 0.0, -0.01), 3600.0);
        let mut rng = StdRng::seed_from_u64(0);
        let end = resolver.resolve(&mut p, &m, &mut rng).unwrap();
        assert_eq!(end.latitude(), m.start.latitude());
        assert_eq!(end.longitude(), m.start.longitude());
        assert_eq!(end.depth(), -45.0);
        assert_eq!(end.time(), m.end.time());
    }

    #[test]
    fn test_sea_surface_clamp() {
        let resolver = BoundaryResolver::new().with_sea_surface(true);
        let mut p = Particle::new(0, start(-1.0));
        let m = step(&mut p, Velocity::new(0.0, 0.0, 0.01), 3600.0);
        let mut rng = StdRng::seed_from_u64(0);
        let end = resolver.resolve(&mut p, &m, &mut rng).unwrap();
        assert_eq!(end.depth(), 0.0);
    }

    #[test]
    fn test_no_boundaries_passes_through() {
        let resolver = BoundaryResolver::new();
        let mut p = Particle::new(0, start(-1.0));
        let m = step(&mut p, Velocity::new(0.0, 0.0, 0.01), 3600.0);
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(resolver.resolve(&mut p, &m, &mut rng).unwrap(), m.end);
    }
}
