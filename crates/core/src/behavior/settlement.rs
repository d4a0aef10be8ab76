//! Settlement out of the water column
//!
//! - **Benthic** larvae settle onto the sea floor when the floor lies inside
//!   their settlement band; the particle is snapped straight down to the floor.
//! - **Pelagic** larvae settle in place when they are already inside the band
//!   and the floor lies below the band top.
//!
//! Settlement halts the particle and is never undone.

use serde::{Deserialize, Serialize};

use super::diel::DepthBand;
use crate::core_types::Particle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementKind {
    Benthic,
    Pelagic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub kind: SettlementKind,
    pub band: DepthBand,
}

impl Settlement {
    pub fn new(kind: SettlementKind, band: DepthBand) -> Self {
        Self { kind, band }
    }

    /// Try to settle `particle` above a floor at `floor_depth`.
    ///
    /// Returns the depth the particle must be moved to when it settles (the
    /// floor for benthic settlement, its own depth for pelagic), or `None` when
    /// it stays in the water column.
    pub fn attempt(&self, particle: &mut Particle, floor_depth: Option<f64>) -> Option<f64> {
        if particle.settled() || particle.dead() {
            return None;
        }
        let floor = floor_depth.filter(|f| f.is_finite())?;
        let depth = particle.location().depth();
        match self.kind {
            SettlementKind::Benthic if self.band.strictly_contains(floor) => {
                particle.settle();
                Some(floor)
            }
            SettlementKind::Pelagic if floor < self.band.top() && self.band.contains(depth) => {
                particle.settle();
                Some(depth)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::Location;
    use chrono::{TimeZone, Utc};

    fn particle(depth: f64) -> Particle {
        Particle::new(
            0,
            Location::new(0.0, 0.0, depth, Utc.with_ymd_and_hms(2014, 1, 2, 0, 0, 0).unwrap()),
        )
    }

    #[test]
    fn test_benthic_settles_on_floor_inside_band() {
        let s = Settlement::new(SettlementKind::Benthic, DepthBand::new(-100.0, -200.0));
        let mut p = particle(-150.0);
        assert_eq!(s.attempt(&mut p, Some(-150.0)), Some(-150.0));
        assert!(p.settled() && p.halted());
    }

    #[test]
    fn test_benthic_ignores_floor_outside_band() {
        let s = Settlement::new(SettlementKind::Benthic, DepthBand::new(-100.0, -200.0));
        let mut p = particle(-150.0);
        assert_eq!(s.attempt(&mut p, Some(-400.0)), None);
        assert!(!p.settled());
    }

    #[test]
    fn test_benthic_band_edges_are_exclusive() {
        let s = Settlement::new(SettlementKind::Benthic, DepthBand::new(-100.0, -200.0));
        let mut p = particle(-150.0);
        assert_eq!(s.attempt(&mut p, Some(-200.0)), None);
        assert_eq!(s.attempt(&mut p, Some(-100.0)), None);
    }

    #[test]
    fn test_pelagic_settles_in_place() {
        let s = Settlement::new(SettlementKind::Pelagic, DepthBand::new(-10.0, -30.0));
        let mut p = particle(-20.0);
        assert_eq!(s.attempt(&mut p, Some(-400.0)), Some(-20.0));
        assert!(p.settled());
    }

    #[test]
    fn test_pelagic_needs_deep_enough_floor_and_depth_in_band() {
        let s = Settlement::new(SettlementKind::Pelagic, DepthBand::new(-10.0, -30.0));
        let mut shallow_floor = particle(-8.0);
        assert_eq!(s.attempt(&mut shallow_floor, Some(-5.0)), None);
        let mut outside = particle(-50.0);
        assert_eq!(s.attempt(&mut outside, Some(-400.0)), None);
        assert!(!outside.settled());
    }

    #[test]
    fn test_no_floor_no_settlement() {
        let s = Settlement::new(SettlementKind::Benthic, DepthBand::new(-100.0, -200.0));
        let mut p = particle(-150.0);
        assert_eq!(s.attempt(&mut p, None), None);
    }
}
