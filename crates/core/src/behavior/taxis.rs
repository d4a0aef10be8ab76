//! Taxis (gradient following)
//!
//! Taxis rules describe a preferred range of an ambient variable. Gradient
//! sensing needs spatial derivatives the sampler does not provide yet, so a
//! taxis rule currently records whether the particle is inside its preferred
//! range and contributes no motion.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::core_types::{Particle, Velocity};

/// Ambient variable a taxis rule reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaxisVariable {
    Temperature,
    Salinity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Taxis {
    pub variable: TaxisVariable,
    pub min_value: f64,
    pub max_value: f64,
    /// Reserved: swim speed towards the preferred range (m/s). Accepted in
    /// configs but unused until the sampler exposes gradients.
    #[serde(default)]
    pub gradient_speed: f64,
}

impl Taxis {
    /// Whether the particle's ambient reading sits inside the preferred range.
    ///
    /// `None` when the variable was not sampled this step.
    pub fn satisfied(&self, particle: &Particle) -> Option<bool> {
        let value = match self.variable {
            TaxisVariable::Temperature => particle.temperature,
            TaxisVariable::Salinity => particle.salinity,
        }?;
        Some(value >= self.min_value && value <= self.max_value)
    }

    pub fn contribution(&self, particle: &Particle) -> Velocity {
        // TODO: follow the sampled gradient at gradient_speed once the field sampler exposes one
        if self.satisfied(particle) == Some(false) {
            trace!(
                particle = particle.id(),
                variable = ?self.variable,
                "outside preferred range, no gradient available"
            );
        }
        Velocity::zeros()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::Location;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_taxis_is_passive() {
        let mut p = Particle::new(
            0,
            Location::new(0.0, 0.0, -1.0, Utc.with_ymd_and_hms(2014, 1, 2, 0, 0, 0).unwrap()),
        );
        p.set_ambient(Some(12.0), None);
        let t = Taxis {
            variable: TaxisVariable::Temperature,
            min_value: 10.0,
            max_value: 14.0,
            gradient_speed: 0.01,
        };
        assert_eq!(t.satisfied(&p), Some(true));
        assert_eq!(t.contribution(&p), Velocity::zeros());
        let s = Taxis {
            variable: TaxisVariable::Salinity,
            ..t
        };
        assert_eq!(s.satisfied(&p), None);
    }
}
