//! Life-stage swimming capability

use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// How the per-particle swim speed is drawn around the mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedSampling {
    /// Normal distribution with `variance` as the standard deviation
    #[default]
    Gaussian,
    /// Uniform offset in `[-variance, +variance]`
    Uniform,
}

/// Maximum vertical swim speed of a life stage.
///
/// The speed is drawn once by [`Capability::recompute`] and then reused for every
/// step until the caller explicitly draws again. Until the first draw the mean
/// speed is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    /// Mean vertical swim speed (m/s)
    pub vss: f64,
    /// Spread of the swim speed (m/s)
    #[serde(default)]
    pub variance: f64,
    #[serde(default)]
    pub sampling: SpeedSampling,
    #[serde(skip)]
    calculated_vss: Option<f64>,
}

impl Capability {
    pub fn new(vss: f64, variance: f64, sampling: SpeedSampling) -> Self {
        Self {
            vss,
            variance,
            sampling,
            calculated_vss: None,
        }
    }

    /// Draw a new swim speed with the configured sampling method.
    pub fn recompute(&mut self, rng: &mut StdRng) -> f64 {
        let value = if self.variance <= 0.0 {
            self.vss
        } else {
            match self.sampling {
                SpeedSampling::Gaussian => match Normal::new(self.vss, self.variance) {
                    Ok(normal) => normal.sample(rng),
                    Err(_) => self.vss,
                },
                SpeedSampling::Uniform => {
                    self.vss + rng.random_range(-self.variance..=self.variance)
                }
            }
        };
        self.calculated_vss = Some(value);
        value
    }

    /// Current maximum vertical speed (m/s, non-negative).
    pub fn speed(&self) -> f64 {
        self.calculated_vss.unwrap_or(self.vss).abs()
    }

    /// Clamp a vertical velocity to the swim speed, preserving its sign.
    pub fn limit(&self, w: f64) -> f64 {
        let max = self.speed();
        w.clamp(-max, max)
    }
}
