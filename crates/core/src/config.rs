//! Run configuration
//!
//! Everything the orchestrator needs to set up a run, loadable from JSON.
//! Every field has a default, but a run still needs a start time and a step
//! count before [`SimulationConfig::validate`] accepts it.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::boundary::{BathymetryReaction, ShorelineReaction};
use crate::cache::CacheSettings;
use crate::transport::Transport;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("release start time is required")]
    MissingStartTime,
    #[error("step count must be at least 1")]
    ZeroSteps,
    #[error("particle count must be at least 1")]
    ZeroParticles,
    #[error("timestep must be positive, got {0} s")]
    BadTimestep(f64),
    #[error("dispersion coefficients must be non-negative")]
    NegativeDispersion,
    #[error("release depth {0} m is above the sea surface")]
    ReleaseAboveSurface(f64),
    #[error("release radius must be non-negative, got {0} m")]
    BadReleaseRadius(f64),
    #[error("cache time chunk must be at least 1")]
    ZeroTimeChunk,
    /// The staging task occupies one worker for the whole run
    #[error("at least 2 workers are required, got {0}")]
    TooFewWorkers(usize),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Where and when particles start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Release {
    pub latitude: f64,
    pub longitude: f64,
    /// Meters, negative below the surface
    pub depth: f64,
    pub start: Option<DateTime<Utc>>,
    /// Particles are scattered uniformly within this many meters (0 = none)
    pub radius: f64,
}

impl Default for Release {
    fn default() -> Self {
        Self {
            latitude: 0.0,
            longitude: 0.0,
            depth: -1.0,
            start: None,
            radius: 0.0,
        }
    }
}

/// Which boundaries particles interact with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Interactions {
    pub shoreline: bool,
    pub bathymetry: bool,
    pub sea_surface: bool,
}

impl Default for Interactions {
    fn default() -> Self {
        Self {
            shoreline: true,
            bathymetry: true,
            sea_surface: true,
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(2)
        .max(2)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Path or URL of the environmental dataset
    pub dataset: String,
    pub release: Release,
    /// Seconds per model step
    pub timestep: f64,
    pub steps: usize,
    pub particles: usize,
    pub interactions: Interactions,
    pub shoreline_reaction: ShorelineReaction,
    pub bathymetry_reaction: BathymetryReaction,
    pub dispersion: Transport,
    /// Directory for the scratch cache file
    pub cache_dir: PathBuf,
    pub cache: CacheSettings,
    pub workers: usize,
    /// Seed for reproducible runs; each particle uses `seed + id`
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            dataset: String::new(),
            release: Release::default(),
            timestep: 3600.0,
            steps: 0,
            particles: 1,
            interactions: Interactions::default(),
            shoreline_reaction: ShorelineReaction::default(),
            bathymetry_reaction: BathymetryReaction::default(),
            dispersion: Transport::default(),
            cache_dir: std::env::temp_dir(),
            cache: CacheSettings::default(),
            workers: default_workers(),
            seed: None,
        }
    }
}

impl SimulationConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Release start time, once validated.
    pub fn start_time(&self) -> Result<DateTime<Utc>, ConfigError> {
        self.release.start.ok_or(ConfigError::MissingStartTime)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.start_time()?;
        if self.steps == 0 {
            return Err(ConfigError::ZeroSteps);
        }
        if self.particles == 0 {
            return Err(ConfigError::ZeroParticles);
        }
        if self.timestep.is_nan() || self.timestep <= 0.0 {
            return Err(ConfigError::BadTimestep(self.timestep));
        }
        if self.dispersion.horizontal_dispersion < 0.0 || self.dispersion.vertical_dispersion < 0.0 {
            return Err(ConfigError::NegativeDispersion);
        }
        if self.release.depth > 0.0 {
            return Err(ConfigError::ReleaseAboveSurface(self.release.depth));
        }
        if self.release.radius.is_nan() || self.release.radius < 0.0 {
            return Err(ConfigError::BadReleaseRadius(self.release.radius));
        }
        if self.cache.time_chunk == 0 {
            return Err(ConfigError::ZeroTimeChunk);
        }
        if self.workers < 2 {
            return Err(ConfigError::TooFewWorkers(self.workers));
        }
        Ok(())
    }
}
