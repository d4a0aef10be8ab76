//! Drift Simulation Core Library
//!
//! Lagrangian particle drift through a time-varying ocean: larvae and drifters
//! are advected by gridded currents with turbulent dispersion, migrate
//! vertically by life stage, and interact with coastline, sea floor and sea
//! surface.
//!
//! ## Engine
//!
//! - Vincenty inverse/direct solutions on the WGS84 ellipsoid ([`geodesy`])
//! - Passive transport plus life-stage behavior as [`transport::MovementModel`]s
//! - Ordered shoreline → bathymetry → sea-surface resolution ([`boundary`])
//! - A shared staging cache streaming dataset windows to many workers ([`cache`])
//! - A fixed worker pool running one force loop per particle ([`simulation`])

pub mod behavior;
pub mod boundary;
pub mod cache;
pub mod config;
pub mod core_types;
pub mod dataset;
pub mod error;
pub mod geodesy;
pub mod simulation;
pub mod transport;

pub use behavior::{LarvaBehavior, LifeStage};
pub use boundary::{BathymetryReaction, BoundaryResolver, ShorelineReaction};
pub use cache::{CacheCoordinator, CacheSettings};
pub use config::SimulationConfig;
pub use core_types::{Location, Particle, Sample, Velocity};
pub use dataset::{GridDataset, RegularGrid, Variable};
pub use error::{DriftError, Result};
pub use simulation::{RunOutput, RunReport, Simulation, TaskOutcome};
pub use transport::{Environment, Movement, MovementModel, Transport};
