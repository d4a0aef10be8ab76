//! Core types and utilities

pub mod location;
pub mod particle;
pub mod vec3;

pub use location::Location;
pub use particle::{Particle, Sample};
pub use vec3::Velocity;
