//! Vector type alias for velocity contributions.

use nalgebra::Vector3;

/// Velocity (u east, v north, w up) in m/s.
///
/// This is a simple alias for `nalgebra::Vector3<f64>`, used by the behavior
/// pipeline to sum independent contributions before projection.
pub type Velocity = Vector3<f64>;
