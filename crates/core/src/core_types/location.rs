//! Four-dimensional particle position (latitude, longitude, depth, time)

use chrono::{DateTime, Duration, Utc};
use nalgebra::Point3;
use serde::{Deserialize, Serialize};

use crate::geodesy::{self, GeodesyError, Inverse};

/// A geodetic position at an instant.
///
/// Depth is positive **up**: the sea surface is `0.0` and a particle 20 m below
/// it sits at `-20.0`. Values are immutable; the `with_*` methods return an
/// adjusted copy so a trajectory never aliases its own history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    latitude: f64,
    longitude: f64,
    depth: f64,
    time: DateTime<Utc>,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64, depth: f64, time: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            depth,
            time,
        }
    }

    #[inline]
    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    #[inline]
    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    #[inline]
    pub fn depth(&self) -> f64 {
        self.depth
    }

    #[inline]
    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    /// Geometry representation `(lon, lat, depth)` used by shoreline intersection.
    ///
    /// Derived on demand from the coordinates, never stored.
    #[inline]
    pub fn point(&self) -> Point3<f64> {
        Point3::new(self.longitude, self.latitude, self.depth)
    }

    pub fn with_depth(self, depth: f64) -> Self {
        Self { depth, ..self }
    }

    pub fn with_time(self, time: DateTime<Utc>) -> Self {
        Self { time, ..self }
    }

    pub fn with_position(self, latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            ..self
        }
    }

    /// Copy advanced by `seconds` of simulated time.
    pub fn advanced(self, seconds: f64) -> Self {
        let step = Duration::milliseconds((seconds * 1000.0).round() as i64);
        self.with_time(self.time + step)
    }

    /// Horizontal great-circle relation to another location.
    pub fn inverse_to(&self, other: &Location) -> Result<Inverse, GeodesyError> {
        geodesy::distance_and_azimuth(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}
