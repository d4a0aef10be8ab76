//! Sea-floor depth contract

/// Source of sea-floor depth (meters, negative below the surface).
pub trait Bathymetry: Send + Sync {
    fn depth_at(&self, latitude: f64, longitude: f64) -> f64;
}

/// Flat sea floor at a fixed depth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantBathymetry(pub f64);

impl Bathymetry for ConstantBathymetry {
    fn depth_at(&self, _latitude: f64, _longitude: f64) -> f64 {
        self.0
    }
}

impl<F> Bathymetry for F
where
    F: Fn(f64, f64) -> f64 + Send + Sync,
{
    fn depth_at(&self, latitude: f64, longitude: f64) -> f64 {
        self(latitude, longitude)
    }
}
