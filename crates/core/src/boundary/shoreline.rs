//! Shoreline contract and a polygon-backed implementation

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core_types::Location;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShorelineError {
    /// A segment may never begin on land; this indicates a bad release point
    /// or an earlier boundary reaction that left the particle ashore.
    #[error("segment starts on land at ({latitude}, {longitude})")]
    StartOnLand { latitude: f64, longitude: f64 },
}

/// Where a movement segment first meets land.
#[derive(Debug, Clone, PartialEq)]
pub struct Intersection {
    pub latitude: f64,
    pub longitude: f64,
    /// Name of the land feature that was hit
    pub feature: String,
}

/// Coastline geometry.
pub trait Shoreline: Send + Sync {
    /// First crossing of the segment `start → end` with land, if any.
    ///
    /// Errors when `start` itself is on land.
    fn intersect(&self, start: &Location, end: &Location) -> Result<Option<Intersection>, ShorelineError>;

    fn on_land(&self, point: &Location) -> bool;
}

/// A closed land outline in (longitude, latitude) degrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandPolygon {
    pub name: String,
    pub ring: Vec<(f64, f64)>,
}

impl LandPolygon {
    pub fn new(name: impl Into<String>, ring: Vec<(f64, f64)>) -> Self {
        Self {
            name: name.into(),
            ring,
        }
    }

    /// Axis-aligned box, convenient for tests and synthetic coastlines.
    pub fn rectangle(name: impl Into<String>, min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self::new(
            name,
            vec![(min_lon, min_lat), (max_lon, min_lat), (max_lon, max_lat), (min_lon, max_lat)],
        )
    }

    fn edges(&self) -> impl Iterator<Item = ((f64, f64), (f64, f64))> + '_ {
        let n = self.ring.len();
        (0..n).map(move |i| (self.ring[i], self.ring[(i + 1) % n]))
    }

    /// Even-odd ray casting point-in-polygon test.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        let mut inside = false;
        for ((x1, y1), (x2, y2)) in self.edges() {
            if (y1 > lat) != (y2 > lat) {
                let x_cross = x1 + (lat - y1) / (y2 - y1) * (x2 - x1);
                if lon < x_cross {
                    inside = !inside;
                }
            }
        }
        inside
    }
}

/// Parameter `t` in `[0, 1]` along `p → q` where it crosses segment `a → b`.
fn segment_crossing(p: (f64, f64), q: (f64, f64), a: (f64, f64), b: (f64, f64)) -> Option<f64> {
    let r = (q.0 - p.0, q.1 - p.1);
    let s = (b.0 - a.0, b.1 - a.1);
    let denom = r.0 * s.1 - r.1 * s.0;
    if denom.abs() < f64::EPSILON {
        return None;
    }
    let ap = (a.0 - p.0, a.1 - p.1);
    let t = (ap.0 * s.1 - ap.1 * s.0) / denom;
    let u = (ap.0 * r.1 - ap.1 * r.0) / denom;
    ((0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u)).then_some(t)
}

/// Shoreline made of land polygons, intersected in planar lon/lat space.
///
/// Reported hit points are pulled back towards the segment start by
/// [`PolygonShoreline::WATER_SIDE_OFFSET`] degrees so that a particle parked at
/// a hit point is never itself on land.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolygonShoreline {
    pub polygons: Vec<LandPolygon>,
}

impl PolygonShoreline {
    pub const WATER_SIDE_OFFSET: f64 = 1e-7;

    pub fn new(polygons: Vec<LandPolygon>) -> Self {
        Self { polygons }
    }
}

impl Shoreline for PolygonShoreline {
    fn intersect(&self, start: &Location, end: &Location) -> Result<Option<Intersection>, ShorelineError> {
        if self.on_land(start) {
            return Err(ShorelineError::StartOnLand {
                latitude: start.latitude(),
                longitude: start.longitude(),
            });
        }
        let p = (start.longitude(), start.latitude());
        let q = (end.longitude(), end.latitude());
        let length = (q.0 - p.0).hypot(q.1 - p.1);
        if length == 0.0 {
            return Ok(None);
        }

        let mut nearest: Option<(f64, &LandPolygon)> = None;
        for polygon in &self.polygons {
            for (a, b) in polygon.edges() {
                if let Some(t) = segment_crossing(p, q, a, b) {
                    if nearest.is_none_or(|(best, _)| t < best) {
                        nearest = Some((t, polygon));
                    }
                }
            }
        }

        Ok(nearest.map(|(t, polygon)| {
            let t = (t - Self::WATER_SIDE_OFFSET / length).max(0.0);
            Intersection {
                latitude: p.1 + t * (q.1 - p.1),
                longitude: p.0 + t * (q.0 - p.0),
                feature: polygon.name.clone(),
            }
        }))
    }

    fn on_land(&self, point: &Location) -> bool {
        self.polygons
            .iter()
            .any(|polygon| polygon.contains(point.longitude(), point.latitude()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn loc(lat: f64, lon: f64) -> Location {
        Location::new(lat, lon, -1.0, Utc.with_ymd_and_hms(2014, 1, 2, 0, 0, 0).unwrap())
    }

    fn island() -> PolygonShoreline {
        PolygonShoreline::new(vec![LandPolygon::rectangle("island", 1.0, -1.0, 2.0, 1.0)])
    }

    #[test]
    fn test_crossing_reports_nearest_hit_on_water_side() {
        let hit = island().intersect(&loc(0.0, 0.0), &loc(0.0, 3.0)).unwrap().unwrap();
        assert_eq!(hit.feature, "island");
        assert!(hit.longitude < 1.0 && hit.longitude > 0.999_999);
        assert!(hit.latitude.abs() < 1e-12);
        assert!(!island().on_land(&loc(hit.latitude, hit.longitude)));
    }

    #[test]
    fn test_open_water_has_no_hit() {
        assert!(island().intersect(&loc(0.0, 0.0), &loc(0.5, 0.5)).unwrap().is_none());
        assert!(island().intersect(&loc(0.0, 0.0), &loc(0.0, 0.0)).unwrap().is_none());
    }

    #[test]
    fn test_start_on_land_is_an_error() {
        let err = island().intersect(&loc(0.0, 1.5), &loc(0.0, 3.0)).unwrap_err();
        assert!(matches!(err, ShorelineError::StartOnLand { .. }));
    }

    #[test]
    fn test_contains() {
        let poly = LandPolygon::rectangle("box", 0.0, 0.0, 1.0, 1.0);
        assert!(poly.contains(0.5, 0.5));
        assert!(!poly.contains(1.5, 0.5));
    }
}
