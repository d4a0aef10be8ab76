//! Daylight provider contract used by cycle-relative diel rules

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Sunrise and sunset for one position and date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SunTimes {
    pub sunrise: DateTime<Utc>,
    pub sunset: DateTime<Utc>,
}

/// Source of sunrise/sunset times.
///
/// Returns `None` where the sun does not rise or set (polar day/night).
pub trait SunCycle: Send + Sync {
    fn rising_and_setting(&self, latitude: f64, longitude: f64, date: NaiveDate) -> Option<SunTimes>;
}

/// Sunrise and sunset at fixed local mean solar hours.
///
/// Local solar time leads UTC by `longitude / 15` hours. Ignores latitude and
/// season, which is adequate for short runs away from the poles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FixedDaylight {
    /// Local solar hour of sunrise (0..24)
    pub sunrise_hour: f64,
    /// Local solar hour of sunset (0..24)
    pub sunset_hour: f64,
}

impl Default for FixedDaylight {
    fn default() -> Self {
        Self {
            sunrise_hour: 6.0,
            sunset_hour: 18.0,
        }
    }
}

impl FixedDaylight {
    fn at_local_hour(date: NaiveDate, longitude: f64, hour: f64) -> DateTime<Utc> {
        let midnight = date.and_time(NaiveTime::MIN).and_utc();
        let utc_hours = hour - longitude / 15.0;
        midnight + Duration::milliseconds((utc_hours * 3_600_000.0).round() as i64)
    }
}

impl SunCycle for FixedDaylight {
    fn rising_and_setting(&self, _latitude: f64, longitude: f64, date: NaiveDate) -> Option<SunTimes> {
        Some(SunTimes {
            sunrise: Self::at_local_hour(date, longitude, self.sunrise_hour),
            sunset: Self::at_local_hour(date, longitude, self.sunset_hour),
        })
    }
}
