//! Diel vertical migration
//!
//! Larvae commonly ride a daily light cycle: deep by day, shallow by night (or
//! the reverse). A diel rule names a trigger time and a target depth band; the
//! life stage activates the rule whose trigger is the soonest one still ahead
//! of the particle's clock.
//!
//! # Overshoot protection
//!
//! Swimming at full speed could carry a particle straight through a thin band
//! and back again on the next step. When the full-speed displacement would pass
//! the band's midpoint, the speed is reduced so the particle lands exactly on
//! the midpoint instead.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use super::sun::SunCycle;
use crate::core_types::{Location, Particle, Velocity};

/// A vertical band of water `[bottom, top]` (depths positive up).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, f64)", into = "(f64, f64)")]
pub struct DepthBand {
    top: f64,
    bottom: f64,
}

impl DepthBand {
    /// Build a band from two bounds given in either order.
    pub fn new(a: f64, b: f64) -> Self {
        Self {
            top: a.max(b),
            bottom: a.min(b),
        }
    }

    pub fn top(&self) -> f64 {
        self.top
    }

    pub fn bottom(&self) -> f64 {
        self.bottom
    }

    pub fn midpoint(&self) -> f64 {
        (self.top + self.bottom) / 2.0
    }

    /// Inclusive membership test.
    pub fn contains(&self, depth: f64) -> bool {
        depth >= self.bottom && depth <= self.top
    }

    /// Exclusive membership test.
    pub fn strictly_contains(&self, depth: f64) -> bool {
        depth > self.bottom && depth < self.top
    }
}

impl From<(f64, f64)> for DepthBand {
    fn from((a, b): (f64, f64)) -> Self {
        Self::new(a, b)
    }
}

impl From<DepthBand> for (f64, f64) {
    fn from(band: DepthBand) -> Self {
        (band.top, band.bottom)
    }
}

/// Sun event a cycle-relative rule is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SunEvent {
    Sunrise,
    Sunset,
}

/// When a diel rule fires on a given day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DielTrigger {
    /// A fixed UTC clock time
    Specific { time: NaiveTime },
    /// Signed offset in hours from a sun event at the particle's position
    Cycle { event: SunEvent, offset_hours: f64 },
}

/// One diel migration rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diel {
    pub trigger: DielTrigger,
    pub band: DepthBand,
}

impl Diel {
    pub fn new(trigger: DielTrigger, band: DepthBand) -> Self {
        Self { trigger, band }
    }

    /// Trigger instant on the UTC calendar day `date`.
    pub fn trigger_on(&self, date: NaiveDate, location: &Location, sun: &dyn SunCycle) -> Option<DateTime<Utc>> {
        match self.trigger {
            DielTrigger::Specific { time } => Some(date.and_time(time).and_utc()),
            DielTrigger::Cycle { event, offset_hours } => {
                let times = sun.rising_and_setting(location.latitude(), location.longitude(), date)?;
                let anchor = match event {
                    SunEvent::Sunrise => times.sunrise,
                    SunEvent::Sunset => times.sunset,
                };
                Some(anchor + Duration::milliseconds((offset_hours * 3_600_000.0).round() as i64))
            }
        }
    }

    /// Trigger instant on the particle's current (UTC) date.
    pub fn trigger_time(&self, location: &Location, sun: &dyn SunCycle) -> Option<DateTime<Utc>> {
        self.trigger_on(location.time().date_naive(), location, sun)
    }

    /// First trigger strictly after the particle's clock.
    ///
    /// Looks at the previous, current and next UTC day, since a sun event
    /// away from Greenwich can fall on a neighbouring UTC date.
    pub fn next_trigger(&self, location: &Location, sun: &dyn SunCycle) -> Option<DateTime<Utc>> {
        let now = location.time();
        let today = now.date_naive();
        [today.pred_opt(), Some(today), today.succ_opt()]
            .into_iter()
            .flatten()
            .filter_map(|date| self.trigger_on(date, location, sun))
            .filter(|when| *when > now)
            .min()
    }

    /// Vertical velocity steering the particle towards the band.
    ///
    /// `max_speed` is the stage's swim speed; pass `f64::INFINITY` for an
    /// unlimited swimmer. Returns zero inside the band and for halted particles.
    pub fn contribution(&self, particle: &Particle, max_speed: f64, dt: f64) -> Velocity {
        if particle.halted() || dt <= 0.0 {
            return Velocity::zeros();
        }
        let depth = particle.location().depth();
        let target = self.band.midpoint();
        let reach = max_speed * dt;

        let w = if depth < self.band.bottom() {
            if depth + reach > target {
                (target - depth) / dt
            } else {
                max_speed
            }
        } else if depth > self.band.top() {
            if depth - reach < target {
                (target - depth) / dt
            } else {
                -max_speed
            }
        } else {
            0.0
        };
        Velocity::new(0.0, 0.0, w)
    }
}

/// Pick the rule whose trigger is the soonest instant after `location.time()`.
///
/// Once the day's last trigger has passed, tomorrow's triggers compete.
/// Returns `None` when no rule has a trigger or when two rules tie for soonest.
pub fn select_active<'a>(rules: &'a [Diel], location: &Location, sun: &dyn SunCycle) -> Option<&'a Diel> {
    let mut best: Option<(DateTime<Utc>, &Diel)> = None;
    let mut tied = false;
    for rule in rules {
        let Some(when) = rule.next_trigger(location, sun) else {
            continue;
        };
        match best {
            Some((current, _)) if when == current => tied = true,
            Some((current, _)) if when > current => {}
            _ => {
                best = Some((when, rule));
                tied = false;
            }
        }
    }
    if tied {
        None
    } else {
        best.map(|(_, rule)| rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::sun::FixedDaylight;
    use approx::assert_abs_diff_eq;
    use chrono::TimeZone;

    fn at(depth: f64, hour: u32) -> Particle {
        Particle::new(
            0,
            Location::new(0.0, 0.0, depth, Utc.with_ymd_and_hms(2014, 1, 2, hour, 0, 0).unwrap()),
        )
    }

    fn specific(hour: u32, band: DepthBand) -> Diel {
        Diel::new(
            DielTrigger::Specific {
                time: NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
            },
            band,
        )
    }

    #[test]
    fn test_band_normalizes_bounds() {
        let band = DepthBand::new(-50.0, -10.0);
        assert_eq!(band.top(), -10.0);
        assert_eq!(band.bottom(), -50.0);
        assert_eq!(band.midpoint(), -30.0);
        assert!(band.contains(-10.0));
        assert!(!band.strictly_contains(-10.0));
    }

    #[test]
    fn test_ascends_at_full_speed_when_far_below() {
        let rule = specific(12, DepthBand::new(-10.0, -20.0));
        let w = rule.contribution(&at(-100.0, 0), 0.01, 60.0).z;
        assert_abs_diff_eq!(w, 0.01);
    }

    #[test]
    fn test_descends_when_above() {
        let rule = specific(12, DepthBand::new(-40.0, -60.0));
        let w = rule.contribution(&at(-1.0, 0), 0.01, 60.0).z;
        assert_abs_diff_eq!(w, -0.01);
    }

    #[test]
    fn test_clamps_to_midpoint_instead_of_overshooting() {
        let rule = specific(12, DepthBand::new(-10.0, -20.0));
        let dt = 600.0;
        let w = rule.contribution(&at(-25.0, 0), 1.0, dt).z;
        assert_abs_diff_eq!(-25.0 + w * dt, -15.0, epsilon = 1e-9);
    }

    #[test]
    fn test_zero_inside_band() {
        let rule = specific(12, DepthBand::new(-10.0, -20.0));
        assert_eq!(rule.contribution(&at(-12.0, 0), 1.0, 60.0).z, 0.0);
    }

    #[test]
    fn test_unlimited_speed_converges_and_holds() {
        let rule = specific(12, DepthBand::new(-30.0, -50.0));
        let mut p = at(-200.0, 0);
        for _ in 0..10 {
            let w = rule.contribution(&p, f64::INFINITY, 60.0).z;
            let next = p.location().with_depth(p.location().depth() + w * 60.0);
            p.push_location(next);
        }
        assert!(rule.band.contains(p.location().depth()));
        assert_eq!(rule.contribution(&p, f64::INFINITY, 60.0).z, 0.0);
    }

    #[test]
    fn test_selects_soonest_future_trigger() {
        let sun = FixedDaylight::default();
        let rules = vec![
            specific(3, DepthBand::new(-1.0, -2.0)),
            specific(9, DepthBand::new(-3.0, -4.0)),
            specific(15, DepthBand::new(-5.0, -6.0)),
        ];
        let p = at(-1.0, 6);
        let active = select_active(&rules, p.location(), &sun).unwrap();
        assert_eq!(active.band, DepthBand::new(-3.0, -4.0));
    }

    #[test]
    fn test_evening_selects_tomorrows_first_trigger() {
        let sun = FixedDaylight::default();
        let rules = vec![
            specific(3, DepthBand::new(-1.0, -2.0)),
            specific(9, DepthBand::new(-3.0, -4.0)),
        ];
        let p = at(-1.0, 20);
        let active = select_active(&rules, p.location(), &sun).unwrap();
        assert_eq!(active.band, DepthBand::new(-1.0, -2.0));
        assert_eq!(
            active.next_trigger(p.location(), &sun),
            Some(Utc.with_ymd_and_hms(2014, 1, 3, 3, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_cycle_triggers_ordered_by_local_day_west_of_greenwich() {
        // At 147°W local noon is ~21:48 UTC, so sunset falls on the next UTC date
        let sun = FixedDaylight::default();
        let sunrise = Diel::new(
            DielTrigger::Cycle {
                event: SunEvent::Sunrise,
                offset_hours: 0.0,
            },
            DepthBand::new(-40.0, -60.0),
        );
        let sunset = Diel::new(
            DielTrigger::Cycle {
                event: SunEvent::Sunset,
                offset_hours: 0.0,
            },
            DepthBand::new(-5.0, -15.0),
        );
        let rules = vec![sunrise, sunset];
        // 2014-01-02 18:00 UTC is 08:12 local, after sunrise and before sunset
        let location = Location::new(60.0, -147.0, -1.0, Utc.with_ymd_and_hms(2014, 1, 2, 18, 0, 0).unwrap());
        let active = select_active(&rules, &location, &sun).unwrap();
        assert_eq!(active.band, DepthBand::new(-5.0, -15.0));
        let when = active.next_trigger(&location, &sun).unwrap();
        assert_eq!(when, Utc.with_ymd_and_hms(2014, 1, 3, 3, 48, 0).unwrap());
    }

    #[test]
    fn test_tie_or_none_gives_no_rule() {
        let sun = FixedDaylight::default();
        let tied = vec![
            specific(9, DepthBand::new(-1.0, -2.0)),
            specific(9, DepthBand::new(-3.0, -4.0)),
        ];
        assert!(select_active(&tied, at(-1.0, 6).location(), &sun).is_none());
        assert!(select_active(&tied, at(-1.0, 10).location(), &sun).is_none());
    }

    #[test]
    fn test_cycle_trigger_offsets_sun_event() {
        let sun = FixedDaylight::default();
        let rule = Diel::new(
            DielTrigger::Cycle {
                event: SunEvent::Sunset,
                offset_hours: -2.0,
            },
            DepthBand::new(-1.0, -5.0),
        );
        let when = rule.trigger_time(at(-1.0, 0).location(), &sun).unwrap();
        assert_eq!(when, Utc.with_ymd_and_hms(2014, 1, 2, 16, 0, 0).unwrap());
    }
}
