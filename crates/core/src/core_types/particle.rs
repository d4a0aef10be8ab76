//! Drifting particle state and trajectory history

use serde::{Deserialize, Serialize};

use super::location::Location;

/// Environmental values sampled for one particle at one timestep.
///
/// Missing or not-a-number readings are stored as `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub u: Option<f64>,
    pub v: Option<f64>,
    pub w: Option<f64>,
    pub temperature: Option<f64>,
    pub salinity: Option<f64>,
}

/// Turn a NaN reading into `None`.
#[inline]
pub(crate) fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// A single drifter (larva, buoy, ...) with its full ordered history.
///
/// `locations[0]` is the release point. Every timestep appends one location and
/// one [`Sample`], so `samples()[i]` belongs to `locations()[i + 1]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Particle {
    pub(crate) id: usize,
    locations: Vec<Location>,
    temperatures: Vec<Option<f64>>,
    salinities: Vec<Option<f64>>,
    u: Vec<Option<f64>>,
    v: Vec<Option<f64>>,
    w: Vec<Option<f64>>,

    /// Ambient temperature seen by the behavior pipeline this step
    pub(crate) temperature: Option<f64>,
    /// Ambient salinity seen by the behavior pipeline this step
    pub(crate) salinity: Option<f64>,

    halted: bool,
    settled: bool,
    dead: bool,
    /// Accumulated simulated time in seconds
    age: f64,
    lifestage_progress: f64,
    notes: Vec<String>,
}

impl Particle {
    pub fn new(id: usize, release: Location) -> Self {
        Self {
            id,
            locations: vec![release],
            temperatures: Vec::new(),
            salinities: Vec::new(),
            u: Vec::new(),
            v: Vec::new(),
            w: Vec::new(),
            temperature: None,
            salinity: None,
            halted: false,
            settled: false,
            dead: false,
            age: 0.0,
            lifestage_progress: 0.0,
            notes: Vec::new(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Current (most recent) location.
    pub fn location(&self) -> &Location {
        // locations is never empty: seeded in new() and only ever appended to
        &self.locations[self.locations.len() - 1]
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    /// Append a new current location.
    pub fn push_location(&mut self, location: Location) {
        self.locations.push(location);
    }

    /// Overwrite the current location in place (boundary reactions, settlement snaps).
    ///
    /// The release location is never overwritten.
    pub fn update_location(&mut self, location: Location) {
        if self.locations.len() > 1 {
            let last = self.locations.len() - 1;
            self.locations[last] = location;
        } else {
            self.locations.push(location);
        }
    }

    pub fn record_sample(&mut self, sample: &Sample) {
        self.u.push(sample.u);
        self.v.push(sample.v);
        self.w.push(sample.w);
        self.temperatures.push(sample.temperature);
        self.salinities.push(sample.salinity);
    }

    /// Per-step sample history, aligned with `locations()[1..]`.
    pub fn samples(&self) -> Vec<Sample> {
        (0..self.u.len())
            .map(|i| Sample {
                u: self.u[i],
                v: self.v[i],
                w: self.w[i],
                temperature: self.temperatures[i],
                salinity: self.salinities[i],
            })
            .collect()
    }

    pub fn temperatures(&self) -> &[Option<f64>] {
        &self.temperatures
    }

    pub fn salinities(&self) -> &[Option<f64>] {
        &self.salinities
    }

    /// Store the ambient conditions for this step; NaN is treated as absent.
    pub fn set_ambient(&mut self, temperature: Option<f64>, salinity: Option<f64>) {
        self.temperature = temperature.and_then(finite);
        self.salinity = salinity.and_then(finite);
    }

    pub fn ambient_temperature(&self) -> Option<f64> {
        self.temperature
    }

    pub fn halted(&self) -> bool {
        self.halted
    }

    pub fn settled(&self) -> bool {
        self.settled
    }

    pub fn dead(&self) -> bool {
        self.dead
    }

    pub fn halt(&mut self) {
        self.halted = true;
    }

    /// Resume movement unless settled or dead.
    pub fn unhalt(&mut self) {
        if !self.settled && !self.dead {
            self.halted = false;
        }
    }

    /// Settling implies halting and is not reversed.
    pub fn settle(&mut self) {
        if !self.settled {
            self.settled = true;
            self.halted = true;
            self.note("settled");
        }
    }

    pub fn die(&mut self) {
        if !self.dead {
            self.dead = true;
            self.halted = true;
            self.note("died");
        }
    }

    /// Accumulated simulated age in seconds.
    pub fn age(&self) -> f64 {
        self.age
    }

    pub fn age_days(&self) -> f64 {
        self.age / 86_400.0
    }

    pub fn add_age(&mut self, seconds: f64) {
        self.age += seconds;
    }

    pub fn lifestage_progress(&self) -> f64 {
        self.lifestage_progress
    }

    /// Index of the active life stage (`floor(progress)`).
    pub fn lifestage_index(&self) -> usize {
        self.lifestage_progress.max(0.0).floor() as usize
    }

    pub fn grow(&mut self, amount: f64) {
        if amount.is_finite() && amount > 0.0 {
            self.lifestage_progress += amount;
        }
    }

    pub fn note(&mut self, text: impl Into<String>) {
        self.notes.push(text.into());
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }
}
