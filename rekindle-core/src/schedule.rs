//! Scheduled values: the learning rate handed to the trainable unit each epoch.
//!
//! A schedule is a small feedback controller. `observe` is deterministic given
//! the persisted state and the input, so a schedule reloaded from a lineage
//! replays exactly as the in-memory original would have.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::metrics::Direction;
use crate::persistence::StateBlob;

/// Pluggable numeric controller persisted as `lr.json` in each lineage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    Constant { value: f64 },
    Plateau(PlateauSchedule),
}

impl Schedule {
    /// Current output value.
    pub fn value(&self) -> f64 {
        match self {
            Schedule::Constant { value } => *value,
            Schedule::Plateau(plateau) => plateau.value,
        }
    }

    /// Feed one epoch's monitored metric and return the value for the next epoch.
    pub fn observe(&mut self, metric: f64) -> f64 {
        match self {
            Schedule::Constant { value } => *value,
            Schedule::Plateau(plateau) => plateau.observe(metric),
        }
    }
}

impl StateBlob for Schedule {
    const KIND: &'static str = "schedule";
}

/// Multiplies the value by `factor` when the metric stops improving.
///
/// Tracks a running best; after `patience` consecutive observations that fail
/// to beat it by more than `min_delta`, the value is reduced (never below
/// `min_value`) and a cooldown starts during which non-improvement is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateauSchedule {
    pub value: f64,
    pub best: Option<f64>,
    pub cooldown_remaining: usize,
    pub cooldown: usize,
    pub factor: f64,
    pub min_value: f64,
    pub patience: usize,
    pub wait: usize,
    pub min_delta: f64,
    pub direction: Direction,
}

impl PlateauSchedule {
    pub fn new(value: f64, direction: Direction, options: &PlateauOptions) -> Self {
        Self {
            value,
            best: None,
            cooldown_remaining: 0,
            cooldown: options.cooldown,
            factor: options.factor,
            min_value: options.min_value,
            patience: options.patience,
            wait: 0,
            min_delta: options.min_delta,
            direction,
        }
    }

    pub fn in_cooldown(&self) -> bool {
        self.cooldown_remaining > 0
    }

    pub fn observe(&mut self, metric: f64) -> f64 {
        if self.in_cooldown() {
            self.cooldown_remaining -= 1;
            self.wait = 0;
        }

        // The first real observation only seeds `best`; NaN before it is ignored.
        let Some(best) = self.best else {
            if !metric.is_nan() {
                self.best = Some(metric);
                self.wait = 0;
            }
            return self.value;
        };
        let improved = self.direction.improves(metric, best, self.min_delta);

        if improved {
            self.best = Some(metric);
            self.wait = 0;
        } else if !self.in_cooldown() {
            self.wait += 1;
            if self.wait >= self.patience && self.value > self.min_value {
                let reduced = (self.value * self.factor).max(self.min_value);
                tracing::info!(from = self.value, to = reduced, "Reducing scheduled value on plateau");
                self.value = reduced;
                self.cooldown_remaining = self.cooldown;
                self.wait = 0;
            }
        }

        self.value
    }
}

/// Configuration for building a schedule at job creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleOptions {
    Constant,
    Plateau(PlateauOptions),
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        ScheduleOptions::Plateau(PlateauOptions::default())
    }
}

impl ScheduleOptions {
    pub fn build(&self, initial: f64, direction: Direction) -> Schedule {
        match self {
            ScheduleOptions::Constant => Schedule::Constant { value: initial },
            ScheduleOptions::Plateau(options) => {
                Schedule::Plateau(PlateauSchedule::new(initial, direction, options))
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            ScheduleOptions::Constant => Ok(()),
            ScheduleOptions::Plateau(options) => options.validate(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateauOptions {
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default = "default_plateau_patience")]
    pub patience: usize,
    #[serde(default)]
    pub cooldown: usize,
    #[serde(default)]
    pub min_value: f64,
    #[serde(default = "default_min_delta")]
    pub min_delta: f64,
}

impl Default for PlateauOptions {
    fn default() -> Self {
        Self {
            factor: default_factor(),
            patience: default_plateau_patience(),
            cooldown: 0,
            min_value: 0.0,
            min_delta: default_min_delta(),
        }
    }
}

impl PlateauOptions {
    pub fn validate(&self) -> Result<()> {
        if !(self.factor > 0.0 && self.factor < 1.0) {
            return Err(Error::bad_settings(format!(
                "plateau factor must be in (0, 1), got {}",
                self.factor
            )));
        }
        if self.patience == 0 {
            return Err(Error::bad_settings("plateau patience must be >= 1"));
        }
        if !(self.min_value >= 0.0) {
            return Err(Error::bad_settings("plateau min_value must be >= 0"));
        }
        if !(self.min_delta >= 0.0) {
            return Err(Error::bad_settings("plateau min_delta must be >= 0"));
        }
        Ok(())
    }
}

fn default_factor() -> f64 {
    0.1
}

fn default_plateau_patience() -> usize {
    5
}

fn default_min_delta() -> f64 {
    1e-4
}
