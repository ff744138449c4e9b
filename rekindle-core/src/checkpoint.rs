//! Checkpoint controller: the per-epoch state machine.
//!
//! `CheckpointState::end_epoch` is a pure transition. It never touches disk;
//! it returns the next state together with the observer lists to fire, in the
//! order periodic → improvement → completion. The orchestrator applies them.

use serde::{Deserialize, Serialize};

use crate::metrics::{Direction, Metrics};
use crate::observer::Trigger;
use crate::options::JobOptions;
use crate::persistence::StateBlob;

/// Checkpoint policy and progress, persisted as `mcp.json` in each lineage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub monitor: String,
    pub direction: Direction,
    #[serde(default)]
    pub min_delta: f64,
    /// Best monitored value so far; `None` until the first observation.
    pub best: Option<f64>,
    pub epochs_since_save: usize,
    pub period: usize,
    pub patience: usize,
    /// Consecutive epochs without improvement. Always `< patience` while training.
    pub wait: usize,
    /// 0 = unbounded.
    pub epoch_budget: usize,
}

impl StateBlob for CheckpointState {
    const KIND: &'static str = "checkpoint";
}

/// Result of one epoch-end evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: CheckpointState,
    pub effects: Vec<Trigger>,
    pub stop: bool,
    /// Non-fatal problems (a missing monitored metric).
    pub warnings: Vec<String>,
}

impl Transition {
    pub fn fires(&self, trigger: Trigger) -> bool {
        self.effects.contains(&trigger)
    }
}

impl CheckpointState {
    pub fn new(options: &JobOptions) -> Self {
        Self {
            monitor: options.monitor.clone(),
            direction: options.direction,
            min_delta: options.min_delta,
            best: None,
            epochs_since_save: 0,
            period: options.period,
            patience: options.patience,
            wait: 0,
            epoch_budget: options.epoch_budget,
        }
    }

    /// Whether the epoch budget is exhausted before running `next_epoch`.
    pub fn budget_reached(&self, next_epoch: usize) -> bool {
        self.epoch_budget > 0 && next_epoch >= self.epoch_budget
    }

    /// Whether a resumed job has nothing left to run: patience was exhausted
    /// or the budget is spent before `next_epoch`.
    pub fn finished(&self, next_epoch: usize) -> bool {
        self.wait >= self.patience || self.budget_reached(next_epoch)
    }

    pub fn end_epoch(&self, epoch: usize, metrics: &Metrics) -> Transition {
        let mut state = self.clone();
        let mut effects = Vec::new();
        let mut warnings = Vec::new();
        let mut stop = false;

        state.epochs_since_save += 1;
        if state.epochs_since_save >= state.period {
            state.epochs_since_save = 0;
            effects.push(Trigger::Periodic);
        }

        match metrics.get(&state.monitor) {
            None => warnings.push(format!(
                "monitored metric '{}' missing from epoch {epoch} results (available: {})",
                state.monitor,
                metrics.names().collect::<Vec<_>>().join(", ")
            )),
            Some(value) if value.is_nan() && state.best.is_none() => warnings.push(format!(
                "monitored metric '{}' is NaN at epoch {epoch} before any valid observation",
                state.monitor
            )),
            Some(value) => {
                let improved = match state.best {
                    None => true,
                    Some(best) => state.direction.improves(value, best, state.min_delta),
                };
                if improved {
                    state.best = Some(value);
                    state.wait = 0;
                    effects.push(Trigger::Improvement);
                } else {
                    state.wait += 1;
                    if state.wait >= state.patience {
                        effects.push(Trigger::Completion);
                        stop = true;
                    }
                }
            }
        }

        if state.budget_reached(epoch + 1) {
            if !effects.contains(&Trigger::Completion) {
                effects.push(Trigger::Completion);
            }
            stop = true;
        }

        Transition {
            state,
            effects,
            stop,
            warnings,
        }
    }
}

/// Per micro-step divergence check on the batch loss.
pub fn check_step(metrics: &Metrics) -> Option<Trigger> {
    match metrics.loss() {
        Some(loss) if !loss.is_finite() => Some(Trigger::NanOrInf),
        _ => None,
    }
}
