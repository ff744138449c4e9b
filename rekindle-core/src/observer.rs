//! Observer registry for checkpoint lifecycle events.
//!
//! Four independent lists of actions, keyed by [`Trigger`]. The checkpoint
//! controller decides which triggers fire; the orchestrator dispatches them
//! here in order. A registry is rebuilt on every `train()` call and is never
//! persisted.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::checkpoint::CheckpointState;
use crate::error::{Error, Result};
use crate::layout::JobLayout;
use crate::schedule::Schedule;
use crate::snapshot::{Lineage, SnapshotStore};
use crate::status::{JobStatus, write_status};
use crate::unit::TrainableUnit;

/// Events that dispatch an observer list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Every `period` epochs.
    Periodic,
    /// The monitored metric beat the best value.
    Improvement,
    /// A micro-step produced a NaN or infinite loss.
    NanOrInf,
    /// Patience or the epoch budget ran out.
    Completion,
}

impl Trigger {
    pub fn event_name(self) -> &'static str {
        match self {
            Trigger::Periodic => "periodic",
            Trigger::Improvement => "improvement",
            Trigger::NanOrInf => "nan_or_inf",
            Trigger::Completion => "completion",
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.event_name())
    }
}

/// Everything an action may read when it fires.
pub struct ActionContext<'a> {
    pub unit: &'a dyn TrainableUnit,
    pub store: &'a SnapshotStore,
    pub layout: &'a JobLayout,
    /// Checkpoint state at the end of the transition being dispatched.
    pub checkpoint: &'a CheckpointState,
    pub schedule: &'a Schedule,
}

/// A side effect subscribed to one trigger.
pub trait Action: Send {
    fn name(&self) -> &str;

    /// Run for the given 0-based epoch index.
    fn invoke(&mut self, epoch: usize, ctx: &ActionContext<'_>) -> Result<()>;
}

/// Persist the whole job state into a lineage as one commit.
pub struct SaveLineage {
    lineage: Lineage,
    name: String,
}

impl SaveLineage {
    pub fn new(lineage: Lineage) -> Self {
        Self {
            lineage,
            name: format!("save_{lineage}"),
        }
    }
}

impl Action for SaveLineage {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&mut self, epoch: usize, ctx: &ActionContext<'_>) -> Result<()> {
        ctx.store.write_snapshot(
            self.lineage,
            ctx.unit,
            ctx.schedule,
            ctx.checkpoint,
            epoch + 1,
        )?;
        tracing::debug!(lineage = %self.lineage, epoch, "Saved snapshot");
        Ok(())
    }
}

/// Record a job status in `status.txt`.
pub struct WriteStatus {
    status: JobStatus,
    name: String,
}

impl WriteStatus {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            name: format!("write_status_{}", status.as_str().to_lowercase()),
        }
    }
}

impl Action for WriteStatus {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&mut self, epoch: usize, ctx: &ActionContext<'_>) -> Result<()> {
        write_status(&ctx.layout.status_path(), self.status)?;
        tracing::info!(status = %self.status, epoch, "Job status updated");
        Ok(())
    }
}

/// Registry of actions, keyed by trigger.
#[derive(Default)]
pub struct ObserverRegistry {
    actions: HashMap<Trigger, Vec<Box<dyn Action>>>,
}

impl ObserverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The wiring every training job starts from.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.push(Trigger::Periodic, SaveLineage::new(Lineage::Latest));
        registry.push(Trigger::Improvement, SaveLineage::new(Lineage::Best));
        registry.push(Trigger::Completion, SaveLineage::new(Lineage::Latest));
        registry.push(Trigger::Completion, WriteStatus::new(JobStatus::Complete));
        registry.push(
            Trigger::NanOrInf,
            WriteStatus::new(JobStatus::NanOrInfError),
        );
        registry
    }

    /// Append an action to the end of a trigger's list.
    pub fn push(&mut self, trigger: Trigger, action: impl Action + 'static) {
        self.actions
            .entry(trigger)
            .or_default()
            .push(Box::new(action));
    }

    /// Names of the actions subscribed to a trigger, in dispatch order.
    pub fn action_names(&self, trigger: Trigger) -> Vec<&str> {
        self.actions
            .get(&trigger)
            .map(|list| list.iter().map(|a| a.name()).collect())
            .unwrap_or_default()
    }

    /// Invoke every action of `trigger` in registration order.
    ///
    /// The first failure aborts the dispatch.
    pub fn fire(&mut self, trigger: Trigger, epoch: usize, ctx: &ActionContext<'_>) -> Result<()> {
        let Some(list) = self.actions.get_mut(&trigger) else {
            return Ok(());
        };
        for action in list.iter_mut() {
            tracing::trace!(%trigger, action = action.name(), epoch, "Dispatching action");
            action.invoke(epoch, ctx).map_err(|e| Error::Action {
                action: action.name().to_string(),
                epoch,
                source: Box::new(e),
            })?;
        }
        Ok(())
    }
}
