//! Staleness tracking for computed projections.
//!
//! Updating or deleting an assumption soft-deletes every active projection of
//! its scenario, whether or not the assumption's scope overlaps them. Creating
//! an assumption invalidates nothing. A new row can outrank a fallback that an
//! existing projection was computed with; such projections stay active until
//! the scenario is recalculated.

use crate::error::Result;
use crate::schema::{AssumptionId, OrganizationId, ScenarioAssumption, ScenarioId};
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AssumptionChange {
    Created { assumption: ScenarioAssumption },
    Updated { assumption: ScenarioAssumption },
    Deleted { assumption_id: AssumptionId },
}

impl AssumptionChange {
    pub fn invalidates_projections(&self) -> bool {
        !matches!(self, AssumptionChange::Created { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidationReport {
    pub scenario_id: ScenarioId,
    pub assumption_id: AssumptionId,
    pub invalidated_projections: usize,
    pub invalidated_at: Option<DateTime<Utc>>,
}

/// Storage side of an assumption mutation. Implementations must apply the
/// change and, when `invalidate` is set, soft-delete the scenario's active
/// projections in one atomic step, so no reader sees the new assumption next
/// to projections computed from the old one.
pub trait AssumptionChangeStore {
    fn commit_assumption_change(
        &self,
        organization_id: OrganizationId,
        change: &AssumptionChange,
        invalidate: bool,
        at: DateTime<Utc>,
    ) -> Result<InvalidationReport>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct InvalidationTracker;

impl InvalidationTracker {
    pub fn new() -> Self {
        Self
    }

    pub fn apply<S>(
        &self,
        organization_id: OrganizationId,
        change: &AssumptionChange,
        store: &S,
    ) -> Result<InvalidationReport>
    where
        S: AssumptionChangeStore + ?Sized,
    {
        let invalidate = change.invalidates_projections();
        let report =
            store.commit_assumption_change(organization_id, change, invalidate, Utc::now())?;

        if invalidate {
            info!(
                "Assumption {} changed: marked {} projections of scenario {} stale",
                report.assumption_id, report.invalidated_projections, report.scenario_id
            );
        }

        Ok(report)
    }
}
