//! Persistence interfaces and an in-memory implementation.
//!
//! Only store implementations touch stored state. Every call is scoped by an
//! explicit `OrganizationId`; rows of other organizations are invisible.

use crate::config::EngineConfig;
use crate::error::{ProjectionError, Result};
use crate::historical::InvoiceSource;
use crate::invalidation::{
    AssumptionChange, AssumptionChangeStore, InvalidationReport, InvalidationTracker,
};
use crate::projection::{Projection, ProjectionDraft, ProjectionKey};
use crate::schema::{
    AssumptionId, CustomerId, CustomerProfile, InvoiceRecord, OrganizationId, ProjectionId,
    Scenario, ScenarioAssumption, ScenarioId,
};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

pub trait ScenarioStore {
    fn scenario(&self, organization_id: OrganizationId, scenario_id: ScenarioId)
        -> Result<Scenario>;
}

pub trait AssumptionStore {
    /// Candidate rows for one scenario year, any scope.
    fn assumptions_for(
        &self,
        organization_id: OrganizationId,
        scenario_id: ScenarioId,
        year: i32,
    ) -> Result<Vec<ScenarioAssumption>>;

    fn scenario_assumptions(
        &self,
        organization_id: OrganizationId,
        scenario_id: ScenarioId,
    ) -> Result<Vec<ScenarioAssumption>>;

    fn assumption(
        &self,
        organization_id: OrganizationId,
        assumption_id: AssumptionId,
    ) -> Result<ScenarioAssumption>;

    /// Counter bumped by every assumption update or delete of the scenario.
    /// A projection computed at one generation may only be written while the
    /// counter still holds that value.
    fn assumption_generation(
        &self,
        organization_id: OrganizationId,
        scenario_id: ScenarioId,
    ) -> Result<u64>;
}

pub trait ProjectionStore {
    /// Absolute tolerance the store applies to projection invariants on write.
    fn write_tolerance(&self) -> f64;

    /// Persists a draft after checking the projection invariants. Fails with
    /// `Conflict` when an active projection already exists for the key, and
    /// with `AssumptionsChanged` when `as_of` is set and the scenario's
    /// assumption generation has moved past it.
    fn insert_projection(
        &self,
        organization_id: OrganizationId,
        draft: ProjectionDraft,
        as_of: Option<u64>,
    ) -> Result<Projection>;

    /// Soft-deletes `previous` and inserts `draft` for the same key atomically,
    /// under the same `as_of` check as `insert_projection`.
    fn replace_projection(
        &self,
        organization_id: OrganizationId,
        previous: ProjectionId,
        draft: ProjectionDraft,
        as_of: Option<u64>,
    ) -> Result<Projection>;

    fn active_projections(
        &self,
        organization_id: OrganizationId,
        scenario_id: ScenarioId,
    ) -> Result<Vec<Projection>>;

    fn active_projection(
        &self,
        organization_id: OrganizationId,
        key: &ProjectionKey,
    ) -> Result<Option<Projection>>;

    /// Any projection by id, soft-deleted ones included.
    fn projection(
        &self,
        organization_id: OrganizationId,
        projection_id: ProjectionId,
    ) -> Result<Projection>;

    fn soft_delete_scenario_projections(
        &self,
        organization_id: OrganizationId,
        scenario_id: ScenarioId,
        at: DateTime<Utc>,
    ) -> Result<usize>;
}

#[derive(Debug, Default)]
struct StoreState {
    scenarios: BTreeMap<(OrganizationId, ScenarioId), Scenario>,
    assumptions: BTreeMap<(OrganizationId, AssumptionId), ScenarioAssumption>,
    projections: BTreeMap<(OrganizationId, ProjectionId), Projection>,
    customers: HashMap<(OrganizationId, CustomerId), CustomerProfile>,
    invoices: Vec<(OrganizationId, InvoiceRecord)>,
    assumption_generations: HashMap<(OrganizationId, ScenarioId), u64>,
    next_projection_id: u64,
}

impl StoreState {
    fn generation(&self, organization_id: OrganizationId, scenario_id: ScenarioId) -> u64 {
        self.assumption_generations
            .get(&(organization_id, scenario_id))
            .copied()
            .unwrap_or(0)
    }

    fn check_generation(
        &self,
        organization_id: OrganizationId,
        scenario_id: ScenarioId,
        as_of: Option<u64>,
    ) -> Result<()> {
        let Some(expected) = as_of else {
            return Ok(());
        };
        let current = self.generation(organization_id, scenario_id);
        if current != expected {
            return Err(ProjectionError::AssumptionsChanged {
                scenario_id,
                expected,
                current,
            });
        }
        Ok(())
    }

    fn active_key_exists(&self, organization_id: OrganizationId, key: &ProjectionKey) -> bool {
        self.projections
            .iter()
            .any(|((org, _), p)| *org == organization_id && p.is_active() && p.key() == *key)
    }

    fn insert_validated(
        &mut self,
        organization_id: OrganizationId,
        draft: ProjectionDraft,
        tolerance: f64,
    ) -> Result<Projection> {
        draft.validate(tolerance)?;

        if self.active_key_exists(organization_id, &draft.key) {
            return Err(ProjectionError::Conflict(format!(
                "an active projection already exists for scenario {} year {} {}",
                draft.key.scenario_id, draft.key.year, draft.key.dimension
            )));
        }

        self.next_projection_id += 1;
        let id = ProjectionId(self.next_projection_id);
        let projection = Projection::from_draft(id, draft, Utc::now());
        self.projections
            .insert((organization_id, id), projection.clone());
        Ok(projection)
    }

    fn soft_delete_scenario(
        &mut self,
        organization_id: OrganizationId,
        scenario_id: ScenarioId,
        at: DateTime<Utc>,
    ) -> usize {
        let mut count = 0;
        for ((org, _), projection) in self.projections.iter_mut() {
            if *org == organization_id
                && projection.scenario_id == scenario_id
                && projection.is_active()
            {
                projection.deleted_at = Some(at);
                count += 1;
            }
        }
        count
    }
}

/// Thread-safe in-memory store. One `RwLock` guards all state, so each write
/// method is a single transaction.
#[derive(Debug)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
    tolerance: f64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_tolerance(0.01)
    }

    /// A store enforcing the engine's configured tolerance on every write.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::with_tolerance(config.tolerance)
    }

    pub fn with_tolerance(tolerance: f64) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            tolerance,
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>> {
        self.state
            .read()
            .map_err(|e| ProjectionError::Storage(format!("store lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>> {
        self.state
            .write()
            .map_err(|e| ProjectionError::Storage(format!("store lock poisoned: {}", e)))
    }

    pub fn upsert_scenario(&self, scenario: Scenario) -> Result<()> {
        scenario.validate()?;
        let mut state = self.write()?;
        state
            .scenarios
            .insert((scenario.organization_id, scenario.id), scenario);
        Ok(())
    }

    pub fn upsert_customer(
        &self,
        organization_id: OrganizationId,
        profile: CustomerProfile,
    ) -> Result<()> {
        let mut state = self.write()?;
        state
            .customers
            .insert((organization_id, profile.customer_id), profile);
        Ok(())
    }

    pub fn add_invoices(
        &self,
        organization_id: OrganizationId,
        invoices: impl IntoIterator<Item = InvoiceRecord>,
    ) -> Result<()> {
        let mut state = self.write()?;
        state
            .invoices
            .extend(invoices.into_iter().map(|i| (organization_id, i)));
        Ok(())
    }

    pub fn create_assumption(
        &self,
        organization_id: OrganizationId,
        assumption: ScenarioAssumption,
    ) -> Result<InvalidationReport> {
        InvalidationTracker::new().apply(
            organization_id,
            &AssumptionChange::Created { assumption },
            self,
        )
    }

    pub fn update_assumption(
        &self,
        organization_id: OrganizationId,
        assumption: ScenarioAssumption,
    ) -> Result<InvalidationReport> {
        InvalidationTracker::new().apply(
            organization_id,
            &AssumptionChange::Updated { assumption },
            self,
        )
    }

    pub fn delete_assumption(
        &self,
        organization_id: OrganizationId,
        assumption_id: AssumptionId,
    ) -> Result<InvalidationReport> {
        InvalidationTracker::new().apply(
            organization_id,
            &AssumptionChange::Deleted { assumption_id },
            self,
        )
    }

    /// Count of active projections for a scenario.
    pub fn active_projection_count(
        &self,
        organization_id: OrganizationId,
        scenario_id: ScenarioId,
    ) -> Result<usize> {
        Ok(self.active_projections(organization_id, scenario_id)?.len())
    }
}

impl ScenarioStore for InMemoryStore {
    fn scenario(
        &self,
        organization_id: OrganizationId,
        scenario_id: ScenarioId,
    ) -> Result<Scenario> {
        self.read()?
            .scenarios
            .get(&(organization_id, scenario_id))
            .cloned()
            .ok_or(ProjectionError::ScenarioNotFound(scenario_id))
    }
}

impl AssumptionStore for InMemoryStore {
    fn assumptions_for(
        &self,
        organization_id: OrganizationId,
        scenario_id: ScenarioId,
        year: i32,
    ) -> Result<Vec<ScenarioAssumption>> {
        Ok(self
            .scenario_assumptions(organization_id, scenario_id)?
            .into_iter()
            .filter(|a| a.year == year)
            .collect())
    }

    fn scenario_assumptions(
        &self,
        organization_id: OrganizationId,
        scenario_id: ScenarioId,
    ) -> Result<Vec<ScenarioAssumption>> {
        let state = self.read()?;
        Ok(state
            .assumptions
            .iter()
            .filter(|((org, _), a)| *org == organization_id && a.scenario_id == scenario_id)
            .map(|(_, a)| a.clone())
            .collect())
    }

    fn assumption(
        &self,
        organization_id: OrganizationId,
        assumption_id: AssumptionId,
    ) -> Result<ScenarioAssumption> {
        self.read()?
            .assumptions
            .get(&(organization_id, assumption_id))
            .cloned()
            .ok_or(ProjectionError::AssumptionNotFound(assumption_id))
    }

    fn assumption_generation(
        &self,
        organization_id: OrganizationId,
        scenario_id: ScenarioId,
    ) -> Result<u64> {
        Ok(self.read()?.generation(organization_id, scenario_id))
    }
}

impl AssumptionChangeStore for InMemoryStore {
    fn commit_assumption_change(
        &self,
        organization_id: OrganizationId,
        change: &AssumptionChange,
        invalidate: bool,
        at: DateTime<Utc>,
    ) -> Result<InvalidationReport> {
        let mut state = self.write()?;

        let (scenario_id, assumption_id) = match change {
            AssumptionChange::Created { assumption } => {
                if !state
                    .scenarios
                    .contains_key(&(organization_id, assumption.scenario_id))
                {
                    return Err(ProjectionError::ScenarioNotFound(assumption.scenario_id));
                }
                if state
                    .assumptions
                    .contains_key(&(organization_id, assumption.id))
                {
                    return Err(ProjectionError::Conflict(format!(
                        "assumption {} already exists",
                        assumption.id
                    )));
                }
                state
                    .assumptions
                    .insert((organization_id, assumption.id), assumption.clone());
                (assumption.scenario_id, assumption.id)
            }
            AssumptionChange::Updated { assumption } => {
                let existing = state
                    .assumptions
                    .get(&(organization_id, assumption.id))
                    .ok_or(ProjectionError::AssumptionNotFound(assumption.id))?;
                if existing.scenario_id != assumption.scenario_id {
                    return Err(ProjectionError::Conflict(format!(
                        "assumption {} cannot move from scenario {} to {}",
                        assumption.id, existing.scenario_id, assumption.scenario_id
                    )));
                }
                state
                    .assumptions
                    .insert((organization_id, assumption.id), assumption.clone());
                (assumption.scenario_id, assumption.id)
            }
            AssumptionChange::Deleted { assumption_id } => {
                let removed = state
                    .assumptions
                    .remove(&(organization_id, *assumption_id))
                    .ok_or(ProjectionError::AssumptionNotFound(*assumption_id))?;
                (removed.scenario_id, *assumption_id)
            }
        };

        let invalidated_projections = if invalidate {
            *state
                .assumption_generations
                .entry((organization_id, scenario_id))
                .or_insert(0) += 1;
            state.soft_delete_scenario(organization_id, scenario_id, at)
        } else {
            0
        };

        Ok(InvalidationReport {
            scenario_id,
            assumption_id,
            invalidated_projections,
            invalidated_at: invalidate.then_some(at),
        })
    }
}

impl ProjectionStore for InMemoryStore {
    fn write_tolerance(&self) -> f64 {
        self.tolerance
    }

    fn insert_projection(
        &self,
        organization_id: OrganizationId,
        draft: ProjectionDraft,
        as_of: Option<u64>,
    ) -> Result<Projection> {
        let mut state = self.write()?;
        state.check_generation(organization_id, draft.key.scenario_id, as_of)?;
        state.insert_validated(organization_id, draft, self.tolerance)
    }

    fn replace_projection(
        &self,
        organization_id: OrganizationId,
        previous: ProjectionId,
        draft: ProjectionDraft,
        as_of: Option<u64>,
    ) -> Result<Projection> {
        draft.validate(self.tolerance)?;
        let mut state = self.write()?;
        state.check_generation(organization_id, draft.key.scenario_id, as_of)?;

        let old = state
            .projections
            .get_mut(&(organization_id, previous))
            .ok_or(ProjectionError::ProjectionNotFound(previous))?;
        if old.key() != draft.key {
            return Err(ProjectionError::Conflict(format!(
                "projection {} does not belong to scenario {} year {} {}",
                previous, draft.key.scenario_id, draft.key.year, draft.key.dimension
            )));
        }
        if !old.is_active() {
            return Err(ProjectionError::Conflict(format!(
                "projection {} is no longer active",
                previous
            )));
        }
        old.deleted_at = Some(Utc::now());

        state.insert_validated(organization_id, draft, self.tolerance)
    }

    fn active_projections(
        &self,
        organization_id: OrganizationId,
        scenario_id: ScenarioId,
    ) -> Result<Vec<Projection>> {
        let state = self.read()?;
        Ok(state
            .projections
            .iter()
            .filter(|((org, _), p)| {
                *org == organization_id && p.scenario_id == scenario_id && p.is_active()
            })
            .map(|(_, p)| p.clone())
            .collect())
    }

    fn active_projection(
        &self,
        organization_id: OrganizationId,
        key: &ProjectionKey,
    ) -> Result<Option<Projection>> {
        let state = self.read()?;
        Ok(state
            .projections
            .iter()
            .find(|((org, _), p)| *org == organization_id && p.is_active() && p.key() == *key)
            .map(|(_, p)| p.clone()))
    }

    fn projection(
        &self,
        organization_id: OrganizationId,
        projection_id: ProjectionId,
    ) -> Result<Projection> {
        self.read()?
            .projections
            .get(&(organization_id, projection_id))
            .cloned()
            .ok_or(ProjectionError::ProjectionNotFound(projection_id))
    }

    fn soft_delete_scenario_projections(
        &self,
        organization_id: OrganizationId,
        scenario_id: ScenarioId,
        at: DateTime<Utc>,
    ) -> Result<usize> {
        let mut state = self.write()?;
        Ok(state.soft_delete_scenario(organization_id, scenario_id, at))
    }
}

impl InvoiceSource for InMemoryStore {
    fn invoices_between(
        &self,
        organization_id: OrganizationId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<InvoiceRecord>> {
        let state = self.read()?;
        Ok(state
            .invoices
            .iter()
            .filter(|(org, i)| {
                *org == organization_id && i.invoice_date >= start && i.invoice_date <= end
            })
            .map(|(_, i)| i.clone())
            .collect())
    }

    fn customer_profile(
        &self,
        organization_id: OrganizationId,
        customer_id: CustomerId,
    ) -> Result<Option<CustomerProfile>> {
        Ok(self
            .read()?
            .customers
            .get(&(organization_id, customer_id))
            .cloned())
    }
}
