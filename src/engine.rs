use crate::calculator::ProjectionCalculator;
use crate::config::EngineConfig;
use crate::error::{ProjectionError, Result};
use crate::historical::{aggregate_monthly, HistoricalDataAnalyzer, HistoricalSummary, InvoiceSource};
use crate::projection::{Projection, ProjectionKey};
use crate::resolver::AssumptionResolver;
use crate::schema::{DimensionScope, OrganizationId, ProjectionId, Scenario, ScenarioId, ScenarioStatus};
use crate::store::{AssumptionStore, ProjectionStore, ScenarioStore};
use crate::utils::round_money;
use chrono::Utc;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Mutex;

/// A dimension slice that could not be projected. `year` is `None` when the
/// slice failed before any year was attempted (e.g. no history).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceFailure {
    pub dimension: DimensionScope,
    pub year: Option<i32>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalculationReport {
    pub scenario_id: Option<ScenarioId>,
    /// Active projections of the scenario that were soft-deleted before the run.
    pub superseded: usize,
    pub succeeded: Vec<ProjectionKey>,
    pub failed: Vec<SliceFailure>,
}

impl CalculationReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Default)]
struct SliceOutcome {
    succeeded: Vec<ProjectionKey>,
    failure: Option<SliceFailure>,
}

type RunKey = (OrganizationId, ScenarioId);

/// Marks a scenario as being recalculated until dropped.
pub(crate) struct RunGuard<'a> {
    in_flight: &'a Mutex<HashSet<RunKey>>,
    key: RunKey,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = match self.in_flight.lock() {
            Ok(set) => set,
            Err(poisoned) => poisoned.into_inner(),
        };
        in_flight.remove(&self.key);
    }
}

/// Runs analyzer, resolver and calculator for every dimension slice of a
/// scenario and persists the results.
pub struct ProjectionEngine<S> {
    store: S,
    config: EngineConfig,
    calculator: ProjectionCalculator,
    in_flight: Mutex<HashSet<RunKey>>,
}

impl<S> ProjectionEngine<S>
where
    S: ScenarioStore + AssumptionStore + ProjectionStore + InvoiceSource + Sync,
{
    /// Fails with `Config` when the store enforces a different write
    /// tolerance than `config`, since drafts would be checked twice against
    /// different bounds.
    pub fn new(store: S, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let store_tolerance = store.write_tolerance();
        if (store_tolerance - config.tolerance).abs() > f64::EPSILON {
            return Err(ProjectionError::Config(format!(
                "tolerance {} does not match the store's write tolerance {}",
                config.tolerance, store_tolerance
            )));
        }
        Ok(Self {
            store,
            calculator: ProjectionCalculator::new(&config),
            config,
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    /// Default configuration, adopting the store's write tolerance.
    pub fn with_defaults(store: S) -> Self {
        let config = EngineConfig {
            tolerance: store.write_tolerance(),
            ..EngineConfig::default()
        };
        Self {
            store,
            calculator: ProjectionCalculator::new(&config),
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Recomputes every slice of a scenario. Existing active projections are
    /// superseded first; per-slice failures land in the report.
    pub fn calculate_scenario(
        &self,
        organization_id: OrganizationId,
        scenario_id: ScenarioId,
    ) -> Result<CalculationReport> {
        let scenario = self.load_calculable(organization_id, scenario_id)?;
        let _guard = self.begin_run(organization_id, scenario_id)?;
        let generation = self.store.assumption_generation(organization_id, scenario_id)?;

        let slices = self.scenario_slices(organization_id, &scenario)?;
        self.check_slice_limit(scenario_id, slices.len())?;

        let superseded =
            self.store
                .soft_delete_scenario_projections(organization_id, scenario_id, Utc::now())?;

        info!(
            "Calculating scenario {} ({}) over {} slices, superseding {} projections",
            scenario.id,
            scenario.name,
            slices.len(),
            superseded
        );

        let mut report = self.run_slices(organization_id, &scenario, &slices, generation)?;
        report.superseded = superseded;
        Ok(report)
    }

    /// Recomputes only the given slices, replacing their active projections.
    pub fn calculate_slices(
        &self,
        organization_id: OrganizationId,
        scenario_id: ScenarioId,
        slices: &[DimensionScope],
    ) -> Result<CalculationReport> {
        let scenario = self.load_calculable(organization_id, scenario_id)?;
        let _guard = self.begin_run(organization_id, scenario_id)?;
        let generation = self.store.assumption_generation(organization_id, scenario_id)?;

        let slices: Vec<DimensionScope> = slices
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        self.check_slice_limit(scenario_id, slices.len())?;

        debug!(
            "Calculating {} explicit slices of scenario {}",
            slices.len(),
            scenario_id
        );

        self.run_slices(organization_id, &scenario, &slices, generation)
    }

    /// Re-runs the pipeline for one projection's key. The year's base is the
    /// prior year's active total when present, otherwise the chain is rebuilt
    /// from history in memory. Errors are returned rather than reported.
    pub fn recalculate_projection(
        &self,
        organization_id: OrganizationId,
        projection_id: ProjectionId,
    ) -> Result<Projection> {
        let existing = self.store.projection(organization_id, projection_id)?;
        let scenario = self.load_calculable(organization_id, existing.scenario_id)?;
        let _guard = self.begin_run(organization_id, scenario.id)?;
        let generation = self.store.assumption_generation(organization_id, scenario.id)?;

        if !scenario.projection_year_range().contains(&existing.year) {
            return Err(ProjectionError::InvalidScenario {
                scenario_id: scenario.id,
                details: format!(
                    "year {} is outside the projection range {:?}",
                    existing.year,
                    scenario.projection_year_range()
                ),
            });
        }

        let dimension = existing.dimension;
        let summary = self.history(organization_id, &scenario, &dimension)?;
        let resolver = AssumptionResolver::new(&self.store);

        let prior = ProjectionKey {
            scenario_id: scenario.id,
            year: existing.year - 1,
            dimension,
        };
        let base = match self.store.active_projection(organization_id, &prior)? {
            Some(previous) => previous.total_amount,
            None => {
                let mut base = annual_base(&summary, &scenario);
                for year in (scenario.base_year + 1)..existing.year {
                    let assumption = resolver.resolve(organization_id, scenario.id, year, &dimension)?;
                    let key = ProjectionKey {
                        scenario_id: scenario.id,
                        year,
                        dimension,
                    };
                    base = self
                        .calculator
                        .build_projection(key, base, &assumption, &scenario, summary.tax_share())?
                        .total_amount;
                }
                base
            }
        };

        let projection = self.project_year(
            organization_id,
            &scenario,
            &resolver,
            existing.key(),
            base,
            summary.tax_share(),
            generation,
        )?;

        info!(
            "Recalculated projection {} as {} for scenario {} year {} {}",
            projection_id, projection.id, scenario.id, projection.year, dimension
        );
        Ok(projection)
    }

    pub(crate) fn begin_run(
        &self,
        organization_id: OrganizationId,
        scenario_id: ScenarioId,
    ) -> Result<RunGuard<'_>> {
        let key = (organization_id, scenario_id);
        let mut in_flight = self
            .in_flight
            .lock()
            .map_err(|e| ProjectionError::Storage(format!("run registry poisoned: {}", e)))?;
        if !in_flight.insert(key) {
            return Err(ProjectionError::RecalculationInProgress(scenario_id));
        }
        Ok(RunGuard {
            in_flight: &self.in_flight,
            key,
        })
    }

    fn load_calculable(
        &self,
        organization_id: OrganizationId,
        scenario_id: ScenarioId,
    ) -> Result<Scenario> {
        let scenario = self.store.scenario(organization_id, scenario_id)?;
        if scenario.status == ScenarioStatus::Archived {
            return Err(ProjectionError::ScenarioArchived(scenario_id));
        }
        scenario.validate()?;
        Ok(scenario)
    }

    /// Distinct scopes of the scenario's assumptions, plus the global slice
    /// when configured.
    fn scenario_slices(
        &self,
        organization_id: OrganizationId,
        scenario: &Scenario,
    ) -> Result<Vec<DimensionScope>> {
        let mut slices: BTreeSet<DimensionScope> = self
            .store
            .scenario_assumptions(organization_id, scenario.id)?
            .into_iter()
            .map(|a| a.scope)
            .collect();
        if self.config.include_global_slice {
            slices.insert(DimensionScope::global());
        }
        Ok(slices.into_iter().collect())
    }

    fn check_slice_limit(&self, scenario_id: ScenarioId, count: usize) -> Result<()> {
        if count > self.config.max_slices_per_run {
            return Err(ProjectionError::TooManySlices {
                scenario_id,
                count,
                limit: self.config.max_slices_per_run,
            });
        }
        Ok(())
    }

    /// `generation` is the scenario's assumption generation when the run
    /// started; writes are refused once it has moved.
    fn run_slices(
        &self,
        organization_id: OrganizationId,
        scenario: &Scenario,
        slices: &[DimensionScope],
        generation: u64,
    ) -> Result<CalculationReport> {
        let outcomes: Vec<SliceOutcome> = if self.config.parallel_slices {
            slices
                .par_iter()
                .map(|dimension| self.run_slice(organization_id, scenario, *dimension, generation))
                .collect::<Result<_>>()?
        } else {
            slices
                .iter()
                .map(|dimension| self.run_slice(organization_id, scenario, *dimension, generation))
                .collect::<Result<_>>()?
        };

        let mut report = CalculationReport {
            scenario_id: Some(scenario.id),
            ..CalculationReport::default()
        };
        for outcome in outcomes {
            report.succeeded.extend(outcome.succeeded);
            if let Some(failure) = outcome.failure {
                warn!(
                    "Scenario {} slice {} failed{}: {}",
                    scenario.id,
                    failure.dimension,
                    failure
                        .year
                        .map(|y| format!(" in {}", y))
                        .unwrap_or_default(),
                    failure.reason
                );
                report.failed.push(failure);
            }
        }

        info!(
            "Scenario {}: {} projections stored, {} slices failed",
            scenario.id,
            report.succeeded.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Projects one slice year by year. The slice stops at its first failing
    /// year since later years compound on it. Only slice-local errors are
    /// folded into the outcome.
    fn run_slice(
        &self,
        organization_id: OrganizationId,
        scenario: &Scenario,
        dimension: DimensionScope,
        generation: u64,
    ) -> Result<SliceOutcome> {
        let mut outcome = SliceOutcome::default();

        let summary = match self.history(organization_id, scenario, &dimension) {
            Ok(summary) => summary,
            Err(e) if e.is_slice_recoverable() => {
                outcome.failure = Some(SliceFailure {
                    dimension,
                    year: None,
                    reason: e.to_string(),
                });
                return Ok(outcome);
            }
            Err(e) => return Err(e),
        };

        let resolver = AssumptionResolver::new(&self.store);
        let tax_share = summary.tax_share();
        let mut base = annual_base(&summary, scenario);

        for year in scenario.projection_year_range() {
            let key = ProjectionKey {
                scenario_id: scenario.id,
                year,
                dimension,
            };
            match self.project_year(
                organization_id,
                scenario,
                &resolver,
                key,
                base,
                tax_share,
                generation,
            ) {
                Ok(projection) => {
                    base = projection.total_amount;
                    outcome.succeeded.push(key);
                }
                Err(e) if e.is_slice_recoverable() => {
                    outcome.failure = Some(SliceFailure {
                        dimension,
                        year: Some(year),
                        reason: e.to_string(),
                    });
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(outcome)
    }

    fn history(
        &self,
        organization_id: OrganizationId,
        scenario: &Scenario,
        dimension: &DimensionScope,
    ) -> Result<HistoricalSummary> {
        HistoricalDataAnalyzer::new(&self.store).historical_summary(
            organization_id,
            dimension,
            scenario.base_year,
            scenario.historical_months,
        )
    }

    fn project_year(
        &self,
        organization_id: OrganizationId,
        scenario: &Scenario,
        resolver: &AssumptionResolver<'_, S>,
        key: ProjectionKey,
        base: f64,
        tax_share: f64,
        generation: u64,
    ) -> Result<Projection> {
        let assumption = resolver.resolve(organization_id, scenario.id, key.year, &key.dimension)?;
        let draft = self
            .calculator
            .build_projection(key, base, &assumption, scenario, tax_share)?;

        let as_of = Some(generation);
        let projection = match self.store.active_projection(organization_id, &key)? {
            Some(current) => {
                self.store
                    .replace_projection(organization_id, current.id, draft, as_of)?
            }
            None => self.store.insert_projection(organization_id, draft, as_of)?,
        };

        debug!(
            "Stored projection {} for year {} {}: {:.2} from base {:.2}",
            projection.id, key.year, key.dimension, projection.total_amount, base
        );
        Ok(projection)
    }
}

/// First projected year's base: the aggregated monthly figure annualised.
fn annual_base(summary: &HistoricalSummary, scenario: &Scenario) -> f64 {
    round_money(aggregate_monthly(&summary.monthly_totals, scenario.calculation_method) * 12.0)
}
