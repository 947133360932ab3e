//! Picks the single assumption row that governs a (scenario, year, dimension) slice.
//!
//! Precedence is a fixed business rule, not "most fields set wins":
//! customer > business group > customer type > product > global.

use crate::error::{ProjectionError, Result};
use crate::schema::{DimensionScope, OrganizationId, ScenarioAssumption, ScenarioId};
use crate::store::AssumptionStore;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeLevel {
    Customer,
    BusinessGroup,
    CustomerType,
    Product,
    Global,
}

type ScopePredicate = fn(&DimensionScope) -> bool;

fn has_customer(scope: &DimensionScope) -> bool {
    scope.customer_id.is_some()
}

fn has_business_group(scope: &DimensionScope) -> bool {
    scope.business_group_id.is_some()
}

fn has_customer_type(scope: &DimensionScope) -> bool {
    scope.customer_type_id.is_some()
}

fn has_product(scope: &DimensionScope) -> bool {
    scope.product_id.is_some()
}

fn always(_: &DimensionScope) -> bool {
    true
}

/// Highest precedence first. A scope's level is the first entry whose predicate holds.
pub const SCOPE_PRECEDENCE: [(ScopeLevel, ScopePredicate); 5] = [
    (ScopeLevel::Customer, has_customer as ScopePredicate),
    (ScopeLevel::BusinessGroup, has_business_group as ScopePredicate),
    (ScopeLevel::CustomerType, has_customer_type as ScopePredicate),
    (ScopeLevel::Product, has_product as ScopePredicate),
    (ScopeLevel::Global, always as ScopePredicate),
];

impl ScopeLevel {
    pub fn of(scope: &DimensionScope) -> Self {
        SCOPE_PRECEDENCE
            .iter()
            .find(|(_, applies)| applies(scope))
            .map(|(level, _)| *level)
            .unwrap_or(ScopeLevel::Global)
    }

    /// 0 is the most specific level.
    pub fn rank(self) -> usize {
        SCOPE_PRECEDENCE
            .iter()
            .position(|(level, _)| *level == self)
            .unwrap_or(SCOPE_PRECEDENCE.len())
    }
}

/// Chooses among already-loaded candidate rows. Rows whose scope does not
/// match `target` are ignored; among the rest the highest-ranked scope wins,
/// and a tie at the same rank (an inconsistent store) goes to the lowest id.
pub fn select_assumption<'a>(
    candidates: &'a [ScenarioAssumption],
    target: &DimensionScope,
) -> Option<&'a ScenarioAssumption> {
    let best = candidates
        .iter()
        .filter(|a| a.scope.matches(target))
        .min_by_key(|a| (ScopeLevel::of(&a.scope).rank(), a.id))?;

    let best_rank = ScopeLevel::of(&best.scope).rank();
    let competing = candidates
        .iter()
        .filter(|a| a.scope.matches(target) && ScopeLevel::of(&a.scope).rank() == best_rank)
        .count();
    if competing > 1 {
        warn!(
            "{} assumptions at level {:?} match {} in scenario {} year {}; using assumption {}",
            competing,
            ScopeLevel::of(&best.scope),
            target,
            best.scenario_id,
            best.year,
            best.id
        );
    }

    Some(best)
}

pub struct AssumptionResolver<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S> AssumptionResolver<'a, S>
where
    S: AssumptionStore + ?Sized,
{
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub fn resolve(
        &self,
        organization_id: OrganizationId,
        scenario_id: ScenarioId,
        year: i32,
        target: &DimensionScope,
    ) -> Result<ScenarioAssumption> {
        let candidates = self
            .store
            .assumptions_for(organization_id, scenario_id, year)?;

        let selected = select_assumption(&candidates, target).ok_or(
            ProjectionError::NoApplicableAssumption {
                scenario_id,
                year,
                dimension: *target,
            },
        )?;

        debug!(
            "Resolved assumption {} ({:?}) for scenario {} year {} {}",
            selected.id,
            ScopeLevel::of(&selected.scope),
            scenario_id,
            year,
            target
        );

        Ok(selected.clone())
    }
}
