use crate::error::{ProjectionError, Result};
use crate::schema::{DimensionScope, OrganizationId, Scenario, ScenarioId};
use crate::store::{ProjectionStore, ScenarioStore};
use crate::utils::{round_money, round_to};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;

pub const MIN_COMPARED_SCENARIOS: usize = 2;
pub const MAX_COMPARED_SCENARIOS: usize = 4;

/// Restricts which projections feed a comparison. `dimension: None` compares
/// the organization-wide (global) projections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonFilters {
    pub years: Option<RangeInclusive<i32>>,
    pub dimension: Option<DimensionScope>,
}

impl ComparisonFilters {
    pub fn for_years(years: RangeInclusive<i32>) -> Self {
        Self {
            years: Some(years),
            dimension: None,
        }
    }

    fn includes_year(&self, year: i32) -> bool {
        self.years.as_ref().map_or(true, |r| r.contains(&year))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct YearSummary {
    pub min: f64,
    pub max: f64,
    pub range: f64,
    /// `range / min * 100`, or 0 when `min` is not positive.
    pub range_percentage: f64,
}

impl YearSummary {
    fn from_totals<'a>(totals: impl IntoIterator<Item = &'a f64>) -> Option<Self> {
        let mut iter = totals.into_iter().copied();
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)));
        let range = round_money(max - min);
        let range_percentage = if min > 0.0 {
            round_to((max - min) / min * 100.0, 2)
        } else {
            0.0
        };
        Some(Self {
            min,
            max,
            range,
            range_percentage,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioComparison {
    pub scenarios: Vec<Scenario>,
    /// Year -> scenario -> total projected amount. Scenarios without an
    /// active projection for a year are absent from that year.
    pub comparison_data: BTreeMap<i32, BTreeMap<ScenarioId, f64>>,
    pub summary: BTreeMap<i32, YearSummary>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ComparisonAggregator;

impl ComparisonAggregator {
    pub fn new() -> Self {
        Self
    }

    pub fn compare<S>(
        &self,
        organization_id: OrganizationId,
        scenario_ids: &[ScenarioId],
        filters: &ComparisonFilters,
        store: &S,
    ) -> Result<ScenarioComparison>
    where
        S: ScenarioStore + ProjectionStore + ?Sized,
    {
        let count = scenario_ids.len();
        if !(MIN_COMPARED_SCENARIOS..=MAX_COMPARED_SCENARIOS).contains(&count) {
            return Err(ProjectionError::InvalidComparisonCardinality { count });
        }
        let mut seen = BTreeSet::new();
        if let Some(&duplicate) = scenario_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(ProjectionError::DuplicateComparisonScenario(duplicate));
        }

        let dimension = filters.dimension.unwrap_or_default();
        let mut scenarios = Vec::with_capacity(count);
        let mut comparison_data: BTreeMap<i32, BTreeMap<ScenarioId, f64>> = BTreeMap::new();

        for &scenario_id in scenario_ids {
            scenarios.push(store.scenario(organization_id, scenario_id)?);

            for projection in store.active_projections(organization_id, scenario_id)? {
                if projection.dimension != dimension || !filters.includes_year(projection.year) {
                    continue;
                }
                let slot = comparison_data
                    .entry(projection.year)
                    .or_default()
                    .entry(scenario_id)
                    .or_insert(0.0);
                *slot = round_money(*slot + projection.total_amount);
            }
        }

        let summary = comparison_data
            .iter()
            .filter_map(|(year, totals)| YearSummary::from_totals(totals.values()).map(|s| (*year, s)))
            .collect();

        debug!(
            "Compared {} scenarios over {} years for {}",
            count,
            comparison_data.len(),
            dimension
        );

        Ok(ScenarioComparison {
            scenarios,
            comparison_data,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::{ProjectionDetail, ProjectionDraft, ProjectionKey};
    use crate::schema::{CalculationMethod, ScenarioStatus};
    use crate::store::InMemoryStore;

    const ORG: OrganizationId = OrganizationId(7);

    fn scenario(id: u64) -> Scenario {
        Scenario {
            id: ScenarioId(id),
            organization_id: ORG,
            name: format!("Plan {}", id),
            base_year: 2024,
            historical_months: 12,
            projection_years: 3,
            calculation_method: CalculationMethod::SimpleAverage,
            include_inflation: true,
            is_baseline: id == 1,
            status: ScenarioStatus::Active,
        }
    }

    fn draft(scenario_id: u64, year: i32, dimension: DimensionScope, total: f64) -> ProjectionDraft {
        ProjectionDraft {
            key: ProjectionKey {
                scenario_id: ScenarioId(scenario_id),
                year,
                dimension,
            },
            base_amount: total,
            total_subtotal: total,
            total_tax: 0.0,
            total_amount: total,
            growth_applied: 0.0,
            inflation_applied: 0.0,
            calculation_method: CalculationMethod::SimpleAverage,
            details: Vec::new(),
        }
    }

    fn store_with(totals: &[(u64, i32, f64)]) -> InMemoryStore {
        let store = InMemoryStore::new();
        for id in 1..=5 {
            store.upsert_scenario(scenario(id)).unwrap();
        }
        for &(scenario_id, year, total) in totals {
            store
                .insert_projection(
                    ORG,
                    draft(scenario_id, year, DimensionScope::global(), total),
                    None,
                )
                .unwrap();
        }
        store
    }

    fn ids(raw: &[u64]) -> Vec<ScenarioId> {
        raw.iter().copied().map(ScenarioId).collect()
    }

    #[test]
    fn test_three_way_summary() {
        let store = store_with(&[(1, 2025, 100.0), (2, 2025, 150.0), (3, 2025, 200.0)]);
        let result = ComparisonAggregator::new()
            .compare(ORG, &ids(&[1, 2, 3]), &ComparisonFilters::default(), &store)
            .unwrap();

        let summary = result.summary[&2025];
        assert_eq!(summary.min, 100.0);
        assert_eq!(summary.max, 200.0);
        assert_eq!(summary.range, 100.0);
        assert_eq!(summary.range_percentage, 100.0);
        assert_eq!(result.comparison_data[&2025].len(), 3);
        assert_eq!(result.scenarios.len(), 3);
    }

    #[test]
    fn test_cardinality_bounds() {
        let store = store_with(&[]);
        let aggregator = ComparisonAggregator::new();
        let filters = ComparisonFilters::default();

        for raw in [&[1u64][..], &[1, 2, 3, 4, 5][..], &[][..]] {
            let result = aggregator.compare(ORG, &ids(raw), &filters, &store);
            assert!(matches!(
                result,
                Err(ProjectionError::InvalidComparisonCardinality { count }) if count == raw.len()
            ));
        }

        assert!(aggregator.compare(ORG, &ids(&[1, 2, 3, 4]), &filters, &store).is_ok());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let store = store_with(&[(1, 2025, 1200.0), (2, 2025, 1500.0)]);
        let aggregator = ComparisonAggregator::new();
        let filters = ComparisonFilters::default();

        for raw in [&[1u64, 1][..], &[1, 2, 1][..]] {
            assert!(matches!(
                aggregator.compare(ORG, &ids(raw), &filters, &store),
                Err(ProjectionError::DuplicateComparisonScenario(ScenarioId(1)))
            ));
        }

        let distinct = aggregator.compare(ORG, &ids(&[1, 2]), &filters, &store).unwrap();
        assert_eq!(distinct.comparison_data[&2025][&ScenarioId(1)], 1200.0);
    }

    #[test]
    fn test_empty_data_gives_empty_summary() {
        let store = store_with(&[]);
        let result = ComparisonAggregator::new()
            .compare(ORG, &ids(&[1, 2]), &ComparisonFilters::default(), &store)
            .unwrap();
        assert!(result.comparison_data.is_empty());
        assert!(result.summary.is_empty());
    }

    #[test]
    fn test_non_positive_min_has_zero_percentage() {
        let store = store_with(&[(1, 2026, 0.0), (2, 2026, 50.0)]);
        let result = ComparisonAggregator::new()
            .compare(ORG, &ids(&[1, 2]), &ComparisonFilters::default(), &store)
            .unwrap();
        let summary = result.summary[&2026];
        assert_eq!(summary.range, 50.0);
        assert_eq!(summary.range_percentage, 0.0);
    }

    #[test]
    fn test_year_and_dimension_filters() {
        let store = store_with(&[
            (1, 2025, 100.0),
            (2, 2025, 120.0),
            (1, 2026, 110.0),
            (2, 2026, 140.0),
        ]);
        store
            .insert_projection(ORG, draft(1, 2025, DimensionScope::customer(9), 40.0), None)
            .unwrap();

        let aggregator = ComparisonAggregator::new();
        let only_2026 = aggregator
            .compare(ORG, &ids(&[1, 2]), &ComparisonFilters::for_years(2026..=2026), &store)
            .unwrap();
        assert_eq!(only_2026.comparison_data.keys().copied().collect::<Vec<_>>(), vec![2026]);
        assert_eq!(only_2026.summary[&2026].range, 30.0);

        let customer = aggregator
            .compare(
                ORG,
                &ids(&[1, 2]),
                &ComparisonFilters {
                    years: None,
                    dimension: Some(DimensionScope::customer(9)),
                },
                &store,
            )
            .unwrap();
        assert_eq!(customer.comparison_data[&2025].len(), 1);
        assert_eq!(customer.comparison_data[&2025][&ScenarioId(1)], 40.0);
        assert_eq!(customer.summary[&2025].range, 0.0);
    }

    #[test]
    fn test_unknown_scenario() {
        let store = store_with(&[]);
        let result = ComparisonAggregator::new().compare(
            ORG,
            &ids(&[1, 99]),
            &ComparisonFilters::default(),
            &store,
        );
        assert!(matches!(result, Err(ProjectionError::ScenarioNotFound(ScenarioId(99)))));
    }
}
