use crate::error::{ProjectionError, Result};
use crate::schema::{CalculationMethod, DimensionScope, ProjectionId, ScenarioId};
use crate::seasonality::MONTHS;
use crate::utils::{round_money, within_tolerance};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Logical identity of a projection. At most one non-deleted projection
/// exists per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectionKey {
    pub scenario_id: ScenarioId,
    pub year: i32,
    pub dimension: DimensionScope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionDetail {
    pub month: u32,
    pub subtotal: f64,
    pub tax: f64,
    pub amount: f64,
    pub base_amount: f64,
    pub seasonality_factor: f64,
}

/// A computed projection that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionDraft {
    pub key: ProjectionKey,
    pub base_amount: f64,
    pub total_subtotal: f64,
    pub total_tax: f64,
    pub total_amount: f64,
    pub growth_applied: f64,
    pub inflation_applied: f64,
    pub calculation_method: CalculationMethod,
    pub details: Vec<ProjectionDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub id: ProjectionId,
    pub scenario_id: ScenarioId,
    pub year: i32,
    pub dimension: DimensionScope,
    pub base_amount: f64,
    pub total_subtotal: f64,
    pub total_tax: f64,
    pub total_amount: f64,
    pub growth_applied: f64,
    pub inflation_applied: f64,
    pub calculation_method: CalculationMethod,
    pub calculated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub details: Vec<ProjectionDetail>,
}

impl Projection {
    pub fn from_draft(id: ProjectionId, draft: ProjectionDraft, calculated_at: DateTime<Utc>) -> Self {
        Self {
            id,
            scenario_id: draft.key.scenario_id,
            year: draft.key.year,
            dimension: draft.key.dimension,
            base_amount: draft.base_amount,
            total_subtotal: draft.total_subtotal,
            total_tax: draft.total_tax,
            total_amount: draft.total_amount,
            growth_applied: draft.growth_applied,
            inflation_applied: draft.inflation_applied,
            calculation_method: draft.calculation_method,
            calculated_at,
            deleted_at: None,
            details: draft.details,
        }
    }

    pub fn key(&self) -> ProjectionKey {
        ProjectionKey {
            scenario_id: self.scenario_id,
            year: self.year,
            dimension: self.dimension,
        }
    }

    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    pub fn validate(&self, tolerance: f64) -> Result<()> {
        verify_projection(
            self.total_subtotal,
            self.total_tax,
            self.total_amount,
            &self.details,
            tolerance,
        )
    }
}

impl ProjectionDraft {
    pub fn validate(&self, tolerance: f64) -> Result<()> {
        verify_projection(
            self.total_subtotal,
            self.total_tax,
            self.total_amount,
            &self.details,
            tolerance,
        )
    }
}

/// `total == round(subtotal + tax, 2)` within `tolerance`.
pub fn verify_totals(
    context: &str,
    subtotal: f64,
    tax: f64,
    total: f64,
    tolerance: f64,
) -> Result<()> {
    let expected = round_money(subtotal + tax);
    if !within_tolerance(expected, total, tolerance) {
        return Err(ProjectionError::validation(context, expected, total));
    }
    Ok(())
}

fn verify_projection(
    total_subtotal: f64,
    total_tax: f64,
    total_amount: f64,
    details: &[ProjectionDetail],
    tolerance: f64,
) -> Result<()> {
    verify_totals(
        "projection total_amount",
        total_subtotal,
        total_tax,
        total_amount,
        tolerance,
    )?;

    if details.is_empty() {
        return Ok(());
    }

    let mut seen = [false; MONTHS];
    for detail in details {
        let idx = detail.month as usize;
        if !(1..=MONTHS).contains(&idx) || seen[idx - 1] {
            return Err(ProjectionError::Validation {
                context: format!("detail month {} is out of range or repeated", detail.month),
                expected: MONTHS as f64,
                actual: details.len() as f64,
            });
        }
        seen[idx - 1] = true;

        verify_totals(
            &format!("month {} amount", detail.month),
            detail.subtotal,
            detail.tax,
            detail.amount,
            tolerance,
        )?;
    }

    if details.len() != MONTHS {
        return Err(ProjectionError::validation(
            "number of monthly details",
            MONTHS as f64,
            details.len() as f64,
        ));
    }

    let monthly_sum: f64 = details.iter().map(|d| d.amount).sum();
    if !within_tolerance(total_amount, monthly_sum, tolerance) {
        return Err(ProjectionError::validation(
            "sum of monthly amounts",
            total_amount,
            monthly_sum,
        ));
    }

    Ok(())
}
