//! Turns validated invoices into a base figure for one dimension slice.

use crate::error::{ProjectionError, Result};
use crate::schema::{
    CalculationMethod, CustomerId, CustomerProfile, DimensionScope, InvoiceRecord, OrganizationId,
};
use crate::utils::{month_ordinal, trailing_window};
use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Read access to the output of the invoice import pipeline.
pub trait InvoiceSource {
    /// Invoices dated within `start..=end`.
    fn invoices_between(
        &self,
        organization_id: OrganizationId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<InvoiceRecord>>;

    fn customer_profile(
        &self,
        organization_id: OrganizationId,
        customer_id: CustomerId,
    ) -> Result<Option<CustomerProfile>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalSummary {
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    /// One entry per month in the window, oldest first, zero-filled.
    pub monthly_totals: Vec<f64>,
    pub invoice_count: usize,
    pub subtotal: f64,
    pub tax: f64,
    pub total: f64,
}

impl HistoricalSummary {
    /// Fraction of invoiced totals that was tax.
    pub fn tax_share(&self) -> f64 {
        if self.total.abs() > f64::EPSILON {
            self.tax / self.total
        } else {
            0.0
        }
    }
}

pub struct HistoricalDataAnalyzer<'a, S: ?Sized> {
    source: &'a S,
}

impl<'a, S> HistoricalDataAnalyzer<'a, S>
where
    S: InvoiceSource + ?Sized,
{
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    pub fn base_amount(
        &self,
        organization_id: OrganizationId,
        dimension: &DimensionScope,
        base_year: i32,
        historical_months: u32,
        method: CalculationMethod,
    ) -> Result<f64> {
        let summary =
            self.historical_summary(organization_id, dimension, base_year, historical_months)?;
        Ok(aggregate_monthly(&summary.monthly_totals, method))
    }

    /// Collects the zero-filled monthly series for `dimension` over the
    /// `historical_months` ending December of `base_year`. Fails when the
    /// window holds no invoices at all, so a data gap never masquerades as
    /// a genuine zero-revenue period.
    pub fn historical_summary(
        &self,
        organization_id: OrganizationId,
        dimension: &DimensionScope,
        base_year: i32,
        historical_months: u32,
    ) -> Result<HistoricalSummary> {
        let months = historical_months.max(1);
        let (window_start, window_end) = trailing_window(base_year, months);
        let invoices = self
            .source
            .invoices_between(organization_id, window_start, window_end)?;

        let first_ordinal = month_ordinal(window_start);
        let mut monthly_totals = vec![0.0; months as usize];
        let mut profiles: HashMap<CustomerId, Option<CustomerProfile>> = HashMap::new();
        let mut summary = HistoricalSummary {
            window_start,
            window_end,
            monthly_totals: Vec::new(),
            invoice_count: 0,
            subtotal: 0.0,
            tax: 0.0,
            total: 0.0,
        };

        for invoice in &invoices {
            if invoice.invoice_date < window_start || invoice.invoice_date > window_end {
                continue;
            }

            let profile = match profiles.get(&invoice.customer_id) {
                Some(cached) => cached.clone(),
                None => {
                    let loaded = self
                        .source
                        .customer_profile(organization_id, invoice.customer_id)?;
                    profiles.insert(invoice.customer_id, loaded.clone());
                    loaded
                }
            };

            let invoice_dimension = match profile {
                Some(profile) => profile.dimension(invoice.product_id),
                None => DimensionScope {
                    customer_id: Some(invoice.customer_id),
                    product_id: invoice.product_id,
                    ..DimensionScope::default()
                },
            };

            if !dimension.matches(&invoice_dimension) {
                continue;
            }

            let idx = (month_ordinal(invoice.invoice_date) - first_ordinal) as usize;
            monthly_totals[idx] += invoice.total;
            summary.invoice_count += 1;
            summary.subtotal += invoice.subtotal;
            summary.tax += invoice.tax;
            summary.total += invoice.total;
        }

        if summary.invoice_count == 0 {
            return Err(ProjectionError::InsufficientHistoricalData {
                dimension: *dimension,
                base_year,
                months,
            });
        }

        debug!(
            "Collected {} invoices for {} between {} and {}",
            summary.invoice_count, dimension, window_start, window_end
        );

        summary.monthly_totals = monthly_totals;
        Ok(summary)
    }
}

pub fn aggregate_monthly(series: &[f64], method: CalculationMethod) -> f64 {
    match method {
        CalculationMethod::SimpleAverage => simple_average(series),
        CalculationMethod::WeightedAverage => weighted_average(series),
        CalculationMethod::Trend => linear_trend_forecast(series),
    }
}

pub fn simple_average(series: &[f64]) -> f64 {
    if series.is_empty() {
        return 0.0;
    }
    series.iter().sum::<f64>() / series.len() as f64
}

/// Weights 1, 2, ..., n from oldest to newest, normalised to sum to 1.
pub fn weighted_average(series: &[f64]) -> f64 {
    let n = series.len();
    if n == 0 {
        return 0.0;
    }
    let weight_sum = (n * (n + 1)) as f64 / 2.0;
    series
        .iter()
        .enumerate()
        .map(|(i, value)| value * (i + 1) as f64 / weight_sum)
        .sum()
}

/// Ordinary least squares over `x = 0..n`, evaluated at `x = n`. Floored at
/// zero since a negative revenue base has no meaning.
pub fn linear_trend_forecast(series: &[f64]) -> f64 {
    let n = series.len();
    if n == 0 {
        return 0.0;
    }

    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = simple_average(series);

    let (mut covariance, mut variance) = (0.0, 0.0);
    for (i, y) in series.iter().enumerate() {
        let dx = i as f64 - x_mean;
        covariance += dx * (y - y_mean);
        variance += dx * dx;
    }

    let slope = if variance > 0.0 { covariance / variance } else { 0.0 };
    let forecast = y_mean + slope * (n as f64 - x_mean);
    forecast.max(0.0)
}
