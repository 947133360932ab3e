use crate::error::{ProjectionError, Result};
use crate::utils::round_money;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How projected totals are split into subtotal and tax.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum TaxPolicy {
    /// Tax keeps the same share of the total it had in the history window.
    #[default]
    HistoricalShare,
    /// Totals are tax-inclusive at a fixed rate: `tax = total * r / (100 + r)`.
    FixedRate { rate_pct: f64 },
}

impl TaxPolicy {
    /// Share of a tax-inclusive total that is tax. `historical_share` is only
    /// consulted for [`TaxPolicy::HistoricalShare`].
    pub fn tax_share(&self, historical_share: f64) -> f64 {
        match self {
            TaxPolicy::HistoricalShare => historical_share,
            TaxPolicy::FixedRate { rate_pct } => rate_pct / (100.0 + rate_pct),
        }
    }

    /// Splits a rounded total into `(subtotal, tax)` so that the two add back
    /// to the total exactly.
    pub fn split(total: f64, share: f64) -> (f64, f64) {
        let tax = round_money(total * share);
        (round_money(total - tax), tax)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Absolute tolerance for the total and monthly-sum invariants.
    pub tolerance: f64,
    pub tax_policy: TaxPolicy,
    /// Upper bound on dimension slices in a single scenario run.
    pub max_slices_per_run: usize,
    pub parallel_slices: bool,
    /// Whether a scenario run always includes the global slice.
    pub include_global_slice: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.01,
            tax_policy: TaxPolicy::default(),
            max_slices_per_run: 500,
            parallel_slices: true,
            include_global_slice: true,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(ProjectionError::Config(format!(
                "tolerance must be a positive number, got {}",
                self.tolerance
            )));
        }

        if self.max_slices_per_run == 0 {
            return Err(ProjectionError::Config(
                "max_slices_per_run must be at least 1".to_string(),
            ));
        }

        if let TaxPolicy::FixedRate { rate_pct } = self.tax_policy {
            if !rate_pct.is_finite() || rate_pct < 0.0 {
                return Err(ProjectionError::Config(format!(
                    "fixed tax rate must be non-negative, got {}",
                    rate_pct
                )));
            }
        }

        Ok(())
    }
}
