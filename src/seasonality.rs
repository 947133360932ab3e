use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MONTHS: usize = 12;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SeasonalityIssue {
    #[error("expected 12 factors, got {0}")]
    WrongLength(usize),

    #[error("factor for month {month} is {value}, factors must be finite and non-negative")]
    InvalidFactor { month: usize, value: f64 },

    #[error("factors sum to zero")]
    ZeroSum,
}

/// Twelve monthly weights, validated once when constructed.
///
/// Construction never fails: anything that is not twelve finite, non-negative
/// numbers with a positive sum becomes the uniform profile. Downstream code
/// can therefore rely on `normalized()` summing to 12.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<f64>", into = "Vec<f64>")]
pub struct SeasonalityFactors {
    factors: [f64; MONTHS],
}

impl SeasonalityFactors {
    pub fn uniform() -> Self {
        Self {
            factors: [1.0; MONTHS],
        }
    }

    pub fn from_slice(values: &[f64]) -> Self {
        match validate_factors(values) {
            Ok(factors) => Self { factors },
            Err(issue) => {
                debug!("Seasonality factors rejected ({}), using uniform distribution", issue);
                Self::uniform()
            }
        }
    }

    /// Strict constructor for callers that want to report bad input themselves.
    pub fn try_from_slice(values: &[f64]) -> Result<Self, SeasonalityIssue> {
        validate_factors(values).map(|factors| Self { factors })
    }

    pub fn raw(&self) -> &[f64; MONTHS] {
        &self.factors
    }

    pub fn is_uniform(&self) -> bool {
        let first = self.factors[0];
        self.factors.iter().all(|f| (f - first).abs() < f64::EPSILON)
    }

    /// Factors rescaled so that they sum to exactly 12.
    pub fn normalized(&self) -> [f64; MONTHS] {
        let sum: f64 = self.factors.iter().sum();
        let scale = sum / MONTHS as f64;
        let mut normalized = [1.0; MONTHS];
        for (slot, factor) in normalized.iter_mut().zip(self.factors.iter()) {
            *slot = factor / scale;
        }
        normalized
    }
}

impl Default for SeasonalityFactors {
    fn default() -> Self {
        Self::uniform()
    }
}

impl From<Vec<f64>> for SeasonalityFactors {
    fn from(values: Vec<f64>) -> Self {
        Self::from_slice(&values)
    }
}

impl From<SeasonalityFactors> for Vec<f64> {
    fn from(factors: SeasonalityFactors) -> Self {
        factors.factors.to_vec()
    }
}

fn validate_factors(values: &[f64]) -> Result<[f64; MONTHS], SeasonalityIssue> {
    if values.len() != MONTHS {
        return Err(SeasonalityIssue::WrongLength(values.len()));
    }

    if let Some((idx, &value)) = values
        .iter()
        .enumerate()
        .find(|(_, v)| !v.is_finite() || **v < 0.0)
    {
        return Err(SeasonalityIssue::InvalidFactor {
            month: idx + 1,
            value,
        });
    }

    let sum: f64 = values.iter().sum();
    if sum <= 0.0 {
        return Err(SeasonalityIssue::ZeroSum);
    }

    let mut factors = [0.0; MONTHS];
    factors.copy_from_slice(values);
    Ok(factors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_profile() {
        let factors = SeasonalityFactors::uniform();
        assert!(factors.is_uniform());
        let sum: f64 = factors.normalized().iter().sum();
        assert!((sum - 12.0).abs() < 1e-10);
    }

    #[test]
    fn test_normalization_sums_to_twelve() {
        let factors = SeasonalityFactors::from_slice(&[
            0.045, 0.045, 0.045, 0.055, 0.055, 0.060, 0.065, 0.070, 0.075, 0.080, 0.105, 0.300,
        ]);
        assert!(!factors.is_uniform());
        let normalized = factors.normalized();
        let sum: f64 = normalized.iter().sum();
        assert!((sum - 12.0).abs() < 1e-10);
        assert!((normalized[11] - 3.6).abs() < 1e-10);
    }

    #[test]
    fn test_invalid_length_falls_back() {
        assert_eq!(
            SeasonalityFactors::from_slice(&[1.0, 1.0]),
            SeasonalityFactors::uniform()
        );
        assert_eq!(
            SeasonalityFactors::try_from_slice(&[1.0, 1.0]),
            Err(SeasonalityIssue::WrongLength(2))
        );
    }

    #[test]
    fn test_all_zero_falls_back() {
        assert_eq!(
            SeasonalityFactors::from_slice(&[0.0; 12]),
            SeasonalityFactors::uniform()
        );
        assert_eq!(
            SeasonalityFactors::try_from_slice(&[0.0; 12]),
            Err(SeasonalityIssue::ZeroSum)
        );
    }

    #[test]
    fn test_negative_or_nan_falls_back() {
        let mut values = [1.0; 12];
        values[3] = -1.0;
        assert!(SeasonalityFactors::from_slice(&values).is_uniform());

        values[3] = f64::NAN;
        assert!(matches!(
            SeasonalityFactors::try_from_slice(&values),
            Err(SeasonalityIssue::InvalidFactor { month: 4, .. })
        ));
    }

    #[test]
    fn test_serde_roundtrip_goes_through_validation() {
        let parsed: SeasonalityFactors = serde_json::from_str("[2.0, 2.0]").unwrap();
        assert!(parsed.is_uniform());

        let json = serde_json::to_string(&SeasonalityFactors::uniform()).unwrap();
        assert_eq!(json, "[1.0,1.0,1.0,1.0,1.0,1.0,1.0,1.0,1.0,1.0,1.0,1.0]");
    }
}
