use crate::error::{ProjectionError, Result};
use crate::seasonality::SeasonalityFactors;
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($($name:ident),+ $(,)?) => {
        $(
            #[derive(
                Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
                JsonSchema,
            )]
            #[serde(transparent)]
            pub struct $name(pub u64);

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }
        )+
    };
}

id_type!(
    OrganizationId,
    ScenarioId,
    AssumptionId,
    ProjectionId,
    BusinessGroupId,
    CustomerTypeId,
    CustomerId,
    ProductId,
);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CalculationMethod {
    #[schemars(description = "Arithmetic mean of the monthly invoice totals in the window.")]
    SimpleAverage,

    #[schemars(
        description = "Mean weighted by ascending linear weights, the most recent month weighted highest."
    )]
    WeightedAverage,

    #[schemars(
        description = "Least-squares linear fit over the monthly series, extrapolated one month forward."
    )]
    Trend,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    #[default]
    Draft,
    Active,
    Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct Scenario {
    pub id: ScenarioId,
    pub organization_id: OrganizationId,
    pub name: String,

    #[schemars(description = "Last year with actual invoice data. Projections start the year after.")]
    pub base_year: i32,

    #[schemars(description = "Length of the trailing history window in months (1 to 120).")]
    pub historical_months: u32,

    #[schemars(description = "Number of years projected after the base year (1 to 10).")]
    pub projection_years: u32,

    pub calculation_method: CalculationMethod,

    #[schemars(description = "Whether percentage assumptions also apply their inflation rate.")]
    pub include_inflation: bool,

    #[serde(default)]
    pub is_baseline: bool,

    #[serde(default)]
    pub status: ScenarioStatus,
}

impl Scenario {
    pub const MAX_HISTORICAL_MONTHS: u32 = 120;
    pub const MAX_PROJECTION_YEARS: u32 = 10;

    pub fn projection_year_range(&self) -> std::ops::RangeInclusive<i32> {
        (self.base_year + 1)..=(self.base_year + self.projection_years as i32)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=Self::MAX_HISTORICAL_MONTHS).contains(&self.historical_months) {
            return Err(ProjectionError::InvalidScenario {
                scenario_id: self.id,
                details: format!(
                    "historical_months must be between 1 and {}, got {}",
                    Self::MAX_HISTORICAL_MONTHS,
                    self.historical_months
                ),
            });
        }

        if !(1..=Self::MAX_PROJECTION_YEARS).contains(&self.projection_years) {
            return Err(ProjectionError::InvalidScenario {
                scenario_id: self.id,
                details: format!(
                    "projection_years must be between 1 and {}, got {}",
                    Self::MAX_PROJECTION_YEARS,
                    self.projection_years
                ),
            });
        }

        Ok(())
    }

    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&schemars::schema_for!(Scenario))
    }
}

/// The (business group, customer type, customer, product) slice an assumption
/// or projection applies to. Unset fields mean "any value on that axis".
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
    JsonSchema,
)]
pub struct DimensionScope {
    #[serde(default)]
    pub business_group_id: Option<BusinessGroupId>,
    #[serde(default)]
    pub customer_type_id: Option<CustomerTypeId>,
    #[serde(default)]
    pub customer_id: Option<CustomerId>,
    #[serde(default)]
    pub product_id: Option<ProductId>,
}

impl DimensionScope {
    pub fn global() -> Self {
        Self::default()
    }

    pub fn customer(id: u64) -> Self {
        Self {
            customer_id: Some(CustomerId(id)),
            ..Self::default()
        }
    }

    pub fn business_group(id: u64) -> Self {
        Self {
            business_group_id: Some(BusinessGroupId(id)),
            ..Self::default()
        }
    }

    pub fn customer_type(id: u64) -> Self {
        Self {
            customer_type_id: Some(CustomerTypeId(id)),
            ..Self::default()
        }
    }

    pub fn product(id: u64) -> Self {
        Self {
            product_id: Some(ProductId(id)),
            ..Self::default()
        }
    }

    pub fn is_global(&self) -> bool {
        *self == Self::global()
    }

    /// True when every field set on `self` equals the same field on `target`.
    pub fn matches(&self, target: &DimensionScope) -> bool {
        fn axis<T: PartialEq>(own: &Option<T>, target: &Option<T>) -> bool {
            match own {
                None => true,
                Some(value) => target.as_ref() == Some(value),
            }
        }

        axis(&self.business_group_id, &target.business_group_id)
            && axis(&self.customer_type_id, &target.customer_type_id)
            && axis(&self.customer_id, &target.customer_id)
            && axis(&self.product_id, &target.product_id)
    }
}

impl fmt::Display for DimensionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_global() {
            return write!(f, "global scope");
        }

        let mut parts = Vec::new();
        if let Some(id) = self.business_group_id {
            parts.push(format!("business_group={}", id));
        }
        if let Some(id) = self.customer_type_id {
            parts.push(format!("customer_type={}", id));
        }
        if let Some(id) = self.customer_id {
            parts.push(format!("customer={}", id));
        }
        if let Some(id) = self.product_id {
            parts.push(format!("product={}", id));
        }
        write!(f, "scope [{}]", parts.join(", "))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(tag = "adjustment_type", rename_all = "snake_case")]
pub enum Adjustment {
    #[schemars(
        description = "Grow the base by growth_rate percent, then (if the scenario includes inflation) by inflation_rate percent."
    )]
    Percentage {
        #[serde(default)]
        growth_rate: f64,
        #[serde(default)]
        inflation_rate: f64,
    },

    #[schemars(description = "Add a fixed amount to the base. Growth and inflation are not applied.")]
    FixedAmount { fixed_amount: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct ScenarioAssumption {
    pub id: AssumptionId,
    pub scenario_id: ScenarioId,
    pub year: i32,

    #[serde(default)]
    pub scope: DimensionScope,

    #[serde(flatten)]
    pub adjustment: Adjustment,

    #[serde(default)]
    #[schemars(with = "Option<Vec<f64>>")]
    #[schemars(
        description = "Twelve non-negative monthly weights. Invalid arrays fall back to a uniform distribution."
    )]
    pub seasonality_factors: Option<SeasonalityFactors>,
}

impl ScenarioAssumption {
    pub fn schema_as_json() -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&schemars::schema_for!(ScenarioAssumption))
    }
}

/// A validated invoice produced by the import pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct InvoiceRecord {
    pub customer_id: CustomerId,
    pub invoice_date: NaiveDate,
    pub subtotal: f64,
    pub tax: f64,
    pub total: f64,
    #[serde(default)]
    pub product_id: Option<ProductId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct CustomerProfile {
    pub customer_id: CustomerId,
    #[serde(default)]
    pub business_group_id: Option<BusinessGroupId>,
    #[serde(default)]
    pub customer_type_id: Option<CustomerTypeId>,
}

impl CustomerProfile {
    /// The dimension tuple an invoice of this customer falls into.
    pub fn dimension(&self, product_id: Option<ProductId>) -> DimensionScope {
        DimensionScope {
            business_group_id: self.business_group_id,
            customer_type_id: self.customer_type_id,
            customer_id: Some(self.customer_id),
            product_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario() -> Scenario {
        Scenario {
            id: ScenarioId(1),
            organization_id: OrganizationId(1),
            name: "Plan".to_string(),
            base_year: 2024,
            historical_months: 12,
            projection_years: 3,
            calculation_method: CalculationMethod::SimpleAverage,
            include_inflation: true,
            is_baseline: true,
            status: ScenarioStatus::Active,
        }
    }

    #[test]
    fn test_projection_year_range() {
        let years: Vec<i32> = scenario().projection_year_range().collect();
        assert_eq!(years, vec![2025, 2026, 2027]);
    }

    #[test]
    fn test_scenario_validation() {
        assert!(scenario().validate().is_ok());

        let mut bad = scenario();
        bad.historical_months = 0;
        assert!(bad.validate().is_err());

        let mut bad = scenario();
        bad.projection_years = 11;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_scope_matching() {
        let target = DimensionScope {
            business_group_id: Some(BusinessGroupId(3)),
            customer_type_id: Some(CustomerTypeId(2)),
            customer_id: Some(CustomerId(10)),
            product_id: None,
        };

        assert!(DimensionScope::global().matches(&target));
        assert!(DimensionScope::customer(10).matches(&target));
        assert!(DimensionScope::business_group(3).matches(&target));
        assert!(!DimensionScope::customer(11).matches(&target));
        assert!(!DimensionScope::product(1).matches(&target));
    }

    #[test]
    fn test_assumption_json_shape() {
        let json = r#"{
            "id": 7,
            "scenario_id": 1,
            "year": 2025,
            "scope": { "customer_id": 42 },
            "adjustment_type": "percentage",
            "growth_rate": 10.0,
            "inflation_rate": 2.5,
            "seasonality_factors": [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 2.0]
        }"#;

        let assumption: ScenarioAssumption = serde_json::from_str(json).unwrap();
        assert_eq!(assumption.scope, DimensionScope::customer(42));
        assert_eq!(
            assumption.adjustment,
            Adjustment::Percentage {
                growth_rate: 10.0,
                inflation_rate: 2.5
            }
        );
        assert!(assumption.seasonality_factors.is_some());

        let fixed = r#"{
            "id": 8,
            "scenario_id": 1,
            "year": 2025,
            "adjustment_type": "fixed_amount",
            "fixed_amount": 500.0
        }"#;
        let assumption: ScenarioAssumption = serde_json::from_str(fixed).unwrap();
        assert!(assumption.scope.is_global());
        assert_eq!(
            assumption.adjustment,
            Adjustment::FixedAmount {
                fixed_amount: 500.0
            }
        );
    }

    #[test]
    fn test_schema_generation() {
        let schema_json = ScenarioAssumption::schema_as_json().unwrap();
        assert!(schema_json.contains("seasonality_factors"));
        assert!(schema_json.contains("adjustment_type"));

        let schema_json = Scenario::schema_as_json().unwrap();
        assert!(schema_json.contains("historical_months"));
    }

    #[test]
    fn test_scope_display() {
        assert_eq!(DimensionScope::global().to_string(), "global scope");
        assert_eq!(
            DimensionScope::customer(5).to_string(),
            "scope [customer=5]"
        );
    }
}
