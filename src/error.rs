use crate::schema::{AssumptionId, DimensionScope, ProjectionId, ScenarioId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProjectionError {
    #[error("Validation failed for {context}: expected {expected:.2}, got {actual:.2}")]
    Validation {
        context: String,
        expected: f64,
        actual: f64,
    },

    #[error("No invoice data for {dimension} in the {months} months ending {base_year}")]
    InsufficientHistoricalData {
        dimension: DimensionScope,
        base_year: i32,
        months: u32,
    },

    #[error("No assumption applies to scenario {scenario_id}, year {year}, {dimension}")]
    NoApplicableAssumption {
        scenario_id: ScenarioId,
        year: i32,
        dimension: DimensionScope,
    },

    #[error("Scenario {0} is already being recalculated")]
    RecalculationInProgress(ScenarioId),

    #[error("Assumptions of scenario {scenario_id} changed during calculation (generation {expected}, now {current})")]
    AssumptionsChanged {
        scenario_id: ScenarioId,
        expected: u64,
        current: u64,
    },

    #[error("Comparison needs between 2 and 4 scenarios, got {count}")]
    InvalidComparisonCardinality { count: usize },

    #[error("Scenario {0} is listed more than once in the comparison")]
    DuplicateComparisonScenario(ScenarioId),

    #[error("Scenario {0} not found")]
    ScenarioNotFound(ScenarioId),

    #[error("Projection {0} not found")]
    ProjectionNotFound(ProjectionId),

    #[error("Assumption {0} not found")]
    AssumptionNotFound(AssumptionId),

    #[error("Scenario {0} is archived")]
    ScenarioArchived(ScenarioId),

    #[error("Invalid scenario {scenario_id}: {details}")]
    InvalidScenario {
        scenario_id: ScenarioId,
        details: String,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Scenario {scenario_id} has {count} dimension slices, limit is {limit}")]
    TooManySlices {
        scenario_id: ScenarioId,
        count: usize,
        limit: usize,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProjectionError {
    pub(crate) fn validation(context: impl Into<String>, expected: f64, actual: f64) -> Self {
        Self::Validation {
            context: context.into(),
            expected,
            actual,
        }
    }

    /// Errors that only affect one dimension slice of a scenario run. These are
    /// collected into the run report instead of aborting the whole calculation.
    pub fn is_slice_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InsufficientHistoricalData { .. }
                | Self::NoApplicableAssumption { .. }
                | Self::Validation { .. }
                | Self::Conflict(_)
                | Self::AssumptionsChanged { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ProjectionError>;
