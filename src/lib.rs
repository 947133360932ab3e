//! # Revenue Projections
//!
//! A library for projecting future revenue from historical invoices under
//! scenario-specific assumptions, persisting the resulting projections and
//! comparing scenarios side by side.
//!
//! ## Core Concepts
//!
//! - **Scenario**: A named what-if plan with a base year, a history window and
//!   a number of projected years
//! - **Assumption**: Growth/inflation rates or a fixed amount for one scenario
//!   year, scoped to a dimension (customer, business group, customer type,
//!   product or global). The most specific matching scope wins
//! - **Projection**: An annual total with twelve monthly details, split into
//!   subtotal and tax, keyed by (scenario, year, dimension)
//! - **Invalidation**: Updating or deleting an assumption soft-deletes every
//!   active projection of its scenario in the same transaction
//!
//! ## Example
//!
//! ```rust,ignore
//! use revenue_projections::*;
//!
//! let store = InMemoryStore::new();
//! store.upsert_scenario(scenario)?;
//! store.add_invoices(org, invoices)?;
//! store.create_assumption(org, assumption)?;
//!
//! let engine = ProjectionEngine::new(store, EngineConfig::default())?;
//! let report = engine.calculate_scenario(org, scenario_id)?;
//! for failure in &report.failed {
//!     println!("{} failed: {}", failure.dimension, failure.reason);
//! }
//!
//! let comparison = ComparisonAggregator::new().compare(
//!     org,
//!     &[baseline_id, scenario_id],
//!     &ComparisonFilters::default(),
//!     engine.store(),
//! )?;
//! ```

pub mod calculator;
pub mod comparison;
pub mod config;
pub mod engine;
pub mod error;
pub mod historical;
pub mod invalidation;
pub mod projection;
pub mod resolver;
pub mod schema;
pub mod seasonality;
pub mod store;
pub mod utils;

pub use calculator::{
    apply_adjustment, apply_growth_and_inflation, calculate_monthly_distribution,
    calculate_monthly_distribution_from_slice, AdjustedTotal, ProjectionCalculator,
};
pub use comparison::{ComparisonAggregator, ComparisonFilters, ScenarioComparison, YearSummary};
pub use config::{EngineConfig, TaxPolicy};
pub use engine::{CalculationReport, ProjectionEngine, SliceFailure};
pub use error::{ProjectionError, Result};
pub use historical::{HistoricalDataAnalyzer, HistoricalSummary, InvoiceSource};
pub use invalidation::{
    AssumptionChange, AssumptionChangeStore, InvalidationReport, InvalidationTracker,
};
pub use projection::{Projection, ProjectionDetail, ProjectionDraft, ProjectionKey};
pub use resolver::{select_assumption, AssumptionResolver, ScopeLevel, SCOPE_PRECEDENCE};
pub use schema::*;
pub use seasonality::{SeasonalityFactors, SeasonalityIssue};
pub use store::{AssumptionStore, InMemoryStore, ProjectionStore, ScenarioStore};
pub use utils::round_money;
