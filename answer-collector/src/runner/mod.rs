//! Collection engine

pub mod executor;
pub mod rate_limiter;
pub mod summary;

pub use executor::{
    select_models, Collector, CollectorConfig, CollectorError, LogProgress, NoOpProgress,
    PairReport, ProgressCallback,
};
pub use rate_limiter::{AdmissionPermit, GovernorClosed, GovernorConfig, RateGovernor};
pub use summary::{ModelSummary, PairOutcome, RunSummary};
