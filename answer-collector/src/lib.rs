//! Resilient answer collection across LLM providers
//!
//! Sends every question of a question set to every configured model exactly
//! once and keeps the raw replies in a crash-safe answer store. Runs can be
//! interrupted at any point; the next run picks up the pairs still missing.
//!
//! # Features
//!
//! - OpenAI-compatible (OpenAI, DeepSeek, Together), Anthropic and Google clients
//! - Per-provider rate governor with in-flight cap, spacing and backoff
//! - One durable record per (question, model) pair, first commit wins
//! - Per-model, per-error-class run summary
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use answer_collector::{
//!     config::Config,
//!     providers::ProviderRegistry,
//!     questions::load_questions_from_file,
//!     runner::{select_models, Collector},
//!     store::FileAnswerStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_or_default()?;
//!     let questions = load_questions_from_file("questions.jsonl")?;
//!     let store = Arc::new(FileAnswerStore::open(&config.store.path)?);
//!
//!     let registry = ProviderRegistry::from_config(&config);
//!     let collector = Collector::from_config(&config, &registry, store);
//!
//!     let summary = collector.run(&questions, &select_models(&config, None)?).await?;
//!     println!("committed {}", summary.committed());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod providers;
pub mod questions;
pub mod reporting;
pub mod runner;
pub mod store;

pub use config::Config;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::config::{CollectorSettings, Config, ModelConfig, ProviderConfig, ProviderKind};
    pub use crate::providers::{
        Completion, ErrorClass, LLMProvider, ProviderError, ProviderRegistry, ProviderResult,
        SharedProvider,
    };
    pub use crate::questions::{load_questions_from_file, Question, QuestionSet};
    pub use crate::reporting::{print_console_report, JsonSummary};
    pub use crate::runner::{
        Collector, CollectorConfig, GovernorConfig, PairOutcome, RateGovernor, RunSummary,
    };
    pub use crate::store::{
        Answer, AnswerStore, CommitOutcome, FailureLog, FileAnswerStore, PairKey, StoreError,
    };
}
