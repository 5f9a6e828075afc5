//! Per-pair outcomes and the per-model run summary built from them

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::providers::ErrorClass;

/// Final state of one (question, model) pair within a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairOutcome {
    /// Answer received and durably written
    Committed,
    /// Answer received but another record for the pair won
    Duplicate,
    /// Already answered before the run; no request was made
    Skipped,
    /// Gave up on the pair
    Failed {
        class: ErrorClass,
        message: String,
        attempts: u32,
    },
    /// Answer received but could not be written; the pair stays pending
    StoreFailed(String),
    /// Never completed because its provider was stopped or the run interrupted
    Aborted,
}

impl PairOutcome {
    pub fn is_done(&self) -> bool {
        matches!(
            self,
            PairOutcome::Committed | PairOutcome::Duplicate | PairOutcome::Skipped
        )
    }
}

/// Counts for one model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub provider: String,
    pub committed: usize,
    pub skipped: usize,
    pub duplicates: usize,
    /// Terminal failures by error class
    pub failed: BTreeMap<ErrorClass, usize>,
    pub store_errors: usize,
    pub aborted: usize,
    /// Set when the model's provider could not be used at all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unavailable: Option<String>,
}

impl ModelSummary {
    pub fn failed_total(&self) -> usize {
        self.failed.values().sum()
    }

    pub fn total(&self) -> usize {
        self.committed
            + self.skipped
            + self.duplicates
            + self.failed_total()
            + self.store_errors
            + self.aborted
    }

    pub fn is_clean(&self) -> bool {
        self.unavailable.is_none()
            && self.failed_total() == 0
            && self.store_errors == 0
            && self.aborted == 0
    }

    pub fn record(&mut self, outcome: &PairOutcome) {
        match outcome {
            PairOutcome::Committed => self.committed += 1,
            PairOutcome::Duplicate => self.duplicates += 1,
            PairOutcome::Skipped => self.skipped += 1,
            PairOutcome::Failed { class, .. } => *self.failed.entry(*class).or_insert(0) += 1,
            PairOutcome::StoreFailed(_) => self.store_errors += 1,
            PairOutcome::Aborted => self.aborted += 1,
        }
    }
}

/// Outcome of one collector run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub questions: usize,
    /// Set when the run was cancelled before every pair finished
    #[serde(default)]
    pub interrupted: bool,
    /// Pair tasks that died without reporting an outcome
    #[serde(default)]
    pub lost_tasks: usize,
    pub models: IndexMap<String, ModelSummary>,
}

impl RunSummary {
    pub fn new(questions: usize) -> Self {
        let started_at = Utc::now();
        Self {
            run_id: started_at.format("%Y%m%d-%H%M%S").to_string(),
            started_at,
            finished_at: None,
            questions,
            interrupted: false,
            lost_tasks: 0,
            models: IndexMap::new(),
        }
    }

    /// Summary entry for a model, created on first use
    pub fn model_mut(&mut self, model_id: &str, provider: &str) -> &mut ModelSummary {
        self.models
            .entry(model_id.to_string())
            .or_insert_with(|| ModelSummary {
                provider: provider.to_string(),
                ..ModelSummary::default()
            })
    }

    pub fn model(&self, model_id: &str) -> Option<&ModelSummary> {
        self.models.get(model_id)
    }

    pub fn record(&mut self, model_id: &str, provider: &str, outcome: &PairOutcome) {
        self.model_mut(model_id, provider).record(outcome);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn committed(&self) -> usize {
        self.models.values().map(|m| m.committed).sum()
    }

    pub fn failed(&self) -> usize {
        self.models.values().map(|m| m.failed_total()).sum()
    }

    pub fn aborted(&self) -> usize {
        self.models.values().map(|m| m.aborted).sum()
    }

    /// Failures summed over all models, by class
    pub fn failures_by_class(&self) -> BTreeMap<ErrorClass, usize> {
        let mut totals = BTreeMap::new();
        for model in self.models.values() {
            for (class, count) in &model.failed {
                *totals.entry(*class).or_insert(0) += count;
            }
        }
        totals
    }

    /// True when every pair ended answered
    pub fn is_clean(&self) -> bool {
        !self.interrupted && self.lost_tasks == 0 && self.models.values().all(|m| m.is_clean())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_outcomes() {
        let mut summary = RunSummary::new(3);
        summary.record("mA", "openai", &PairOutcome::Committed);
        summary.record("mA", "openai", &PairOutcome::Skipped);
        summary.record(
            "mA",
            "openai",
            &PairOutcome::Failed {
                class: ErrorClass::Permanent,
                message: "bad request".into(),
                attempts: 1,
            },
        );

        let model = summary.model("mA").unwrap();
        assert_eq!(model.total(), 3);
        assert_eq!(model.failed[&ErrorClass::Permanent], 1);
        assert!(!summary.is_clean());
        assert_eq!(summary.failures_by_class()[&ErrorClass::Permanent], 1);
    }

    #[test]
    fn test_clean_run() {
        let mut summary = RunSummary::new(1);
        summary.record("mA", "openai", &PairOutcome::Committed);
        summary.record("mB", "google", &PairOutcome::Skipped);
        assert!(summary.is_clean());
        assert_eq!(summary.committed(), 1);
        assert_eq!(summary.run_id.len(), "20260101-000000".len());
    }

    #[test]
    fn test_unavailable_model_is_not_clean() {
        let mut summary = RunSummary::new(0);
        summary.model_mut("mA", "together").unavailable = Some("TOGETHER_API_KEY not set".into());
        assert!(!summary.is_clean());
    }

    #[test]
    fn test_summary_json_shape() {
        let mut summary = RunSummary::new(1);
        summary.record(
            "mA",
            "openai",
            &PairOutcome::Failed {
                class: ErrorClass::RateLimited,
                message: "429".into(),
                attempts: 5,
            },
        );
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["models"]["mA"]["failed"]["rate_limited"], 1);
    }
}
