//! Durable answer storage
//!
//! Answers are keyed by (question id, model id). A key is written at most
//! once: the first committed record wins and later writers for the same
//! key are told so instead of overwriting it.

pub mod export;
pub mod failures;
pub mod file_store;

pub use export::{export_answers, progress, ExportFormat, ModelProgress};
pub use failures::{FailureLog, FailureRecord};
pub use file_store::FileAnswerStore;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::providers::Completion;
use crate::questions::Question;

/// Natural key of an answer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    pub question_id: String,
    pub model_id: String,
}

impl PairKey {
    pub fn new(question_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            question_id: question_id.into(),
            model_id: model_id.into(),
        }
    }
}

impl std::fmt::Display for PairKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.question_id, self.model_id)
    }
}

/// One model's raw reply to one question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub question_id: String,
    pub model_id: String,
    pub provider: String,
    /// Prompt exactly as it was sent
    pub question: String,
    /// Reply text, uncleaned
    pub raw_text: String,
    pub answered_at: DateTime<Utc>,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
}

impl Answer {
    /// Build an answer from a successful provider call
    pub fn from_completion(
        question: &Question,
        model_id: &str,
        provider: &str,
        completion: Completion,
    ) -> Self {
        Self {
            question_id: question.id.clone(),
            model_id: model_id.to_string(),
            provider: provider.to_string(),
            question: question.text.clone(),
            raw_text: completion.text,
            answered_at: Utc::now(),
            latency_ms: completion.latency_ms,
            input_tokens: completion.input_tokens,
            output_tokens: completion.output_tokens,
        }
    }

    pub fn key(&self) -> PairKey {
        PairKey::new(&self.question_id, &self.model_id)
    }
}

/// Result of a commit attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The record is durable and visible
    Committed,
    /// Another record for the key was already committed; ours was discarded
    Duplicate,
}

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt record {path}: {message}")]
    Corrupt { path: String, message: String },

    /// Two distinct pairs map onto the same record file, e.g. ids that
    /// differ only in case on a case-insensitive filesystem
    #[error("Record {path} holds {existing}, not {wanted}")]
    Collision {
        path: String,
        existing: PairKey,
        wanted: PairKey,
    },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Append-only mapping from (question id, model id) to answer
pub trait AnswerStore: Send + Sync {
    /// Whether the pair already has a committed answer
    fn contains(&self, key: &PairKey) -> bool;

    /// Durably write an answer unless its key is already taken.
    ///
    /// Returns only after the record survives a crash.
    fn commit(&self, answer: &Answer) -> StoreResult<CommitOutcome>;

    /// Read back the committed answer for a pair
    fn get(&self, key: &PairKey) -> StoreResult<Option<Answer>>;

    /// All committed answers of one model, in no particular order
    fn answers_for(&self, model_id: &str) -> StoreResult<Vec<Answer>>;

    /// Number of committed answers
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Length of the hash suffix appended to altered names
const NAME_HASH_LEN: usize = 8;

fn unsafe_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w\-.]").expect("static regex"))
}

/// Turn an id into a file-system safe name.
///
/// Unsafe characters become underscores. When anything had to change, a
/// short hash of the original id is appended so that, e.g., `a/b` and `a_b`
/// still map to different names.
pub fn safe_name(id: &str) -> String {
    let replaced = unsafe_chars().replace_all(id, "_");
    let altered = replaced != id || id.is_empty() || id.starts_with('.');

    if altered {
        let hash = blake3::hash(id.as_bytes()).to_hex();
        format!(
            "{}-{}",
            replaced.trim_start_matches('.'),
            &hash[..NAME_HASH_LEN]
        )
    } else {
        replaced.into_owned()
    }
}
