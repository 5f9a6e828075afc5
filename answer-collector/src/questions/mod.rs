//! Question definitions and loading

pub mod loader;

pub use loader::{
    load_questions_from_csv, load_questions_from_file, load_questions_from_json_str,
    load_questions_from_jsonl_str, LoadError,
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Length of the hex prefix used for content-derived ids
const ID_HEX_LEN: usize = 16;

/// Forced-choice context produced by the question generator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wording_style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_a: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_b: Option<String>,
}

/// A single prompt sent to every model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: QuestionMetadata,
}

impl Question {
    /// Create a question whose id is derived from its text
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            id: content_id(&text),
            text,
            metadata: QuestionMetadata::default(),
        }
    }

    /// Create a question with an explicit id
    pub fn with_id(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: QuestionMetadata::default(),
        }
    }

    /// Attach the two options of a forced-choice question
    pub fn with_options(mut self, option_a: impl Into<String>, option_b: impl Into<String>) -> Self {
        self.metadata.option_a = Some(option_a.into());
        self.metadata.option_b = Some(option_b.into());
        self
    }
}

/// Stable id for a question text.
///
/// The same text always hashes to the same id, so regenerating an identical
/// question set keeps already collected answers addressable.
pub fn content_id(text: &str) -> String {
    let hash = blake3::hash(text.as_bytes()).to_hex();
    hash[..ID_HEX_LEN].to_string()
}

/// Immutable, ordered collection of questions with unique ids
#[derive(Debug, Clone, Default)]
pub struct QuestionSet {
    questions: IndexMap<String, Question>,
}

impl QuestionSet {
    /// Build a set, rejecting empty prompts and duplicate ids
    pub fn new(questions: Vec<Question>) -> Result<Self, LoadError> {
        let mut map = IndexMap::with_capacity(questions.len());
        for (idx, question) in questions.into_iter().enumerate() {
            if question.text.trim().is_empty() {
                return Err(LoadError::EmptyText(idx));
            }
            if question.id.is_empty() {
                return Err(LoadError::MissingField(format!("id (question {})", idx)));
            }
            if map.contains_key(&question.id) {
                return Err(LoadError::Duplicate(question.id));
            }
            map.insert(question.id.clone(), question);
        }
        Ok(Self { questions: map })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Question> {
        self.questions.values()
    }

    pub fn get(&self, id: &str) -> Option<&Question> {
        self.questions.get(id)
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

impl<'a> IntoIterator for &'a QuestionSet {
    type Item = &'a Question;
    type IntoIter = indexmap::map::Values<'a, String, Question>;

    fn into_iter(self) -> Self::IntoIter {
        self.questions.values()
    }
}
