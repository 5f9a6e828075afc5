//! Question loading from JSON, JSONL and CSV files

use serde::Deserialize;
use std::io::Read;
use std::path::Path;

use super::{content_id, Question, QuestionMetadata, QuestionSet};

/// Error type for question loading
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("Question {0} has empty text")]
    EmptyText(usize),

    #[error("Duplicate question id: {0}")]
    Duplicate(String),
}

/// Top-level JSON question file
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QuestionFile {
    Document {
        #[allow(dead_code)]
        #[serde(default)]
        version: Option<String>,
        questions: Vec<QuestionDefinition>,
    },
    List(Vec<QuestionDefinition>),
}

/// A single question as written by the generator (flat schema)
#[derive(Debug, Deserialize)]
struct QuestionDefinition {
    #[serde(default)]
    id: Option<String>,
    #[serde(alias = "question")]
    text: String,
    #[serde(default, alias = "wording")]
    wording_style: Option<String>,
    #[serde(default, alias = "option_1")]
    option_a: Option<String>,
    #[serde(default, alias = "option_2")]
    option_b: Option<String>,
}

/// One row of the generator's spreadsheet:
/// `Wording Style, Option 1, Option 2, Question`
#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(default, rename = "Id", alias = "id")]
    id: Option<String>,
    #[serde(default, rename = "Wording Style", alias = "wording_style")]
    wording_style: Option<String>,
    #[serde(default, rename = "Option 1", alias = "option_1")]
    option_a: Option<String>,
    #[serde(default, rename = "Option 2", alias = "option_2")]
    option_b: Option<String>,
    #[serde(rename = "Question", alias = "question")]
    text: String,
}

impl From<CsvRow> for QuestionDefinition {
    fn from(row: CsvRow) -> Self {
        Self {
            id: row.id.filter(|id| !id.trim().is_empty()),
            text: row.text,
            wording_style: row.wording_style,
            option_a: row.option_a,
            option_b: row.option_b,
        }
    }
}

impl QuestionDefinition {
    fn into_question(self) -> Question {
        let id = self.id.unwrap_or_else(|| content_id(&self.text));
        Question {
            id,
            text: self.text,
            metadata: QuestionMetadata {
                wording_style: self.wording_style,
                option_a: self.option_a,
                option_b: self.option_b,
            },
        }
    }
}

/// Load a question set, picking the parser from the file extension.
///
/// `.jsonl` files hold one question per line and `.csv` files are read by
/// header name; anything else is parsed as a JSON document or array.
pub fn load_questions_from_file(path: impl AsRef<Path>) -> Result<QuestionSet, LoadError> {
    let path = path.as_ref();
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    let set = match extension {
        "csv" => load_questions_from_csv(std::fs::File::open(path)?)?,
        "jsonl" | "ndjson" => load_questions_from_jsonl_str(&std::fs::read_to_string(path)?)?,
        _ => load_questions_from_json_str(&std::fs::read_to_string(path)?)?,
    };

    tracing::debug!("Loaded {} questions from {}", set.len(), path.display());
    Ok(set)
}

/// Load questions from a JSON document or array
pub fn load_questions_from_json_str(content: &str) -> Result<QuestionSet, LoadError> {
    let file: QuestionFile = serde_json::from_str(content)
        .map_err(|e| LoadError::Parse(format!("JSON parse error: {}", e)))?;

    let definitions = match file {
        QuestionFile::Document { questions, .. } => questions,
        QuestionFile::List(questions) => questions,
    };

    QuestionSet::new(definitions.into_iter().map(|d| d.into_question()).collect())
}

/// Load questions from JSON lines, skipping blank lines
pub fn load_questions_from_jsonl_str(content: &str) -> Result<QuestionSet, LoadError> {
    let mut questions = Vec::new();

    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let definition: QuestionDefinition = serde_json::from_str(line)
            .map_err(|e| LoadError::Parse(format!("line {}: {}", line_no + 1, e)))?;
        questions.push(definition.into_question());
    }

    QuestionSet::new(questions)
}

/// Load questions from a CSV spreadsheet with a header row.
///
/// Only the `Question` column is required. Empty cells read as absent.
pub fn load_questions_from_csv<R: Read>(reader: R) -> Result<QuestionSet, LoadError> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::Headers).from_reader(reader);

    let mut questions = Vec::new();
    for row in reader.deserialize::<CsvRow>() {
        questions.push(QuestionDefinition::from(row?).into_question());
    }

    QuestionSet::new(questions)
}
