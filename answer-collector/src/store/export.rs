//! Progress statistics and per-model answer export

use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{safe_name, AnswerStore, PairKey, StoreError, StoreResult};
use crate::questions::QuestionSet;

/// Answered and pending counts of one model against a question set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelProgress {
    pub model_id: String,
    pub answered: usize,
    pub pending: usize,
}

impl ModelProgress {
    pub fn total(&self) -> usize {
        self.answered + self.pending
    }
}

/// Count answered and pending pairs per model. Answers to questions outside
/// the set are not counted.
pub fn progress<S: AnswerStore + ?Sized>(
    store: &S,
    questions: &QuestionSet,
    models: &[&str],
) -> Vec<ModelProgress> {
    models
        .iter()
        .map(|model_id| {
            let answered = questions
                .iter()
                .filter(|q| store.contains(&PairKey::new(&q.id, *model_id)))
                .count();
            ModelProgress {
                model_id: model_id.to_string(),
                answered,
                pending: questions.len() - answered,
            }
        })
        .collect()
}

/// File format written by [`export_answers`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportFormat {
    /// One JSON object per line
    #[default]
    Jsonl,
    /// The generator's spreadsheet columns with an `Answer` column appended
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Jsonl => "jsonl",
            ExportFormat::Csv => "csv",
        }
    }
}

/// One exported spreadsheet row, headed the way the question generator
/// writes its sheet
#[derive(Debug, Serialize)]
struct CsvExportRow<'a> {
    #[serde(rename = "Wording Style")]
    wording_style: &'a str,
    #[serde(rename = "Option 1")]
    option_a: &'a str,
    #[serde(rename = "Option 2")]
    option_b: &'a str,
    #[serde(rename = "Question")]
    question: &'a str,
    #[serde(rename = "Answer")]
    answer: &'a str,
    #[serde(rename = "Id")]
    question_id: &'a str,
}

/// One exported line
#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    question_id: &'a str,
    question: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    wording_style: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    option_a: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    option_b: Option<&'a str>,
    model_id: &'a str,
    answer: &'a str,
}

/// Write `<output>/<model>.<jsonl|csv>` for every model.
///
/// Rows follow question set order. Unanswered questions are included with
/// an empty answer so every file lines up with the set.
pub fn export_answers<S: AnswerStore + ?Sized>(
    store: &S,
    questions: &QuestionSet,
    models: &[&str],
    output: &Path,
    format: ExportFormat,
) -> StoreResult<Vec<PathBuf>> {
    fs::create_dir_all(output)
        .map_err(|e| StoreError::io(format!("creating {}", output.display()), e))?;

    let mut written = Vec::with_capacity(models.len());
    for model_id in models {
        let path = output.join(format!("{}.{}", safe_name(model_id), format.extension()));
        let file = File::create(&path)
            .map_err(|e| StoreError::io(format!("creating {}", path.display()), e))?;

        let mut answers = Vec::with_capacity(questions.len());
        for question in questions {
            let answer = store.get(&PairKey::new(&question.id, *model_id))?;
            answers.push(answer.map(|a| a.raw_text).unwrap_or_default());
        }

        match format {
            ExportFormat::Jsonl => write_jsonl(file, questions, model_id, &answers),
            ExportFormat::Csv => write_csv(file, questions, &answers),
        }
        .map_err(|e| StoreError::io(format!("writing {}", path.display()), e))?;

        tracing::info!(model = %model_id, path = %path.display(), "Exported answers");
        written.push(path);
    }

    Ok(written)
}

fn write_jsonl(
    file: File,
    questions: &QuestionSet,
    model_id: &str,
    answers: &[String],
) -> std::io::Result<()> {
    let mut out = BufWriter::new(file);
    for (question, answer) in questions.iter().zip(answers) {
        let row = ExportRow {
            question_id: &question.id,
            question: &question.text,
            wording_style: question.metadata.wording_style.as_deref(),
            option_a: question.metadata.option_a.as_deref(),
            option_b: question.metadata.option_b.as_deref(),
            model_id,
            answer,
        };
        serde_json::to_writer(&mut out, &row)?;
        out.write_all(b"\n")?;
    }
    out.flush()
}

fn write_csv(file: File, questions: &QuestionSet, answers: &[String]) -> std::io::Result<()> {
    let mut out = csv::Writer::from_writer(file);
    for (question, answer) in questions.iter().zip(answers) {
        let meta = &question.metadata;
        out.serialize(CsvExportRow {
            wording_style: meta.wording_style.as_deref().unwrap_or(""),
            option_a: meta.option_a.as_deref().unwrap_or(""),
            option_b: meta.option_b.as_deref().unwrap_or(""),
            question: &question.text,
            answer,
            question_id: &question.id,
        })?;
    }
    out.flush()
}
