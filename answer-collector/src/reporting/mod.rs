//! Run reporting

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::providers::ErrorClass;
use crate::runner::RunSummary;
use crate::store::ModelProgress;

/// JSON summary export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonSummary {
    pub run_id: String,
    pub timestamp: String,
    pub clean: bool,
    pub committed: usize,
    pub failed: usize,
    pub aborted: usize,
    pub failures_by_class: BTreeMap<ErrorClass, usize>,
    pub run: RunSummary,
}

impl JsonSummary {
    pub fn from_summary(summary: &RunSummary) -> Self {
        Self {
            run_id: summary.run_id.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            clean: summary.is_clean(),
            committed: summary.committed(),
            failed: summary.failed(),
            aborted: summary.aborted(),
            failures_by_class: summary.failures_by_class(),
            run: summary.clone(),
        }
    }

    /// Write to JSON file
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Write to `<store root>/runs/<run id>.json`
    pub fn write_to_store(&self, store_root: &Path) -> std::io::Result<PathBuf> {
        let dir = store_root.join("runs");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.json", self.run_id));
        self.write_to_file(&path)?;
        Ok(path)
    }
}

/// Print the per-model table for a finished run
pub fn print_console_report(summary: &RunSummary) {
    println!("\n=== Answer Collection Results ===\n");
    println!("Run: {}", summary.run_id);
    println!("Questions: {}\n", summary.questions);

    println!(
        "{:<48} {:>9} {:>8} {:>5} {:>7} {:>8}",
        "Model", "Committed", "Skipped", "Dup", "Failed", "Aborted"
    );
    println!("{:-<90}", "");

    for (model_id, model) in &summary.models {
        println!(
            "{:<48} {:>9} {:>8} {:>5} {:>7} {:>8}",
            model_id,
            model.committed,
            model.skipped,
            model.duplicates,
            model.failed_total() + model.store_errors,
            model.aborted
        );
        if let Some(reason) = &model.unavailable {
            println!("    unavailable: {}", reason);
        }
        for (class, count) in &model.failed {
            println!("    {}: {}", class, count);
        }
        if model.store_errors > 0 {
            println!("    store_error: {}", model.store_errors);
        }
    }

    let by_class = summary.failures_by_class();
    if !by_class.is_empty() {
        println!("\nFailures by Error Class:");
        println!("{:-<50}", "");
        for (class, count) in &by_class {
            println!("  {}: {}", class, count);
        }
    }

    if summary.interrupted {
        println!("\nRun interrupted; pending pairs will be collected by the next run.");
    }
    if summary.lost_tasks > 0 {
        println!("\n{} pair task(s) ended without an outcome.", summary.lost_tasks);
    }

    let status = if summary.is_clean() { "CLEAN" } else { "INCOMPLETE" };
    println!("\nStatus: {}", status);
    println!("{:=<50}", "");
}

/// Print answered/pending counts per model
pub fn print_progress_report(progress: &[ModelProgress]) {
    println!("\n{:<48} {:>9} {:>8} {:>7}", "Model", "Answered", "Pending", "Total");
    println!("{:-<76}", "");
    for model in progress {
        println!(
            "{:<48} {:>9} {:>8} {:>7}",
            model.model_id,
            model.answered,
            model.pending,
            model.total()
        );
    }
}
