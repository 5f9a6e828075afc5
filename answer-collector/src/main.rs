//! Answer Collector CLI

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use answer_collector::{
    config::Config,
    providers::{create_provider, ErrorClass, ProviderRegistry},
    questions::load_questions_from_file,
    reporting::{print_console_report, print_progress_report, JsonSummary},
    runner::{select_models, Collector},
    store::{export_answers, progress, AnswerStore, ExportFormat, FailureLog, FileAnswerStore},
};

#[derive(Parser)]
#[command(name = "answer-collector")]
#[command(about = "Collect one answer per question from every configured LLM")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect every missing answer
    Run {
        /// Question set (JSON or JSONL)
        #[arg(short, long)]
        questions: PathBuf,

        /// Comma-separated model ids (default: all enabled models)
        #[arg(short, long)]
        models: Option<String>,

        /// Answer store directory (default: from configuration)
        #[arg(short, long)]
        store: Option<PathBuf>,
    },

    /// Ask one model one question, bypassing the store
    Ask {
        /// Model id as listed in the configuration
        #[arg(short, long)]
        model: String,

        /// Question text
        question: String,
    },

    /// Show answered and pending pairs per model
    Stats {
        #[arg(short, long)]
        questions: PathBuf,

        #[arg(short, long)]
        store: Option<PathBuf>,
    },

    /// Write one file of answers per model
    Export {
        #[arg(short, long)]
        questions: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,

        /// Output file format
        #[arg(short, long, value_enum, default_value_t = Format::Jsonl)]
        format: Format,

        #[arg(short, long)]
        store: Option<PathBuf>,
    },

    /// List configured models
    ListModels,

    /// Report which providers have credentials available
    CheckProviders {
        /// Also ask every reachable model a short probe question
        #[arg(long)]
        probe: bool,
    },

    /// Generate sample configuration
    InitConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config/collector.toml")]
        output: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Jsonl,
    Csv,
}

impl From<Format> for ExportFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Jsonl => ExportFormat::Jsonl,
            Format::Csv => ExportFormat::Csv,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG takes precedence
    let default_filter = if cli.verbose {
        "answer_collector=debug,info"
    } else {
        "answer_collector=info,warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Run {
            questions,
            models,
            store,
        } => {
            let config = Config::load(config_path)?;
            return run_collection(&config, &questions, models.as_deref(), store).await;
        }

        Commands::Ask { model, question } => {
            let config = Config::load(config_path)?;
            ask(&config, &model, &question).await?;
        }

        Commands::Stats { questions, store } => {
            let config = Config::load(config_path)?;
            stats(&config, &questions, store)?;
        }

        Commands::Export {
            questions,
            output,
            format,
            store,
        } => {
            let config = Config::load(config_path)?;
            export(&config, &questions, &output, format.into(), store)?;
        }

        Commands::ListModels => {
            let config = Config::load(config_path)?;
            list_models(&config);
        }

        Commands::CheckProviders { probe } => {
            let config = Config::load(config_path)?;
            return Ok(check_providers(&config, probe).await);
        }

        Commands::InitConfig { output } => {
            init_config(output)?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Conventional status for a process ended by SIGINT
const EXIT_FORCED: i32 = 130;

/// Cancel the run on the first interrupt. Returns true once a second
/// interrupt arrives, false if the signal source fails.
async fn watch_interrupts<F, Fut>(mut next_interrupt: F, cancel: CancellationToken) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    if next_interrupt().await.is_err() {
        return false;
    }
    tracing::warn!("Interrupted, finishing answers already received; interrupt again to quit");
    cancel.cancel();

    next_interrupt().await.is_ok()
}

fn store_root(config: &Config, store: Option<PathBuf>) -> PathBuf {
    store.unwrap_or_else(|| PathBuf::from(&config.store.path))
}

async fn run_collection(
    config: &Config,
    questions_path: &Path,
    models_arg: Option<&str>,
    store: Option<PathBuf>,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let questions = load_questions_from_file(questions_path)?;
    let models = select_models(config, models_arg)?;
    if models.is_empty() {
        return Err("No models selected; enable models in the configuration".into());
    }

    let root = store_root(config, store);
    let store = Arc::new(FileAnswerStore::open(&root)?);

    println!("=== Answer Collector ===");
    println!("Questions: {}", questions.len());
    println!(
        "Models:    {}",
        models.iter().map(|m| m.id.as_str()).collect::<Vec<_>>().join(", ")
    );
    println!("Store:     {} ({} answers)", root.display(), store.len());
    println!();

    let registry = ProviderRegistry::from_config(config);
    let collector = Collector::from_config(config, &registry, store)
        .with_failure_log(FailureLog::in_store(&root));

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if watch_interrupts(tokio::signal::ctrl_c, cancel).await {
                tracing::warn!("Interrupted twice, exiting without waiting");
                std::process::exit(EXIT_FORCED);
            }
        })
    };

    let summary = collector.run_until(&questions, &models, cancel).await?;
    interrupt.abort();

    print_console_report(&summary);

    match JsonSummary::from_summary(&summary).write_to_store(&root) {
        Ok(path) => println!("Summary written to: {}", path.display()),
        Err(e) => tracing::warn!("Could not write run summary: {}", e),
    }

    if summary.is_clean() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(2))
    }
}

async fn ask(config: &Config, model_id: &str, question: &str) -> Result<(), Box<dyn std::error::Error>> {
    let model = config
        .model(model_id)
        .ok_or_else(|| format!("Unknown model: {}", model_id))?;
    let provider_config = config
        .get_provider(&model.provider)
        .ok_or_else(|| format!("Unknown provider: {}", model.provider))?;

    let timeout = Duration::from_millis(config.collector.timeout_ms);
    let client = create_provider(&model.provider, provider_config, timeout)?;

    let completion = client.ask(&model.id, question).await?;
    tracing::info!(
        model = %model.id,
        latency_ms = completion.latency_ms,
        output_tokens = completion.output_tokens,
        "Answer received"
    );
    println!("{}", completion.text);
    Ok(())
}

fn stats(
    config: &Config,
    questions_path: &Path,
    store: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let questions = load_questions_from_file(questions_path)?;
    let root = store_root(config, store);
    let store = FileAnswerStore::open(&root)?;

    let model_ids: Vec<&str> = config.models.iter().map(|m| m.id.as_str()).collect();
    println!("Questions: {}", questions.len());
    println!("Stored answers: {}", store.len());
    print_progress_report(&progress(&store, &questions, &model_ids));

    let failures = FailureLog::in_store(&root).records()?;
    if !failures.is_empty() {
        let mut by_class: BTreeMap<ErrorClass, usize> = BTreeMap::new();
        for record in &failures {
            *by_class.entry(record.class).or_insert(0) += 1;
        }
        println!("\nRecorded failures ({}):", failures.len());
        for (class, count) in by_class {
            println!("  {}: {}", class, count);
        }
    }

    Ok(())
}

fn export(
    config: &Config,
    questions_path: &Path,
    output: &Path,
    format: ExportFormat,
    store: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let questions = load_questions_from_file(questions_path)?;
    let store = FileAnswerStore::open(store_root(config, store))?;

    let model_ids: Vec<&str> = config.models.iter().map(|m| m.id.as_str()).collect();
    let files = export_answers(&store, &questions, &model_ids, output, format)?;

    for file in files {
        println!("Exported: {}", file.display());
    }
    Ok(())
}

fn list_models(config: &Config) {
    println!("Configured Models ({}):", config.models.len());
    println!("{:-<60}", "");

    for model in &config.models {
        let kind = config
            .get_provider(&model.provider)
            .map(|p| p.kind.as_str())
            .unwrap_or("?");
        let state = if model.enabled { "" } else { " (disabled)" };
        println!("  {} | {} ({}){}", model.id, model.provider, kind, state);
    }
}

const PROBE_QUESTION: &str = "Which is better, tacos or pizza? Answer in one word.";

/// Exit code 1 when an enabled model has no usable provider or fails the probe
async fn check_providers(config: &Config, probe: bool) -> ExitCode {
    let registry = ProviderRegistry::from_config(config);

    println!("Providers:");
    for (name, provider) in &config.providers {
        let status = if !provider.enabled {
            "disabled".to_string()
        } else if registry.get(name).is_some() {
            format!("ok ({})", provider.api_key_env)
        } else {
            registry
                .unavailable_reason(name)
                .unwrap_or("unavailable")
                .to_string()
        };
        println!("  {:<12} {}", name, status);
    }

    let missing: Vec<&str> = config
        .enabled_models()
        .into_iter()
        .filter(|m| registry.get(&m.provider).is_none())
        .map(|m| m.id.as_str())
        .collect();

    let mut healthy = missing.is_empty();
    if !missing.is_empty() {
        println!("\nModels without credentials: {}", missing.join(", "));
    }

    if probe {
        println!("\nProbe: {}", PROBE_QUESTION);
        for model in config.enabled_models() {
            let Some(client) = registry.get(&model.provider) else {
                continue;
            };
            match client.ask(&model.id, PROBE_QUESTION).await {
                Ok(completion) => {
                    println!("  {:<45} {}", model.id, completion.text.trim());
                }
                Err(e) => {
                    healthy = false;
                    println!("  {:<45} {}: {}", model.id, e.class(), e);
                }
            }
        }
    }

    if healthy {
        println!("\nAll enabled models are reachable.");
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn init_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();

    // Ensure parent directory exists
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }

    config.save_toml(&output)?;
    println!("Configuration written to: {}", output.display());
    Ok(())
}
