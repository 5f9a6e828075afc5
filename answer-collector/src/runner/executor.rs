//! Collector: walks models × questions, skips answered pairs, dispatches the
//! rest through their provider's governor and commits every answer as soon
//! as it arrives.

use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::rate_limiter::{GovernorConfig, RateGovernor};
use super::summary::{PairOutcome, RunSummary};
use crate::config::{CollectorSettings, Config, ModelConfig};
use crate::providers::{Completion, ErrorClass, ProviderError, ProviderRegistry, SharedProvider};
use crate::questions::{Question, QuestionSet};
use crate::store::{Answer, AnswerStore, CommitOutcome, FailureLog, FailureRecord, PairKey};

/// Retry and timeout policy for each pair
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Attempts per pair, including the first one
    pub max_attempts: u32,
    /// First wait after a transient network error
    pub transient_backoff: Duration,
    pub transient_backoff_max: Duration,
    /// Bound on a single provider call
    pub timeout: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self::from(&CollectorSettings::default())
    }
}

impl From<&CollectorSettings> for CollectorConfig {
    fn from(settings: &CollectorSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            transient_backoff: Duration::from_millis(settings.transient_backoff_ms),
            transient_backoff_max: Duration::from_millis(settings.transient_backoff_max_ms),
            timeout: Duration::from_millis(settings.timeout_ms),
        }
    }
}

/// Error types for setting up a run
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Model listed more than once: {0}")]
    DuplicateModel(String),

    #[error("Unknown model: {0}")]
    UnknownModel(String),
}

/// Outcome of one pair, as handed to progress callbacks
#[derive(Debug, Clone)]
pub struct PairReport {
    pub question_id: String,
    pub model_id: String,
    pub provider: String,
    pub outcome: PairOutcome,
}

/// Progress callback for tracking a run
pub trait ProgressCallback: Send + Sync {
    fn on_pair_complete(&self, report: &PairReport);
    fn on_progress(&self, completed: usize, total: usize);
}

/// Default no-op progress callback
pub struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_pair_complete(&self, _report: &PairReport) {}
    fn on_progress(&self, _completed: usize, _total: usize) {}
}

/// Logs each pair at debug level and overall progress every `every` pairs
pub struct LogProgress {
    every: usize,
}

impl LogProgress {
    pub fn new(every: usize) -> Self {
        Self {
            every: every.max(1),
        }
    }
}

impl Default for LogProgress {
    fn default() -> Self {
        Self::new(25)
    }
}

impl ProgressCallback for LogProgress {
    fn on_pair_complete(&self, report: &PairReport) {
        debug!(
            model = %report.model_id,
            question_id = %report.question_id,
            outcome = ?report.outcome,
            "Pair finished"
        );
    }

    fn on_progress(&self, completed: usize, total: usize) {
        if completed % self.every == 0 || completed == total {
            info!("Progress: {}/{} pairs finished", completed, total);
        }
    }
}

struct ProviderEntry {
    client: SharedProvider,
    governor: GovernorConfig,
}

/// One provider's state for the duration of a run
struct Lane {
    name: String,
    client: SharedProvider,
    governor: RateGovernor,
    /// Cancelled when the provider must stop (bad credentials or interruption)
    abort: CancellationToken,
}

/// Answer collection orchestrator
pub struct Collector {
    config: CollectorConfig,
    store: Arc<dyn AnswerStore>,
    failures: Option<Arc<FailureLog>>,
    providers: IndexMap<String, ProviderEntry>,
    unavailable: IndexMap<String, String>,
    progress: Arc<dyn ProgressCallback>,
}

impl Collector {
    pub fn new(store: Arc<dyn AnswerStore>, config: CollectorConfig) -> Self {
        Self {
            config,
            store,
            failures: None,
            providers: IndexMap::new(),
            unavailable: IndexMap::new(),
            progress: Arc::new(LogProgress::default()),
        }
    }

    /// Wire up every provider in the configuration. Providers missing from
    /// the registry are remembered with the reason so their models show up
    /// as unavailable.
    pub fn from_config(
        config: &Config,
        registry: &ProviderRegistry,
        store: Arc<dyn AnswerStore>,
    ) -> Self {
        let mut collector = Self::new(store, CollectorConfig::from(&config.collector));

        for (name, provider_config) in &config.providers {
            if let Some(client) = registry.get(name) {
                collector.providers.insert(
                    name.clone(),
                    ProviderEntry {
                        client: client.clone(),
                        governor: GovernorConfig::from(provider_config),
                    },
                );
            } else {
                let reason = match registry.unavailable_reason(name) {
                    Some(reason) => reason.to_string(),
                    None if !provider_config.enabled => "provider disabled".to_string(),
                    None => "provider not initialised".to_string(),
                };
                collector.unavailable.insert(name.clone(), reason);
            }
        }

        collector
    }

    /// Register a client under its own name
    pub fn with_provider(mut self, client: SharedProvider, governor: GovernorConfig) -> Self {
        let name = client.name().to_string();
        self.unavailable.shift_remove(&name);
        self.providers
            .insert(name, ProviderEntry { client, governor });
        self
    }

    /// Record why a provider cannot be used
    pub fn with_unavailable(mut self, name: impl Into<String>, reason: impl Into<String>) -> Self {
        self.unavailable.insert(name.into(), reason.into());
        self
    }

    pub fn with_failure_log(mut self, log: FailureLog) -> Self {
        self.failures = Some(Arc::new(log));
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Collect every missing answer
    pub async fn run(
        &self,
        questions: &QuestionSet,
        models: &[ModelConfig],
    ) -> Result<RunSummary, CollectorError> {
        self.run_until(questions, models, CancellationToken::new())
            .await
    }

    /// Collect every missing answer until `cancel` fires.
    ///
    /// After cancellation no new request starts. Answers that already
    /// arrived are still committed; everything else ends as aborted and
    /// stays pending for the next run.
    pub async fn run_until(
        &self,
        questions: &QuestionSet,
        models: &[ModelConfig],
        cancel: CancellationToken,
    ) -> Result<RunSummary, CollectorError> {
        let mut seen = HashSet::new();
        for model in models {
            if !seen.insert(model.id.as_str()) {
                return Err(CollectorError::DuplicateModel(model.id.clone()));
            }
        }

        // Governors live exactly as long as the run
        let lanes: IndexMap<&str, Arc<Lane>> = self
            .providers
            .iter()
            .map(|(name, entry)| {
                let lane = Lane {
                    name: name.clone(),
                    client: entry.client.clone(),
                    governor: RateGovernor::new(name.clone(), entry.governor.clone()),
                    abort: cancel.child_token(),
                };
                (name.as_str(), Arc::new(lane))
            })
            .collect();

        let mut summary = RunSummary::new(questions.len());
        let mut tasks = JoinSet::new();
        let mut pending = 0usize;

        for model in models {
            summary.model_mut(&model.id, &model.provider);

            let Some(lane) = lanes.get(model.provider.as_str()) else {
                self.skip_unavailable(&mut summary, questions, model);
                continue;
            };

            for question in questions {
                let key = PairKey::new(&question.id, &model.id);
                if self.store.contains(&key) {
                    summary.record(&model.id, &model.provider, &PairOutcome::Skipped);
                    continue;
                }

                let job = PairJob {
                    question: question.clone(),
                    model_id: model.id.clone(),
                    lane: lane.clone(),
                    store: self.store.clone(),
                    failures: self.failures.clone(),
                    config: self.config.clone(),
                };
                tasks.spawn(job.run());
                pending += 1;
            }
        }

        info!(
            questions = questions.len(),
            models = models.len(),
            pending,
            "Dispatching pending pairs"
        );

        let mut completed = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => {
                    self.progress.on_pair_complete(&report);
                    summary.record(&report.model_id, &report.provider, &report.outcome);
                }
                Err(e) => {
                    error!("Pair task ended without an outcome: {}", e);
                    summary.lost_tasks += 1;
                }
            }
            completed += 1;
            self.progress.on_progress(completed, pending);
        }

        summary.interrupted = cancel.is_cancelled();
        summary.finish();
        Ok(summary)
    }

    fn skip_unavailable(&self, summary: &mut RunSummary, questions: &QuestionSet, model: &ModelConfig) {
        let reason = self
            .unavailable
            .get(&model.provider)
            .cloned()
            .unwrap_or_else(|| format!("provider '{}' is not configured", model.provider));
        warn!(
            model = %model.id,
            provider = %model.provider,
            "Model unavailable: {}",
            reason
        );

        for question in questions {
            let outcome = if self.store.contains(&PairKey::new(&question.id, &model.id)) {
                PairOutcome::Skipped
            } else {
                PairOutcome::Aborted
            };
            summary.record(&model.id, &model.provider, &outcome);
        }
        summary.model_mut(&model.id, &model.provider).unavailable = Some(reason);
    }
}

/// Everything one pair task needs, owned so the task is `'static`
struct PairJob {
    question: Question,
    model_id: String,
    lane: Arc<Lane>,
    store: Arc<dyn AnswerStore>,
    failures: Option<Arc<FailureLog>>,
    config: CollectorConfig,
}

impl PairJob {
    async fn run(self) -> PairReport {
        let outcome = self.attempt().await;

        if let PairOutcome::Failed {
            class,
            message,
            attempts,
        } = &outcome
        {
            self.log_failure(*class, message, *attempts).await;
        }

        PairReport {
            question_id: self.question.id,
            model_id: self.model_id,
            provider: self.lane.name.clone(),
            outcome,
        }
    }

    async fn attempt(&self) -> PairOutcome {
        let lane = &*self.lane;
        let mut attempts = 0u32;
        let mut malformed_retried = false;
        let mut transient_wait = self.config.transient_backoff;

        loop {
            let permit = tokio::select! {
                biased;
                _ = lane.abort.cancelled() => return PairOutcome::Aborted,
                admitted = lane.governor.admit() => match admitted {
                    Ok(permit) => permit,
                    Err(_) => return PairOutcome::Aborted,
                },
            };

            attempts += 1;
            debug!(
                provider = %lane.name,
                model = %self.model_id,
                question_id = %self.question.id,
                attempt = attempts,
                "Dispatching"
            );

            let result = tokio::select! {
                biased;
                _ = lane.abort.cancelled() => return PairOutcome::Aborted,
                result = timeout(
                    self.config.timeout,
                    lane.client.ask(&self.model_id, &self.question.text),
                ) => result.unwrap_or_else(|_| Err(ProviderError::Timeout {
                    timeout_ms: self.config.timeout.as_millis() as u64,
                })),
            };
            drop(permit);

            let error = match result {
                Ok(completion) => {
                    lane.governor.record_success();
                    return self.commit(completion).await;
                }
                Err(e) => e,
            };

            let class = error.class();
            let failed = |error: &ProviderError| PairOutcome::Failed {
                class,
                message: error.to_string(),
                attempts,
            };

            if class == ErrorClass::Authentication {
                error!(
                    provider = %lane.name,
                    model = %self.model_id,
                    "Authentication failed, stopping provider: {}",
                    error
                );
                lane.abort.cancel();
                lane.governor.close();
                return failed(&error);
            }

            if attempts >= self.config.max_attempts {
                warn!(
                    provider = %lane.name,
                    model = %self.model_id,
                    question_id = %self.question.id,
                    class = %class,
                    attempts,
                    "Giving up on pair: {}",
                    error
                );
                return failed(&error);
            }

            match class {
                ErrorClass::RateLimited => {
                    // The governor holds back every request to this provider,
                    // including our own next admission
                    let wait = lane.governor.record_throttle(error.retry_after());
                    warn!(
                        provider = %lane.name,
                        model = %self.model_id,
                        question_id = %self.question.id,
                        class = %class,
                        attempt = attempts,
                        wait_ms = wait.as_millis() as u64,
                        "Retrying after rate limit"
                    );
                }
                ErrorClass::TransientNetwork => {
                    warn!(
                        provider = %lane.name,
                        model = %self.model_id,
                        question_id = %self.question.id,
                        class = %class,
                        attempt = attempts,
                        wait_ms = transient_wait.as_millis() as u64,
                        "Retrying after transient error: {}",
                        error
                    );
                    tokio::select! {
                        biased;
                        _ = lane.abort.cancelled() => return PairOutcome::Aborted,
                        _ = sleep(transient_wait) => {}
                    }
                    transient_wait = transient_wait
                        .saturating_mul(2)
                        .min(self.config.transient_backoff_max);
                }
                ErrorClass::MalformedResponse if !malformed_retried => {
                    malformed_retried = true;
                    warn!(
                        provider = %lane.name,
                        model = %self.model_id,
                        question_id = %self.question.id,
                        class = %class,
                        attempt = attempts,
                        "Retrying once after malformed response: {}",
                        error
                    );
                }
                _ => {
                    warn!(
                        provider = %lane.name,
                        model = %self.model_id,
                        question_id = %self.question.id,
                        class = %class,
                        "Pair failed: {}",
                        error
                    );
                    return failed(&error);
                }
            }
        }
    }

    /// Write the answer durably before reporting the pair as done
    async fn commit(&self, completion: Completion) -> PairOutcome {
        let answer =
            Answer::from_completion(&self.question, &self.model_id, &self.lane.name, completion);
        let store = self.store.clone();

        match tokio::task::spawn_blocking(move || store.commit(&answer)).await {
            Ok(Ok(CommitOutcome::Committed)) => {
                debug!(model = %self.model_id, question_id = %self.question.id, "Committed");
                PairOutcome::Committed
            }
            Ok(Ok(CommitOutcome::Duplicate)) => {
                info!(
                    model = %self.model_id,
                    question_id = %self.question.id,
                    "Answer already stored by another writer, discarded"
                );
                PairOutcome::Duplicate
            }
            Ok(Err(e)) => {
                error!(
                    model = %self.model_id,
                    question_id = %self.question.id,
                    "Could not store answer: {}",
                    e
                );
                PairOutcome::StoreFailed(e.to_string())
            }
            Err(e) => {
                error!(
                    model = %self.model_id,
                    question_id = %self.question.id,
                    "Store task failed: {}",
                    e
                );
                PairOutcome::StoreFailed(e.to_string())
            }
        }
    }

    async fn log_failure(&self, class: ErrorClass, message: &str, attempts: u32) {
        let Some(log) = self.failures.clone() else {
            return;
        };
        let record = FailureRecord {
            question_id: self.question.id.clone(),
            model_id: self.model_id.clone(),
            provider: self.lane.name.clone(),
            class,
            message: message.to_string(),
            attempts,
            at: chrono::Utc::now(),
        };

        match tokio::task::spawn_blocking(move || log.append(&record)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Could not record failure: {}", e),
            Err(e) => warn!("Failure log task failed: {}", e),
        }
    }
}

/// Models to collect: all enabled ones, or the comma-separated `filter`
pub fn select_models(
    config: &Config,
    filter: Option<&str>,
) -> Result<Vec<ModelConfig>, CollectorError> {
    match filter {
        None => Ok(config.enabled_models().into_iter().cloned().collect()),
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| {
                config
                    .model(id)
                    .cloned()
                    .ok_or_else(|| CollectorError::UnknownModel(id.to_string()))
            })
            .collect(),
    }
}
