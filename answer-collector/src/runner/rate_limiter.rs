//! Per-provider admission control: in-flight cap, request spacing, a
//! requests-per-minute sliding window and rate-limit backoff.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, Instant};

use crate::config::ProviderConfig;

const WINDOW: Duration = Duration::from_secs(60);

/// Admission limits for one provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GovernorConfig {
    pub max_in_flight: usize,
    pub min_interval: Duration,
    /// Requests per minute, 0 disables the window
    pub rpm: u32,
    pub backoff_seed: Duration,
    pub backoff_max: Duration,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 4,
            min_interval: Duration::ZERO,
            rpm: 0,
            backoff_seed: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
        }
    }
}

impl From<&ProviderConfig> for GovernorConfig {
    fn from(config: &ProviderConfig) -> Self {
        Self {
            max_in_flight: config.max_in_flight.max(1),
            min_interval: Duration::from_millis(config.min_interval_ms),
            rpm: config.rpm,
            backoff_seed: Duration::from_millis(config.backoff_seed_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
        }
    }
}

/// Returned by [`RateGovernor::admit`] once the governor was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("rate governor closed")]
pub struct GovernorClosed;

#[derive(Debug, Default)]
struct GovernorState {
    next_slot: Option<Instant>,
    recent: VecDeque<Instant>,
    consecutive_throttles: u32,
    backoff_until: Option<Instant>,
}

impl GovernorState {
    /// How long the caller must wait, or `None` after claiming a slot
    fn try_claim(&mut self, config: &GovernorConfig, now: Instant) -> Option<Duration> {
        if let Some(until) = self.backoff_until {
            if until > now {
                return Some(until - now);
            }
        }

        if let Some(slot) = self.next_slot {
            if slot > now {
                return Some(slot - now);
            }
        }

        if config.rpm > 0 {
            while let Some(&front) = self.recent.front() {
                if now.duration_since(front) >= WINDOW {
                    self.recent.pop_front();
                } else {
                    break;
                }
            }
            if self.recent.len() >= config.rpm as usize {
                if let Some(&oldest) = self.recent.front() {
                    return Some(oldest + WINDOW - now);
                }
            }
            self.recent.push_back(now);
        }

        self.next_slot = Some(now + config.min_interval);
        None
    }
}

/// Admission control for a single provider.
///
/// The governor never retries anything itself; it only decides when the
/// next request to its provider may start.
pub struct RateGovernor {
    provider: String,
    config: GovernorConfig,
    in_flight: Arc<Semaphore>,
    state: Mutex<GovernorState>,
}

/// Held for the duration of one request
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

impl RateGovernor {
    pub fn new(provider: impl Into<String>, config: GovernorConfig) -> Self {
        let in_flight = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        Self {
            provider: provider.into(),
            config,
            in_flight,
            state: Mutex::new(GovernorState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, GovernorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until a request may be sent.
    ///
    /// Waits for an in-flight slot first, then for any backoff, spacing or
    /// window constraint. Fails only once the governor is closed.
    pub async fn admit(&self) -> Result<AdmissionPermit, GovernorClosed> {
        let permit = self
            .in_flight
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| GovernorClosed)?;

        loop {
            let wait = self.state().try_claim(&self.config, Instant::now());
            match wait {
                None => return Ok(AdmissionPermit { _permit: permit }),
                Some(wait) => {
                    sleep(wait).await;
                    if self.in_flight.is_closed() {
                        return Err(GovernorClosed);
                    }
                }
            }
        }
    }

    /// Enter (or extend) backoff after a rate-limit signal.
    ///
    /// The wait doubles with every consecutive signal starting from the
    /// seed, is raised to a provider-supplied hint, and never exceeds the
    /// configured maximum. Returns the wait applied.
    pub fn record_throttle(&self, hint: Option<Duration>) -> Duration {
        let mut state = self.state();
        state.consecutive_throttles = state.consecutive_throttles.saturating_add(1);

        let factor = 2u32.saturating_pow(state.consecutive_throttles - 1);
        let wait = self
            .config
            .backoff_seed
            .saturating_mul(factor)
            .max(hint.unwrap_or(Duration::ZERO))
            .min(self.config.backoff_max);

        let until = Instant::now() + wait;
        if state.backoff_until.map_or(true, |current| current < until) {
            state.backoff_until = Some(until);
        }

        tracing::warn!(
            provider = %self.provider,
            consecutive = state.consecutive_throttles,
            wait_ms = wait.as_millis() as u64,
            "Rate limited, suspending admissions"
        );
        wait
    }

    /// Reset the backoff sequence after a successful request
    pub fn record_success(&self) {
        let mut state = self.state();
        if state.consecutive_throttles > 0 {
            tracing::info!(provider = %self.provider, "Backoff cleared");
        }
        state.consecutive_throttles = 0;
    }

    /// Consecutive rate-limit signals since the last success
    pub fn consecutive_throttles(&self) -> u32 {
        self.state().consecutive_throttles
    }

    /// Remaining backoff, if admissions are currently suspended
    pub fn backoff_remaining(&self) -> Option<Duration> {
        let now = Instant::now();
        self.state()
            .backoff_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }

    /// Stop admitting. Waiting and future callers get [`GovernorClosed`].
    pub fn close(&self) {
        self.in_flight.close();
    }

    pub fn is_closed(&self) -> bool {
        self.in_flight.is_closed()
    }
}
