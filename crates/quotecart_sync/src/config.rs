//! Configuration for cart synchronization.

use quotecart_core::SessionId;
use rand::Rng;
use std::time::Duration;

/// How long a `prompt-user` decision stays in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptResolutionScope {
    /// The decision resolves the pending conflict only. The next divergence
    /// prompts again.
    #[default]
    Once,
    /// The decided strategy replaces `prompt-user` for the rest of the
    /// session.
    Persist,
}

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Session whose remote cart is synchronized.
    pub session_id: SessionId,
    /// Quiet period after the last local change before a push.
    pub debounce: Duration,
    /// Interval between background pulls.
    pub poll_interval: Duration,
    /// Whether local changes schedule a debounced push.
    pub auto_push: bool,
    /// Timeout for each network call.
    pub timeout: Duration,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Scope of a `prompt-user` decision.
    pub prompt_resolution: PromptResolutionScope,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: SessionId::new(session_id),
            debounce: Duration::from_millis(500),
            poll_interval: Duration::from_secs(30),
            auto_push: true,
            timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
            prompt_resolution: PromptResolutionScope::Once,
        }
    }

    /// Sets the debounce quiet period.
    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Enables or disables debounced pushes.
    #[must_use]
    pub fn with_auto_push(mut self, enabled: bool) -> Self {
        self.auto_push = enabled;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the prompt-resolution scope.
    #[must_use]
    pub fn with_prompt_resolution(mut self, scope: PromptResolutionScope) -> Self {
        self.prompt_resolution = scope;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("default")
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.add_jitter = enabled;
        self
    }

    /// Calculates the delay for a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter && delay_secs > 0.0 {
            // Up to 25% jitter
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen_range(0.0..1.0);
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}
