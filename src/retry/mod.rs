use rand::{thread_rng, Rng};
use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;

/// Errors that can tell a transient failure from a permanent one
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for crate::error::EnrollmentError {
    fn is_transient(&self) -> bool {
        matches!(self, crate::error::EnrollmentError::Network(_))
    }
}

impl Transient for crate::database::DatabaseError {
    fn is_transient(&self) -> bool {
        crate::database::DatabaseError::is_transient(self)
    }
}

/// Exponential backoff: `min(max_delay, base_delay * factor^(attempt-1))`
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_factor: u32,
    jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000))
            .with_max_delay(Duration::from_millis(5000))
            .with_backoff_factor(2)
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: base_delay,
            backoff_factor: 2,
            jitter_fraction: 0.0,
        }
    }

    /// A policy that never retries
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_backoff_factor(mut self, factor: u32) -> Self {
        self.backoff_factor = factor.max(1);
        self
    }

    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after the given (1-based) failed attempt, before jitter
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = u128::from(self.backoff_factor).saturating_pow(exponent);
        let scaled = self.base_delay.as_millis().saturating_mul(factor);
        let capped = scaled.min(self.max_delay.as_millis());
        Duration::from_millis(capped.min(u128::from(u64::MAX)) as u64)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if delay.is_zero() || self.jitter_fraction <= 0.0 {
            return delay;
        }
        let factor = thread_rng().gen_range((1.0 - self.jitter_fraction)..=(1.0 + self.jitter_fraction));
        let millis = (delay.as_millis() as f64 * factor).round().max(0.0);
        Duration::from_millis(millis as u64)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    /// Only transient errors consume a retry; the last error is returned.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, E>
    where
        E: Transient + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    let delay = self.jittered(self.delay_for_attempt(attempt));
                    tracing::warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        operation, attempt, self.max_attempts, delay, err
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy::new(config.max_attempts, Duration::from_millis(config.base_delay_ms))
            .with_max_delay(Duration::from_millis(config.max_delay_ms))
            .with_backoff_factor(config.backoff_factor)
            .with_jitter(config.jitter)
    }
}
