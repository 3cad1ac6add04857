//! Jittered backoff for transient collaborator failures.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::config::RetrySettings;
use crate::error::{OutbreakError, Result};

#[derive(Debug, Clone)]
pub struct Backoff {
    max_retries: u32,
    initial_delay: Duration,
    max_delay: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms.max(settings.initial_delay_ms)),
            attempt: 0,
        }
    }

    /// Next delay, or None once retries are used up. Doubles per attempt,
    /// capped, with up to 25% random jitter on top.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_retries {
            return None;
        }
        let base = self.initial_delay.as_millis() as f64 * 2f64.powi(self.attempt as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);
        let jitter = capped * 0.25 * rand::thread_rng().gen_range(0.0..=1.0);
        self.attempt += 1;
        Some(Duration::from_millis((capped + jitter) as u64))
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    settings: RetrySettings,
}

impl RetryPolicy {
    pub fn new(settings: RetrySettings) -> Self {
        Self { settings }
    }

    /// Runs `operation`, retrying only errors that are transient. Input and
    /// data errors come back on the first failure.
    pub async fn run<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = Backoff::new(&self.settings);
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => match backoff.next_delay() {
                    Some(delay) => {
                        debug!(
                            attempt = backoff.attempt(),
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "retrying after transient failure"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetrySettings::default())
    }
}

/// Shorthand for classifying a timed-out call.
pub fn timeout_error(what: impl std::fmt::Display, after: Duration) -> OutbreakError {
    OutbreakError::Timeout(format!("{what} after {}s", after.as_secs_f64()))
}
