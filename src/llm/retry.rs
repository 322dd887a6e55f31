//! Exponential backoff with jitter for throttled calls.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use super::TextSink;
use crate::settings::schema::RetrySettings;

/// Errors that know whether another attempt may succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt was throttled
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    /// A non-retryable failure, returned without retrying
    #[error(transparent)]
    Fatal(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Fatal(e) => e,
        }
    }
}

/// What a run actually did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryStats {
    pub attempts: u32,
    pub sleeps: Vec<Duration>,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            max_jitter: Duration::from_millis(settings.max_jitter_ms),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (0-based), without jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::random::<u64>() % (max_ms + 1))
    }

    /// Run `op` until it succeeds, fails fatally, or attempts run out.
    pub async fn run<T, E, F, Fut>(
        &self,
        label: &str,
        sink: Option<&dyn TextSink>,
        op: F,
    ) -> Result<T, RetryError<E>>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_with_stats(label, sink, op).await.0
    }

    /// Like [`run`](Self::run), also reporting attempts and sleeps.
    pub async fn run_with_stats<T, E, F, Fut>(
        &self,
        label: &str,
        sink: Option<&dyn TextSink>,
        mut op: F,
    ) -> (Result<T, RetryError<E>>, RetryStats)
    where
        E: Retryable + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut stats = RetryStats::default();

        loop {
            stats.attempts += 1;
            let err = match op().await {
                Ok(value) => return (Ok(value), stats),
                Err(e) if !e.is_retryable() => {
                    tracing::debug!("[retry] {} failed fatally: {}", label, e);
                    return (Err(RetryError::Fatal(e)), stats);
                }
                Err(e) => e,
            };

            if stats.attempts >= self.max_attempts {
                tracing::error!(
                    "[retry] {} still throttled after {} attempts: {}",
                    label,
                    stats.attempts,
                    err
                );
                return (
                    Err(RetryError::Exhausted {
                        attempts: stats.attempts,
                        last: err,
                    }),
                    stats,
                );
            }

            let delay = self.base_delay(stats.attempts - 1) + self.jitter();
            tracing::warn!(
                "[retry] {} throttled (attempt {}/{}), retrying in {:?}",
                label,
                stats.attempts,
                self.max_attempts,
                delay
            );
            tokio::time::sleep(delay).await;
            stats.sleeps.push(delay);

            if let Some(sink) = sink {
                sink.on_retry(stats.attempts);
            }
        }
    }
}
