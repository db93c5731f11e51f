use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::config::RetryOptions;
use crate::error::StreamError;
use crate::traits::StreamResult;

/// Bounded exponential backoff shared by the append and read paths.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    options: RetryOptions,
}

impl RetryPolicy {
    pub fn new(options: RetryOptions) -> Self {
        Self { options }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            delay: self.options.initial_backoff,
            options: self.options.clone(),
            attempts: 0,
        }
    }
}

/// Backoff state of one logical operation.
#[derive(Debug)]
pub struct Backoff {
    options: RetryOptions,
    attempts: u32,
    delay: Duration,
}

impl Backoff {
    /// Number of failed attempts recorded so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Records a failed attempt and returns how long to wait before the next
    /// one, or `None` once the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempts += 1;
        if let Some(max) = self.options.max_attempts {
            if self.attempts >= max {
                return None;
            }
        }

        let base = self.delay;
        self.delay = (self.delay * 2).min(self.options.max_backoff);

        if self.options.jitter && !base.is_zero() {
            let extra = rand::rng().random_range(0..=base.as_micros() as u64 / 2);
            Some(base + Duration::from_micros(extra))
        } else {
            Some(base)
        }
    }

    /// Sleeps until the next attempt. Fails when the budget is spent or the
    /// token is cancelled while waiting.
    pub async fn wait(&mut self, cancel: Option<&CancellationToken>) -> StreamResult<()> {
        let Some(delay) = self.next_delay() else {
            return Err(StreamError::RetriesExhausted(self.attempts));
        };
        sleep_or_cancel(delay, cancel).await
    }
}

pub(crate) async fn sleep_or_cancel(
    delay: Duration,
    cancel: Option<&CancellationToken>,
) -> StreamResult<()> {
    match cancel {
        Some(token) => {
            tokio::select! {
                _ = token.cancelled() => Err(StreamError::Cancelled),
                _ = tokio::time::sleep(delay) => Ok(()),
            }
        }
        None => {
            tokio::time::sleep(delay).await;
            Ok(())
        }
    }
}

pub(crate) fn check_cancelled(cancel: Option<&CancellationToken>) -> StreamResult<()> {
    match cancel {
        Some(token) if token.is_cancelled() => Err(StreamError::Cancelled),
        _ => Ok(()),
    }
}
