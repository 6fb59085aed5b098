//! Bounded retries for document fetches and embedding calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use refine_core::backoff::Backoff;
use refine_settings::RetrySettings;

use crate::errors::Result;

/// How often a transient retrieval failure is retried, and how long to wait
/// in between. Uses the same backoff as the generation gateway.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(s: &RetrySettings) -> Self {
        Self {
            max_retries: s.max_retries,
            backoff: Backoff {
                base: Duration::from_millis(s.base_delay_ms),
                max: Duration::from_millis(s.max_delay_ms),
                jitter_factor: s.jitter_factor.clamp(0.0, 1.0),
            },
        }
    }
}

impl RetryPolicy {
    /// Never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Run `op` until it succeeds, fails for good, or the retries run out.
    /// The last error is returned as is.
    pub async fn run<T, F, Fut>(&self, operation: &str, subject: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            if !error.is_transient() || attempt >= self.max_retries {
                return Err(error);
            }
            let delay = self.backoff.delay(attempt, None);
            warn!(
                operation,
                subject,
                attempt = attempt + 1,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying retrieval call"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
