use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{info, warn};

use refine_core::backoff::Backoff;
use refine_core::context::LlmContext;
use refine_core::errors::GatewayError;
use refine_core::provider::{EventStream, LlmProvider, StreamOptions};
use refine_core::stream::StreamEvent;
use refine_settings::RetrySettings;

/// Retry and circuit breaker tuning for [`ReliableProvider`].
#[derive(Clone, Debug)]
pub struct ReliableConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown: Duration,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for ReliableConfig {
    fn from(s: &RetrySettings) -> Self {
        Self {
            max_retries: s.max_retries,
            base_delay: Duration::from_millis(s.base_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms),
            jitter_factor: s.jitter_factor.clamp(0.0, 1.0),
            circuit_breaker_threshold: s.circuit_breaker_threshold.max(1),
            circuit_breaker_cooldown: Duration::from_secs(s.circuit_breaker_cooldown_secs),
        }
    }
}

impl ReliableConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff {
            base: self.base_delay,
            max: self.max_delay,
            jitter_factor: self.jitter_factor,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Circuit {
    Closed,
    Open { since: Instant },
    HalfOpen,
}

/// Wraps a provider with bounded retries and a circuit breaker.
///
/// Retryable gateway errors are retried with exponential backoff and jitter,
/// honouring `retry_after` hints. After `circuit_breaker_threshold`
/// consecutive failed calls the circuit opens and calls fail fast with
/// `ProviderOverloaded` until the cooldown elapses; one success closes it.
///
/// Only the `stream()` call is retried. Once a stream has been handed out,
/// errors inside it belong to the caller.
pub struct ReliableProvider<P: LlmProvider> {
    inner: P,
    config: ReliableConfig,
    circuit: Mutex<Circuit>,
    consecutive_failures: AtomicU32,
    total_retries: AtomicU64,
}

impl<P: LlmProvider> ReliableProvider<P> {
    pub fn new(inner: P, config: ReliableConfig) -> Self {
        Self {
            inner,
            config,
            circuit: Mutex::new(Circuit::Closed),
            consecutive_failures: AtomicU32::new(0),
            total_retries: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(inner: P) -> Self {
        Self::new(inner, ReliableConfig::default())
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    fn admit(&self) -> Result<(), GatewayError> {
        let mut circuit = self.circuit.lock();
        match *circuit {
            Circuit::Closed | Circuit::HalfOpen => Ok(()),
            Circuit::Open { since } if since.elapsed() >= self.config.circuit_breaker_cooldown => {
                info!("circuit breaker half-open, letting one call through");
                *circuit = Circuit::HalfOpen;
                Ok(())
            }
            Circuit::Open { .. } => Err(GatewayError::ProviderOverloaded),
        }
    }

    fn on_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let mut circuit = self.circuit.lock();
        if *circuit != Circuit::Closed {
            info!("circuit breaker closed");
            *circuit = Circuit::Closed;
        }
    }

    fn on_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        let mut circuit = self.circuit.lock();
        let tripped = failures >= self.config.circuit_breaker_threshold;
        if tripped && !matches!(*circuit, Circuit::Open { .. }) {
            warn!(
                failures,
                cooldown_secs = self.config.circuit_breaker_cooldown.as_secs(),
                "circuit breaker opened"
            );
            *circuit = Circuit::Open {
                since: Instant::now(),
            };
        }
    }

    fn retry_delay(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        self.config.backoff().delay(attempt, suggested)
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    pub fn circuit_state_name(&self) -> &'static str {
        match *self.circuit.lock() {
            Circuit::Closed => "closed",
            Circuit::Open { .. } => "open",
            Circuit::HalfOpen => "half_open",
        }
    }
}

#[async_trait]
impl<P: LlmProvider> LlmProvider for ReliableProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn stream(
        &self,
        context: &LlmContext,
        options: &StreamOptions,
    ) -> Result<EventStream, GatewayError> {
        self.admit()?;

        let mut attempt = 0;
        loop {
            let error = match self.inner.stream(context, options).await {
                Ok(stream) => {
                    self.on_success();
                    return Ok(stream);
                }
                Err(e) => e,
            };

            if !error.is_retryable() || attempt >= self.config.max_retries {
                self.on_failure();
                return Err(error);
            }

            let delay = self.retry_delay(attempt, error.suggested_delay());
            self.total_retries.fetch_add(1, Ordering::Relaxed);
            warn!(
                attempt = attempt + 1,
                max_retries = self.config.max_retries,
                delay_ms = delay.as_millis() as u64,
                error_kind = error.error_kind(),
                error = %error,
                "retrying provider call"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
            self.admit()?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockProvider, MockResponse};

    fn server_error() -> MockResponse {
        MockResponse::Error(GatewayError::ServerError {
            status: 500,
            body: "internal".into(),
        })
    }

    fn fast(max_retries: u32) -> ReliableConfig {
        ReliableConfig {
            max_retries,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn success_on_first_try() {
        let reliable =
            ReliableProvider::with_defaults(MockProvider::new(vec![MockResponse::stream_text("hi")]));
        let result = reliable.stream(&LlmContext::empty(), &StreamOptions::default()).await;
        assert!(result.is_ok());
        assert_eq!(reliable.total_retries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_recovered() {
        let mock = MockProvider::new(vec![
            server_error(),
            MockResponse::Error(GatewayError::NetworkError("reset".into())),
            MockResponse::stream_text("recovered"),
        ]);
        let reliable = ReliableProvider::new(mock, fast(3));
        let result = reliable.stream(&LlmContext::empty(), &StreamOptions::default()).await;
        assert!(result.is_ok());
        assert_eq!(reliable.total_retries(), 2);
        assert_eq!(reliable.inner().call_count(), 3);
    }

    #[tokio::test]
    async fn fatal_error_not_retried() {
        let mock = MockProvider::new(vec![
            MockResponse::Error(GatewayError::AuthenticationFailed("bad key".into())),
            MockResponse::stream_text("should not reach"),
        ]);
        let reliable = ReliableProvider::with_defaults(mock);
        let err = reliable
            .stream(&LlmContext::empty(), &StreamOptions::default())
            .await
            .err()
            .expect("expected error");
        assert!(matches!(err, GatewayError::AuthenticationFailed(_)));
        assert_eq!(reliable.total_retries(), 0);
        assert_eq!(reliable.inner().remaining(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded() {
        let mock = MockProvider::new((0..4).map(|_| server_error()).collect());
        let reliable = ReliableProvider::new(mock, fast(3));
        let result = reliable.stream(&LlmContext::empty(), &StreamOptions::default()).await;
        assert!(matches!(result, Err(GatewayError::ServerError { .. })));
        assert_eq!(reliable.total_retries(), 3);
        assert_eq!(reliable.inner().call_count(), 4);
    }

    #[tokio::test]
    async fn circuit_opens_and_fails_fast() {
        let mut responses: Vec<_> = (0..3).map(|_| server_error()).collect();
        responses.push(MockResponse::stream_text("unreachable"));
        let config = ReliableConfig {
            circuit_breaker_threshold: 3,
            circuit_breaker_cooldown: Duration::from_secs(60),
            ..fast(0)
        };
        let reliable = ReliableProvider::new(MockProvider::new(responses), config);
        let ctx = LlmContext::empty();

        for _ in 0..3 {
            let _ = reliable.stream(&ctx, &StreamOptions::default()).await;
        }
        assert_eq!(reliable.circuit_state_name(), "open");

        let err = reliable
            .stream(&ctx, &StreamOptions::default())
            .await
            .err()
            .expect("expected error");
        assert!(matches!(err, GatewayError::ProviderOverloaded));
        assert_eq!(reliable.inner().call_count(), 3);
    }

    #[tokio::test]
    async fn circuit_recovers_after_cooldown() {
        let mut responses: Vec<_> = (0..3).map(|_| server_error()).collect();
        responses.push(MockResponse::stream_text("recovered"));
        let config = ReliableConfig {
            circuit_breaker_threshold: 3,
            circuit_breaker_cooldown: Duration::from_millis(30),
            ..fast(0)
        };
        let reliable = ReliableProvider::new(MockProvider::new(responses), config);
        let ctx = LlmContext::empty();

        for _ in 0..3 {
            let _ = reliable.stream(&ctx, &StreamOptions::default()).await;
        }
        assert_eq!(reliable.circuit_state_name(), "open");

        std::thread::sleep(Duration::from_millis(40));
        assert!(reliable.stream(&ctx, &StreamOptions::default()).await.is_ok());
        assert_eq!(reliable.circuit_state_name(), "closed");
    }

    #[test]
    fn delay_prefers_server_hint() {
        let reliable = ReliableProvider::with_defaults(MockProvider::new(vec![]));
        assert_eq!(
            reliable.retry_delay(0, Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn delay_doubles_then_caps() {
        let config = ReliableConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            jitter_factor: 0.0,
            ..Default::default()
        };
        let reliable = ReliableProvider::new(MockProvider::new(vec![]), config);
        let delays: Vec<u128> = (0..5).map(|a| reliable.retry_delay(a, None).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
    }

    #[test]
    fn jitter_stays_in_range() {
        let config = ReliableConfig {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(1000),
            jitter_factor: 0.2,
            ..Default::default()
        };
        let reliable = ReliableProvider::new(MockProvider::new(vec![]), config);
        for _ in 0..100 {
            let ms = reliable.retry_delay(0, None).as_millis();
            assert!((800..=1200).contains(&ms), "delay {ms} out of range");
        }
    }

    #[test]
    fn config_from_settings() {
        let settings = RetrySettings {
            max_retries: 5,
            base_delay_ms: 250,
            jitter_factor: 3.0,
            circuit_breaker_threshold: 0,
            ..Default::default()
        };
        let config = ReliableConfig::from(&settings);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.base_delay, Duration::from_millis(250));
        assert!((config.jitter_factor - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.circuit_breaker_threshold, 1);
    }

    #[test]
    fn delegates_properties() {
        let reliable = ReliableProvider::with_defaults(MockProvider::new(vec![]));
        assert_eq!(reliable.name(), "mock");
        assert_eq!(reliable.model(), "mock-model");
    }
}
