use std::time::Duration;

/// How a failed generation or judgment call should be treated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Repeating the same request cannot succeed.
    Fatal,
    /// The backend may accept the same request later.
    Retryable,
    /// Raised by the caller's own limits, not by the backend.
    Operational,
}

/// Failures of a call to a generation backend.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("provider overloaded")]
    ProviderOverloaded,
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
}

impl GatewayError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::AuthenticationFailed(_) | Self::InvalidRequest(_) | Self::MalformedResponse(_) => {
                ErrorClass::Fatal
            }
            Self::RateLimited { .. }
            | Self::ServerError { .. }
            | Self::ProviderOverloaded
            | Self::NetworkError(_)
            | Self::StreamInterrupted(_) => ErrorClass::Retryable,
            Self::Timeout(_) | Self::Cancelled => ErrorClass::Operational,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }

    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }

    /// Retryable errors plus timeouts. A step that fails with one of these
    /// can be re-run later without any state change.
    pub fn is_transient(&self) -> bool {
        self.is_retryable() || matches!(self, Self::Timeout(_))
    }

    /// The backend's `retry-after` hint, if it sent one.
    pub fn suggested_delay(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Stable snake_case name for log fields.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::MalformedResponse(_) => "malformed_response",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::ProviderOverloaded => "provider_overloaded",
            Self::NetworkError(_) => "network_error",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    /// Map a non-success HTTP status. 529 is Anthropic's overload signal.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            429 => Self::RateLimited { retry_after: None },
            529 => Self::ProviderOverloaded,
            500..=599 => Self::ServerError { status, body },
            400 => Self::InvalidRequest(body),
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_has_one_class() {
        let cases = [
            (GatewayError::AuthenticationFailed("key".into()), ErrorClass::Fatal),
            (GatewayError::MalformedResponse("empty".into()), ErrorClass::Fatal),
            (GatewayError::RateLimited { retry_after: None }, ErrorClass::Retryable),
            (GatewayError::StreamInterrupted("eof".into()), ErrorClass::Retryable),
            (GatewayError::NetworkError("reset".into()), ErrorClass::Retryable),
            (GatewayError::Timeout(Duration::from_secs(1)), ErrorClass::Operational),
            (GatewayError::Cancelled, ErrorClass::Operational),
        ];
        for (error, class) in cases {
            assert_eq!(error.class(), class, "{error}");
            assert_eq!(error.is_fatal(), class == ErrorClass::Fatal);
            assert_eq!(error.is_retryable(), class == ErrorClass::Retryable);
        }
    }

    #[test]
    fn timeouts_are_transient_cancellation_is_not() {
        assert!(GatewayError::Timeout(Duration::from_secs(30)).is_transient());
        assert!(GatewayError::ProviderOverloaded.is_transient());
        assert!(!GatewayError::Cancelled.is_transient());
        assert!(!GatewayError::InvalidRequest("bad".into()).is_transient());
    }

    #[test]
    fn retry_after_hint() {
        let limited = GatewayError::RateLimited {
            retry_after: Some(Duration::from_secs(5)),
        };
        assert_eq!(limited.suggested_delay(), Some(Duration::from_secs(5)));
        assert_eq!(GatewayError::ProviderOverloaded.suggested_delay(), None);
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(GatewayError::from_status(403, String::new()).error_kind(), "authentication_failed");
        assert_eq!(GatewayError::from_status(429, String::new()).error_kind(), "rate_limited");
        assert_eq!(GatewayError::from_status(529, String::new()).error_kind(), "provider_overloaded");
        assert_eq!(GatewayError::from_status(503, String::new()).error_kind(), "server_error");
        assert!(GatewayError::from_status(404, "missing".into()).is_fatal());
    }
}
