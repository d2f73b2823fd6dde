use thiserror::Error;

/// Errors raised while talking to a payment provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The request never got a response (connection refused, reset, DNS).
    #[error("Gateway transport error: {0}")]
    Transport(String),

    /// The provider did not answer within the configured timeout.
    #[error("Gateway request timed out")]
    Timeout,

    /// The provider answered with an HTTP error status.
    #[error("Gateway returned HTTP {status}: {message}")]
    Provider { status: u16, message: String },

    /// The provider processed the request and declined it.
    #[error("Gateway rejected the request ({code}): {message}")]
    Rejected { code: String, message: String },

    /// Too many recent failures; calls are short-circuited for a while.
    #[error("Gateway circuit breaker is open")]
    CircuitOpen,

    /// The provider's response could not be understood.
    #[error("Unexpected gateway response: {0}")]
    Decode(String),

    /// The request could not be built from local data.
    #[error("Invalid gateway request: {0}")]
    InvalidRequest(String),

    /// Adapter misconfiguration (bad key, bad URL).
    #[error("Gateway configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    /// Transport failures, timeouts and provider 5xx responses may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Transport(_) | GatewayError::Timeout => true,
            GatewayError::Provider { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else if err.is_decode() {
            GatewayError::Decode(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}
