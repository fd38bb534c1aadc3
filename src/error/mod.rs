use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invocation error: {0}")]
    Invoke(#[from] InvokeError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Model invocation errors
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("Model unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl InvokeError {
    /// Whether a retry of the same request may succeed.
    ///
    /// Timeouts, connection failures, rate limiting (429) and server errors
    /// (5xx) are transient. Client errors and malformed responses are not,
    /// and neither is `Unavailable`, which already means retries ran out.
    pub fn is_transient(&self) -> bool {
        match self {
            InvokeError::Timeout { .. } => true,
            InvokeError::Api { status, .. } => *status == 429 || *status >= 500,
            InvokeError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            InvokeError::Unavailable { .. } | InvokeError::InvalidResponse { .. } => false,
        }
    }
}

/// Pattern engine errors surfaced to callers
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("root expansion failed: {reason}")]
    RootExpansionFailed { reason: String },
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for model invocations
pub type InvokeResult<T> = Result<T, InvokeError>;
