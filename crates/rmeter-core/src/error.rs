use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum RmeterError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Plan not found: {0}")]
    PlanNotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Failed to resolve: {0}")]
    ResolveFailed(String),

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("No connection open for {0}")]
    NoConnection(String),

    #[error("No endpoint open for {0}")]
    NoEndpoint(String),

    #[error("Run cancelled")]
    Cancelled,
}

impl Serialize for RmeterError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl RmeterError {
    /// The wire-stable error category this error renders to in an [`crate::operation::Outcome`].
    /// Assertion/validation errors never reach an Outcome, so they fall back to `"internal"` here.
    pub fn category(&self) -> &'static str {
        match self {
            RmeterError::InvalidInput(_) | RmeterError::Validation(_) => "invalid_input",
            RmeterError::Timeout(_) => "timeout",
            RmeterError::ConnectionRefused(_) => "connection_refused",
            RmeterError::ConnectionLost(_) | RmeterError::WebSocket(_) => "connection_lost",
            RmeterError::ResolveFailed(_) => "resolve_failed",
            RmeterError::TlsError(_) => "tls_error",
            RmeterError::ProtocolError(_) => "protocol_error",
            RmeterError::NoConnection(_) => "no_connection",
            RmeterError::NoEndpoint(_) => "no_endpoint",
            RmeterError::Cancelled => "cancelled",
            RmeterError::Http(_) | RmeterError::Io(_) => "io_error",
            _ => "internal",
        }
    }
}
