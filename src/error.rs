use thiserror::Error;

/// Main error type for the trading engine
#[derive(Error, Debug)]
pub enum QuorumError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    Validation(String),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Exchange errors
    #[error("Exchange error [{code}]: {msg}")]
    Exchange { code: String, msg: String },

    #[error("Market data unavailable: {0}")]
    MarketDataUnavailable(String),

    #[error("Stale data: {0}")]
    StaleData(String),

    #[error("Order submission failed: {0}")]
    OrderSubmission(String),

    // Model errors
    #[error("Model call failed: {0}")]
    Llm(String),

    #[error("Malformed model output: {0}")]
    LlmParse(String),

    // Risk management errors
    #[error("Risk limit exceeded: {0}")]
    RiskRejected(String),

    #[error("Circuit breaker tripped: {0}")]
    CircuitBreakerTripped(String),

    // Crypto/signing errors
    #[error("Signature error: {0}")]
    Signature(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for QuorumError
pub type Result<T> = std::result::Result<T, QuorumError>;
