use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum LiquidatorError {
    /// Configuration errors — the only class that is fatal at startup
    #[error("Config Error: {0}")]
    ConfigError(String),

    /// Order feed REST errors (snapshot fetch/decode)
    #[error("Feed Error: {0}")]
    FeedError(String),

    /// WebSocket connection/data issues on a push channel
    #[error("WebSocket Error: {0}")]
    WebSocketError(String),

    /// Oracle read or subscription errors
    #[error("Oracle Error: {0}")]
    OracleError(String),

    /// Persistent order store errors
    #[error("Storage Error: {0}")]
    StorageError(String),

    /// Matching service errors
    #[error("Matching Error: {0}")]
    MatchingError(String),

    /// Trade submission/status errors from the execution service
    #[error("Execution Error: {0}")]
    ExecutionError(String),

    /// Parsing errors for wire data (hex answers, decimal fields)
    #[error("Parse Error: {0}")]
    ParseError(String),
}

impl LiquidatorError {
    /// Steady-state errors are absorbed and retried on the next cycle;
    /// only configuration errors should stop the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LiquidatorError::ConfigError(_))
    }
}
