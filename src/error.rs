use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScanError>;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Source {source_name} unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    #[error("Source {source_name} rate limited the request")]
    SourceRateLimited { source_name: String },

    #[error("Source {source_name} returned a malformed response: {reason}")]
    SourceMalformed { source_name: String, reason: String },

    #[error("Scan engine failure: {0}")]
    ScanEngineFailure(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Timeout occurred during {operation}")]
    Timeout { operation: String },

    #[error("Reporting error: {0}")]
    Reporting(String),

    #[error("Server error: {0}")]
    Server(String),
}

impl From<hyper::Error> for ScanError {
    fn from(err: hyper::Error) -> Self {
        ScanError::Server(err.to_string())
    }
}
