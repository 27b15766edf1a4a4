//! Trade store error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Missing configuration: {0}")]
    MissingConfig(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Store rejected request: status={status}, body={body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid record for {symbol}: {reason}")]
    InvalidRecord { symbol: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
