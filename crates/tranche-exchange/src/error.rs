//! Exchange error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    /// Exchange rejected the request (`{"code": .., "msg": ..}` body).
    #[error("Exchange API error {code}: {msg}")]
    Api { code: i64, msg: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Unexpected response: {0}")]
    Parse(String),

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;
