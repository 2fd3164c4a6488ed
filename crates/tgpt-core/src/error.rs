//! Error types for tgpt-core

use thiserror::Error;

/// Main error type for tgpt-core
#[derive(Error, Debug)]
pub enum Error {
    /// A storage backend failed; `operation` names what the session was doing.
    #[error("storage error during {operation}: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("LLM API error: {0}")]
    Llm(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The model completed but its price is unknown, so the exchange is dropped.
    #[error("cost lookup failed: model '{model}' not found in the price table")]
    PriceNotFound { model: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap a backend error with the session operation that triggered it.
    pub fn storage(operation: &'static str, source: Error) -> Self {
        Self::Storage {
            operation,
            source: Box::new(source),
        }
    }
}

/// Result type alias for tgpt-core
pub type Result<T> = std::result::Result<T, Error>;
