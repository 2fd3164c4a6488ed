//! Error types for tgpt-telegram

use thiserror::Error;

/// tgpt-telegram error type
#[derive(Error, Debug)]
pub enum TelegramError {
    #[error("Teloxide error: {0}")]
    Teloxide(#[from] teloxide::ApiError),

    #[error("Request error: {0}")]
    Request(String),
}

impl From<teloxide::RequestError> for TelegramError {
    fn from(err: teloxide::RequestError) -> Self {
        match err {
            teloxide::RequestError::Api(api_err) => TelegramError::Teloxide(api_err),
            _ => TelegramError::Request(err.to_string()),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, TelegramError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_errors_keep_their_kind() {
        let err = TelegramError::from(teloxide::RequestError::Api(teloxide::ApiError::BotBlocked));
        assert!(matches!(err, TelegramError::Teloxide(teloxide::ApiError::BotBlocked)));
    }
}
