//! Error types shared by every layer of the bot

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotError {
    /// Exchange answered with a non-success status code
    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    /// Not enough candles for a rolling computation
    #[error("Insufficient data: need {needed} candles, have {available}")]
    InsufficientData { needed: usize, available: usize },

    /// Side or trend value that is neither long nor short
    #[error("Invalid direction: {0}")]
    InvalidDirection(String),

    /// Order submission failed, carries the exchange message
    #[error("Order rejected: {0}")]
    OrderRejected(String),

    /// Both race candidates vanished from the open-order list on the same poll
    #[error("Fill race ambiguous: {first} and {second} both left the book")]
    RaceAmbiguous { first: String, second: String },

    /// A tracked order was asked to leave a terminal state
    #[error("Order {order_id} cannot move from {from} to {to}")]
    InvalidTransition {
        order_id: String,
        from: String,
        to: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl BotError {
    /// True for errors raised by the exchange boundary rather than by local logic
    pub fn is_exchange_failure(&self) -> bool {
        matches!(
            self,
            BotError::Api { .. } | BotError::Http(_) | BotError::Decode(_) | BotError::OrderRejected(_)
        )
    }
}

impl From<serde_json::Error> for BotError {
    fn from(e: serde_json::Error) -> Self {
        BotError::Decode(e.to_string())
    }
}

impl From<std::num::ParseFloatError> for BotError {
    fn from(e: std::num::ParseFloatError) -> Self {
        BotError::Decode(e.to_string())
    }
}

impl From<std::num::ParseIntError> for BotError {
    fn from(e: std::num::ParseIntError) -> Self {
        BotError::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_message() {
        let err = BotError::Api {
            code: 10001,
            message: "params error".to_string(),
        };
        assert_eq!(err.to_string(), "API error 10001: params error");
        assert!(err.is_exchange_failure());
    }

    #[test]
    fn test_local_errors_are_not_exchange_failures() {
        let err = BotError::InsufficientData {
            needed: 15,
            available: 3,
        };
        assert!(!err.is_exchange_failure());
        assert!(err.to_string().contains("need 15"));
    }
}
