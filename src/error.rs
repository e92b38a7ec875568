use rust_decimal::Decimal;
use thiserror::Error;

/// Main error type for the DCA bot
#[derive(Error, Debug)]
pub enum DcaError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Validation errors (thresholds, purchases, amounts)
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Durable log errors
    #[error("Durable log error: {0}")]
    Log(String),

    // Exchange errors
    #[error("Exchange error: {0}")]
    Exchange(String),

    #[error("Insufficient {currency} balance: required {required}, available {available}")]
    InsufficientBalance {
        currency: String,
        required: Decimal,
        available: Decimal,
    },

    // Journal / state machine errors
    #[error("Trade intent not found: {0}")]
    IntentNotFound(String),

    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Operation cancelled")]
    Cancelled,

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for DcaError
pub type Result<T> = std::result::Result<T, DcaError>;

impl DcaError {
    /// Errors that leave state untouched and are worth retrying on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DcaError::Io(_) | DcaError::Http(_) | DcaError::Exchange(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_insufficient_balance_message() {
        let err = DcaError::InsufficientBalance {
            currency: "USDT".to_string(),
            required: dec!(100),
            available: dec!(42.5),
        };
        assert_eq!(
            err.to_string(),
            "Insufficient USDT balance: required 100, available 42.5"
        );
        assert!(!err.is_transient());
    }

    #[test]
    fn test_exchange_error_is_transient() {
        assert!(DcaError::Exchange("timeout".into()).is_transient());
        assert!(!DcaError::Cancelled.is_transient());
    }
}
