use crate::application::retry::RetryPolicyError;
use crate::domain::payment::PaymentStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Config error: {0}")]
    ConfigError(String),
    #[error("Retry policy error: {0}")]
    PolicyError(#[from] RetryPolicyError),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Payment already {from}, cannot move to {to}")]
    TerminalStateError {
        from: PaymentStatus,
        to: PaymentStatus,
    },
}

pub type Result<T> = std::result::Result<T, PaymentError>;
