use thiserror::Error;
use vicinity::error::{FabricError, MemoryError, VicinityError};

/// Failures of the retail flows.
#[derive(Debug, Clone, Error)]
pub enum RetailError {
    #[error("Unknown product: {0}")]
    UnknownProduct(String),

    #[error("Insufficient stock for {product}: {available} available, {requested} requested")]
    InsufficientStock {
        product: String,
        available: u32,
        requested: u32,
    },

    #[error("Invalid payment amount: {0}")]
    InvalidAmount(u64),

    #[error("Malformed {event_type}: missing {field}")]
    MissingField { event_type: String, field: &'static str },

    #[error("No answer to {0}")]
    NoAnswer(String),

    #[error(transparent)]
    Vicinity(#[from] VicinityError),
}

impl From<FabricError> for RetailError {
    fn from(e: FabricError) -> Self {
        RetailError::Vicinity(e.into())
    }
}

impl From<MemoryError> for RetailError {
    fn from(e: MemoryError) -> Self {
        RetailError::Vicinity(e.into())
    }
}

impl From<serde_json::Error> for RetailError {
    fn from(e: serde_json::Error) -> Self {
        RetailError::Vicinity(e.into())
    }
}
