use thiserror::Error;

use leadhub_types::models::ChannelStatus;

/// Failures of channel lifecycle operations.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The caller's identity is missing or no longer maps to an account
    #[error("unauthenticated")]
    Unauthenticated,

    /// A required field is missing or malformed
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The channel does not exist or belongs to someone else
    #[error("channel not found")]
    NotFound,

    /// A live attempt or connection already exists for this address
    #[error("channel is already {0}")]
    DuplicateAttempt(ChannelStatus),

    /// The record store rejected a read or write
    #[error("store failure: {0}")]
    StoreFailure(#[from] anyhow::Error),
}

impl ConnectError {
    /// Stable machine-readable kind, used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::InvalidInput(_) => "invalid_input",
            Self::NotFound => "not_found",
            Self::DuplicateAttempt(_) => "duplicate_attempt",
            Self::StoreFailure(_) => "store_failure",
        }
    }
}
