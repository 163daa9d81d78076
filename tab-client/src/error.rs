//! Client error types

use thiserror::Error;

/// Client error type
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level failure (connect, socket error)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Send attempted while the transport is closed
    #[error("Not connected")]
    NotConnected,

    /// Payment provider HTTP failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Payment failed or was never confirmed
    #[error("Payment error: {0}")]
    Payment(String),

    /// Session is in the wrong state for the requested transition
    #[error("Session error: {0}")]
    Session(String),
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
