//! Outbox error types.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the store and the submission path.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// The store file could not be opened, or SQLite refused it.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A read or write against the store failed.
    #[error("Storage I/O error: {0}")]
    StorageIo(#[from] rusqlite::Error),

    /// The transport failed to deliver a message.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Stored content could not be parsed for presentation.
    #[error("Malformed record {id}: {reason}")]
    MalformedRecord { id: String, reason: String },

    /// A background task panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type alias using OutboxError.
pub type OutboxResult<T> = Result<T, OutboxError>;

/// Errors raised by a delivery transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The remote end answered but refused the message.
    #[error("Rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error talking to a local delivery program
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The delivery program exited unsuccessfully.
    #[error("Delivery program exited with {status}: {stderr}")]
    Process { status: String, stderr: String },

    /// The attempt did not finish within the configured timeout.
    #[error("Timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// No To, Cc or Bcc address could be read from the message.
    #[error("Message has no recipients")]
    NoRecipients,

    /// The transport is missing required configuration.
    #[error("Transport not configured: {0}")]
    NotConfigured(String),
}
