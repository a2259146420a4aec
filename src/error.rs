//! Error types for presence-hall
//!
//! This module defines the error type returned by the public `Hall` operations.
//! Uses `thiserror` for ergonomic error handling with automatic `Display` and
//! `Error` trait implementations. Store-level failures live in
//! [`crate::store::StoreError`] and are wrapped by [`HallError::Store`].

use thiserror::Error;

use crate::store::StoreError;

/// The primary error type for presence-hall operations.
#[derive(Error, Debug)]
pub enum HallError {
    /// Configuration-related errors (invalid registry name, zero intervals, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Entry name rejected before reaching the store (empty, too long)
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// Register was called for a name that is currently alive
    #[error("Name exists: {0}")]
    NameExists(String),

    /// Any failure reported by the store adapter
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// An operation was called before `Hall::init`
    #[error("Hall is not initialized")]
    NotInitialized,

    /// The heartbeat queue has been closed by shutdown
    #[error("Heartbeat queue closed")]
    QueueClosed,

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized `Result` type for presence-hall operations.
pub type Result<T> = std::result::Result<T, HallError>;
