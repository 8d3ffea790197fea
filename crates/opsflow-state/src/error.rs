//! State store error types

use crate::model::OperationStatus;
use thiserror::Error;

/// State store errors
///
/// Every variant is fatal to the caller; the store never retries or
/// swallows a failure.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Resource not found: {0}")]
    UnknownResource(String),

    #[error("A resource cannot depend on itself: {0}")]
    SelfDependency(String),

    #[error("Operation not found: {0}")]
    NotFound(String),

    #[error("Invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: OperationStatus,
        to: OperationStatus,
    },

    #[error("Lock on {key} is held by operation {holder}")]
    LockHeld { key: String, holder: String },

    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
