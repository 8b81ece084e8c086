//! Error types for store operations

use sea_orm::DbErr;
use thiserror::Error;

/// Errors returned by the conversation, message, read-state and notification stores.
///
/// A creation race that resolves to an existing row is not represented here:
/// it is reported as a normal success carrying the existing id.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid participant: {0}")]
    InvalidParticipant(String),
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Store unavailable: {0}")]
    Unavailable(#[from] DbErr),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether the caller may retry the same request later
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
