//! Errors surfaced to clients of the interaction core

use hangout_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Unauthenticated")]
    Unauthenticated,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Dispatcher is shut down")]
    Closed,
}

impl ServiceError {
    /// Stable error code for the client surface
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Unauthenticated => "unauthenticated",
            ServiceError::Closed => "unavailable",
            ServiceError::Store(err) => match err {
                StoreError::Validation(_) => "validation",
                StoreError::InvalidParticipant(_) => "invalid_participant",
                StoreError::InvalidOperation(_) => "invalid_operation",
                StoreError::PermissionDenied(_) => "permission_denied",
                StoreError::NotFound(_) => "not_found",
                StoreError::Unavailable(_) => "unavailable",
                StoreError::Serialization(_) => "internal",
            },
        }
    }

    /// Whether retrying the same request later may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Store(err) => err.is_transient(),
            ServiceError::Unauthenticated | ServiceError::Closed => false,
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(ServiceError::Unauthenticated.code(), "unauthenticated");
        let denied = ServiceError::from(StoreError::PermissionDenied("x".into()));
        assert_eq!(denied.code(), "permission_denied");
        assert!(!denied.is_transient());
    }
}
