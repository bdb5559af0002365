use thiserror::Error;

use crate::models::ride::RideStatus;

/// A position failure, already mapped into one of the user-facing categories.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LocationError {
    #[error(
        "Location permission denied. Please enable location access in your device settings."
    )]
    PermissionDenied,

    #[error(
        "Location not available. Please check that location services are enabled and you have a clear view of the sky if outdoors."
    )]
    Unavailable,

    #[error(
        "Location request timed out. Please ensure you have a good GPS signal and try again."
    )]
    Timeout,

    #[error("Location error: {0}")]
    Other(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("document not found")]
    NotFound,

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("{0}")]
    Backend(String),

    #[error("failed to decode document: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Location(#[from] LocationError),

    #[error("User not authenticated")]
    NotAuthenticated,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("{0}")]
    Store(String),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: RideStatus, to: RideStatus },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl AppError {
    /// True when a conditional write lost against a concurrent writer.
    pub fn is_already_taken(&self) -> bool {
        matches!(self, AppError::PreconditionFailed(_))
    }

    pub fn user_message(&self) -> String {
        match self {
            AppError::Location(err) => err.to_string(),
            AppError::NotAuthenticated => "User not authenticated".to_string(),
            AppError::NotFound(msg) => msg.clone(),
            AppError::PreconditionFailed(_) => "This request is no longer available.".to_string(),
            AppError::Store(msg) => msg.clone(),
            AppError::InvalidTransition { .. } => "This request is no longer available.".to_string(),
            AppError::Config(msg) => msg.clone(),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => AppError::NotFound("document not found".to_string()),
            StoreError::PreconditionFailed(msg) => AppError::PreconditionFailed(msg),
            StoreError::Backend(msg) => AppError::Store(msg),
            StoreError::Decode(msg) => AppError::Store(format!("failed to decode document: {msg}")),
        }
    }
}
