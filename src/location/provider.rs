use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::LocationError;
use crate::models::location::LocationFix;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
    /// The platform grants location access without an explicit prompt.
    NotRequired,
}

impl PermissionStatus {
    /// Location is usable when either the fine or the coarse grant was given.
    pub fn from_grants(fine: bool, coarse: bool) -> Self {
        if fine || coarse {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        }
    }

    pub fn allows_location(self) -> bool {
        match self {
            PermissionStatus::Granted | PermissionStatus::NotRequired => true,
            PermissionStatus::Denied => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accuracy {
    Low,
    High,
}

/// Which positioning backend serves a request, on platforms that offer more than one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Default,
    Alternate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixRequest {
    pub accuracy: Accuracy,
    pub timeout: Duration,
    /// Oldest cached fix the provider may answer with. Zero forces a fresh reading.
    pub max_age: Duration,
    pub backend: Backend,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WatchOptions {
    pub accuracy: Accuracy,
    pub distance_filter_m: f64,
    pub interval: Duration,
    pub fastest_interval: Duration,
    pub backend: Backend,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            accuracy: Accuracy::High,
            distance_filter_m: 10.0,
            interval: Duration::from_millis(5_000),
            fastest_interval: Duration::from_millis(3_000),
            backend: Backend::Default,
        }
    }
}

/// Raw failure codes reported by platform providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorCode {
    PermissionDenied,
    PositionUnavailable,
    Timeout,
    Unrecognized(i32),
}

impl ProviderErrorCode {
    pub fn from_raw(code: i32) -> Self {
        match code {
            1 => ProviderErrorCode::PermissionDenied,
            2 => ProviderErrorCode::PositionUnavailable,
            3 => ProviderErrorCode::Timeout,
            other => ProviderErrorCode::Unrecognized(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    pub code: ProviderErrorCode,
    pub message: String,
}

impl ProviderError {
    pub fn new(code: ProviderErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn timeout() -> Self {
        Self::new(ProviderErrorCode::Timeout, "location request timed out")
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::PositionUnavailable, message)
    }
}

impl From<ProviderError> for LocationError {
    fn from(err: ProviderError) -> Self {
        match err.code {
            ProviderErrorCode::PermissionDenied => LocationError::PermissionDenied,
            ProviderErrorCode::PositionUnavailable => LocationError::Unavailable,
            ProviderErrorCode::Timeout => LocationError::Timeout,
            ProviderErrorCode::Unrecognized(_) if err.message.trim().is_empty() => {
                LocationError::Other("Unknown error".to_string())
            }
            ProviderErrorCode::Unrecognized(_) => LocationError::Other(err.message),
        }
    }
}

pub type FixReceiver = mpsc::Receiver<Result<LocationFix, ProviderError>>;

/// Platform position source.
#[async_trait]
pub trait PositionProvider: Send + Sync {
    /// Prompts for (or reports) location permission.
    async fn request_permission(&self) -> PermissionStatus;

    fn has_alternate_backend(&self) -> bool {
        false
    }

    async fn current_position(&self, request: &FixRequest) -> Result<LocationFix, ProviderError>;

    /// Starts a continuous feed. Dropping the receiver stops it.
    async fn watch_position(&self, options: &WatchOptions) -> Result<FixReceiver, ProviderError>;
}
