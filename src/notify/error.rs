//! Error types for the notification service

use std::fmt;

use crate::store::StoreError;

pub type NotifyResult<T> = Result<T, NotifyError>;

#[derive(Debug)]
pub enum NotifyError {
    /// No notification with the requested id
    NotFound,

    /// The notification was already acknowledged (or is terminal)
    AlreadyAcknowledged(String),

    /// No dispatcher is registered for the requested target type
    UnknownTargetType(String),

    /// Callback body could not be parsed into an acknowledgement
    BadCallback(String),

    /// Underlying store failure
    Store(StoreError),
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyError::NotFound => write!(f, "notification not found"),
            NotifyError::AlreadyAcknowledged(msg) => write!(f, "{}", msg),
            NotifyError::UnknownTargetType(t) => write!(f, "no handler for target type {}", t),
            NotifyError::BadCallback(msg) => write!(f, "bad callback body: {}", msg),
            NotifyError::Store(err) => write!(f, "store error: {}", err),
        }
    }
}

impl std::error::Error for NotifyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NotifyError::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for NotifyError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => NotifyError::NotFound,
            StoreError::Conflict(msg) => NotifyError::AlreadyAcknowledged(msg),
            other => NotifyError::Store(other),
        }
    }
}
