//! Error types for alert dispatch

use std::fmt;

pub type AlertResult<T> = Result<T, AlertError>;

/// Errors surfaced by a dispatcher.
///
/// `Disabled` and `Cooldown` are control-flow sentinels, not failures:
/// callers leave the target row pending and move on.
#[derive(Debug)]
pub enum AlertError {
    /// The target is disabled in configuration
    Disabled,

    /// The alert key is inside its cooldown window
    Cooldown,

    /// Payload template could not be parsed or referenced an unknown field
    Template(String),

    /// Rendered payload is not valid JSON
    InvalidJson(String),

    /// HTTP delivery failed after all attempts; carries the last response
    /// body (or transport error text)
    Http(String),

    /// Callback body could not be parsed into an acknowledgement
    BadAcknowledgement(String),
}

impl fmt::Display for AlertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertError::Disabled => write!(f, "alert target disabled"),
            AlertError::Cooldown => write!(f, "alert suppressed by cooldown"),
            AlertError::Template(msg) => write!(f, "alert template error: {}", msg),
            AlertError::InvalidJson(msg) => write!(f, "rendered payload is not JSON: {}", msg),
            AlertError::Http(msg) => write!(f, "alert delivery failed: {}", msg),
            AlertError::BadAcknowledgement(msg) => {
                write!(f, "unparseable acknowledgement: {}", msg)
            }
        }
    }
}

impl std::error::Error for AlertError {}

impl AlertError {
    /// Sentinels that callers treat as "nothing to deliver" rather than a
    /// delivery failure.
    pub fn is_suppressed(&self) -> bool {
        matches!(self, AlertError::Disabled | AlertError::Cooldown)
    }
}
