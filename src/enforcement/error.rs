//! Error types for the enforcement system
//!
//! This module defines the errors raised by the platform client, the removal
//! pipeline and the scan coordinator.

use thiserror::Error;

/// Errors reported by the chat platform client
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    /// The user or member does not exist (or is no longer in the guild)
    #[error("Not found: {0}")]
    NotFound(String),

    /// The bot lacks the permission required for the call
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Rate limits, timeouts and other failures worth retrying
    #[error("Transient platform error: {0}")]
    Transient(String),

    /// Anything else the platform reported
    #[error("Platform error: {0}")]
    Other(String),
}

impl PlatformError {
    /// Whether the error means the target simply isn't there
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<serenity::Error> for PlatformError {
    fn from(error: serenity::Error) -> Self {
        use serenity::Error as SerenityError;
        use serenity::http::HttpError;

        match &error {
            SerenityError::Http(HttpError::UnsuccessfulRequest(response)) => {
                match response.status_code.as_u16() {
                    403 => Self::Permission(response.error.message.clone()),
                    404 => Self::NotFound(response.error.message.clone()),
                    429 | 500..=599 => Self::Transient(response.error.message.clone()),
                    _ => Self::Other(response.error.message.clone()),
                }
            }
            SerenityError::Http(HttpError::Request(_)) => Self::Transient(error.to_string()),
            _ => Self::Other(error.to_string()),
        }
    }
}

/// Why a single removal attempt (or the whole pipeline) failed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemovalError {
    /// The removal call itself failed
    #[error("Removal call failed: {0}")]
    RemovalApi(String),

    /// The removal call was rejected for lack of permission
    #[error("Missing permission to remove member: {0}")]
    Permission(String),

    /// The removal call reported success but the member is still present
    #[error("Member still present after removal")]
    VerificationMismatch,

    /// Membership could not be confirmed after the removal call
    #[error("Could not verify removal: {0}")]
    VerificationApi(String),
}

impl From<PlatformError> for RemovalError {
    fn from(error: PlatformError) -> Self {
        match error {
            PlatformError::Permission(message) => Self::Permission(message),
            other => Self::RemovalApi(other.to_string()),
        }
    }
}

/// Scan-level failures; these abort a scan but never a per-user flow
#[derive(Debug, Error)]
pub enum ScanError {
    /// The member listing could not be fetched
    #[error("Failed to list members of guild {guild_id}: {source}")]
    Listing {
        guild_id: u64,
        #[source]
        source: PlatformError,
    },

    /// A scan for the guild is already in flight
    #[error("A scan is already running for guild {0}")]
    AlreadyRunning(u64),
}

/// Result type for scan operations
pub type ScanResult<T> = Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = PlatformError::NotFound("member 42".to_string());
        assert_eq!(error.to_string(), "Not found: member 42");

        let error = RemovalError::VerificationMismatch;
        assert_eq!(error.to_string(), "Member still present after removal");

        let error = ScanError::AlreadyRunning(7);
        assert_eq!(error.to_string(), "A scan is already running for guild 7");
    }

    #[test]
    fn test_platform_error_maps_to_removal_error() {
        let permission = RemovalError::from(PlatformError::Permission("Missing Permissions".into()));
        assert_eq!(
            permission,
            RemovalError::Permission("Missing Permissions".to_string())
        );

        let transient = RemovalError::from(PlatformError::Transient("rate limited".into()));
        assert!(matches!(transient, RemovalError::RemovalApi(msg) if msg.contains("rate limited")));
    }
}
