//! Common error types for Warren components.

use thiserror::Error;

/// Result alias used by the coordination and reconciliation layers
pub type WarrenResult<T> = Result<T, WarrenError>;

/// Common errors across Warren components
#[derive(Debug, Error)]
pub enum WarrenError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Coordination service unreachable or failed the request
    #[error("Coordination backend error: {0}")]
    Backend(String),

    /// Timeout talking to an external service
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// A retryable operation failed on every attempt
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<WarrenError>,
    },

    /// No cluster cookie in the coordination service at prestart
    #[error("Cluster cookie is not present in the coordination service")]
    MissingSecret,

    /// Broker control command failed
    #[error("Control plane error: {0}")]
    ControlPlane(String),

    /// Broker status endpoint failed
    #[error("Status provider error: {0}")]
    Status(String),

    /// Local cookie installation failed
    #[error("Secret install error: {0}")]
    SecretInstall(String),

    /// The fleet lock could not be given back
    #[error("Failed to release cluster lock: {0}")]
    LockRelease(String),

    /// The local broker never reported alive during bootstrap
    #[error("Broker did not become alive after {attempts} checks")]
    BootstrapTimeout { attempts: u32 },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl WarrenError {
    /// Returns true if this error should be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::Timeout(_))
    }

    /// Returns true if the reconciler must stop and hand over to the supervisor
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::RetriesExhausted { .. }
                | Self::MissingSecret
                | Self::LockRelease(_)
                | Self::BootstrapTimeout { .. }
                | Self::Config(_)
        )
    }
}
