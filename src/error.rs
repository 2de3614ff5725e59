//! Error types for orgpool
//!
//! Provides granular error classification for proper retry handling:
//! - Retriable errors (throttling, lease timeout)
//! - Non-retriable errors (configuration, credential failures)
//!
//! Every timeout and connection failure names the offending source so that
//! failures in a multi-source pool are attributable to a single profile.

use std::time::Duration;
use thiserror::Error;

/// Result type for orgpool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Invalid construction-time configuration (not retriable)
    Configuration,
    /// Credential acquisition failed or timed out
    Credential,
    /// Session establishment failed or timed out (retriable)
    Connection,
    /// Remote platform rejected the request due to rate limits (retriable)
    Throttled,
    /// No pool slot became available in time (retriable with backoff)
    LeaseTimeout,
    /// Pool or source already disposed (not retriable)
    Disposed,
    /// Caller cancelled the operation
    Cancelled,
}

impl ErrorCategory {
    /// Whether errors in this category are generally retriable
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection | Self::Throttled | Self::LeaseTimeout)
    }
}

/// Main error type for orgpool
#[derive(Error, Debug)]
pub enum Error {
    /// Construction-time configuration error (empty source list, mismatched
    /// endpoints, missing collaborators). Fails fast; nothing partially works.
    #[error("configuration error: {message}")]
    Configuration {
        /// What was wrong with the configuration
        message: String,
    },

    /// No profile with the given identifier exists in the profile store
    #[error("profile not found: {name}")]
    ProfileNotFound {
        /// The identifier that failed to resolve
        name: String,
    },

    /// Credential acquisition exceeded its timeout
    #[error("credential acquisition for '{source_name}' timed out after {timeout:?}; the identity provider did not respond in time")]
    CredentialTimeout {
        /// Display name of the source whose credential timed out
        source_name: String,
        /// The configured credential-acquisition timeout
        timeout: Duration,
    },

    /// Session establishment exceeded its timeout
    #[error("connecting '{source_name}' timed out after {timeout:?}; the endpoint did not complete session setup in time")]
    ConnectionTimeout {
        /// Display name of the source whose connection timed out
        source_name: String,
        /// The configured connection-establishment timeout
        timeout: Duration,
    },

    /// Session construction failed for a reason other than a timeout
    #[error("failed to establish a session for '{source_name}': {message}")]
    ConnectionFailed {
        /// Display name of the source that failed
        source_name: String,
        /// What went wrong
        message: String,
        /// Underlying cause, when the provider supplied one
        #[source]
        source_err: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The remote platform throttled a request on this source
    #[error("'{source_name}' was throttled by the remote platform{}", retry_after.map(|d| format!(" (retry after {d:?})")).unwrap_or_default())]
    Throttled {
        /// Display name of the throttled source
        source_name: String,
        /// Server-supplied retry-after hint, if any
        retry_after: Option<Duration>,
    },

    /// No source had a free slot before the lease timeout elapsed
    #[error("no pooled session became available within {timeout:?}")]
    LeaseTimeout {
        /// The configured lease timeout
        timeout: Duration,
    },

    /// Operation attempted on a disposed pool or source
    #[error("{what} has been disposed")]
    Disposed {
        /// What was disposed (pool or the source's display name)
        what: String,
    },

    /// The caller's cancellation token fired
    #[error("operation cancelled by caller")]
    Cancelled,
}

impl Error {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a connection failure for a named source
    pub fn connection_failed(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            source_name: source_name.into(),
            message: message.into(),
            source_err: None,
        }
    }

    /// Classify this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration { .. } | Self::ProfileNotFound { .. } => {
                ErrorCategory::Configuration
            }
            Self::CredentialTimeout { .. } => ErrorCategory::Credential,
            Self::ConnectionTimeout { .. } | Self::ConnectionFailed { .. } => {
                ErrorCategory::Connection
            }
            Self::Throttled { .. } => ErrorCategory::Throttled,
            Self::LeaseTimeout { .. } => ErrorCategory::LeaseTimeout,
            Self::Disposed { .. } => ErrorCategory::Disposed,
            Self::Cancelled => ErrorCategory::Cancelled,
        }
    }

    /// Whether the operation that produced this error may be retried
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }
}
