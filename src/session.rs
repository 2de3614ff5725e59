//! Session and credential-provider capability traits
//!
//! Core abstractions for authenticated platform access:
//! - `CredentialProvider`: exchanges a profile's credentials for a token and
//!   opens authenticated sessions with it
//! - `Session`: the authenticated-session surface the pool hands to callers
//! - `SessionInfo`: identity metadata captured at construction so callers
//!   never need a second round trip to learn who they are connected as
//!
//! The provider seam hides whichever OAuth/device-code/certificate/managed-
//! identity flow the profile specifies. Its fast non-interactive path is
//! expressed as an ordinary `Result`; an interactive fallback, when the
//! provider supports one, happens inside `acquire_credential` and is never
//! signaled through a special error variant.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::profile::CredentialProfile;

/// Identity metadata for an authenticated session.
///
/// Captured once during construction and exposed to callers without another
/// round trip to the platform.
#[derive(Debug, Clone, Default)]
pub struct SessionInfo {
    /// Display name of the connected organization
    pub org_name: String,
    /// Unique identifier of the connected organization
    pub org_id: String,
    /// Identifier of the environment (region/instance) serving the org
    pub environment_id: String,
}

/// An authenticated session against the platform endpoint.
///
/// Failure is observable post-hoc: `is_ready` plus `last_error` let a caller
/// inspect a session it received without catching anything. Implementations
/// must be `Debug` so pooled sessions and leases can be inspected in test
/// assertions and log output.
#[async_trait]
pub trait Session: Send + Sync + std::fmt::Debug {
    /// Whether the session authenticated successfully and is usable
    fn is_ready(&self) -> bool;

    /// The most recent error observed on this session, if any
    fn last_error(&self) -> Option<String>;

    /// Identity metadata captured at construction
    fn info(&self) -> &SessionInfo;

    /// Reusable-account hint populated by the provider after a successful
    /// authentication. The external profile-storage layer uses it to speed
    /// up future silent authentication; the pool only plumbs it through.
    fn account_hint(&self) -> Option<String> {
        None
    }

    /// Release any platform-side resources held by this session. Idempotent.
    async fn dispose(&self);
}

/// A minted credential (token or equivalent) that can open sessions.
#[async_trait]
pub trait Credential: Send + Sync {
    /// Open an authenticated session against the given normalized endpoint
    async fn create_session(&self, endpoint_url: &str) -> Result<Arc<dyn Session>>;

    /// Release the credential. Idempotent.
    async fn dispose(&self);
}

/// Capability that turns a profile into authenticated sessions.
///
/// Construction is two-phase so the pool can bound each phase with its own
/// timeout: credential acquisition (token exchange, possibly interactive)
/// and session establishment (the call against the platform endpoint).
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Exchange the profile's credentials for a token
    async fn acquire_credential(&self, profile: &CredentialProfile) -> Result<Arc<dyn Credential>>;
}
