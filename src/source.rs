//! Connection sources
//!
//! A `ConnectionSource` owns the authenticated-session lifecycle for one
//! credential profile bound to one endpoint. The seed session is constructed
//! lazily, exactly once per demand cycle: concurrent callers either observe
//! the already-constructed session or wait for the single in-flight
//! construction to finish and share its outcome.
//!
//! The source applies no retry backoff of its own. A failed construction
//! leaves the slot empty and the next caller retries from scratch; pacing is
//! the rate controller's job.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::profile::CredentialProfile;
use crate::session::{Credential, CredentialProvider, Session};

/// Default per-source capacity
pub const DEFAULT_MAX_POOL_SIZE: usize = 52;

/// Default bound on credential acquisition
pub const DEFAULT_CREDENTIAL_TIMEOUT: Duration = Duration::from_secs(120);

/// Default bound on session establishment
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// The lazily constructed seed session together with the credential that
/// minted it. Disposed as a unit.
struct Seed {
    session: Arc<dyn Session>,
    credential: Arc<dyn Credential>,
}

/// One profile's authenticated-session lifecycle, bound to one endpoint.
pub struct ConnectionSource {
    /// Display identity (`name` or `name@environment`)
    name: String,
    /// Normalized endpoint URL (trailing slash stripped, host case-folded)
    endpoint_url: String,
    /// Per-source capacity limit applied by the pool
    max_pool_size: usize,
    profile: CredentialProfile,
    provider: Arc<dyn CredentialProvider>,
    credential_timeout: Duration,
    connect_timeout: Duration,
    /// Construction lock and seed slot. `None` is the "not yet built"
    /// sentinel; the slot is re-checked after acquiring the lock so
    /// concurrently blocked callers never construct twice.
    seed: Mutex<Option<Seed>>,
    /// Read-mostly mirror of the seed session, updated only under the
    /// construction lock. Lets the hot path skip the async lock entirely.
    cached: parking_lot::RwLock<Option<Arc<dyn Session>>>,
    disposed: AtomicBool,
    /// Number of sessions successfully constructed, seed and unpooled alike
    constructions: AtomicU64,
}

impl ConnectionSource {
    /// Create a source for the given profile.
    ///
    /// `endpoint_url` must already be normalized (the resolver does this).
    pub fn new(
        profile: CredentialProfile,
        endpoint_url: impl Into<String>,
        provider: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            name: profile.display_name(),
            endpoint_url: endpoint_url.into(),
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            profile,
            provider,
            credential_timeout: DEFAULT_CREDENTIAL_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            seed: Mutex::new(None),
            cached: parking_lot::RwLock::new(None),
            disposed: AtomicBool::new(false),
            constructions: AtomicU64::new(0),
        }
    }

    /// Set the per-source capacity limit
    pub fn with_max_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = size;
        self
    }

    /// Set the credential-acquisition timeout
    pub fn with_credential_timeout(mut self, timeout: Duration) -> Self {
        self.credential_timeout = timeout;
        self
    }

    /// Set the connection-establishment timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Display identity of this source
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Normalized endpoint this source targets
    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    /// Per-source capacity limit
    pub fn max_pool_size(&self) -> usize {
        self.max_pool_size
    }

    /// The profile this source was resolved from
    pub fn profile(&self) -> &CredentialProfile {
        &self.profile
    }

    /// Number of sessions this source has successfully constructed
    pub fn construction_count(&self) -> u64 {
        self.constructions.load(Ordering::Relaxed)
    }

    /// Get the seed session, constructing it if necessary.
    ///
    /// Single-flight: concurrent callers share one construction attempt and
    /// its outcome. On failure the slot stays empty and each caller may
    /// independently retry. `cancel` is honored at every await point and is
    /// never masked by the internal timeouts.
    pub async fn seed_session(&self, cancel: &CancellationToken) -> Result<Arc<dyn Session>> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed {
                what: self.name.clone(),
            });
        }

        // First check, no construction lock.
        if let Some(session) = self.cached.read().clone() {
            if session.is_ready() {
                return Ok(session);
            }
        }

        let mut slot = tokio::select! {
            guard = self.seed.lock() => guard,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };

        // Second check: a concurrently blocked caller may have built it.
        if let Some(seed) = slot.as_ref() {
            if seed.session.is_ready() {
                return Ok(seed.session.clone());
            }
        }
        // Cached but no longer ready: rebuild from scratch.
        if let Some(stale) = slot.take() {
            *self.cached.write() = None;
            warn!(source = %self.name, "cached seed session no longer ready, rebuilding");
            stale.session.dispose().await;
            stale.credential.dispose().await;
        }

        let (session, credential) = self.mint(cancel).await?;
        self.constructions.fetch_add(1, Ordering::Relaxed);
        debug!(
            source = %self.name,
            org = %session.info().org_name,
            "seed session constructed"
        );
        *slot = Some(Seed {
            session: session.clone(),
            credential,
        });
        *self.cached.write() = Some(session.clone());
        Ok(session)
    }

    /// Construct a fresh session outside the seed slot.
    ///
    /// Used when pooling is disabled: the caller owns both halves and must
    /// dispose them itself.
    pub async fn mint_unpooled(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(Arc<dyn Session>, Arc<dyn Credential>)> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed {
                what: self.name.clone(),
            });
        }
        let minted = self.mint(cancel).await?;
        self.constructions.fetch_add(1, Ordering::Relaxed);
        Ok(minted)
    }

    /// One construction attempt: credential acquisition bounded by
    /// `credential_timeout`, then session establishment bounded by
    /// `connect_timeout`, each raced against caller cancellation.
    async fn mint(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(Arc<dyn Session>, Arc<dyn Credential>)> {
        let credential = tokio::select! {
            result = timeout(self.credential_timeout, self.provider.acquire_credential(&self.profile)) => {
                match result {
                    Ok(inner) => inner?,
                    Err(_) => {
                        return Err(Error::CredentialTimeout {
                            source_name: self.name.clone(),
                            timeout: self.credential_timeout,
                        })
                    }
                }
            }
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };

        let session = tokio::select! {
            result = timeout(self.connect_timeout, credential.create_session(&self.endpoint_url)) => {
                match result {
                    Ok(inner) => match inner {
                        Ok(session) => session,
                        Err(e) => {
                            credential.dispose().await;
                            return Err(e);
                        }
                    },
                    Err(_) => {
                        credential.dispose().await;
                        return Err(Error::ConnectionTimeout {
                            source_name: self.name.clone(),
                            timeout: self.connect_timeout,
                        });
                    }
                }
            }
            _ = cancel.cancelled() => {
                credential.dispose().await;
                return Err(Error::Cancelled);
            }
        };

        if !session.is_ready() {
            let message = session
                .last_error()
                .unwrap_or_else(|| "session reported not ready".to_string());
            session.dispose().await;
            credential.dispose().await;
            return Err(Error::connection_failed(&self.name, message));
        }

        Ok((session, credential))
    }

    /// Drop the cached seed session so the next demand reconstructs it.
    ///
    /// Called after the caller independently detects that the session's
    /// authentication has expired or been rejected. Shares the construction
    /// lock with `seed_session`, so an in-flight construction finishes
    /// before its result is cleared.
    ///
    /// Invalidation affects future lookups only: session references already
    /// handed out stay usable until their holders drop them.
    pub async fn invalidate(&self) {
        let mut slot = self.seed.lock().await;
        *self.cached.write() = None;
        if let Some(seed) = slot.take() {
            debug!(source = %self.name, "seed session invalidated");
            seed.session.dispose().await;
            seed.credential.dispose().await;
        }
    }

    /// Dispose the source. Idempotent; the live session and credential are
    /// disposed exactly once.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut slot = self.seed.lock().await;
        *self.cached.write() = None;
        if let Some(seed) = slot.take() {
            seed.session.dispose().await;
            seed.credential.dispose().await;
        }
        debug!(source = %self.name, "source disposed");
    }
}

impl std::fmt::Debug for ConnectionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSource")
            .field("name", &self.name)
            .field("endpoint_url", &self.endpoint_url)
            .field("max_pool_size", &self.max_pool_size)
            .field("disposed", &self.disposed.load(Ordering::Relaxed))
            .finish()
    }
}
