//! Connection pool with adaptive admission control
//!
//! Aggregates a fixed set of `ConnectionSource`s behind a single `lease`
//! operation. Admission is gated per source by the lower of the source's
//! `max_pool_size` and the rate controller's current ceiling; when no source
//! has a free slot the caller waits until a lease is released or its
//! cancellation/timeout fires.
//!
//! Locking is scoped per source: leasing against different sources never
//! contends. Statistics are plain atomics and snapshot without touching the
//! admission path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::rate::AdaptiveRateController;
use crate::session::{Credential, Session};
use crate::source::ConnectionSource;
use crate::throttle::ThrottleTracker;

/// Pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// When false, pooling is bypassed entirely: every lease constructs a
    /// fresh unpooled session and pre-warming is skipped
    pub enabled: bool,
    /// Number of sources whose seed sessions are pre-warmed in the background
    pub min_pool_size: usize,
    /// Maximum time a lease call waits for a free slot
    pub lease_timeout: Duration,
    /// Bound on joining the pre-warm task during dispose
    pub warmup_join_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_pool_size: 0,
            lease_timeout: Duration::from_secs(30),
            warmup_join_timeout: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable pooling
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the number of pre-warmed sources
    pub fn with_min_pool_size(mut self, size: usize) -> Self {
        self.min_pool_size = size;
        self
    }

    /// Set the lease timeout
    pub fn with_lease_timeout(mut self, timeout: Duration) -> Self {
        self.lease_timeout = timeout;
        self
    }

    /// Set the warmup join bound
    pub fn with_warmup_join_timeout(mut self, timeout: Duration) -> Self {
        self.warmup_join_timeout = timeout;
        self
    }
}

/// Atomic per-source counters, updated lock-free. Creation counts live on
/// the source itself so single-flight construction is counted exactly once.
#[derive(Debug, Default)]
struct AtomicSourceStats {
    leases: AtomicU64,
    throttled: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of one source's counters
#[derive(Debug, Clone, Default)]
pub struct SourceStatistics {
    /// Leases currently held by callers
    pub active_leases: usize,
    /// Admission slots currently free on this source
    pub idle: usize,
    /// Seed/unpooled sessions constructed so far
    pub created: u64,
    /// Throttle signals recorded against this source
    pub throttled: u64,
    /// Failed construction attempts
    pub failed: u64,
}

/// Snapshot of the whole pool's counters, keyed by source name
#[derive(Debug, Clone, Default)]
pub struct PoolStatistics {
    /// Per-source counters
    pub sources: HashMap<String, SourceStatistics>,
    /// Total leases granted over the pool's lifetime
    pub total_leases: u64,
}

/// One source plus its admission state
struct SourceSlot {
    source: Arc<ConnectionSource>,
    active: AtomicUsize,
    stats: AtomicSourceStats,
}

impl SourceSlot {
    /// Reserve an admission slot if `active` is below `allowed`
    fn try_reserve(&self, allowed: usize) -> bool {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < allowed).then_some(active + 1)
            })
            .is_ok()
    }

    fn release(&self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Shared pool internals, referenced by leases
struct PoolInner {
    slots: Vec<Arc<SourceSlot>>,
    tracker: Arc<ThrottleTracker>,
    controller: Arc<AdaptiveRateController>,
    config: PoolConfig,
    /// Wakes waiters when a lease is released or the pool shuts down
    released: Notify,
    disposed: AtomicBool,
    total_leases: AtomicU64,
}

impl PoolInner {
    /// Admission allowance for a slot: the lower of the source's capacity
    /// and the controller's current ceiling
    fn allowed(&self, slot: &SourceSlot) -> usize {
        slot.source
            .max_pool_size()
            .min(self.controller.ceiling(slot.source.name()))
    }

    /// Least-active-first candidate whose active count is under its allowance
    fn pick(&self) -> Option<Arc<SourceSlot>> {
        self.slots
            .iter()
            .filter_map(|slot| {
                let allowed = self.allowed(slot);
                let active = slot.active.load(Ordering::Acquire);
                (active < allowed).then(|| (active, slot))
            })
            .min_by_key(|(active, _)| *active)
            .map(|(_, slot)| slot.clone())
    }
}

/// A session leased from the pool.
///
/// Derefs to the underlying [`Session`]. The admission slot is released when
/// the lease is dropped (or via [`LeasedSession::release`]); feedback about
/// what happened on the session flows back through [`record_success`],
/// [`record_throttled`], and [`invalidate`].
///
/// [`record_success`]: LeasedSession::record_success
/// [`record_throttled`]: LeasedSession::record_throttled
/// [`invalidate`]: LeasedSession::invalidate
pub struct LeasedSession {
    session: Arc<dyn Session>,
    slot: Arc<SourceSlot>,
    inner: Arc<PoolInner>,
    /// Set when pooling is disabled: this lease owns its session and
    /// credential outright and disposes them on release
    unpooled: Option<Arc<dyn Credential>>,
    released: bool,
}

impl LeasedSession {
    /// The authenticated session
    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    /// Display name of the source this lease came from
    pub fn source_name(&self) -> &str {
        self.slot.source.name()
    }

    /// Reusable-account hint from the provider, if it populated one
    pub fn account_hint(&self) -> Option<String> {
        self.session.account_hint()
    }

    /// Record a successful batch and its execution time. Feeds the throttle
    /// tracker and the rate controller.
    pub fn record_success(&self, execution_time: Duration) {
        let name = self.slot.source.name();
        self.inner.tracker.record_success(name, execution_time);
        self.inner.controller.on_success(name, execution_time);
    }

    /// Record a throttling response observed on this session. Feeds the
    /// throttle tracker and drops the rate controller's ceiling.
    pub fn record_throttled(&self, retry_after: Option<Duration>) {
        let name = self.slot.source.name();
        self.slot.stats.throttled.fetch_add(1, Ordering::Relaxed);
        self.inner.tracker.record_throttle(name, retry_after);
        self.inner.controller.on_throttle(name);
    }

    /// Invalidate the source's seed session after an authentication
    /// rejection, so subsequent leases reconstruct a fresh one. This lease's
    /// own session reference stays alive until the lease is released.
    pub async fn invalidate(&self) {
        self.slot.source.invalidate().await;
    }

    /// Release the admission slot explicitly, disposing an unpooled session
    /// inline rather than from the drop handler.
    ///
    /// The slot is freed and waiters are woken before the disposal awaits,
    /// so a caller that cancels this future mid-disposal cannot strand the
    /// slot.
    pub async fn release(mut self) {
        self.released = true;
        let unpooled = self.unpooled.take();
        self.slot.release();
        self.inner.released.notify_waiters();
        if let Some(credential) = unpooled {
            self.session.dispose().await;
            credential.dispose().await;
        }
    }
}

impl std::fmt::Debug for LeasedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeasedSession")
            .field("source", &self.slot.source.name())
            .field("unpooled", &self.unpooled.is_some())
            .finish()
    }
}

impl std::ops::Deref for LeasedSession {
    type Target = dyn Session;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl Drop for LeasedSession {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Some(credential) = self.unpooled.take() {
            let session = self.session.clone();
            // Drop can run outside a runtime (e.g. a lease moved out of
            // `block_on`); disposal is best-effort there.
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        session.dispose().await;
                        credential.dispose().await;
                    });
                }
                Err(_) => {
                    warn!(
                        source = %self.slot.source.name(),
                        "unpooled lease dropped outside a runtime; session disposal skipped"
                    );
                }
            }
        }
        self.slot.release();
        self.inner.released.notify_waiters();
    }
}

/// The connection pool.
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
    /// Pre-warm task handle, joined (with a bound) on dispose
    warmup: Mutex<Option<tokio::task::JoinHandle<()>>>,
    warmup_cancel: CancellationToken,
}

impl ConnectionPool {
    /// Create a pool over the given sources.
    ///
    /// Fails fast with a configuration error when the source list is empty;
    /// a failure here means nothing partially works. When pooling is enabled
    /// and `min_pool_size > 0`, that many sources' seed sessions are
    /// pre-warmed by a background task the pool owns.
    pub fn new(
        sources: Vec<ConnectionSource>,
        tracker: Arc<ThrottleTracker>,
        controller: Arc<AdaptiveRateController>,
        config: PoolConfig,
    ) -> Result<Self> {
        if sources.is_empty() {
            return Err(Error::configuration(
                "connection pool requires at least one source",
            ));
        }

        let slots: Vec<Arc<SourceSlot>> = sources
            .into_iter()
            .map(|source| {
                Arc::new(SourceSlot {
                    source: Arc::new(source),
                    active: AtomicUsize::new(0),
                    stats: AtomicSourceStats::default(),
                })
            })
            .collect();

        info!(
            sources = slots.len(),
            enabled = config.enabled,
            min_pool_size = config.min_pool_size,
            "connection pool initialized"
        );

        let inner = Arc::new(PoolInner {
            slots,
            tracker,
            controller,
            config,
            released: Notify::new(),
            disposed: AtomicBool::new(false),
            total_leases: AtomicU64::new(0),
        });

        let warmup_cancel = CancellationToken::new();
        let warmup = if inner.config.enabled && inner.config.min_pool_size > 0 {
            Some(Self::spawn_warmup(inner.clone(), warmup_cancel.clone()))
        } else {
            None
        };

        Ok(Self {
            inner,
            warmup: Mutex::new(warmup),
            warmup_cancel,
        })
    }

    /// Pre-warm the first `min_pool_size` sources' seed sessions. The handle
    /// is retained so dispose can join it instead of leaving a detached task.
    fn spawn_warmup(
        inner: Arc<PoolInner>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let count = inner.config.min_pool_size.min(inner.slots.len());
            for slot in inner.slots.iter().take(count) {
                if cancel.is_cancelled() {
                    return;
                }
                match slot.source.seed_session(&cancel).await {
                    Ok(_) => {
                        debug!(source = %slot.source.name(), "pre-warmed seed session");
                    }
                    Err(e) => {
                        slot.stats.failed.fetch_add(1, Ordering::Relaxed);
                        warn!(source = %slot.source.name(), error = %e, "pre-warm failed");
                    }
                }
            }
        })
    }

    /// Whether pooling is enabled
    pub fn is_enabled(&self) -> bool {
        self.inner.config.enabled
    }

    /// Lease a session.
    ///
    /// Picks the least-active source whose active-lease count is below both
    /// its `max_pool_size` and the controller's ceiling, constructing its
    /// seed session lazily. Blocks until a slot frees, the lease timeout
    /// elapses, or `cancel` fires. A construction failure is surfaced only
    /// to this caller; other sources and existing leases are unaffected.
    pub async fn lease(&self, cancel: &CancellationToken) -> Result<LeasedSession> {
        let inner = &self.inner;
        if inner.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed {
                what: "connection pool".to_string(),
            });
        }

        if !inner.config.enabled {
            return self.lease_unpooled(cancel).await;
        }

        let deadline = Instant::now() + inner.config.lease_timeout;
        let slot = loop {
            if inner.disposed.load(Ordering::Acquire) {
                return Err(Error::Disposed {
                    what: "connection pool".to_string(),
                });
            }

            // Register with the notifier before re-checking; a `Notified`
            // only observes `notify_waiters` once enabled, so a release
            // landing between the check and the wait would otherwise be
            // missed.
            let mut released = std::pin::pin!(inner.released.notified());
            released.as_mut().enable();

            if let Some(slot) = inner.pick() {
                if slot.try_reserve(inner.allowed(&slot)) {
                    break slot;
                }
                // Lost the race for that slot; try again immediately.
                continue;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::LeaseTimeout {
                    timeout: inner.config.lease_timeout,
                });
            }

            tokio::select! {
                _ = &mut released => {}
                _ = tokio::time::sleep(remaining) => {
                    return Err(Error::LeaseTimeout {
                        timeout: inner.config.lease_timeout,
                    });
                }
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            }
        };

        match slot.source.seed_session(cancel).await {
            Ok(session) => {
                slot.stats.leases.fetch_add(1, Ordering::Relaxed);
                inner.total_leases.fetch_add(1, Ordering::Relaxed);
                Ok(LeasedSession {
                    session,
                    slot,
                    inner: inner.clone(),
                    unpooled: None,
                    released: false,
                })
            }
            Err(e) => {
                slot.stats.failed.fetch_add(1, Ordering::Relaxed);
                slot.release();
                inner.released.notify_waiters();
                Err(e)
            }
        }
    }

    /// Disabled-pool path: construct a fresh session the lease owns outright.
    async fn lease_unpooled(&self, cancel: &CancellationToken) -> Result<LeasedSession> {
        let inner = &self.inner;
        // Least-active still gives a sensible spread across identities even
        // though no admission limit applies.
        let Some(slot) = inner
            .slots
            .iter()
            .min_by_key(|slot| slot.active.load(Ordering::Acquire))
            .cloned()
        else {
            return Err(Error::configuration("connection pool has no sources"));
        };

        match slot.source.mint_unpooled(cancel).await {
            Ok((session, credential)) => {
                slot.active.fetch_add(1, Ordering::AcqRel);
                slot.stats.leases.fetch_add(1, Ordering::Relaxed);
                inner.total_leases.fetch_add(1, Ordering::Relaxed);
                Ok(LeasedSession {
                    session,
                    slot,
                    inner: inner.clone(),
                    unpooled: Some(credential),
                    released: false,
                })
            }
            Err(e) => {
                slot.stats.failed.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Snapshot the pool's statistics. Safe to call concurrently with active
    /// leasing; never takes the admission path's locks.
    pub fn statistics(&self) -> PoolStatistics {
        let inner = &self.inner;
        let sources = inner
            .slots
            .iter()
            .map(|slot| {
                let active = slot.active.load(Ordering::Acquire);
                let allowed = inner.allowed(slot);
                (
                    slot.source.name().to_string(),
                    SourceStatistics {
                        active_leases: active,
                        idle: allowed.saturating_sub(active),
                        created: slot.source.construction_count(),
                        throttled: slot.stats.throttled.load(Ordering::Relaxed),
                        failed: slot.stats.failed.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();

        PoolStatistics {
            sources,
            total_leases: inner.total_leases.load(Ordering::Relaxed),
        }
    }

    /// The sources this pool manages, in construction order
    pub fn source_names(&self) -> Vec<String> {
        self.inner
            .slots
            .iter()
            .map(|slot| slot.source.name().to_string())
            .collect()
    }

    /// Dispose the pool: join the pre-warm task (bounded), dispose every
    /// source exactly once, and fail any waiting lease calls. Idempotent and
    /// safe to call concurrently.
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.warmup_cancel.cancel();
        // Wake waiters so they observe the disposed flag.
        self.inner.released.notify_waiters();

        let handle = self.warmup.lock().await.take();
        if let Some(handle) = handle {
            let bound = self.inner.config.warmup_join_timeout;
            if tokio::time::timeout(bound, handle).await.is_err() {
                warn!("pre-warm task did not finish within {:?} during dispose", bound);
            }
        }

        for slot in &self.inner.slots {
            slot.source.dispose().await;
        }
        info!("connection pool disposed");
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("sources", &self.inner.slots.len())
            .field("enabled", &self.inner.config.enabled)
            .field("disposed", &self.inner.disposed.load(Ordering::Relaxed))
            .finish()
    }
}
