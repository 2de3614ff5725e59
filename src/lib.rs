//! # orgpool
//!
//! Multi-profile session pooling with adaptive admission control for
//! rate-limited business-data platforms.
//!
//! orgpool turns N independently authenticated credential profiles into one
//! logical pool of ready-to-use sessions, gated by an adaptive concurrency
//! controller fed by observed throttling signals. It sustains high-throughput
//! access without exceeding the platform's limits and without ever handing
//! out a broken or expired session.
//!
//! ## Features
//!
//! - **Lazy, single-flight session construction**: each source builds its
//!   seed session at most once per demand cycle; concurrent callers share
//!   the in-flight attempt and its outcome
//! - **Adaptive admission control**: AIMD concurrency ceilings per source,
//!   dropping fast on throttles and climbing slowly on proven-healthy batches
//! - **Bounded-time acquisition**: credential acquisition and session
//!   establishment each carry their own timeout and error kind
//! - **Invalidation and reconstruction**: auth rejections invalidate only
//!   the affected source's seed session; the next lease rebuilds it
//! - **Per-source isolation**: one source's failure never affects another's
//!   leases, and locking is scoped per source
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use orgpool::prelude::*;
//! use std::sync::Arc;
//!
//! let resolver = ConnectionResolver::new(store, provider).with_max_pool_size(52);
//! let sources = resolver.resolve_spec("app1,app2,app3", None)?;
//!
//! let pool = ConnectionPool::new(
//!     sources,
//!     Arc::new(ThrottleTracker::new()),
//!     Arc::new(AdaptiveRateController::from_preset(RatePreset::Balanced)),
//!     PoolConfig::new().with_min_pool_size(2),
//! )?;
//!
//! let cancel = CancellationToken::new();
//! let lease = pool.lease(&cancel).await?;
//! // ... run a batch against lease.session() ...
//! lease.record_success(elapsed);
//! drop(lease); // slot freed
//! ```
//!
//! The wire protocol to the platform, token storage, and profile persistence
//! live behind the [`CredentialProvider`](session::CredentialProvider) and
//! [`ProfileStore`](profile::ProfileStore) capability seams and are out of
//! scope here.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod error;
pub mod pool;
pub mod profile;
pub mod rate;
pub mod resolver;
pub mod session;
pub mod source;
pub mod throttle;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, ErrorCategory, Result};

    pub use crate::profile::{normalize_endpoint, AuthMethod, CredentialProfile, ProfileStore};

    pub use crate::session::{Credential, CredentialProvider, Session, SessionInfo};

    pub use crate::source::{
        ConnectionSource, DEFAULT_CONNECT_TIMEOUT, DEFAULT_CREDENTIAL_TIMEOUT,
        DEFAULT_MAX_POOL_SIZE,
    };

    pub use crate::throttle::{ThrottleState, ThrottleTracker};

    pub use crate::rate::{AdaptiveRateController, RateControlConfig, RatePreset, RateSnapshot};

    pub use crate::pool::{
        ConnectionPool, LeasedSession, PoolConfig, PoolStatistics, SourceStatistics,
    };

    pub use crate::resolver::ConnectionResolver;

    pub use tokio_util::sync::CancellationToken;
}
