//! Shared fakes for integration tests: a counting credential provider, an
//! in-memory profile store, and sessions whose disposal is observable.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use orgpool::error::{Error, Result};
use orgpool::prelude::*;

/// Session whose readiness and disposal are observable from tests.
#[derive(Debug)]
pub struct FakeSession {
    info: SessionInfo,
    ready: bool,
    last_error: Option<String>,
    account_hint: Option<String>,
    pub dispose_count: AtomicU64,
    pub dispose_delay_ms: u64,
}

impl FakeSession {
    pub fn ready(org: &str) -> Self {
        Self {
            info: SessionInfo {
                org_name: org.to_string(),
                org_id: format!("{org}-id"),
                environment_id: "env-1".to_string(),
            },
            ready: true,
            last_error: None,
            account_hint: Some(format!("{org}-account")),
            dispose_count: AtomicU64::new(0),
            dispose_delay_ms: 0,
        }
    }

    pub fn broken(org: &str, error: &str) -> Self {
        Self {
            ready: false,
            last_error: Some(error.to_string()),
            ..Self::ready(org)
        }
    }
}

#[async_trait]
impl Session for FakeSession {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn last_error(&self) -> Option<String> {
        self.last_error.clone()
    }

    fn info(&self) -> &SessionInfo {
        &self.info
    }

    fn account_hint(&self) -> Option<String> {
        self.account_hint.clone()
    }

    async fn dispose(&self) {
        if self.dispose_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.dispose_delay_ms)).await;
        }
        self.dispose_count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Knobs and counters shared between the provider and the credentials it
/// hands out.
#[derive(Default)]
pub struct ProviderState {
    pub acquire_count: AtomicU64,
    pub acquire_delay_ms: AtomicU64,
    pub create_delay_ms: AtomicU64,
    /// Makes minted sessions sleep this long inside `dispose`
    pub dispose_delay_ms: AtomicU64,
    pub fail_acquire: AtomicBool,
    pub fail_create: AtomicBool,
    /// Mint sessions that report not-ready with a last error
    pub mint_broken: AtomicBool,
    /// Every ready session handed out, for dispose assertions
    pub sessions: Mutex<Vec<Arc<FakeSession>>>,
    /// Every credential handed out, for dispose assertions
    pub credentials: Mutex<Vec<Arc<FakeCredential>>>,
}

pub struct FakeCredential {
    state: Arc<ProviderState>,
    profile_name: String,
    pub dispose_count: AtomicU64,
}

#[async_trait]
impl Credential for FakeCredential {
    async fn create_session(&self, _endpoint_url: &str) -> Result<Arc<dyn Session>> {
        let delay = self.state.create_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.state.fail_create.load(Ordering::SeqCst) {
            return Err(Error::connection_failed(
                &self.profile_name,
                "simulated session failure",
            ));
        }
        if self.state.mint_broken.load(Ordering::SeqCst) {
            return Ok(Arc::new(FakeSession::broken(
                &self.profile_name,
                "token rejected",
            )));
        }
        let mut session = FakeSession::ready(&self.profile_name);
        session.dispose_delay_ms = self.state.dispose_delay_ms.load(Ordering::SeqCst);
        let session = Arc::new(session);
        self.state.sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }

    async fn dispose(&self) {
        self.dispose_count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Credential provider that counts acquisitions and can be told to stall or
/// fail, per test.
pub struct CountingProvider {
    pub state: Arc<ProviderState>,
}

impl CountingProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(ProviderState::default()),
        })
    }

    pub fn with_acquire_delay(delay: Duration) -> Arc<Self> {
        let provider = Self::new();
        provider
            .state
            .acquire_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
        provider
    }

    pub fn with_create_delay(delay: Duration) -> Arc<Self> {
        let provider = Self::new();
        provider
            .state
            .create_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
        provider
    }

    pub fn acquisitions(&self) -> u64 {
        self.state.acquire_count.load(Ordering::SeqCst)
    }

    pub fn session_dispose_counts(&self) -> Vec<u64> {
        self.state
            .sessions
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.dispose_count.load(Ordering::SeqCst))
            .collect()
    }

    pub fn credential_dispose_counts(&self) -> Vec<u64> {
        self.state
            .credentials
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.dispose_count.load(Ordering::SeqCst))
            .collect()
    }
}

#[async_trait]
impl CredentialProvider for CountingProvider {
    async fn acquire_credential(&self, profile: &CredentialProfile) -> Result<Arc<dyn Credential>> {
        self.state.acquire_count.fetch_add(1, Ordering::SeqCst);
        let delay = self.state.acquire_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.state.fail_acquire.load(Ordering::SeqCst) {
            return Err(Error::connection_failed(
                &profile.name,
                "simulated credential failure",
            ));
        }
        let credential = Arc::new(FakeCredential {
            state: self.state.clone(),
            profile_name: profile.display_name(),
            dispose_count: AtomicU64::new(0),
        });
        self.state
            .credentials
            .lock()
            .unwrap()
            .push(credential.clone());
        Ok(credential)
    }
}

/// In-memory profile store with an optional active profile.
#[derive(Default)]
pub struct MemoryProfileStore {
    profiles: HashMap<String, CredentialProfile>,
    active: Option<String>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, profile: CredentialProfile) -> Self {
        self.profiles.insert(profile.name.clone(), profile);
        self
    }

    pub fn with_active(mut self, name: &str) -> Self {
        self.active = Some(name.to_string());
        self
    }
}

impl ProfileStore for MemoryProfileStore {
    fn get(&self, name: &str) -> Option<CredentialProfile> {
        self.profiles.get(name).cloned()
    }

    fn active(&self) -> Option<CredentialProfile> {
        self.active.as_ref().and_then(|name| self.get(name))
    }
}

/// A source over a fresh provider, for single-source tests.
pub fn source_with(provider: Arc<CountingProvider>, name: &str) -> ConnectionSource {
    let profile = CredentialProfile::new(name, "https://org.example.com");
    ConnectionSource::new(profile, "https://org.example.com", provider)
}
