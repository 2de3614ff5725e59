//! Profile resolution
//!
//! Configuration glue between the external profile store and the pool:
//! turns a list of profile identifiers (or the store's active profile) into
//! the `ConnectionSource` set a pool is constructed from, validating that
//! every profile targets the same normalized endpoint. Ownership of the
//! sources passes to the caller, who typically hands them to a
//! `ConnectionPool` for disposal.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::{Error, Result};
use crate::profile::{normalize_endpoint, ProfileStore};
use crate::session::CredentialProvider;
use crate::source::ConnectionSource;

/// Resolves profile identifiers into connection sources.
pub struct ConnectionResolver {
    store: Arc<dyn ProfileStore>,
    provider: Arc<dyn CredentialProvider>,
    max_pool_size: Option<usize>,
    credential_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
}

impl ConnectionResolver {
    /// Create a resolver over the given profile store and credential provider
    pub fn new(store: Arc<dyn ProfileStore>, provider: Arc<dyn CredentialProvider>) -> Self {
        Self {
            store,
            provider,
            max_pool_size: None,
            credential_timeout: None,
            connect_timeout: None,
        }
    }

    /// Cap every resolved source's pool size
    pub fn with_max_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = Some(size);
        self
    }

    /// Set the credential-acquisition timeout on every resolved source
    pub fn with_credential_timeout(mut self, timeout: Duration) -> Self {
        self.credential_timeout = Some(timeout);
        self
    }

    /// Set the connection-establishment timeout on every resolved source
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Resolve a comma-separated identifier list, e.g. `"app1,app2,app3"`.
    ///
    /// An empty or blank spec resolves the store's active profile.
    pub fn resolve_spec(
        &self,
        spec: &str,
        endpoint_override: Option<&str>,
    ) -> Result<Vec<ConnectionSource>> {
        let names: Vec<String> = spec
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        self.resolve(&names, endpoint_override)
    }

    /// Resolve the named profiles (or the active profile when none are
    /// named) into connection sources bound to one normalized endpoint.
    ///
    /// Fails with a configuration error when identifiers are duplicated or
    /// when two profiles normalize to different endpoints; the mismatch
    /// error names both conflicting endpoints.
    pub fn resolve(
        &self,
        names: &[String],
        endpoint_override: Option<&str>,
    ) -> Result<Vec<ConnectionSource>> {
        let profiles = if names.is_empty() {
            let active = self.store.active().ok_or_else(|| {
                Error::configuration("no profiles named and no active profile is set")
            })?;
            vec![active]
        } else {
            let mut seen = HashSet::new();
            let mut profiles = Vec::with_capacity(names.len());
            for name in names {
                let trimmed = name.trim();
                if trimmed.is_empty() {
                    return Err(Error::configuration("blank profile identifier"));
                }
                if !seen.insert(trimmed.to_string()) {
                    return Err(Error::configuration(format!(
                        "profile '{trimmed}' named more than once"
                    )));
                }
                let profile = self.store.get(trimmed).ok_or_else(|| Error::ProfileNotFound {
                    name: trimmed.to_string(),
                })?;
                profiles.push(profile);
            }
            profiles
        };

        let override_endpoint = endpoint_override.map(normalize_endpoint).transpose()?;

        let mut shared_endpoint: Option<String> = override_endpoint.clone();
        let mut sources = Vec::with_capacity(profiles.len());
        for profile in profiles {
            let endpoint = match &override_endpoint {
                Some(endpoint) => endpoint.clone(),
                None => {
                    let normalized = normalize_endpoint(&profile.endpoint_url)?;
                    match &shared_endpoint {
                        None => {
                            shared_endpoint = Some(normalized.clone());
                            normalized
                        }
                        Some(expected) if *expected == normalized => normalized,
                        Some(expected) => {
                            return Err(Error::configuration(format!(
                                "profiles target different endpoints: '{expected}' vs '{normalized}' (from profile '{}'); all pooled profiles must share one endpoint",
                                profile.display_name()
                            )))
                        }
                    }
                }
            };

            let mut source = ConnectionSource::new(profile, endpoint, self.provider.clone());
            if let Some(size) = self.max_pool_size {
                source = source.with_max_pool_size(size);
            }
            if let Some(timeout) = self.credential_timeout {
                source = source.with_credential_timeout(timeout);
            }
            if let Some(timeout) = self.connect_timeout {
                source = source.with_connect_timeout(timeout);
            }
            debug!(source = %source.name(), endpoint = %source.endpoint_url(), "resolved profile");
            sources.push(source);
        }

        Ok(sources)
    }
}

impl std::fmt::Debug for ConnectionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionResolver")
            .field("max_pool_size", &self.max_pool_size)
            .finish()
    }
}
