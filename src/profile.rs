//! Credential profiles and endpoint normalization
//!
//! A profile is a named credential configuration owned by an external profile
//! store; the pool only reads resolved profiles, never persists them. This
//! module also owns endpoint normalization, which decides whether two
//! profiles target "the same" platform instance.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How a profile authenticates against the platform.
///
/// Opaque to the pool: the credential provider interprets it, the pool only
/// carries it along for display and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMethod {
    /// OAuth 2.0 device-code flow (interactive fallback)
    DeviceCode,
    /// OAuth 2.0 client-credentials flow
    ClientCredentials,
    /// Certificate-based authentication
    Certificate,
    /// Platform-managed identity
    ManagedIdentity,
}

/// A named credential configuration bound to a platform endpoint.
///
/// Owned externally; the pool core only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialProfile {
    /// Display name of the identity
    pub name: String,
    /// Target endpoint URL (normalized by the resolver before use)
    pub endpoint_url: String,
    /// Authentication method the credential provider should use
    pub auth_method: AuthMethod,
    /// Optional tenant hint passed through to the provider
    pub tenant: Option<String>,
    /// Optional environment label; produces the `identity@environment`
    /// display form on resolved sources
    pub environment: Option<String>,
}

impl CredentialProfile {
    /// Create a profile with the given name and endpoint
    pub fn new(name: impl Into<String>, endpoint_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint_url: endpoint_url.into(),
            auth_method: AuthMethod::DeviceCode,
            tenant: None,
            environment: None,
        }
    }

    /// Set the authentication method
    pub fn with_auth_method(mut self, method: AuthMethod) -> Self {
        self.auth_method = method;
        self
    }

    /// Set the tenant hint
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    /// Set the environment label
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Display identity for this profile: `name` or `name@environment`
    pub fn display_name(&self) -> String {
        match &self.environment {
            Some(env) => format!("{}@{}", self.name, env),
            None => self.name.clone(),
        }
    }
}

/// Read access to externally stored profiles.
///
/// The store also owns the "active profile" concept: the profile used when a
/// caller names none explicitly.
pub trait ProfileStore: Send + Sync {
    /// Look up a profile by identifier
    fn get(&self, name: &str) -> Option<CredentialProfile>;

    /// The currently active profile, if one is set
    fn active(&self) -> Option<CredentialProfile>;
}

/// Normalize an endpoint URL for equality comparison.
///
/// Strips the trailing slash and case-folds the scheme and host, so
/// `https://Org.Example.com/` and `https://org.example.com` compare equal.
/// Path and query are preserved as-is apart from the trailing slash.
pub fn normalize_endpoint(endpoint: &str) -> Result<String> {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return Err(Error::configuration("endpoint URL is empty"));
    }

    let parsed = url::Url::parse(trimmed)
        .map_err(|e| Error::configuration(format!("invalid endpoint URL '{trimmed}': {e}")))?;

    if parsed.host_str().is_none() {
        return Err(Error::configuration(format!(
            "endpoint URL '{trimmed}' has no host"
        )));
    }

    // Url::parse already lowercases scheme and host
    let mut normalized = parsed.to_string();
    while normalized.ends_with('/') {
        normalized.pop();
    }
    Ok(normalized)
}
