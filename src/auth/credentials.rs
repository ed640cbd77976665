//! API key providers.

use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;

/// Default environment variable holding the CoinMarketCap API key.
pub const API_KEY_ENV_VAR: &str = "COINMARKETCAP_API_KEY";

/// An upstream API key.
#[derive(Clone)]
pub struct ApiKey {
    key: SecretString,
}

impl ApiKey {
    /// Create a new API key.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: SecretString::from(key.into()),
        }
    }

    /// Get the raw key for building the request header.
    ///
    /// This method exposes the secret - use carefully.
    pub fn expose_secret(&self) -> &str {
        self.key.expose_secret()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKey").field("key", &"[REDACTED]").finish()
    }
}

/// Trait for providing an API key.
///
/// Implement this trait to customize where the key comes from,
/// for example a secrets manager or a platform keychain.
pub trait ApiKeyProvider: Send + Sync {
    /// Get the API key.
    fn api_key(&self) -> &ApiKey;
}

/// Provider that holds the key directly.
#[derive(Clone)]
pub struct StaticApiKey {
    key: ApiKey,
}

impl StaticApiKey {
    /// Create a new static key provider.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: ApiKey::new(key),
        }
    }
}

impl ApiKeyProvider for StaticApiKey {
    fn api_key(&self) -> &ApiKey {
        &self.key
    }
}

impl ApiKeyProvider for Arc<StaticApiKey> {
    fn api_key(&self) -> &ApiKey {
        &self.key
    }
}

/// Provider that reads the key from an environment variable.
///
/// By default, reads `COINMARKETCAP_API_KEY`.
pub struct EnvApiKey {
    key: ApiKey,
}

impl EnvApiKey {
    /// Try to read the key from the default environment variable.
    ///
    /// Returns `None` if the variable is not set or empty.
    pub fn try_from_env() -> Option<Self> {
        Self::try_from_env_var(API_KEY_ENV_VAR)
    }

    /// Try to read the key from a custom environment variable.
    pub fn try_from_env_var(var: &str) -> Option<Self> {
        let key = std::env::var(var).ok().filter(|k| !k.trim().is_empty())?;
        Some(Self {
            key: ApiKey::new(key),
        })
    }
}

impl ApiKeyProvider for EnvApiKey {
    fn api_key(&self) -> &ApiKey {
        &self.key
    }
}
