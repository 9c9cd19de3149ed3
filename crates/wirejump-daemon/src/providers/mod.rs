//! Upstream VPN providers
//!
//! A provider is reached through the [`UpstreamApi`] capability. The
//! [`ProviderCatalog`] maps provider names to factories that build a
//! [`Provider`] from account credentials.

pub mod directory;
pub mod mullvad;

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error [{code}]: {details}")]
    Api { code: String, details: String },

    #[error("failed to parse response: {0}")]
    Decode(String),

    #[error("{0}")]
    AccountRestricted(String),

    #[error("no matching device found")]
    DeviceNotFound,

    #[error("{0}")]
    InvalidAccount(String),

    #[error("no server ports available")]
    NoPorts,
}

/// One connection target offered by a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub country: String,
    pub city: String,
    pub ipv4: String,
    pub port: u16,
    pub public_key: String,
}

impl Endpoint {
    /// `host:port` for the wg-quick `Endpoint` key
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.ipv4, self.port)
    }
}

/// Credentials handed to a provider factory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderAccount {
    pub account_id: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountInfo {
    /// Account expiration as a unix timestamp
    pub expires: i64,
}

/// Operations every provider must support
#[async_trait]
pub trait UpstreamApi: Send + Sync {
    /// Raw API call returning the decoded JSON body
    async fn api_request(
        &self,
        method: Method,
        url: &str,
        use_auth: bool,
        body: Option<Value>,
    ) -> Result<Value, ProviderError>;

    async fn get_account_info(&self) -> Result<AccountInfo, ProviderError>;

    async fn get_all_servers(&self) -> Result<Vec<Endpoint>, ProviderError>;

    /// Register a public key with the account; existing keys are not an error
    async fn add_pubkey(&self, public_key: &str) -> Result<(), ProviderError>;

    /// Drop a public key from the account; missing keys are not an error
    async fn remove_pubkey(&self, public_key: &str) -> Result<(), ProviderError>;

    /// Tunnel address assigned to `public_key`
    async fn get_address(&self, public_key: &str) -> Result<String, ProviderError>;
}

/// A selected upstream provider
pub struct Provider {
    pub name: String,
    pub account: ProviderAccount,

    /// Gateway address reachable through the upstream tunnel
    pub upstream_gateway: String,

    pub initialized: bool,

    /// Account expiry, known after validation
    pub valid_until: Option<i64>,

    api: Box<dyn UpstreamApi>,
}

impl Provider {
    pub fn new(
        name: impl Into<String>,
        account: ProviderAccount,
        upstream_gateway: impl Into<String>,
        api: Box<dyn UpstreamApi>,
    ) -> Self {
        Self {
            name: name.into(),
            account,
            upstream_gateway: upstream_gateway.into(),
            initialized: true,
            valid_until: None,
            api,
        }
    }

    pub fn api(&self) -> &dyn UpstreamApi {
        self.api.as_ref()
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("account_id", &self.account.account_id)
            .field("upstream_gateway", &self.upstream_gateway)
            .field("initialized", &self.initialized)
            .field("valid_until", &self.valid_until)
            .finish()
    }
}

/// The selected provider and what it is connected to
#[derive(Debug)]
pub struct ProviderState {
    pub provider: Provider,

    /// Set only while the upstream tunnel is up
    pub active_since: Option<i64>,

    pub preferred_location: Option<String>,

    /// Endpoint of the current connection
    pub server: Option<Endpoint>,
}

impl ProviderState {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            active_since: None,
            preferred_location: None,
            server: None,
        }
    }
}

pub type ProviderFactory =
    Arc<dyn Fn(ProviderAccount) -> Result<Provider, ProviderError> + Send + Sync>;

#[derive(Clone)]
pub struct CatalogEntry {
    pub factory: ProviderFactory,

    /// Setup must carry a non-empty password
    pub requires_password: bool,
}

/// Providers available to `SetupProvider`, fixed at startup
#[derive(Clone, Default)]
pub struct ProviderCatalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl ProviderCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog of the providers shipped with the daemon
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register(mullvad::PROVIDER_NAME, false, mullvad::create);
        catalog
    }

    pub fn register<F>(&mut self, name: &str, requires_password: bool, factory: F)
    where
        F: Fn(ProviderAccount) -> Result<Provider, ProviderError> + Send + Sync + 'static,
    {
        self.entries.insert(
            name.to_string(),
            CatalogEntry {
                factory: Arc::new(factory),
                requires_password,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.get(name)
    }

    /// Provider names, sorted
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ProviderCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}
