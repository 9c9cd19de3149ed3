//! Mullvad provider
//!
//! Three parts of the Mullvad API are used:
//! - `auth/v1/token` exchanges the account number for a bearer token
//! - `accounts/v1/...` manages the account and its devices (authenticated)
//! - `app/v1/relays` lists relays (public)
//!
//! Each device holds exactly one WireGuard key, so adding a key creates a
//! device and removing a key deletes the devices carrying it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::ACCEPT;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use super::{AccountInfo, Endpoint, Provider, ProviderAccount, ProviderError, UpstreamApi};

pub const PROVIDER_NAME: &str = "mullvad";

const API_BASE_URL: &str = "https://api.mullvad.net";

/// Default gateway inside every Mullvad tunnel
const UPSTREAM_GATEWAY: &str = "10.64.0.1";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Let Mullvad catch DNS requests that leave through the tunnel
const HIJACK_DNS: bool = true;

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    details: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct AuthToken {
    access_token: String,
    expiry: String,
}

impl AuthToken {
    fn is_valid(&self) -> bool {
        DateTime::parse_from_rfc3339(&self.expiry)
            .map(|expiry| Utc::now() < expiry)
            .unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
struct Account {
    expiry: String,
    #[serde(default)]
    can_add_devices: bool,
}

#[derive(Debug, Default, Deserialize)]
struct Location {
    #[serde(default)]
    city: String,
    #[serde(default)]
    country: String,
}

#[derive(Debug, Deserialize)]
struct Relay {
    location: String,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    owned: bool,
    ipv4_addr_in: String,
    public_key: String,
}

#[derive(Debug, Default, Deserialize)]
struct WireguardRelays {
    #[serde(default)]
    port_ranges: Vec<[u16; 2]>,
    #[serde(default)]
    relays: Vec<Relay>,
}

#[derive(Debug, Deserialize)]
struct RelayList {
    #[serde(default)]
    locations: HashMap<String, Location>,
    #[serde(default)]
    wireguard: WireguardRelays,
}

#[derive(Debug, Deserialize)]
struct Device {
    id: String,
    pubkey: String,
    #[serde(default)]
    ipv4_address: String,
}

#[derive(Debug, Serialize)]
struct DeviceRequest<'a> {
    pubkey: &'a str,
    hijack_dns: bool,
}

/// Factory registered in the provider catalog
pub fn create(account: ProviderAccount) -> Result<Provider, ProviderError> {
    if account.account_id.is_empty() {
        return Err(ProviderError::InvalidAccount(
            "account number is required for Mullvad".to_string(),
        ));
    }

    let api = MullvadApi::new(API_BASE_URL, &account.account_id)?;

    Ok(Provider::new(
        PROVIDER_NAME,
        account,
        UPSTREAM_GATEWAY,
        Box::new(api),
    ))
}

pub struct MullvadApi {
    client: reqwest::Client,
    base_url: String,
    account_number: String,
    token: Mutex<Option<AuthToken>>,
}

impl MullvadApi {
    pub fn new(base_url: &str, account_number: &str) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            account_number: account_number.to_string(),
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        bearer: Option<&str>,
        body: Option<Value>,
    ) -> Result<Value, ProviderError> {
        debug!("Mullvad API {} {}", method, url);

        let mut request = self
            .client
            .request(method, url)
            .header(ACCEPT, "application/json");

        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        if status.is_success() {
            if bytes.is_empty() {
                return Ok(Value::Null);
            }

            return serde_json::from_slice(&bytes).map_err(|e| ProviderError::Decode(e.to_string()));
        }

        let error: ApiErrorBody = serde_json::from_slice(&bytes)
            .map_err(|e| ProviderError::Decode(format!("HTTP {}: {}", status, e)))?;

        Err(ProviderError::Api {
            code: error.code,
            details: match error.details {
                Value::String(details) => details,
                Value::Null => String::new(),
                other => other.to_string(),
            },
        })
    }

    /// Cached bearer token, refreshed when missing or expired
    async fn access_token(&self) -> Result<String, ProviderError> {
        let mut cached = self.token.lock().await;

        if let Some(token) = cached.as_ref().filter(|token| token.is_valid()) {
            return Ok(token.access_token.clone());
        }

        let body = json!({ "account_number": self.account_number });
        let reply = self
            .send(Method::POST, &self.url("auth/v1/token"), None, Some(body))
            .await?;
        let token: AuthToken = decode(reply)?;
        let access = token.access_token.clone();
        *cached = Some(token);

        Ok(access)
    }

    async fn list_devices(&self) -> Result<Vec<Device>, ProviderError> {
        let reply = self
            .api_request(Method::GET, &self.url("accounts/v1/devices"), true, None)
            .await?;
        decode(reply)
    }
}

#[async_trait]
impl UpstreamApi for MullvadApi {
    async fn api_request(
        &self,
        method: Method,
        url: &str,
        use_auth: bool,
        body: Option<Value>,
    ) -> Result<Value, ProviderError> {
        let token = if use_auth {
            Some(self.access_token().await?)
        } else {
            None
        };

        self.send(method, url, token.as_deref(), body).await
    }

    async fn get_account_info(&self) -> Result<AccountInfo, ProviderError> {
        let reply = self
            .api_request(Method::GET, &self.url("accounts/v1/accounts/me"), true, None)
            .await?;
        let account: Account = decode(reply)?;

        let expires = DateTime::parse_from_rfc3339(&account.expiry)
            .map_err(|e| ProviderError::Decode(format!("invalid expiry: {}", e)))?
            .timestamp();

        if !account.can_add_devices {
            return Err(ProviderError::AccountRestricted(
                "this account can not add new devices".to_string(),
            ));
        }

        Ok(AccountInfo { expires })
    }

    async fn get_all_servers(&self) -> Result<Vec<Endpoint>, ProviderError> {
        let reply = self
            .api_request(Method::GET, &self.url("app/v1/relays"), false, None)
            .await?;
        let list: RelayList = decode(reply)?;

        flatten_relays(list, &mut rand::thread_rng())
    }

    async fn add_pubkey(&self, public_key: &str) -> Result<(), ProviderError> {
        let body = serde_json::to_value(DeviceRequest {
            pubkey: public_key,
            hijack_dns: HIJACK_DNS,
        })
        .map_err(|e| ProviderError::Decode(e.to_string()))?;

        self.api_request(Method::POST, &self.url("accounts/v1/devices"), true, Some(body))
            .await?;

        Ok(())
    }

    async fn remove_pubkey(&self, public_key: &str) -> Result<(), ProviderError> {
        for device in self.list_devices().await? {
            if device.pubkey == public_key {
                let url = self.url(&format!("accounts/v1/devices/{}", device.id));
                self.api_request(Method::DELETE, &url, true, None).await?;
            }
        }

        Ok(())
    }

    async fn get_address(&self, public_key: &str) -> Result<String, ProviderError> {
        self.list_devices()
            .await?
            .into_iter()
            .find(|device| device.pubkey == public_key)
            .map(|device| device.ipv4_address)
            .ok_or(ProviderError::DeviceNotFound)
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ProviderError> {
    serde_json::from_value(value).map_err(|e| ProviderError::Decode(e.to_string()))
}

/// Active, Mullvad-owned relays with a random port from the advertised ranges
fn flatten_relays<R: Rng + ?Sized>(
    list: RelayList,
    rng: &mut R,
) -> Result<Vec<Endpoint>, ProviderError> {
    let ports: Vec<u16> = list
        .wireguard
        .port_ranges
        .iter()
        .flat_map(|[start, end]| *start..=*end)
        .collect();

    let mut endpoints = Vec::new();

    for relay in list.wireguard.relays {
        if !(relay.active && relay.owned) {
            continue;
        }

        let port = *ports.choose(rng).ok_or(ProviderError::NoPorts)?;
        let (city, country) = list
            .locations
            .get(&relay.location)
            .map(|loc| (loc.city.clone(), loc.country.clone()))
            .unwrap_or_default();

        endpoints.push(Endpoint {
            country,
            city,
            ipv4: relay.ipv4_addr_in,
            port,
            public_key: relay.public_key,
        });
    }

    Ok(endpoints)
}
