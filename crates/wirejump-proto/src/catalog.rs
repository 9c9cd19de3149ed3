//! Remote function catalog
//!
//! Each remote function is a marker type implementing [`RemoteFunction`],
//! which ties its name to one request shape and one reply shape. The daemon
//! registers handlers by marker type and the client calls by marker type, so
//! both sides agree on the payloads at compile time.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A function callable through the daemon socket
pub trait RemoteFunction {
    /// Name used on the wire
    const NAME: &'static str;

    /// Parameters accepted by the function
    type Request: Serialize + DeserializeOwned + Send + 'static;

    /// Value returned when the handler produces one
    type Reply: Serialize + DeserializeOwned + Send + 'static;
}

macro_rules! remote_function {
    ($(#[$meta:meta])* $marker:ident, $request:ty, $reply:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy)]
        pub struct $marker;

        impl RemoteFunction for $marker {
            const NAME: &'static str = stringify!($marker);
            type Request = $request;
            type Reply = $reply;
        }
    };
}

remote_function!(
    /// List providers known to the daemon
    ListProviders,
    EmptyRequest,
    ListProvidersReply
);
remote_function!(
    /// Select and validate an upstream provider account
    SetupProvider,
    SetupRequest,
    EmptyReply
);
remote_function!(
    /// Show cached locations or change the preferred one
    ManageServers,
    ServersRequest,
    ServersReply
);
remote_function!(
    /// Add or remove downstream peers
    ManagePeers,
    PeerRequest,
    PeerReply
);
remote_function!(
    /// Connect, reconnect or disconnect the upstream tunnel
    Connect,
    ConnectRequest,
    EmptyReply
);
remote_function!(
    /// Report connection and provider status
    Status,
    EmptyRequest,
    StatusReply
);
remote_function!(
    /// Drop the provider and its connection
    Reset,
    EmptyRequest,
    EmptyReply
);
remote_function!(
    /// Report the daemon version
    Version,
    EmptyRequest,
    VersionReply
);

/// Request of functions that take no parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EmptyRequest {}

/// Reply of functions that never return a value
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EmptyReply {}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ListProvidersReply {
    pub providers: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SetupRequest {
    pub provider: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ServersRequest {
    /// Refresh the endpoint directory even if it is fresh
    pub force_update: bool,

    /// Location to store as preferred; empty means "just list"
    pub preferred: String,

    /// Clear the preferred location
    pub reset: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServersReply {
    pub servers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PeerOperation {
    #[default]
    Add,
    Delete,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PeerRequest {
    pub operation: PeerOperation,
    pub pubkey: String,
    pub isolated: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    /// Client-side address with the downstream network prefix length
    pub ipv4_address: String,
    pub isolated: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PeerReply {
    pub peer: PeerInfo,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_override: Option<String>,
    pub preserve_keys: bool,
    pub disconnect: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_since: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_expires: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatusReply {
    pub upstream: ConnectionStatus,
    pub provider: ProviderStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VersionReply {
    pub version: String,
}
