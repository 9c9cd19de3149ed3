//! WireJump daemon
//!
//! Keeps one outbound WireGuard tunnel connected to a rotating set of
//! provider endpoints and manages the peers of the inbound tunnel. Commands
//! arrive over a local socket and run one at a time against the shared
//! [`ProcessState`].

pub mod config;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod inifile;
pub mod lifecycle;
pub mod network;
pub mod peers;
pub mod providers;
pub mod server;
pub mod state;
pub mod version;

pub use config::DaemonConfig;
pub use dispatch::Dispatcher;
pub use error::{DaemonError, ErrorCategory, ExecuteError};
pub use network::control::{InterfaceControl, InterfaceError, WgQuick};
pub use network::{InterfaceConfig, InterfaceKind, Layout};
pub use providers::{
    AccountInfo, Endpoint, Provider, ProviderAccount, ProviderCatalog, ProviderError,
    ProviderState, UpstreamApi,
};
pub use state::{Environment, ProcessState};
