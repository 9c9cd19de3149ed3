//! Tunnel interfaces and their on-disk configuration

pub mod allocator;
pub mod control;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ipnetwork::IpNetwork;
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::error::DaemonError;
use crate::inifile::{section, IniFile};
use control::{InterfaceControl, InterfaceError};

/// Curve25519 keys are 32 bytes
const KEY_LEN: usize = 32;

const CONFIG_SUFFIX: &str = "conf";
const UPSTREAM_GATEWAY_FILE: &str = "upstream_gateway";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceKind {
    Upstream,
    Downstream,
}

impl InterfaceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceKind::Upstream => "upstream",
            InterfaceKind::Downstream => "downstream",
        }
    }
}

impl fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// wg-quick hook direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptAction {
    Up,
    Down,
}

impl ScriptAction {
    fn as_str(&self) -> &'static str {
        match self {
            ScriptAction::Up => "up",
            ScriptAction::Down => "down",
        }
    }
}

/// Files the daemon owns under its base path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    base: PathBuf,
}

impl Layout {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn config_dir(&self) -> PathBuf {
        self.base.join("config")
    }

    /// `<base>/config/<kind>.conf`
    pub fn config_path(&self, kind: InterfaceKind) -> PathBuf {
        self.config_dir()
            .join(format!("{}.{}", kind.as_str(), CONFIG_SUFFIX))
    }

    /// Plain text file holding the upstream default gateway
    pub fn gateway_path(&self) -> PathBuf {
        self.config_dir().join(UPSTREAM_GATEWAY_FILE)
    }

    /// Hook command line for wg-quick, `%i` expands to the interface name
    pub fn script_command(&self, kind: InterfaceKind, action: ScriptAction) -> String {
        let script = self
            .base
            .join("scripts")
            .join(format!("{}.sh", kind.as_str()));

        format!("{} \"%i\" {}", script.display(), action.as_str())
    }

    /// Overwrite the upstream gateway file with `addr`
    pub async fn write_gateway(&self, addr: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(self.config_dir()).await?;
        tokio::fs::write(self.gateway_path(), format!("{}\n", addr)).await
    }
}

/// True when `key` is standard base64 of exactly 32 bytes
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && STANDARD
            .decode(key)
            .map(|bytes| bytes.len() == KEY_LEN)
            .unwrap_or(false)
}

/// True for `addr/prefix` notation
pub fn is_valid_cidr(value: &str) -> bool {
    value.contains('/') && value.parse::<IpNetwork>().is_ok()
}

pub fn is_valid_ip(value: &str) -> bool {
    value.parse::<IpAddr>().is_ok()
}

/// In-memory view of one tunnel interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceConfig {
    /// Name passed to `wg-quick`
    pub name: String,
    pub kind: InterfaceKind,

    /// Empty until assigned by a provider or read from config
    pub address: String,

    pub private_key: String,
    pub public_key: String,
}

impl InterfaceConfig {
    /// New interface with a freshly generated key pair
    pub async fn create(
        name: &str,
        kind: InterfaceKind,
        control: &dyn InterfaceControl,
    ) -> Result<Self, InterfaceError> {
        let mut iface = Self {
            name: name.to_string(),
            kind,
            address: String::new(),
            private_key: String::new(),
            public_key: String::new(),
        };
        iface.rotate_keys(control).await?;

        Ok(iface)
    }

    /// Build the interface from its config file
    ///
    /// A missing file or one without `[Interface]` gets a fresh key written
    /// into it. An invalid private key is replaced and an invalid address is
    /// dropped.
    pub async fn load(
        name: &str,
        kind: InterfaceKind,
        layout: &Layout,
        control: &dyn InterfaceControl,
    ) -> Result<Self, DaemonError> {
        let path = layout.config_path(kind);

        let file = match IniFile::read(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => IniFile::new(),
            Err(e) => {
                return Err(DaemonError::io(
                    format!("failed to read {} config", kind),
                    e,
                ))
            }
        };

        let Some(stored) = file.section("Interface") else {
            info!("No [Interface] in {:?}, writing a new key", path);

            let iface = Self::create(name, kind, control)
                .await
                .map_err(|e| DaemonError::interface(format!("failed to create {} keys", kind), e))?;

            let mut fresh = IniFile::new();
            fresh.set("Interface", section([("PrivateKey", iface.private_key.as_str())]));
            iface
                .write_config(layout, &fresh)
                .await
                .map_err(|e| DaemonError::io(format!("failed to write {} config", kind), e))?;

            return Ok(iface);
        };

        let private_key = match stored.get("PrivateKey") {
            Some(key) if is_valid_key(key) => key.clone(),
            _ => {
                warn!("{} config has no valid private key, generating one", kind);
                control
                    .generate_private_key()
                    .await
                    .map_err(|e| DaemonError::interface("failed to create private key", e))?
            }
        };

        let public_key = control
            .derive_public_key(&private_key)
            .await
            .map_err(|e| DaemonError::interface("failed to create public key", e))?;

        let address = stored
            .get("Address")
            .map(|addr| addr.trim().to_string())
            .filter(|addr| is_valid_cidr(addr))
            .unwrap_or_default();

        Ok(Self {
            name: name.to_string(),
            kind,
            address,
            private_key,
            public_key,
        })
    }

    /// Replace the key pair
    pub async fn rotate_keys(&mut self, control: &dyn InterfaceControl) -> Result<(), InterfaceError> {
        let private_key = control.generate_private_key().await?;
        let public_key = control.derive_public_key(&private_key).await?;

        self.private_key = private_key;
        self.public_key = public_key;

        Ok(())
    }

    pub fn config_path(&self, layout: &Layout) -> PathBuf {
        layout.config_path(self.kind)
    }

    /// Read the persisted config; a missing file reads as empty
    pub async fn read_config(&self, layout: &Layout) -> std::io::Result<IniFile> {
        match IniFile::read(&self.config_path(layout)).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(IniFile::new()),
            other => other,
        }
    }

    pub async fn write_config(&self, layout: &Layout, file: &IniFile) -> std::io::Result<()> {
        tokio::fs::create_dir_all(layout.config_dir()).await?;
        file.write(&self.config_path(layout)).await
    }

    /// Empty the persisted config without removing the file
    pub async fn truncate_config(&self, layout: &Layout) -> std::io::Result<()> {
        tokio::fs::write(self.config_path(layout), b"").await
    }
}
