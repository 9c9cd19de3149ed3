//! System level tunnel operations
//!
//! Everything the daemon does to a live interface goes through
//! [`InterfaceControl`]. [`WgQuick`] drives the `wg` and `wg-quick` tools.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::is_valid_key;

/// `IFF_UP` from `<net/if.h>`
const IFF_UP: u32 = 0x1;

const SYSFS_NET: &str = "/sys/class/net";

#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("interface '{0}' not found")]
    NotFound(String),

    #[error("{command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid public key")]
    InvalidKey,

    #[error("failed to read interface state: {0}")]
    State(String),
}

/// Operations against the system's tunnel interfaces
#[async_trait]
pub trait InterfaceControl: Send + Sync {
    /// Create a new private key
    async fn generate_private_key(&self) -> Result<String, InterfaceError>;

    /// Public key matching `private_key`
    async fn derive_public_key(&self, private_key: &str) -> Result<String, InterfaceError>;

    async fn bring_up(&self, interface: &str) -> Result<(), InterfaceError>;

    async fn bring_down(&self, interface: &str) -> Result<(), InterfaceError>;

    /// Whether the interface is up; [`InterfaceError::NotFound`] if it does not exist
    async fn is_active(&self, interface: &str) -> Result<bool, InterfaceError>;

    /// Add or update a live peer
    async fn set_peer(
        &self,
        interface: &str,
        public_key: &str,
        allowed_ips: &[String],
    ) -> Result<(), InterfaceError>;

    /// Remove a live peer
    async fn remove_peer(&self, interface: &str, public_key: &str) -> Result<(), InterfaceError>;
}

/// [`InterfaceControl`] backed by `wg`, `wg-quick` and sysfs
#[derive(Debug, Clone)]
pub struct WgQuick {
    sysfs_root: PathBuf,
}

impl Default for WgQuick {
    fn default() -> Self {
        Self::new()
    }
}

impl WgQuick {
    pub fn new() -> Self {
        Self {
            sysfs_root: PathBuf::from(SYSFS_NET),
        }
    }

    /// Read interface flags from another sysfs tree
    pub fn with_sysfs_root(root: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: root.into(),
        }
    }

    async fn run(program: &str, args: &[&str], stdin: Option<&str>) -> Result<String, InterfaceError> {
        let command = format!("{} {}", program, args.join(" "));
        debug!("Running {}", command);

        let mut child = Command::new(program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| InterfaceError::Spawn {
                command: command.clone(),
                source,
            })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes())
                .await
                .map_err(|source| InterfaceError::Spawn {
                    command: command.clone(),
                    source,
                })?;
            // closing stdin lets `wg pubkey` finish
            drop(pipe);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|source| InterfaceError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(InterfaceError::CommandFailed {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl InterfaceControl for WgQuick {
    async fn generate_private_key(&self) -> Result<String, InterfaceError> {
        Self::run("wg", &["genkey"], None).await
    }

    async fn derive_public_key(&self, private_key: &str) -> Result<String, InterfaceError> {
        Self::run("wg", &["pubkey"], Some(private_key)).await
    }

    async fn bring_up(&self, interface: &str) -> Result<(), InterfaceError> {
        Self::run("sudo", &["wg-quick", "up", interface], None).await?;
        Ok(())
    }

    async fn bring_down(&self, interface: &str) -> Result<(), InterfaceError> {
        Self::run("sudo", &["wg-quick", "down", interface], None).await?;
        Ok(())
    }

    async fn is_active(&self, interface: &str) -> Result<bool, InterfaceError> {
        let path = self.sysfs_root.join(interface).join("flags");

        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(InterfaceError::NotFound(interface.to_string()))
            }
            Err(e) => return Err(InterfaceError::State(e.to_string())),
        };

        let flags = parse_flags(&raw)
            .ok_or_else(|| InterfaceError::State(format!("unexpected flags value {:?}", raw)))?;

        Ok(flags & IFF_UP != 0)
    }

    async fn set_peer(
        &self,
        interface: &str,
        public_key: &str,
        allowed_ips: &[String],
    ) -> Result<(), InterfaceError> {
        if !is_valid_key(public_key) {
            return Err(InterfaceError::InvalidKey);
        }

        let allowed = allowed_ips.join(",");
        Self::run(
            "sudo",
            &["wg", "set", interface, "peer", public_key, "allowed-ips", allowed.as_str()],
            None,
        )
        .await?;

        Ok(())
    }

    async fn remove_peer(&self, interface: &str, public_key: &str) -> Result<(), InterfaceError> {
        if !is_valid_key(public_key) {
            return Err(InterfaceError::InvalidKey);
        }

        Self::run(
            "sudo",
            &["wg", "set", interface, "peer", public_key, "remove"],
            None,
        )
        .await?;

        Ok(())
    }
}

/// Parse sysfs `flags` contents such as `0x1003`
fn parse_flags(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    u32::from_str_radix(digits, 16).ok()
}
