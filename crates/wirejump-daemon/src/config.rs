//! Daemon configuration file
//!
//! ```text
//! [Config]
//! Upstream = wg-up
//! Downstream = wg-down
//! # optional
//! BasePath = /opt/wirejump
//! Socket = /var/run/wirejumpd/wirejumpd.sock
//! ```

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use wirejump_proto::DEFAULT_SOCKET_PATH;

use crate::inifile::IniFile;

/// Directory holding interface configs and hook scripts
pub const DEFAULT_BASE_PATH: &str = "/opt/wirejump";

const CONFIG_SECTION: &str = "Config";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    /// System name of the outbound tunnel interface
    pub upstream: String,

    /// System name of the inbound tunnel interface
    pub downstream: String,

    pub base_path: PathBuf,
    pub socket: PathBuf,
}

impl DaemonConfig {
    /// Load and validate the config file at `path`
    pub async fn load(path: &Path) -> Result<Self> {
        let file = IniFile::read(path)
            .await
            .with_context(|| format!("Failed to read config file {:?}", path))?;

        Self::from_ini(&file).with_context(|| format!("Invalid config file {:?}", path))
    }

    pub fn from_ini(file: &IniFile) -> Result<Self> {
        if file.section(CONFIG_SECTION).is_none() {
            bail!("'[{}]' section is missing", CONFIG_SECTION);
        }

        let required = |key: &str| -> Result<String> {
            match file.get(CONFIG_SECTION, key) {
                Some(value) if !value.is_empty() => Ok(value.to_string()),
                _ => bail!("'{}' interface name is required", key),
            }
        };

        let optional = |key: &str, default: &str| -> PathBuf {
            file.get(CONFIG_SECTION, key)
                .filter(|value| !value.is_empty())
                .unwrap_or(default)
                .into()
        };

        Ok(Self {
            upstream: required("Upstream")?,
            downstream: required("Downstream")?,
            base_path: optional("BasePath", DEFAULT_BASE_PATH),
            socket: optional("Socket", DEFAULT_SOCKET_PATH),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let file = IniFile::parse("[Config]\nUpstream = wgup\nDownstream = wgdown\n");
        let config = DaemonConfig::from_ini(&file).unwrap();

        assert_eq!(config.upstream, "wgup");
        assert_eq!(config.downstream, "wgdown");
        assert_eq!(config.base_path, PathBuf::from("/opt/wirejump"));
        assert_eq!(
            config.socket,
            PathBuf::from("/var/run/wirejumpd/wirejumpd.sock")
        );
    }

    #[test]
    fn test_overrides() {
        let file = IniFile::parse(
            "[Config]\nUpstream = a\nDownstream = b\nBasePath = /srv/wj\nSocket = /tmp/wj.sock\n",
        );
        let config = DaemonConfig::from_ini(&file).unwrap();

        assert_eq!(config.base_path, PathBuf::from("/srv/wj"));
        assert_eq!(config.socket, PathBuf::from("/tmp/wj.sock"));
    }

    #[test]
    fn test_missing_keys_named() {
        let file = IniFile::parse("[Config]\nUpstream = a\n");
        let err = DaemonConfig::from_ini(&file).unwrap_err();
        assert!(err.to_string().contains("Downstream"));

        let file = IniFile::parse("[Config]\nUpstream =\nDownstream = b\n");
        let err = DaemonConfig::from_ini(&file).unwrap_err();
        assert!(err.to_string().contains("Upstream"));

        let err = DaemonConfig::from_ini(&IniFile::new()).unwrap_err();
        assert!(err.to_string().contains("[Config]"));
    }
}
