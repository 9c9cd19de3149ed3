//! Process-wide daemon state
//!
//! [`ProcessState`] is built once at startup and then only touched by
//! command handlers while the dispatcher holds its lock.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::config::DaemonConfig;
use crate::network::control::InterfaceControl;
use crate::network::{InterfaceConfig, InterfaceKind, Layout};
use crate::providers::directory::EndpointDirectory;
use crate::providers::{ProviderCatalog, ProviderState};

/// Interface names, fixed after startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub upstream_name: String,
    pub downstream_name: String,
}

#[derive(Debug)]
pub struct Network {
    /// Outbound tunnel; dropped by reset and recreated on demand
    pub upstream: Option<InterfaceConfig>,

    /// Inbound tunnel, always present
    pub downstream: InterfaceConfig,
}

#[derive(Debug)]
pub struct ProcessState {
    pub configuration: Configuration,
    pub network: Network,
    pub provider: Option<ProviderState>,
    pub directory: Option<EndpointDirectory>,
    pub catalog: ProviderCatalog,
}

/// Collaborators shared by every handler
#[derive(Clone)]
pub struct Environment {
    pub control: Arc<dyn InterfaceControl>,
    pub layout: Layout,
}

impl Environment {
    pub fn new(control: Arc<dyn InterfaceControl>, layout: Layout) -> Self {
        Self { control, layout }
    }
}

impl ProcessState {
    /// Load both interfaces from disk and validate the catalog
    pub async fn initialize(
        config: &DaemonConfig,
        catalog: ProviderCatalog,
        env: &Environment,
    ) -> Result<Self> {
        let control = env.control.as_ref();

        let upstream = InterfaceConfig::load(
            &config.upstream,
            InterfaceKind::Upstream,
            &env.layout,
            control,
        )
        .await
        .context("Failed to create initial upstream interface")?;

        let downstream = InterfaceConfig::load(
            &config.downstream,
            InterfaceKind::Downstream,
            &env.layout,
            control,
        )
        .await
        .context("Failed to create initial downstream interface")?;

        if downstream.address.is_empty() {
            bail!(
                "Downstream interface MUST have a valid address in {:?}",
                env.layout.config_path(InterfaceKind::Downstream)
            );
        }

        if catalog.is_empty() {
            bail!("No upstream providers are available");
        }

        info!(
            "Interfaces ready: upstream={} downstream={} ({})",
            upstream.name, downstream.name, downstream.address
        );

        Ok(Self {
            configuration: Configuration {
                upstream_name: config.upstream.clone(),
                downstream_name: config.downstream.clone(),
            },
            network: Network {
                upstream: Some(upstream),
                downstream,
            },
            provider: None,
            directory: None,
            catalog,
        })
    }
}
