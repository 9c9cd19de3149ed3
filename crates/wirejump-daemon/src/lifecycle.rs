//! Upstream connection lifecycle
//!
//! ```text
//! NoProvider -> ProviderSelected -> Disconnected <-> Connected
//!      ^______________________ reset _____________________|
//! ```
//!
//! Every step is fail-fast. Nothing is rolled back, but the running
//! connection is only torn down once a replacement endpoint is known.

use chrono::Utc;
use tracing::{debug, info, warn};
use wirejump_proto::catalog::ConnectRequest;

use crate::error::DaemonError;
use crate::inifile::{section, IniFile};
use crate::network::control::InterfaceError;
use crate::network::{is_valid_ip, InterfaceConfig, InterfaceKind, ScriptAction};
use crate::providers::directory::{guess_new_upstream, EndpointDirectory};
use crate::providers::{Endpoint, ProviderAccount, ProviderState};
use crate::state::{Environment, ProcessState};

pub(crate) const NO_PROVIDER: &str = "setup a provider first";
pub(crate) const NOT_INITIALIZED: &str = "provider is not initialized";

fn now() -> i64 {
    Utc::now().timestamp()
}

/// Create the upstream interface with a fresh key pair if it is missing
async fn ensure_upstream(state: &mut ProcessState, env: &Environment) -> Result<(), DaemonError> {
    if state.network.upstream.is_some() {
        return Ok(());
    }

    let iface = InterfaceConfig::create(
        &state.configuration.upstream_name,
        InterfaceKind::Upstream,
        env.control.as_ref(),
    )
    .await
    .map_err(|e| DaemonError::interface("failed to create upstream keys", e))?;

    debug!("Created upstream interface {}", iface.name);
    state.network.upstream = Some(iface);

    Ok(())
}

/// Select and validate a provider account
pub async fn setup_provider(
    state: &mut ProcessState,
    env: &Environment,
    name: &str,
    account: ProviderAccount,
) -> Result<(), DaemonError> {
    if name.is_empty() {
        return Err(DaemonError::validation("provider name cannot be empty"));
    }

    if let Some(current) = &state.provider {
        return Err(DaemonError::precondition(format!(
            "provider '{}' is already selected, run 'reset' first",
            current.provider.name
        )));
    }

    // a connection can't exist without a key, so keys come first
    ensure_upstream(state, env).await?;

    let entry = state
        .catalog
        .get(name)
        .cloned()
        .ok_or_else(|| DaemonError::validation(format!("provider '{}' does not exist", name)))?;

    if entry.requires_password && account.password.is_empty() {
        return Err(DaemonError::validation("this provider requires a password"));
    }

    let mut provider = (entry.factory)(account)
        .map_err(|e| DaemonError::provider("failed to initialize provider", e))?;

    let account_info = provider
        .api()
        .get_account_info()
        .await
        .map_err(|e| DaemonError::provider("failed to verify provider account", e))?;

    if !is_valid_ip(&provider.upstream_gateway) {
        return Err(DaemonError::validation("upstream gateway IP address is invalid"));
    }

    env.layout
        .write_gateway(&provider.upstream_gateway)
        .await
        .map_err(|e| DaemonError::io("failed to update upstream gateway", e))?;

    provider.valid_until = Some(account_info.expires);

    info!(
        "Provider {} selected, account valid until {}",
        provider.name, account_info.expires
    );
    state.provider = Some(ProviderState::new(provider));

    Ok(())
}

/// Rebuild the endpoint directory when forced or stale
pub async fn refresh_directory(state: &mut ProcessState, force: bool) -> Result<(), DaemonError> {
    let provider_state = state
        .provider
        .as_ref()
        .ok_or_else(|| DaemonError::precondition(NO_PROVIDER))?;

    let now = now();
    let provider = &provider_state.provider;

    if force || EndpointDirectory::is_stale(state.directory.as_ref(), &provider.name, now) {
        let fresh = EndpointDirectory::fetch(provider, now)
            .await
            .map_err(|e| DaemonError::provider("failed to update servers", e))?;
        state.directory = Some(fresh);
    }

    Ok(())
}

/// Connect, reconnect through a new endpoint, or just disconnect
pub async fn connect(
    state: &mut ProcessState,
    env: &Environment,
    request: &ConnectRequest,
) -> Result<(), DaemonError> {
    match &state.provider {
        None => return Err(DaemonError::precondition(NO_PROVIDER)),
        Some(current) if !current.provider.initialized => {
            return Err(DaemonError::precondition(NOT_INITIALIZED))
        }
        Some(_) => {}
    }

    ensure_upstream(state, env).await?;

    // Pick the next endpoint before touching the running connection
    let target = if request.disconnect {
        None
    } else {
        Some(select_endpoint(state, request).await?)
    };

    disconnect(state, env).await?;

    let Some(endpoint) = target else {
        return Ok(());
    };

    let (Some(provider_state), Some(upstream)) =
        (state.provider.as_ref(), state.network.upstream.as_mut())
    else {
        return Err(DaemonError::precondition(NO_PROVIDER));
    };
    let api = provider_state.provider.api();

    if !request.preserve_keys {
        // an orphaned key on the account is better than no connection
        if let Err(e) = api.remove_pubkey(&upstream.public_key).await {
            warn!("Failed to remove old pubkey: {}", e);
        }

        upstream
            .rotate_keys(env.control.as_ref())
            .await
            .map_err(|e| DaemonError::interface("failed to create new key pair", e))?;

        api.add_pubkey(&upstream.public_key)
            .await
            .map_err(|e| DaemonError::provider("failed to add key to the account", e))?;
    }

    upstream.address = api
        .get_address(&upstream.public_key)
        .await
        .map_err(|e| DaemonError::provider("failed to get upstream IP address", e))?;

    let mut config = IniFile::new();
    config.set(
        "Interface",
        section([
            ("Address", upstream.address.clone()),
            ("PrivateKey", upstream.private_key.clone()),
            // routing is handled by the hook scripts
            ("Table", "off".to_string()),
            (
                "PostUp",
                env.layout
                    .script_command(InterfaceKind::Upstream, ScriptAction::Up),
            ),
            (
                "PreDown",
                env.layout
                    .script_command(InterfaceKind::Upstream, ScriptAction::Down),
            ),
        ]),
    );
    config.set(
        "Peer",
        section([
            ("PublicKey", endpoint.public_key.clone()),
            ("AllowedIPs", "0.0.0.0/0".to_string()),
            ("Endpoint", endpoint.socket_addr()),
        ]),
    );

    upstream
        .write_config(&env.layout, &config)
        .await
        .map_err(|e| DaemonError::io("failed to write interface config", e))?;

    env.control
        .bring_up(&upstream.name)
        .await
        .map_err(|e| DaemonError::interface("failed to bring interface up", e))?;

    info!(
        "Connected to {}, {} via {}",
        endpoint.city,
        endpoint.country,
        endpoint.socket_addr()
    );

    if let Some(provider_state) = state.provider.as_mut() {
        provider_state.active_since = Some(now());
        provider_state.server = Some(endpoint);
    }

    Ok(())
}

async fn select_endpoint(
    state: &mut ProcessState,
    request: &ConnectRequest,
) -> Result<Endpoint, DaemonError> {
    refresh_directory(state, false).await.map_err(|e| match e {
        DaemonError::Provider { source, .. } => DaemonError::provider(
            "connect needs fresh servers, but update has failed",
            source,
        ),
        other => other,
    })?;

    let (Some(provider_state), Some(directory)) = (state.provider.as_ref(), state.directory.as_ref())
    else {
        return Err(DaemonError::precondition("servers are still not updated"));
    };

    let location = match request
        .location_override
        .as_deref()
        .filter(|location| !location.is_empty())
    {
        Some(location) if directory.has_location(location) => location.to_string(),
        Some(location) => {
            return Err(DaemonError::validation(format!(
                "location '{}' is not found",
                location
            )))
        }
        None => match &provider_state.preferred_location {
            Some(preferred) => preferred.clone(),
            None => directory
                .random_location(&mut rand::thread_rng())
                .ok_or_else(|| {
                    DaemonError::precondition(
                        "no server locations available, check provider settings",
                    )
                })?,
        },
    };

    debug!("Selecting upstream in {}", location);

    let endpoint = guess_new_upstream(
        directory,
        provider_state.server.as_ref(),
        &location,
        &mut rand::thread_rng(),
    )?;

    Ok(endpoint)
}

/// Bring the upstream down if it is up and forget the current endpoint
pub async fn disconnect(state: &mut ProcessState, env: &Environment) -> Result<(), DaemonError> {
    let Some(upstream) = state.network.upstream.as_ref() else {
        return Ok(());
    };

    match env.control.is_active(&upstream.name).await {
        Ok(true) => env
            .control
            .bring_down(&upstream.name)
            .await
            .map_err(|e| DaemonError::interface("failed to shutdown existing connection", e))?,
        Ok(false) => {}
        Err(InterfaceError::NotFound(_)) => debug!("Upstream {} is already gone", upstream.name),
        Err(e) => return Err(DaemonError::interface("failed to query upstream state", e)),
    }

    if let Some(provider_state) = state.provider.as_mut() {
        provider_state.server = None;
        provider_state.active_since = None;
    }

    Ok(())
}

/// Disconnect, release the account key and forget the provider
pub async fn reset(state: &mut ProcessState, env: &Environment) -> Result<(), DaemonError> {
    disconnect(state, env).await?;

    if let (Some(upstream), Some(provider_state)) =
        (state.network.upstream.as_ref(), state.provider.as_ref())
    {
        provider_state
            .provider
            .api()
            .remove_pubkey(&upstream.public_key)
            .await
            .map_err(|e| DaemonError::provider("cannot remove old pubkey", e))?;

        // emptied rather than removed so a symlinked config survives
        upstream
            .truncate_config(&env.layout)
            .await
            .map_err(|e| DaemonError::io("cannot truncate old interface config", e))?;
    }

    state.directory = None;
    state.network.upstream = None;
    state.provider = None;

    info!("Provider reset");

    Ok(())
}
