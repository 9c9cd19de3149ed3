//! Command handlers, one per remote function

use async_trait::async_trait;
use wirejump_proto::catalog::*;
use wirejump_proto::RemoteFunction;

use crate::error::DaemonError;
use crate::lifecycle::{self, NOT_INITIALIZED, NO_PROVIDER};
use crate::peers;
use crate::providers::ProviderAccount;
use crate::state::{Environment, ProcessState};
use crate::version;

/// Typed body of a remote function
///
/// `Ok(None)` produces an empty reply.
#[async_trait]
pub trait Handler: RemoteFunction {
    async fn handle(
        state: &mut ProcessState,
        env: &Environment,
        request: Self::Request,
    ) -> Result<Option<Self::Reply>, DaemonError>;
}

#[async_trait]
impl Handler for ListProviders {
    async fn handle(
        state: &mut ProcessState,
        _env: &Environment,
        _request: EmptyRequest,
    ) -> Result<Option<ListProvidersReply>, DaemonError> {
        Ok(Some(ListProvidersReply {
            providers: state.catalog.names(),
        }))
    }
}

#[async_trait]
impl Handler for SetupProvider {
    async fn handle(
        state: &mut ProcessState,
        env: &Environment,
        request: SetupRequest,
    ) -> Result<Option<EmptyReply>, DaemonError> {
        let account = ProviderAccount {
            account_id: request.username,
            password: request.password,
        };

        lifecycle::setup_provider(state, env, &request.provider, account).await?;
        Ok(None)
    }
}

#[async_trait]
impl Handler for ManageServers {
    async fn handle(
        state: &mut ProcessState,
        _env: &Environment,
        request: ServersRequest,
    ) -> Result<Option<ServersReply>, DaemonError> {
        match &mut state.provider {
            None => return Err(DaemonError::precondition(NO_PROVIDER)),
            Some(current) if !current.provider.initialized => {
                return Err(DaemonError::precondition(NOT_INITIALIZED))
            }
            Some(current) if request.reset => {
                current.preferred_location = None;
                return Ok(None);
            }
            Some(_) => {}
        }

        lifecycle::refresh_directory(state, request.force_update).await?;

        let (Some(current), Some(directory)) = (state.provider.as_mut(), state.directory.as_ref())
        else {
            return Err(DaemonError::precondition("servers are still not updated"));
        };

        if !request.preferred.is_empty() {
            if !directory.has_location(&request.preferred) {
                return Err(DaemonError::validation(format!(
                    "location '{}' is not found",
                    request.preferred
                )));
            }

            current.preferred_location = Some(request.preferred);
            return Ok(None);
        }

        Ok(Some(ServersReply {
            servers: directory.locations(),
            last_updated: Some(directory.last_refresh()),
            preferred: current.preferred_location.clone(),
        }))
    }
}

#[async_trait]
impl Handler for ManagePeers {
    async fn handle(
        state: &mut ProcessState,
        env: &Environment,
        request: PeerRequest,
    ) -> Result<Option<PeerReply>, DaemonError> {
        match request.operation {
            PeerOperation::Add => {
                let address =
                    peers::add_peer(state, env, &request.pubkey, request.isolated).await?;

                Ok(Some(PeerReply {
                    peer: PeerInfo {
                        ipv4_address: address,
                        isolated: request.isolated,
                    },
                }))
            }
            PeerOperation::Delete => {
                peers::remove_peer(state, env, &request.pubkey).await?;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl Handler for Connect {
    async fn handle(
        state: &mut ProcessState,
        env: &Environment,
        request: ConnectRequest,
    ) -> Result<Option<EmptyReply>, DaemonError> {
        lifecycle::connect(state, env, &request).await?;
        Ok(None)
    }
}

#[async_trait]
impl Handler for Status {
    async fn handle(
        state: &mut ProcessState,
        env: &Environment,
        _request: EmptyRequest,
    ) -> Result<Option<StatusReply>, DaemonError> {
        let Some(current) = &state.provider else {
            return Ok(Some(StatusReply::default()));
        };

        // the upstream may not exist in the system yet
        let online = match &state.network.upstream {
            Some(upstream) => env.control.is_active(&upstream.name).await.unwrap_or(false),
            None => false,
        };

        let server = current.server.as_ref();
        let non_empty = |value: &str| Some(value.to_string()).filter(|v| !v.is_empty());

        Ok(Some(StatusReply {
            upstream: ConnectionStatus {
                online,
                active_since: current.active_since,
                country: server.and_then(|s| non_empty(&s.country)),
                city: server.and_then(|s| non_empty(&s.city)),
            },
            provider: ProviderStatus {
                name: non_empty(&current.provider.name),
                preferred_location: current.preferred_location.clone(),
                account_expires: current.provider.valid_until,
            },
        }))
    }
}

#[async_trait]
impl Handler for Reset {
    async fn handle(
        state: &mut ProcessState,
        env: &Environment,
        _request: EmptyRequest,
    ) -> Result<Option<EmptyReply>, DaemonError> {
        lifecycle::reset(state, env).await?;
        Ok(None)
    }
}

#[async_trait]
impl Handler for Version {
    async fn handle(
        _state: &mut ProcessState,
        _env: &Environment,
        _request: EmptyRequest,
    ) -> Result<Option<VersionReply>, DaemonError> {
        Ok(Some(VersionReply {
            version: version::version_string(),
        }))
    }
}
