//! Socket front end
//!
//! Accepts client connections and feeds their commands to the
//! [`Dispatcher`]. Each connection gets its own task; the dispatcher decides
//! whether a command may run.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wirejump_proto::{FailureKind, IpcConnection, IpcError, IpcResponse, IpcServer};

use crate::config::DaemonConfig;
use crate::dispatch::Dispatcher;
use crate::error::{ErrorCategory, ExecuteError};
use crate::providers::ProviderCatalog;
use crate::state::{Environment, ProcessState};
use crate::version::version_string;

/// Build the state, bind the socket and serve until `shutdown` fires
pub async fn run(
    config: DaemonConfig,
    env: Environment,
    catalog: ProviderCatalog,
    shutdown: CancellationToken,
) -> Result<()> {
    info!("Starting WireJump server...");
    info!("{}", version_string());

    let state = ProcessState::initialize(&config, catalog, &env)
        .await
        .context("Failed to update app state")?;

    let server = IpcServer::bind_to(&config.socket)
        .await
        .with_context(|| format!("Failed to bind socket {:?}", config.socket))?;
    info!("IPC server listening at {:?}", server.path());

    let dispatcher = Arc::new(Dispatcher::new(state, env));
    serve(server, dispatcher, shutdown).await;

    info!("Daemon stopped");
    Ok(())
}

/// Accept loop; returns once `shutdown` is cancelled
///
/// Commands already running are not interrupted.
pub async fn serve(server: IpcServer, dispatcher: Arc<Dispatcher>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Stopping WireJump server...");
                break;
            }
            accepted = server.accept() => match accepted {
                Ok(conn) => {
                    tokio::spawn(handle_connection(conn, dispatcher.clone()));
                }
                Err(e) => {
                    error!("IPC accept error: {}", e);
                    // Brief pause before retrying
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

async fn handle_connection(mut conn: IpcConnection, dispatcher: Arc<Dispatcher>) {
    loop {
        let command = match conn.recv().await {
            Ok(Some(command)) => command,
            Ok(None) => break,
            Err(IpcError::Codec(e)) => {
                warn!("Malformed command: {}", e);
                let response = IpcResponse::Error {
                    kind: FailureKind::Protocol,
                    message: format!("malformed command: {}", e),
                };
                let _ = conn.send(&response).await;
                break;
            }
            Err(e) => {
                debug!("IPC recv error: {}", e);
                break;
            }
        };

        let function = command.function.clone();
        let response = match dispatcher.execute(command).await {
            Ok(reply) => IpcResponse::from(reply),
            Err(e) => {
                match &e {
                    // already reported by the dispatcher
                    ExecuteError::Busy => {}
                    ExecuteError::Handler(inner) if inner.category() != ErrorCategory::External => {
                        debug!("{} rejected: {}", function, e)
                    }
                    _ => warn!("{} failed: {}", function, e),
                }
                e.to_response()
            }
        };

        if let Err(e) = conn.send(&response).await {
            warn!("IPC send error: {}", e);
            break;
        }
    }
}
