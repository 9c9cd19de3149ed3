//! IPC (Inter-Process Communication) module for daemon-CLI communication
//!
//! Uses a Unix domain socket. The daemon listens on the socket and the CLI
//! connects to execute one command at a time. Messages are newline-delimited
//! JSON documents.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use crate::catalog::RemoteFunction;
use crate::wire::{FailureKind, IpcCommand, IpcReply, IpcResponse};

/// Socket the daemon listens on unless configured otherwise
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/wirejumpd/wirejumpd.sock";

/// Socket mode: members of the daemon's group may connect
const SOCKET_MODE: u32 = 0o660;

/// Errors raised by either end of the socket
#[derive(Error, Debug)]
pub enum IpcError {
    #[error("failed to connect to daemon socket at {path:?}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("another daemon is already running (socket at {0:?} is active)")]
    AlreadyRunning(PathBuf),

    #[error("socket I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("connection closed by peer")]
    Closed,

    /// The daemon answered with an error
    #[error("{message}")]
    Remote { kind: FailureKind, message: String },
}

impl IpcError {
    /// True when the daemon ran the handler and it reported a failure
    pub fn is_command_error(&self) -> bool {
        matches!(
            self,
            IpcError::Remote {
                kind: FailureKind::Command,
                ..
            }
        )
    }
}

async fn write_line<T: Serialize>(stream: &mut UnixStream, value: &T) -> Result<(), IpcError> {
    let mut json = serde_json::to_string(value)?;
    json.push('\n');

    stream.write_all(json.as_bytes()).await?;
    stream.flush().await?;

    Ok(())
}

/// IPC client for CLI to connect to daemon
pub struct IpcClient {
    stream: BufReader<UnixStream>,
}

impl IpcClient {
    /// Connect to a specific socket path
    pub async fn connect_to(path: &Path) -> Result<Self, IpcError> {
        let stream = UnixStream::connect(path)
            .await
            .map_err(|source| IpcError::Connect {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self {
            stream: BufReader::new(stream),
        })
    }

    /// Send a raw command and receive the reply envelope
    pub async fn execute(&mut self, command: &IpcCommand) -> Result<IpcReply, IpcError> {
        write_line(self.stream.get_mut(), command).await?;

        let mut response_line = String::new();
        let bytes_read = self.stream.read_line(&mut response_line).await?;

        if bytes_read == 0 {
            return Err(IpcError::Closed);
        }

        match serde_json::from_str::<IpcResponse>(&response_line)? {
            IpcResponse::Reply { empty, result } => Ok(IpcReply { empty, result }),
            IpcResponse::Error { kind, message } => Err(IpcError::Remote { kind, message }),
        }
    }

    /// Call a catalog function; `None` means the daemon sent an empty reply
    pub async fn call<F: RemoteFunction>(
        &mut self,
        request: &F::Request,
    ) -> Result<Option<F::Reply>, IpcError> {
        let command = IpcCommand::new(F::NAME, serde_json::to_value(request)?);
        let reply = self.execute(&command).await?;

        decode_reply::<F::Reply>(reply)
    }
}

/// Decode a reply envelope into a typed result
pub fn decode_reply<T: DeserializeOwned>(reply: IpcReply) -> Result<Option<T>, IpcError> {
    if reply.empty {
        return Ok(None);
    }

    let value = reply.result.unwrap_or(serde_json::Value::Null);
    Ok(Some(serde_json::from_value(value)?))
}

/// IPC server for daemon to listen for CLI connections
pub struct IpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
}

impl IpcServer {
    /// Bind to a specific socket path
    pub async fn bind_to(path: &Path) -> Result<Self, IpcError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Remove stale socket if it exists
        if path.exists() {
            match UnixStream::connect(path).await {
                Ok(_) => return Err(IpcError::AlreadyRunning(path.to_path_buf())),
                Err(_) => std::fs::remove_file(path)?,
            }
        }

        let listener = UnixListener::bind(path)?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(SOCKET_MODE))?;

        Ok(Self {
            listener,
            socket_path: path.to_path_buf(),
        })
    }

    /// Accept an incoming connection
    pub async fn accept(&self) -> Result<IpcConnection, IpcError> {
        let (stream, _) = self.listener.accept().await?;
        Ok(IpcConnection {
            stream: BufReader::new(stream),
        })
    }

    /// Get the socket path
    pub fn path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        // Clean up socket file on shutdown
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

/// A single IPC connection from a client
pub struct IpcConnection {
    stream: BufReader<UnixStream>,
}

impl IpcConnection {
    /// Receive the next command; `Ok(None)` once the client hung up
    pub async fn recv(&mut self) -> Result<Option<IpcCommand>, IpcError> {
        let mut line = String::new();
        let bytes_read = self.stream.read_line(&mut line).await?;

        if bytes_read == 0 {
            return Ok(None);
        }

        Ok(Some(serde_json::from_str(&line)?))
    }

    /// Send a response to the client
    pub async fn send(&mut self, response: &IpcResponse) -> Result<(), IpcError> {
        write_line(self.stream.get_mut(), response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Version, VersionReply};
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_command_error_classification() {
        let err = IpcError::Remote {
            kind: FailureKind::Command,
            message: "setup a provider first".to_string(),
        };
        assert!(err.is_command_error());
        assert_eq!(err.to_string(), "setup a provider first");

        let err = IpcError::Remote {
            kind: FailureKind::Busy,
            message: "busy".to_string(),
        };
        assert!(!err.is_command_error());
        assert!(!IpcError::Closed.is_command_error());
    }

    #[test]
    fn test_decode_empty_reply() {
        let decoded = decode_reply::<VersionReply>(IpcReply::empty()).unwrap();
        assert!(decoded.is_none());

        let decoded =
            decode_reply::<VersionReply>(IpcReply::with_result(json!({"version": "1.0"})))
                .unwrap();
        assert_eq!(decoded.unwrap().version, "1.0");
    }

    #[tokio::test]
    async fn test_ipc_client_server_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("test.sock");

        let server = IpcServer::bind_to(&socket_path).await.unwrap();

        let server_handle = tokio::spawn(async move {
            let mut conn = server.accept().await.unwrap();
            let command = conn.recv().await.unwrap().unwrap();
            assert_eq!(command.function, "Version");

            let reply = IpcReply::with_result(json!({"version": "WireJump test"}));
            conn.send(&reply.into()).await.unwrap();

            // client hangs up after one call
            assert!(conn.recv().await.unwrap().is_none());
        });

        let mut client = IpcClient::connect_to(&socket_path).await.unwrap();
        let reply = client
            .call::<Version>(&Default::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.version, "WireJump test");
        drop(client);

        server_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_ipc_remote_error() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("error.sock");

        let server = IpcServer::bind_to(&socket_path).await.unwrap();

        let server_handle = tokio::spawn(async move {
            let mut conn = server.accept().await.unwrap();
            let _ = conn.recv().await.unwrap();
            conn.send(&IpcResponse::Error {
                kind: FailureKind::UnknownFunction,
                message: "method not found: Bogus".to_string(),
            })
            .await
            .unwrap();
        });

        let mut client = IpcClient::connect_to(&socket_path).await.unwrap();
        let err = client
            .execute(&IpcCommand::new("Bogus", json!({})))
            .await
            .unwrap_err();

        match err {
            IpcError::Remote { kind, message } => {
                assert_eq!(kind, FailureKind::UnknownFunction);
                assert!(message.contains("Bogus"));
            }
            other => panic!("unexpected error: {other}"),
        }

        server_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_socket_permissions() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("perm.sock");

        let _server = IpcServer::bind_to(&socket_path).await.unwrap();
        let mode = std::fs::metadata(&socket_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o660);
    }

    #[tokio::test]
    async fn test_ipc_stale_socket_cleanup() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("stale.sock");

        // Create a stale socket file (not a real socket)
        std::fs::write(&socket_path, "stale").unwrap();

        let server = IpcServer::bind_to(&socket_path).await.unwrap();
        assert!(socket_path.exists());

        drop(server);

        // Socket should be cleaned up on drop
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn test_second_daemon_refused() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("live.sock");

        let _server = IpcServer::bind_to(&socket_path).await.unwrap();
        let second = IpcServer::bind_to(&socket_path).await;
        assert!(matches!(second, Err(IpcError::AlreadyRunning(_))));
    }

    #[tokio::test]
    async fn test_connect_to_missing_socket() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("missing.sock");

        let err = IpcClient::connect_to(&socket_path).await.err().unwrap();
        assert!(matches!(err, IpcError::Connect { .. }));
        assert!(!err.is_command_error());
    }
}
