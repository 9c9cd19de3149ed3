//! Socket front end tests

mod common;

use common::*;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use wirejump_daemon::{server, Environment, Layout};
use wirejump_proto::catalog::*;
use wirejump_proto::{FailureKind, IpcClient, IpcCommand, IpcError, IpcResponse, IpcServer};

async fn wait_for_socket(path: &Path) -> IpcClient {
    timeout(Duration::from_secs(5), async {
        loop {
            match IpcClient::connect_to(path).await {
                Ok(client) => return client,
                Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
    })
    .await
    .expect("daemon socket never came up")
}

#[tokio::test]
async fn test_serve_commands_over_socket() {
    let daemon = TestDaemon::start().await;
    let socket = daemon.config.socket.clone();

    let server = IpcServer::bind_to(&socket).await.unwrap();
    let shutdown = CancellationToken::new();
    let serving = tokio::spawn(server::serve(
        server,
        daemon.dispatcher.clone(),
        shutdown.clone(),
    ));

    let mut client = IpcClient::connect_to(&socket).await.unwrap();

    let version = client
        .call::<Version>(&EmptyRequest {})
        .await
        .unwrap()
        .unwrap();
    assert!(version.version.starts_with("WireJump "));

    // the connection stays open for further commands
    let providers = client
        .call::<ListProviders>(&EmptyRequest {})
        .await
        .unwrap()
        .unwrap();
    assert_eq!(providers.providers, vec!["fakevpn", "securevpn"]);

    let err = client
        .call::<Connect>(&ConnectRequest::default())
        .await
        .unwrap_err();
    assert!(err.is_command_error());
    assert_eq!(err.to_string(), "setup a provider first");

    let err = client
        .execute(&IpcCommand::new("Teleport", json!({})))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        IpcError::Remote {
            kind: FailureKind::UnknownFunction,
            ..
        }
    ));

    let err = client
        .execute(&IpcCommand::new("ManagePeers", json!({"operation": "rename"})))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        IpcError::Remote {
            kind: FailureKind::Protocol,
            ..
        }
    ));

    let reply = client
        .execute(&IpcCommand::new("Reset", Value::Null))
        .await
        .unwrap();
    assert!(reply.empty);
    assert_eq!(reply.result, None);

    shutdown.cancel();
    serving.await.unwrap();

    // the socket goes away with the server
    assert!(!socket.exists());
}

#[tokio::test]
async fn test_malformed_line_closes_connection() {
    let daemon = TestDaemon::start().await;
    let socket = daemon.config.socket.clone();

    let server = IpcServer::bind_to(&socket).await.unwrap();
    let shutdown = CancellationToken::new();
    let serving = tokio::spawn(server::serve(
        server,
        daemon.dispatcher.clone(),
        shutdown.clone(),
    ));

    let stream = UnixStream::connect(&socket).await.unwrap();
    let mut stream = BufReader::new(stream);
    stream
        .get_mut()
        .write_all(b"{\"function\": \n")
        .await
        .unwrap();

    let mut line = String::new();
    stream.read_line(&mut line).await.unwrap();
    let response: IpcResponse = serde_json::from_str(&line).unwrap();
    assert!(matches!(
        response,
        IpcResponse::Error {
            kind: FailureKind::Protocol,
            ..
        }
    ));

    line.clear();
    assert_eq!(stream.read_line(&mut line).await.unwrap(), 0);

    // other clients are unaffected
    let mut client = IpcClient::connect_to(&socket).await.unwrap();
    assert!(client
        .call::<Status>(&EmptyRequest {})
        .await
        .unwrap()
        .is_some());

    shutdown.cancel();
    serving.await.unwrap();
}

#[tokio::test]
async fn test_run_until_shutdown() {
    let daemon = TestDaemon::start().await;
    let socket = daemon.config.socket.clone();
    let shutdown = CancellationToken::new();

    let running = tokio::spawn(server::run(
        daemon.config.clone(),
        daemon.env.clone(),
        catalog(&daemon.upstream),
        shutdown.clone(),
    ));

    let mut client = wait_for_socket(&socket).await;
    client
        .call::<SetupProvider>(&SetupRequest {
            provider: "fakevpn".to_string(),
            username: "1234567890".to_string(),
            password: String::new(),
        })
        .await
        .unwrap();
    client
        .call::<Connect>(&ConnectRequest::default())
        .await
        .unwrap();

    let status = client
        .call::<Status>(&EmptyRequest {})
        .await
        .unwrap()
        .unwrap();
    assert!(status.upstream.online);
    assert_eq!(status.provider.name.as_deref(), Some("fakevpn"));

    // a second daemon on the same socket is refused
    let err = IpcServer::bind_to(&socket).await.err().unwrap();
    assert!(matches!(err, IpcError::AlreadyRunning(_)));

    shutdown.cancel();
    running.await.unwrap().unwrap();
    assert!(!socket.exists());
}

#[tokio::test]
async fn test_run_requires_downstream_address() {
    let dir = tempfile::TempDir::new().unwrap();
    let config_dir = dir.path().join("config");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(config_dir.join("downstream.conf"), "[Interface]\nListenPort = 51820\n")
        .unwrap();

    let config = wirejump_daemon::DaemonConfig {
        upstream: UPSTREAM.to_string(),
        downstream: DOWNSTREAM.to_string(),
        base_path: dir.path().to_path_buf(),
        socket: dir.path().join("wirejumpd.sock"),
    };
    let upstream = std::sync::Arc::new(FakeUpstream::new());
    let env = Environment::new(
        std::sync::Arc::new(FakeControl::new()),
        Layout::new(dir.path()),
    );

    let err = server::run(config, env, catalog(&upstream), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("Downstream interface MUST have a valid address"));

    // startup stopped before binding
    assert!(!dir.path().join("wirejumpd.sock").exists());
}
