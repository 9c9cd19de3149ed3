//! Shared fixtures for daemon integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::Notify;
use wirejump_daemon::{
    AccountInfo, DaemonConfig, Dispatcher, Endpoint, Environment, ExecuteError, InterfaceControl,
    InterfaceError, Layout, ProcessState, Provider, ProviderCatalog, ProviderError, UpstreamApi,
};
use wirejump_proto::{IpcCommand, RemoteFunction};

pub const UPSTREAM: &str = "wgup";
pub const DOWNSTREAM: &str = "wgdown";
pub const GATEWAY: &str = "10.64.0.1";
pub const ASSIGNED_ADDRESS: &str = "10.64.12.34/32";
pub const ACCOUNT_EXPIRES: i64 = 1_900_000_000;

/// Valid 32-byte base64 key filled with `byte`
pub fn key(byte: u8) -> String {
    STANDARD.encode([byte; 32])
}

/// Records every tunnel operation instead of running wg-quick
#[derive(Default)]
pub struct FakeControl {
    next_key: AtomicU8,

    /// Known interfaces and whether they are up
    links: Mutex<HashMap<String, bool>>,

    calls: Mutex<Vec<String>>,

    /// `bring_up` fails without touching the link
    pub fail_up: AtomicBool,

    /// When set, `bring_up` signals `entered` and waits on the gate
    gate: Mutex<Option<Arc<Notify>>>,
    pub entered: Arc<Notify>,
}

impl FakeControl {
    pub fn new() -> Self {
        Self {
            next_key: AtomicU8::new(1),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    pub fn is_up(&self, name: &str) -> bool {
        self.links.lock().unwrap().get(name).copied().unwrap_or(false)
    }

    /// Make `bring_up` block until the returned gate is notified
    pub fn hold_bring_up(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl InterfaceControl for FakeControl {
    async fn generate_private_key(&self) -> Result<String, InterfaceError> {
        Ok(key(self.next_key.fetch_add(1, Ordering::SeqCst)))
    }

    async fn derive_public_key(&self, private_key: &str) -> Result<String, InterfaceError> {
        let bytes = STANDARD
            .decode(private_key)
            .map_err(|_| InterfaceError::InvalidKey)?;
        let public: Vec<u8> = bytes.iter().map(|b| b ^ 0xff).collect();
        Ok(STANDARD.encode(public))
    }

    async fn bring_up(&self, interface: &str) -> Result<(), InterfaceError> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            self.entered.notify_one();
            gate.notified().await;
        }

        if self.fail_up.load(Ordering::SeqCst) {
            return Err(InterfaceError::CommandFailed {
                command: format!("wg-quick up {}", interface),
                stderr: "RTNETLINK answers: Operation not permitted".to_string(),
            });
        }

        self.record(format!("up {}", interface));
        self.links.lock().unwrap().insert(interface.to_string(), true);
        Ok(())
    }

    async fn bring_down(&self, interface: &str) -> Result<(), InterfaceError> {
        self.record(format!("down {}", interface));
        self.links.lock().unwrap().insert(interface.to_string(), false);
        Ok(())
    }

    async fn is_active(&self, interface: &str) -> Result<bool, InterfaceError> {
        self.links
            .lock()
            .unwrap()
            .get(interface)
            .copied()
            .ok_or_else(|| InterfaceError::NotFound(interface.to_string()))
    }

    async fn set_peer(
        &self,
        interface: &str,
        public_key: &str,
        allowed_ips: &[String],
    ) -> Result<(), InterfaceError> {
        self.record(format!(
            "set_peer {} {} {}",
            interface,
            public_key,
            allowed_ips.join(",")
        ));
        Ok(())
    }

    async fn remove_peer(&self, interface: &str, public_key: &str) -> Result<(), InterfaceError> {
        self.record(format!("remove_peer {} {}", interface, public_key));
        Ok(())
    }
}

/// Provider backend shared between the test and every API it hands out
pub struct FakeUpstream {
    pub endpoints: Mutex<Vec<Endpoint>>,
    pub fail_servers: AtomicBool,
    pub fail_account: AtomicBool,
    pub fail_add: AtomicBool,
    pub fail_remove: AtomicBool,
    pub fail_address: AtomicBool,

    /// Gateway handed to providers created from now on
    pub gateway: Mutex<String>,

    calls: Mutex<Vec<String>>,
}

impl FakeUpstream {
    pub fn new() -> Self {
        Self {
            endpoints: Mutex::new(vec![
                endpoint("Sweden", "Malmo", "193.138.218.1"),
                endpoint("Sweden", "Gothenburg", "185.213.154.2"),
                endpoint("Germany", "Berlin", "193.32.248.3"),
            ]),
            fail_servers: AtomicBool::new(false),
            fail_account: AtomicBool::new(false),
            fail_add: AtomicBool::new(false),
            fail_remove: AtomicBool::new(false),
            fail_address: AtomicBool::new(false),
            gateway: Mutex::new(GATEWAY.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn position(&self, call: &str) -> Option<usize> {
        self.calls().iter().position(|c| c == call)
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    /// Record `call`, then fail it when `flag` is set
    fn checked(&self, call: String, flag: &AtomicBool) -> Result<(), ProviderError> {
        self.record(call);
        if flag.load(Ordering::SeqCst) {
            return Err(ProviderError::Api {
                code: "INTERNAL_ERROR".to_string(),
                details: "upstream rejected the request".to_string(),
            });
        }
        Ok(())
    }
}

/// Turn one of the failure switches on
pub fn fail(flag: &AtomicBool) {
    flag.store(true, Ordering::SeqCst);
}

pub fn endpoint(country: &str, city: &str, ip: &str) -> Endpoint {
    Endpoint {
        country: country.to_string(),
        city: city.to_string(),
        ipv4: ip.to_string(),
        port: 51820,
        public_key: key(0xaa),
    }
}

struct FakeApi(Arc<FakeUpstream>);

#[async_trait]
impl UpstreamApi for FakeApi {
    async fn api_request(
        &self,
        _method: Method,
        url: &str,
        _use_auth: bool,
        _body: Option<Value>,
    ) -> Result<Value, ProviderError> {
        Err(ProviderError::Decode(format!("no route to {}", url)))
    }

    async fn get_account_info(&self) -> Result<AccountInfo, ProviderError> {
        self.0
            .checked("account_info".to_string(), &self.0.fail_account)?;
        Ok(AccountInfo {
            expires: ACCOUNT_EXPIRES,
        })
    }

    async fn get_all_servers(&self) -> Result<Vec<Endpoint>, ProviderError> {
        self.0.checked("servers".to_string(), &self.0.fail_servers)?;
        Ok(self.0.endpoints.lock().unwrap().clone())
    }

    async fn add_pubkey(&self, public_key: &str) -> Result<(), ProviderError> {
        self.0
            .checked(format!("add {}", public_key), &self.0.fail_add)
    }

    async fn remove_pubkey(&self, public_key: &str) -> Result<(), ProviderError> {
        self.0
            .checked(format!("remove {}", public_key), &self.0.fail_remove)
    }

    async fn get_address(&self, public_key: &str) -> Result<String, ProviderError> {
        self.0
            .checked(format!("address {}", public_key), &self.0.fail_address)?;
        Ok(ASSIGNED_ADDRESS.to_string())
    }
}

/// `fakevpn` needs only an account id, `securevpn` also needs a password
pub fn catalog(upstream: &Arc<FakeUpstream>) -> ProviderCatalog {
    let mut catalog = ProviderCatalog::new();

    for (name, requires_password) in [("fakevpn", false), ("securevpn", true)] {
        let upstream = upstream.clone();
        catalog.register(name, requires_password, move |account| {
            let gateway = upstream.gateway.lock().unwrap().clone();
            Ok(Provider::new(
                name,
                account,
                gateway,
                Box::new(FakeApi(upstream.clone())),
            ))
        });
    }

    catalog
}

/// A daemon over a temporary base path
pub struct TestDaemon {
    pub dir: TempDir,
    pub control: Arc<FakeControl>,
    pub upstream: Arc<FakeUpstream>,
    pub config: DaemonConfig,
    pub env: Environment,
    pub dispatcher: Arc<Dispatcher>,
}

impl TestDaemon {
    pub async fn start() -> Self {
        let dir = TempDir::new().unwrap();
        let config_dir = dir.path().join("config");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(
            config_dir.join("downstream.conf"),
            format!(
                "[Interface]\nAddress = 10.0.0.1/24\nPrivateKey = {}\nListenPort = 51820\n",
                key(0x42)
            ),
        )
        .unwrap();

        let config = DaemonConfig {
            upstream: UPSTREAM.to_string(),
            downstream: DOWNSTREAM.to_string(),
            base_path: dir.path().to_path_buf(),
            socket: dir.path().join("wirejumpd.sock"),
        };

        let control = Arc::new(FakeControl::new());
        let upstream = Arc::new(FakeUpstream::new());
        let env = Environment::new(control.clone(), Layout::new(dir.path()));

        let state = ProcessState::initialize(&config, catalog(&upstream), &env)
            .await
            .unwrap();
        let dispatcher = Arc::new(Dispatcher::new(state, env.clone()));

        Self {
            dir,
            control,
            upstream,
            config,
            env,
            dispatcher,
        }
    }

    pub fn config_file(&self, name: &str) -> PathBuf {
        self.dir.path().join("config").join(name)
    }

    pub fn read(&self, name: &str) -> String {
        std::fs::read_to_string(self.config_file(name)).unwrap()
    }

    pub fn base(&self) -> &Path {
        self.dir.path()
    }

    /// Call a function through the dispatcher with typed payloads
    pub async fn call<F: RemoteFunction>(
        &self,
        request: F::Request,
    ) -> Result<Option<F::Reply>, ExecuteError> {
        call::<F>(&self.dispatcher, request).await
    }

    /// Current upstream public key
    pub async fn upstream_key(&self) -> String {
        let state = self.dispatcher.state().lock().await;
        state
            .network
            .upstream
            .as_ref()
            .map(|iface| iface.public_key.clone())
            .unwrap_or_default()
    }

    pub async fn setup(&self) {
        self.call::<wirejump_proto::catalog::SetupProvider>(wirejump_proto::catalog::SetupRequest {
            provider: "fakevpn".to_string(),
            username: "1234567890".to_string(),
            password: String::new(),
        })
        .await
        .unwrap();
    }
}

pub async fn call<F: RemoteFunction>(
    dispatcher: &Dispatcher,
    request: F::Request,
) -> Result<Option<F::Reply>, ExecuteError> {
    let params = serde_json::to_value(request).unwrap();
    let reply = dispatcher.execute(IpcCommand::new(F::NAME, params)).await?;

    Ok(reply
        .result
        .map(|value| serde_json::from_value(value).unwrap()))
}
