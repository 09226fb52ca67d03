// Shared fakes for rackrpc-cluster integration tests.
//
// FakeConnector hands out in-memory channels that answer the region side of
// the handshake according to a per-address script. ScriptedDiscovery returns
// whatever the test last told it to, optionally holding each pass at a gate.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use rackrpc_cluster::discovery::{Discovery, DiscoverySource, EndpointSet};
use rackrpc_cluster::{
    ClusterClientService, ClusterConfig, ClusterError, LifecycleHooks, MemoryIdentityStore,
    ServiceBuilder, StaticConfigStore, StaticInventory, StaticSecretStore,
};
use rackrpc_common::auth::{calculate_digest, generate_salt};
use rackrpc_common::transport::{Channel, Connector, RequestHandler};
use rackrpc_common::{Result as RpcResult, RpcArgs, RpcError};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

pub const SECRET: &[u8] = b"region-and-rack-secret";

// ============================================================================
// Scripted region
// ============================================================================

/// How the fake region at one address behaves.
#[derive(Debug, Clone)]
pub struct RegionScript {
    pub ident: String,
    pub secret: Vec<u8>,
    pub reject_registration: bool,
    pub system_id: String,
    pub version: Option<String>,
    /// Calls never answer; they fail once the channel is closed.
    pub stall: bool,
}

impl RegionScript {
    pub fn new(ident: &str) -> Self {
        Self {
            ident: ident.to_string(),
            secret: SECRET.to_vec(),
            reject_registration: false,
            system_id: "rack-1".to_string(),
            version: Some("3.4.0".to_string()),
            stall: false,
        }
    }

    pub fn wrong_secret(mut self) -> Self {
        self.secret = b"not-the-secret".to_vec();
        self
    }

    pub fn rejecting(mut self) -> Self {
        self.reject_registration = true;
        self
    }

    pub fn stalling(mut self) -> Self {
        self.stall = true;
        self
    }
}

pub fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

/// In-memory channel answering as a region event-loop.
pub struct FakeChannel {
    address: SocketAddr,
    script: RegionScript,
    closed: CancellationToken,
    events: Arc<Mutex<Vec<String>>>,
    registrations: Arc<Mutex<Vec<Value>>>,
}

impl FakeChannel {
    fn answer(&self, method: &str, args: &RpcArgs) -> RpcResult<Value> {
        match method {
            "Identify" => Ok(json!({ "ident": self.script.ident })),
            "Authenticate" => {
                let message = hex::decode(args["message"].as_str().unwrap_or_default())?;
                let salt = generate_salt();
                let digest = calculate_digest(&self.script.secret, &message, &salt);
                Ok(json!({ "digest": hex::encode(digest), "salt": hex::encode(salt) }))
            }
            "RegisterRackController" => {
                self.registrations.lock().push(args.clone());
                if self.script.reject_registration {
                    return Err(RpcError::Remote {
                        kind: Some("CannotRegisterRackController".to_string()),
                        message: "no".to_string(),
                    });
                }
                let mut reply = json!({ "system_id": self.script.system_id });
                if let Some(version) = &self.script.version {
                    reply["version"] = json!(version);
                }
                Ok(reply)
            }
            other => Ok(json!({ "echo": other, "args": args })),
        }
    }

    /// Simulates the region dropping the connection.
    pub fn kill(&self) {
        self.events.lock().push(format!("lost {}", self.address));
        self.closed.cancel();
    }
}

#[async_trait]
impl Channel for FakeChannel {
    fn peer_addr(&self) -> SocketAddr {
        self.address
    }

    async fn call(&self, method: &str, args: RpcArgs) -> RpcResult<Value> {
        if self.script.stall {
            self.closed.cancelled().await;
        }
        if self.closed.is_cancelled() {
            return Err(RpcError::ConnectionClosed);
        }
        self.answer(method, &args)
    }

    async fn start_tls(&self) -> RpcResult<()> {
        Ok(())
    }

    fn close(&self) {
        if !self.closed.is_cancelled() {
            self.events.lock().push(format!("close {}", self.address));
        }
        self.closed.cancel();
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    async fn closed(&self) {
        self.closed.cancelled().await
    }
}

/// Opens [`FakeChannel`]s for scripted addresses; other addresses refuse.
#[derive(Default)]
pub struct FakeConnector {
    scripts: Mutex<HashMap<SocketAddr, RegionScript>>,
    pub events: Arc<Mutex<Vec<String>>>,
    pub registrations: Arc<Mutex<Vec<Value>>>,
    channels: Mutex<Vec<Arc<FakeChannel>>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, address: SocketAddr, script: RegionScript) {
        self.scripts.lock().insert(address, script);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.starts_with("connect "))
            .count()
    }

    /// Channels opened to `address`, oldest first.
    pub fn channels_to(&self, address: SocketAddr) -> Vec<Arc<FakeChannel>> {
        self.channels
            .lock()
            .iter()
            .filter(|c| c.address == address)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        address: SocketAddr,
        _handler: Arc<dyn RequestHandler>,
    ) -> RpcResult<Arc<dyn Channel>> {
        self.events.lock().push(format!("connect {}", address));
        let script = self.scripts.lock().get(&address).cloned();
        let script = script.ok_or_else(|| {
            RpcError::Connection(format!("Failed to connect to {}: refused", address))
        })?;
        let channel = Arc::new(FakeChannel {
            address,
            script,
            closed: CancellationToken::new(),
            events: self.events.clone(),
            registrations: self.registrations.clone(),
        });
        self.channels.lock().push(channel.clone());
        Ok(channel)
    }
}

// ============================================================================
// Scripted discovery
// ============================================================================

pub struct ScriptedDiscovery {
    current: Mutex<Discovery>,
    calls: AtomicUsize,
    gate: Option<Semaphore>,
    failing: AtomicBool,
}

impl ScriptedDiscovery {
    pub fn new(discovery: Discovery) -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new(discovery),
            calls: AtomicUsize::new(0),
            gate: None,
            failing: AtomicBool::new(false),
        })
    }

    /// Each discovery waits for one [`ScriptedDiscovery::release`].
    pub fn gated(discovery: Discovery) -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new(discovery),
            calls: AtomicUsize::new(0),
            gate: Some(Semaphore::new(0)),
            failing: AtomicBool::new(false),
        })
    }

    pub fn set(&self, discovery: Discovery) {
        *self.current.lock() = discovery;
    }

    pub fn advertise<const N: usize>(&self, eventloops: [(&str, Vec<SocketAddr>); N]) {
        self.set(advertised(eventloops));
    }

    /// While set, discovery fails as if the region's name did not resolve.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }
}

pub fn advertised<const N: usize>(eventloops: [(&str, Vec<SocketAddr>); N]) -> Discovery {
    Discovery::Advertised(EndpointSet::from_addrs(eventloops))
}

#[async_trait]
impl DiscoverySource for ScriptedDiscovery {
    async fn discover(&self) -> rackrpc_cluster::Result<Discovery> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ClusterError::Resolution {
                host: "region.example".to_string(),
                reason: "no such host".to_string(),
            });
        }
        Ok(self.current.lock().clone())
    }
}

// ============================================================================
// Recording hooks
// ============================================================================

#[derive(Default)]
pub struct RecordingHooks {
    pub lost: AtomicUsize,
    pub intervals: Mutex<Vec<Duration>>,
}

#[async_trait]
impl LifecycleHooks for RecordingHooks {
    async fn all_connections_lost(&self) {
        self.lost.fetch_add(1, Ordering::SeqCst);
    }

    async fn interval_changed(&self, interval: Duration) {
        self.intervals.lock().push(interval);
    }
}

impl RecordingHooks {
    pub fn lost(&self) -> usize {
        self.lost.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Service harness
// ============================================================================

pub struct Harness {
    pub service: ClusterClientService,
    pub connector: Arc<FakeConnector>,
    pub discovery: Arc<ScriptedDiscovery>,
    pub hooks: Arc<RecordingHooks>,
    pub identity: Arc<MemoryIdentityStore>,
}

pub fn config() -> ClusterConfig {
    let mut config = ClusterConfig::new("http://region.example:5240/MAAS".parse().unwrap());
    config.cluster_uuid = Some("legacy-cluster".to_string());
    config
}

pub fn harness(discovery: Arc<ScriptedDiscovery>) -> Harness {
    harness_with(config(), discovery)
}

pub fn harness_with(config: ClusterConfig, discovery: Arc<ScriptedDiscovery>) -> Harness {
    let connector = FakeConnector::new();
    let hooks = Arc::new(RecordingHooks::default());
    let identity = Arc::new(MemoryIdentityStore::default());
    let store = Arc::new(StaticConfigStore::new(config.clone()));

    let service = ServiceBuilder::from_config(&config, store)
        .connector(connector.clone())
        .discovery(discovery.clone())
        .secrets(Arc::new(StaticSecretStore::new(SECRET.to_vec())))
        .identity(identity.clone())
        .inventory(Arc::new(StaticInventory {
            hostname: "rack.example".to_string(),
            interfaces: Default::default(),
        }))
        .hooks(hooks.clone())
        .version("9.9.9")
        .build();

    Harness {
        service,
        connector,
        discovery,
        hooks,
        identity,
    }
}

/// Lets spawned tasks (loss watchers) run.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
