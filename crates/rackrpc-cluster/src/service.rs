//! The cluster client service: one per rack controller process.

use parking_lot::Mutex;
use rackrpc_common::transport::{Connector, RequestHandler, TcpConnector};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::{ClusterConfig, ConfigStore};
use crate::discovery::{Discovery, DiscoverySource, EndpointSet, HttpDiscovery};
use crate::error::{ClusterError, Result};
use crate::handlers::{install_builtin, HandlerTable};
use crate::handshake::HandshakeContext;
use crate::hooks::{LifecycleHooks, LoggingHooks};
use crate::identity::{FileIdentityStore, FileSecretStore, IdentityStore, SecretStore};
use crate::inventory::{HostInventory, SystemInventory};
use crate::reconciler::Reconciler;
use crate::registry::RegionClient;
use crate::resolver::SystemResolver;
use crate::scheduler::{PassFuture, PassSummary};
use crate::tracker::ConnectionTracker;

/// Version reported to regions when registering.
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Assembles a [`ClusterClientService`].
///
/// [`ServiceBuilder::from_config`] wires up the production collaborators;
/// each can be replaced before [`ServiceBuilder::build`].
pub struct ServiceBuilder {
    config: Arc<dyn ConfigStore>,
    connector: Arc<dyn Connector>,
    discovery: Arc<dyn DiscoverySource>,
    secrets: Arc<dyn SecretStore>,
    identity: Arc<dyn IdentityStore>,
    inventory: Arc<dyn HostInventory>,
    hooks: Arc<dyn LifecycleHooks>,
    handlers: Arc<HandlerTable>,
    version: String,
}

impl ServiceBuilder {
    /// Production collaborators for `config`, read through `store`.
    pub fn from_config(config: &ClusterConfig, store: Arc<dyn ConfigStore>) -> Self {
        Self {
            connector: Arc::new(TcpConnector::new(
                config.connect_timeout(),
                config.call_timeout(),
            )),
            discovery: Arc::new(HttpDiscovery::new(store.clone(), Arc::new(SystemResolver))),
            secrets: Arc::new(FileSecretStore::new(&config.shared_secret_path)),
            identity: Arc::new(FileIdentityStore::new(&config.identity_path)),
            inventory: Arc::new(SystemInventory),
            hooks: Arc::new(LoggingHooks),
            handlers: Arc::new(HandlerTable::new()),
            version: AGENT_VERSION.to_string(),
            config: store,
        }
    }

    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn discovery(mut self, discovery: Arc<dyn DiscoverySource>) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn secrets(mut self, secrets: Arc<dyn SecretStore>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn identity(mut self, identity: Arc<dyn IdentityStore>) -> Self {
        self.identity = identity;
        self
    }

    pub fn inventory(mut self, inventory: Arc<dyn HostInventory>) -> Self {
        self.inventory = inventory;
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn LifecycleHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Handlers for calls issued by regions. Identify and Authenticate are
    /// installed on build.
    pub fn handlers(mut self, handlers: Arc<HandlerTable>) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn build(self) -> ClusterClientService {
        install_builtin(&self.handlers, self.identity.clone(), self.secrets.clone());

        let running = Arc::new(AtomicBool::new(false));
        let tracker = Arc::new(ConnectionTracker::new(self.hooks));
        let handler: Arc<dyn RequestHandler> = self.handlers.clone();
        let reconciler = Reconciler::new(
            tracker.clone(),
            self.connector,
            handler,
            HandshakeContext {
                config: self.config,
                secrets: self.secrets,
                identity: self.identity,
                inventory: self.inventory,
                version: self.version,
            },
            running.clone(),
        );

        ClusterClientService {
            core: Arc::new(Core {
                tracker,
                reconciler,
                discovery: self.discovery,
                running,
                advertised: Mutex::new(None),
            }),
            handlers: self.handlers,
            cancel: Mutex::new(CancellationToken::new()),
            poller: Mutex::new(None),
        }
    }
}

struct Core {
    tracker: Arc<ConnectionTracker>,
    reconciler: Reconciler,
    discovery: Arc<dyn DiscoverySource>,
    running: Arc<AtomicBool>,
    advertised: Mutex<Option<EndpointSet>>,
}

impl Core {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn try_update(self: &Arc<Self>) -> PassFuture {
        let core = self.clone();
        self.tracker
            .scheduler()
            .trigger(move || async move { core.update().await })
    }

    /// One discovery and reconciliation pass. Never fails.
    async fn update(&self) -> PassSummary {
        let registry = self.tracker.registry();
        if !self.is_running() {
            return PassSummary {
                eventloops: None,
                connections: registry.len(),
            };
        }

        let discovery = match self.discovery.discover().await {
            Ok(discovery) => discovery,
            Err(e) => {
                error!("Cluster client update failed: {}", e);
                Discovery::Unavailable
            }
        };

        match &discovery {
            Discovery::Advertised(endpoints) => {
                *self.advertised.lock() = Some(endpoints.clone());
                if self.is_running() {
                    self.reconciler.reconcile(endpoints).await;
                }
            }
            Discovery::NotAdvertising | Discovery::Unavailable => {
                *self.advertised.lock() = None;
            }
        }

        let summary = PassSummary {
            eventloops: discovery.eventloop_count(),
            connections: registry.len(),
        };
        if self.is_running() {
            self.tracker
                .update_interval(summary.eventloops, summary.connections)
                .await;
        }
        summary
    }
}

/// Keeps the rack connected to every advertised region event-loop.
///
/// # Example
///
/// ```no_run
/// use rackrpc_cluster::{ClusterConfig, ServiceBuilder, StaticConfigStore};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ClusterConfig::new("http://region.example:5240/MAAS".parse()?);
/// let store = Arc::new(StaticConfigStore::new(config.clone()));
/// let service = ServiceBuilder::from_config(&config, store).build();
///
/// service.start();
/// let client = service.get_client_now().await?;
/// let images = client.call("ListBootResources", serde_json::json!({})).await?;
/// service.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct ClusterClientService {
    core: Arc<Core>,
    handlers: Arc<HandlerTable>,
    cancel: Mutex<CancellationToken>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl ClusterClientService {
    /// Starts polling. The first pass begins immediately.
    pub fn start(&self) {
        if self.core.running.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Starting cluster client service");
        self.core.tracker.scheduler().mark_started();

        let cancel = CancellationToken::new();
        *self.cancel.lock() = cancel.clone();
        let core = self.core.clone();
        let poller = tokio::spawn(async move {
            let scheduler_core = core.clone();
            core.tracker
                .scheduler()
                .drive(cancel, || {
                    let pass = scheduler_core.try_update();
                    async move {
                        pass.await;
                    }
                })
                .await;
        });
        *self.poller.lock() = Some(poller);
    }

    /// Stops polling and closes every connection.
    ///
    /// Transports still handshaking are closed before the in-flight pass is
    /// awaited. Returns once each closed connection has gone through loss
    /// handling.
    pub async fn stop(&self) {
        if !self.core.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping cluster client service");
        self.cancel.lock().cancel();
        let poller = self.poller.lock().take();
        if let Some(poller) = poller {
            if let Err(e) = poller.await {
                error!("Cluster client poll loop failed: {}", e);
            }
        }
        let aborted = self.core.reconciler.abort_handshakes();
        if aborted > 0 {
            debug!("Closed {} transport(s) still handshaking", aborted);
        }
        let in_flight = self.core.tracker.scheduler().current();
        if let Some(pass) = in_flight {
            pass.await;
        }

        let connections = self.core.tracker.registry().snapshot();
        for connection in &connections {
            connection.channel.close();
        }
        for connection in connections {
            connection.channel.closed().await;
            self.core
                .tracker
                .connection_lost(&connection.eventloop, connection.id)
                .await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.core.is_running()
    }

    /// A client for a randomly chosen connected event-loop.
    pub fn get_client(&self) -> Result<RegionClient> {
        self.core
            .tracker
            .registry()
            .get_any()
            .map(RegionClient::new)
    }

    /// Like [`get_client`](Self::get_client), but when nothing is connected
    /// runs (or joins) a pass first and tries again.
    pub async fn get_client_now(&self) -> Result<RegionClient> {
        match self.get_client() {
            Err(ClusterError::NoConnectionsAvailable) => {
                self.try_update().await;
                self.get_client()
            }
            result => result,
        }
    }

    /// Clients for every connected event-loop.
    pub fn get_all_clients(&self) -> Vec<RegionClient> {
        self.core
            .tracker
            .registry()
            .snapshot()
            .into_iter()
            .map(RegionClient::new)
            .collect()
    }

    /// Runs a pass now, or joins the one in flight.
    pub fn try_update(&self) -> PassFuture {
        self.core.try_update()
    }

    /// Handlers answering calls issued by regions.
    pub fn handlers(&self) -> &Arc<HandlerTable> {
        &self.handlers
    }

    pub fn interval(&self) -> Duration {
        self.core.tracker.scheduler().interval()
    }

    pub fn watch_interval(&self) -> watch::Receiver<Duration> {
        self.core.tracker.scheduler().watch()
    }

    pub fn connection_count(&self) -> usize {
        self.core.tracker.registry().len()
    }

    /// Names of the connected event-loops, sorted.
    pub fn connected_eventloops(&self) -> Vec<String> {
        self.core.tracker.registry().eventloops()
    }

    /// The event-loops advertised by the latest pass; `None` when that pass
    /// found nothing advertised.
    pub fn eventloops(&self) -> Option<EndpointSet> {
        self.core.advertised.lock().clone()
    }

    /// Number of passes started since the service was built.
    pub fn passes_started(&self) -> u64 {
        self.core.tracker.scheduler().passes_started()
    }
}

impl Drop for ClusterClientService {
    fn drop(&mut self) {
        self.core.running.store(false, Ordering::SeqCst);
        self.cancel.lock().cancel();
    }
}
