//! Per-connection handshake with a region event-loop.
//!
//! ```text
//! Connected --Admitted--> Authenticating --Authenticated--> Registering
//!   Registering --Registered--> [Securing --Secured-->] --Published--> Ready
//!   any --Failed--> Failed          any --TransportClosed--> Disconnected
//! ```
//!
//! [`transition`] is a pure function of state and event; [`Handshake::run`]
//! performs the action each transition asks for and feeds the outcome back
//! in as the next event.

use rackrpc_common::auth::Challenge;
use rackrpc_common::protocol::methods::region;
use rackrpc_common::transport::Channel;
use rackrpc_common::RpcError;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{ClusterConfig, ConfigStore};
use crate::error::{ClusterError, Result};
use crate::identity::{IdentityStore, SecretStore};
use crate::inventory::HostInventory;
use crate::registry::{Connection, ConnectionId, ConnectionRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Connected,
    /// Identify and Authenticate are outstanding.
    Authenticating,
    Registering,
    Securing,
    Ready,
    Failed,
    Disconnected,
}

impl HandshakeState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            HandshakeState::Ready | HandshakeState::Failed | HandshakeState::Disconnected
        )
    }
}

#[derive(Debug)]
pub enum HandshakeEvent {
    Admitted,
    Authenticated,
    Registered,
    Secured,
    Published,
    Failed(ClusterError),
    TransportClosed,
}

#[derive(Debug)]
pub enum HandshakeAction {
    Authenticate,
    Register,
    Secure,
    Publish,
    /// Handshake finished; the connection is in the registry.
    Finish,
    /// Close the transport and report the error.
    Close(ClusterError),
    /// The transport is already gone; report the error.
    Abandon(ClusterError),
}

/// Computes the next state and the action to perform.
pub fn transition(
    state: HandshakeState,
    event: HandshakeEvent,
    eventloop: &str,
    secure_upgrade: bool,
) -> (HandshakeState, HandshakeAction) {
    use HandshakeAction as A;
    use HandshakeEvent as E;
    use HandshakeState as S;

    match (state, event) {
        (S::Connected, E::Admitted) => (S::Authenticating, A::Authenticate),
        (S::Authenticating, E::Authenticated) => (S::Registering, A::Register),
        (S::Registering, E::Registered) if secure_upgrade => (S::Securing, A::Secure),
        (S::Registering, E::Registered) | (S::Securing, E::Secured) => (state, A::Publish),
        (S::Registering | S::Securing, E::Published) => (S::Ready, A::Finish),
        (s, E::TransportClosed) if !s.is_terminal() => (
            S::Disconnected,
            A::Abandon(ClusterError::Disconnected(eventloop.to_string())),
        ),
        (s, E::Failed(err)) if !s.is_terminal() => (S::Failed, A::Close(err)),
        (s, event) if !s.is_terminal() => (
            S::Failed,
            A::Close(ClusterError::Rpc(RpcError::InvalidResponse(format!(
                "unexpected handshake event {:?} in state {:?}",
                event, s
            )))),
        ),
        (s, _) => (s, A::Finish),
    }
}

/// Collaborators a handshake reads local state from.
#[derive(Clone)]
pub struct HandshakeContext {
    pub config: Arc<dyn ConfigStore>,
    pub secrets: Arc<dyn SecretStore>,
    pub identity: Arc<dyn IdentityStore>,
    pub inventory: Arc<dyn HostInventory>,
    /// Version reported to the region
    pub version: String,
}

#[derive(Debug, Deserialize)]
struct AuthenticateReply {
    digest: String,
    salt: String,
}

#[derive(Debug, Deserialize)]
struct IdentifyReply {
    ident: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RegisterReply {
    system_id: String,
    #[serde(default)]
    version: Option<String>,
}

/// Describes a region version for the registration log line.
pub fn describe_version(version: Option<&str>) -> String {
    match version {
        None => "version 2.2 or below".to_string(),
        Some("") => "unknown version".to_string(),
        Some(version) => format!("version {}", version),
    }
}

/// One handshake attempt over a freshly opened transport.
pub struct Handshake<'a> {
    ctx: &'a HandshakeContext,
    registry: &'a ConnectionRegistry,
    running: &'a AtomicBool,
    eventloop: &'a str,
    address: SocketAddr,
    channel: Arc<dyn Channel>,
    state: HandshakeState,
    local_ident: Option<String>,
    remote_version: Option<String>,
}

impl<'a> Handshake<'a> {
    pub fn new(
        ctx: &'a HandshakeContext,
        registry: &'a ConnectionRegistry,
        running: &'a AtomicBool,
        eventloop: &'a str,
        address: SocketAddr,
        channel: Arc<dyn Channel>,
    ) -> Self {
        Self {
            ctx,
            registry,
            running,
            eventloop,
            address,
            channel,
            state: HandshakeState::Connected,
            local_ident: None,
            remote_version: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Drives the handshake to completion.
    ///
    /// On success the connection is in the registry. On failure the transport
    /// has been closed and nothing was registered.
    pub async fn run(mut self) -> Result<Arc<Connection>> {
        let config = match self.ctx.config.open().await {
            Ok(config) => config,
            Err(err) => {
                self.channel.close();
                return Err(err);
            }
        };

        let mut event = self.admit();
        let mut published = None;
        loop {
            let (state, action) =
                transition(self.state, event, self.eventloop, config.secure_upgrade);
            self.state = state;

            event = match action {
                HandshakeAction::Authenticate => self.authenticate().await,
                HandshakeAction::Register => self.register(&config).await,
                HandshakeAction::Secure => self.secure().await,
                HandshakeAction::Publish => match self.publish() {
                    Ok(connection) => {
                        published = Some(connection);
                        HandshakeEvent::Published
                    }
                    Err(err) => HandshakeEvent::Failed(err),
                },
                HandshakeAction::Finish => {
                    return published.ok_or_else(|| {
                        ClusterError::Rpc(RpcError::InvalidResponse(
                            "handshake finished without a connection".to_string(),
                        ))
                    });
                }
                HandshakeAction::Close(err) => {
                    self.report(&err);
                    self.channel.close();
                    return Err(err);
                }
                HandshakeAction::Abandon(err) => {
                    debug!("Event-loop '{}' disconnected during handshake", self.eventloop);
                    return Err(err);
                }
            };
        }
    }

    fn admit(&self) -> HandshakeEvent {
        if !self.running.load(Ordering::SeqCst) {
            info!(
                "Event-loop '{}' will be disconnected; the cluster's client service is not running.",
                self.eventloop
            );
            HandshakeEvent::Failed(ClusterError::ServiceNotRunning)
        } else if self.registry.contains(self.eventloop) {
            info!(
                "Event-loop '{}' is already connected; dropping connection.",
                self.eventloop
            );
            HandshakeEvent::Failed(ClusterError::DuplicateConnection(self.eventloop.to_string()))
        } else {
            HandshakeEvent::Admitted
        }
    }

    /// Logs outcomes specific to the handshake; the caller logs the rest.
    fn report(&self, err: &ClusterError) {
        match err {
            ClusterError::AuthenticationFailed(_) => warn!(
                "Event-loop '{}' FAILED authentication; dropping connection.",
                self.eventloop
            ),
            ClusterError::RegistrationFailed(_) => info!(
                "Rack controller REJECTED by the region (via {}).",
                self.eventloop
            ),
            ClusterError::IdentityMismatch { expected, actual } => warn!(
                "The remote event-loop identifies itself as {}, but {} was expected.",
                actual, expected
            ),
            _ => {}
        }
    }

    fn failed(&self, err: ClusterError) -> HandshakeEvent {
        match err {
            ClusterError::Rpc(ref rpc) if rpc.is_disconnect() => HandshakeEvent::TransportClosed,
            err => HandshakeEvent::Failed(err),
        }
    }

    async fn authenticate(&self) -> HandshakeEvent {
        let (identified, authenticated) = tokio::join!(self.identify(), self.challenge());
        match identified {
            Ok(Some(ident)) if ident != self.eventloop => debug!(
                "Event-loop '{}' identifies itself as '{}'",
                self.eventloop, ident
            ),
            Ok(_) => {}
            Err(err) => debug!("Event-loop '{}' did not identify: {}", self.eventloop, err),
        }

        match authenticated {
            Ok(true) => {
                info!("Event-loop '{}' authenticated.", self.eventloop);
                HandshakeEvent::Authenticated
            }
            Ok(false) => {
                HandshakeEvent::Failed(ClusterError::AuthenticationFailed(self.eventloop.to_string()))
            }
            Err(err) => self.failed(err),
        }
    }

    async fn identify(&self) -> Result<Option<String>> {
        let reply = self.channel.call(region::IDENTIFY, json!({})).await?;
        let reply: IdentifyReply = serde_json::from_value(reply).map_err(RpcError::from)?;
        Ok(reply.ident)
    }

    /// Sends a fresh challenge and checks the digest that comes back.
    async fn challenge(&self) -> Result<bool> {
        let secret = self.ctx.secrets.shared_secret().await?;
        let challenge = Challenge::generate();
        let reply = self
            .channel
            .call(
                region::AUTHENTICATE,
                json!({ "message": hex::encode(challenge.message()) }),
            )
            .await?;
        let reply: AuthenticateReply = serde_json::from_value(reply).map_err(RpcError::from)?;
        let digest = hex::decode(&reply.digest).map_err(RpcError::from)?;
        let salt = hex::decode(&reply.salt).map_err(RpcError::from)?;
        Ok(challenge.verify(&secret, &digest, &salt))
    }

    async fn register(&mut self, config: &ClusterConfig) -> HandshakeEvent {
        match self.try_register(config).await {
            Ok(event) => event,
            Err(err) => self.failed(err),
        }
    }

    async fn try_register(&mut self, config: &ClusterConfig) -> Result<HandshakeEvent> {
        let system_id = self.ctx.identity.load().await?.unwrap_or_default();
        let inventory = self.ctx.inventory.clone();
        let (hostname, interfaces) =
            tokio::task::spawn_blocking(move || -> Result<_> {
                Ok((inventory.hostname()?, inventory.interfaces()?))
            })
            .await??;

        let args = json!({
            "system_id": system_id,
            "hostname": hostname,
            "interfaces": interfaces,
            "url": config.url.as_str(),
            "nodegroup_uuid": config.cluster_uuid,
            "beacon_support": true,
            "version": self.ctx.version,
        });

        let reply = match self.channel.call(region::REGISTER_RACK_CONTROLLER, args).await {
            Ok(reply) => reply,
            Err(err) if err.is_remote_kind(region::CANNOT_REGISTER_RACK_CONTROLLER) => {
                return Ok(HandshakeEvent::Failed(ClusterError::RegistrationFailed(
                    self.eventloop.to_string(),
                )));
            }
            Err(err) => return Err(err.into()),
        };
        let reply: RegisterReply = serde_json::from_value(reply).map_err(RpcError::from)?;

        self.ctx.identity.store(&reply.system_id).await?;
        info!(
            "Rack controller '{}' registered (via {}) with {}.",
            reply.system_id,
            self.eventloop,
            describe_version(reply.version.as_deref())
        );
        self.local_ident = Some(reply.system_id);
        self.remote_version = reply.version;
        Ok(HandshakeEvent::Registered)
    }

    /// Upgrades to TLS, then confirms the far end is who discovery said.
    async fn secure(&self) -> HandshakeEvent {
        if let Err(err) = self.channel.start_tls().await {
            return self.failed(err.into());
        }
        match self.identify().await {
            Ok(Some(ident)) if ident == self.eventloop => HandshakeEvent::Secured,
            Ok(ident) => HandshakeEvent::Failed(ClusterError::IdentityMismatch {
                expected: self.eventloop.to_string(),
                actual: ident.unwrap_or_default(),
            }),
            Err(err) => self.failed(err),
        }
    }

    fn publish(&self) -> Result<Arc<Connection>> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(ClusterError::ServiceNotRunning);
        }
        if self.channel.is_closed() {
            return Err(ClusterError::Disconnected(self.eventloop.to_string()));
        }
        let connection = Arc::new(Connection {
            id: ConnectionId::next(),
            eventloop: self.eventloop.to_string(),
            address: self.address,
            channel: self.channel.clone(),
            local_ident: self.local_ident.clone().unwrap_or_default(),
            remote_version: self.remote_version.clone(),
            created_at: Instant::now(),
        });
        self.registry.insert(connection.clone())?;
        Ok(connection)
    }
}
