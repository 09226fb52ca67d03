//! Convergence of the registry towards the advertised event-loops.

use parking_lot::Mutex;
use rackrpc_common::transport::{Channel, Connector, RequestHandler};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info};

use crate::discovery::EndpointSet;
use crate::error::{ClusterError, Result};
use crate::handshake::{Handshake, HandshakeContext};
use crate::registry::Connection;
use crate::tracker::ConnectionTracker;

/// What one reconciliation changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub dropped: Vec<String>,
    pub connected: Vec<String>,
    /// Addresses tried without producing a ready connection
    pub failed: Vec<(String, SocketAddr)>,
}

impl ReconcileReport {
    /// True when nothing was dropped or attempted.
    pub fn is_quiet(&self) -> bool {
        self.dropped.is_empty() && self.connected.is_empty() && self.failed.is_empty()
    }
}

pub struct Reconciler {
    tracker: Arc<ConnectionTracker>,
    connector: Arc<dyn Connector>,
    handler: Arc<dyn RequestHandler>,
    handshake: HandshakeContext,
    running: Arc<AtomicBool>,
    /// Transports whose handshake has not settled yet, by attempt.
    attempts: Mutex<HashMap<u64, Arc<dyn Channel>>>,
    next_attempt: AtomicU64,
}

impl Reconciler {
    pub fn new(
        tracker: Arc<ConnectionTracker>,
        connector: Arc<dyn Connector>,
        handler: Arc<dyn RequestHandler>,
        handshake: HandshakeContext,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            tracker,
            connector,
            handler,
            handshake,
            running,
            attempts: Mutex::new(HashMap::new()),
            next_attempt: AtomicU64::new(0),
        }
    }

    /// Closes every transport that is still handshaking.
    ///
    /// Must be called after the service stopped running; an attempt that
    /// opens its transport later notices on its own and closes it.
    pub fn abort_handshakes(&self) -> usize {
        let channels: Vec<_> = self.attempts.lock().drain().map(|(_, c)| c).collect();
        for channel in &channels {
            channel.close();
        }
        channels.len()
    }

    /// Brings the registry in line with `endpoints`.
    ///
    /// Per event-loop, a connection whose address is no longer advertised is
    /// fully removed before a replacement is attempted.
    pub async fn reconcile(&self, endpoints: &EndpointSet) -> ReconcileReport {
        let registry = self.tracker.registry();
        let mut report = ReconcileReport::default();

        for (eventloop, addresses) in endpoints.iter() {
            if let Some(connection) = registry.get(eventloop) {
                if !addresses.contains(&connection.address) {
                    info!(
                        "Event-loop '{}' no longer advertises {}; dropping connection.",
                        eventloop, connection.address
                    );
                    self.drop_connection(&connection).await;
                    report.dropped.push(eventloop.to_string());
                }
            }
        }

        'eventloops: for (eventloop, addresses) in endpoints.iter() {
            if registry.contains(eventloop) {
                continue;
            }
            for &address in addresses {
                match self.connect(eventloop, address).await {
                    Ok(_) => {
                        report.connected.push(eventloop.to_string());
                        break;
                    }
                    Err(ClusterError::ServiceNotRunning) => break 'eventloops,
                    Err(err) => {
                        log_attempt_failure(eventloop, address, &err);
                        report.failed.push((eventloop.to_string(), address));
                    }
                }
            }
        }

        for connection in registry.snapshot() {
            if !endpoints.contains(&connection.eventloop) {
                info!(
                    "Event-loop '{}' is no longer advertised; dropping connection.",
                    connection.eventloop
                );
                self.drop_connection(&connection).await;
                report.dropped.push(connection.eventloop.clone());
            }
        }

        report
    }

    async fn connect(&self, eventloop: &str, address: SocketAddr) -> Result<Arc<Connection>> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(ClusterError::ServiceNotRunning);
        }
        let channel = self.connector.connect(address, self.handler.clone()).await?;

        let attempt = self.next_attempt.fetch_add(1, Ordering::Relaxed);
        self.attempts.lock().insert(attempt, channel.clone());
        if !self.running.load(Ordering::SeqCst) {
            self.attempts.lock().remove(&attempt);
            channel.close();
            return Err(ClusterError::ServiceNotRunning);
        }

        let handshake = Handshake::new(
            &self.handshake,
            self.tracker.registry(),
            &self.running,
            eventloop,
            address,
            channel,
        )
        .run()
        .await;
        self.attempts.lock().remove(&attempt);

        let connection = handshake?;
        self.tracker.watch(connection.clone());
        Ok(connection)
    }

    /// Closes the transport and waits until the loss has been processed.
    async fn drop_connection(&self, connection: &Arc<Connection>) {
        connection.channel.close();
        connection.channel.closed().await;
        self.tracker
            .connection_lost(&connection.eventloop, connection.id)
            .await;
    }
}

fn log_attempt_failure(eventloop: &str, address: SocketAddr, err: &ClusterError) {
    match err {
        ClusterError::Rpc(_) | ClusterError::Disconnected(_) => {
            info!("Event-loop {} ({}): {}", eventloop, address, err)
        }
        // Logged where they were detected.
        ClusterError::AuthenticationFailed(_)
        | ClusterError::RegistrationFailed(_)
        | ClusterError::DuplicateConnection(_)
        | ClusterError::IdentityMismatch { .. } => {}
        err => error!(
            "Failure making new RPC connection to event-loop {} ({}): {}",
            eventloop, address, err
        ),
    }
}
