//! Live connections to region event-loops, keyed by event-loop name.

use parking_lot::RwLock;
use rackrpc_common::transport::Channel;
use rackrpc_common::{RpcArgs, RpcResult};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::error::{ClusterError, Result};

/// Distinguishes successive connections to the same event-loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ConnectionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An authenticated, registered connection to one event-loop.
pub struct Connection {
    pub id: ConnectionId,
    pub eventloop: String,
    /// Canonical (IPv6-mapped) address the connection was opened to
    pub address: SocketAddr,
    pub channel: Arc<dyn Channel>,
    /// Identity the region assigned to this rack
    pub local_ident: String,
    /// Region version, `None` for regions too old to report one
    pub remote_version: Option<String>,
    pub created_at: Instant,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("eventloop", &self.eventloop)
            .field("address", &self.address)
            .field("local_ident", &self.local_ident)
            .field("remote_version", &self.remote_version)
            .finish()
    }
}

/// Map of event-loop name to its ready connection.
///
/// Holds at most one connection per event-loop. Locks are held only for the
/// duration of a map operation; readers get copies.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a ready connection. Fails if the event-loop already has one.
    pub fn insert(&self, connection: Arc<Connection>) -> Result<()> {
        let mut connections = self.connections.write();
        if connections.contains_key(&connection.eventloop) {
            return Err(ClusterError::DuplicateConnection(connection.eventloop.clone()));
        }
        connections.insert(connection.eventloop.clone(), connection);
        Ok(())
    }

    /// Removes the entry for `eventloop` if it is still connection `id`.
    ///
    /// Returns how many connections remain, counted under the same lock, or
    /// `None` when nothing was removed. Repeated notifications for the same
    /// connection are therefore harmless.
    pub fn remove(&self, eventloop: &str, id: ConnectionId) -> Option<usize> {
        let mut connections = self.connections.write();
        match connections.get(eventloop) {
            Some(current) if current.id == id => {
                connections.remove(eventloop);
                Some(connections.len())
            }
            _ => None,
        }
    }

    pub fn get(&self, eventloop: &str) -> Option<Arc<Connection>> {
        self.connections.read().get(eventloop).cloned()
    }

    pub fn contains(&self, eventloop: &str) -> bool {
        self.connections.read().contains_key(eventloop)
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Copies out every connection.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().values().cloned().collect()
    }

    /// Names of the connected event-loops, sorted.
    pub fn eventloops(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Picks a connection at random.
    pub fn get_any(&self) -> Result<Arc<Connection>> {
        let connections = self.snapshot();
        connections
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or(ClusterError::NoConnectionsAvailable)
    }
}

/// Handle callers use to issue calls against a region.
#[derive(Debug, Clone)]
pub struct RegionClient {
    connection: Arc<Connection>,
}

impl RegionClient {
    pub fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }

    /// Name of the event-loop this client talks to.
    pub fn eventloop(&self) -> &str {
        &self.connection.eventloop
    }

    pub fn address(&self) -> SocketAddr {
        self.connection.address
    }

    /// Identity the region assigned to this rack on this connection.
    pub fn local_ident(&self) -> &str {
        &self.connection.local_ident
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub async fn call(&self, method: &str, args: RpcArgs) -> Result<RpcResult> {
        Ok(self.connection.channel.call(method, args).await?)
    }
}

impl PartialEq for RegionClient {
    fn eq(&self, other: &Self) -> bool {
        self.connection.id == other.connection.id
    }
}
