//! rackrpc Cluster Client
//!
//! Keeps a rack controller connected to every region controller event-loop
//! it is told about, and hands out clients for those connections.
//!
//! # Overview
//!
//! Each poll pass:
//!
//! 1. **Discovery** fetches `<region url>/rpc/` to learn the advertised
//!    event-loops and their addresses ([`discovery`])
//! 2. **Reconciliation** drops connections that are no longer advertised and
//!    opens connections to event-loops not yet connected ([`reconciler`])
//! 3. Every new connection goes through the **handshake**: authenticate the
//!    region, then register the rack with it ([`handshake`])
//! 4. The **scheduler** picks the next poll interval from how converged the
//!    rack is ([`scheduler`])
//!
//! Ready connections live in the [`ConnectionRegistry`]; callers select one
//! with [`ClusterClientService::get_client`] or
//! [`ClusterClientService::get_client_now`]. When the last connection goes,
//! [`LifecycleHooks::all_connections_lost`] runs.
//!
//! # Intervals
//!
//! | Situation                                  | Interval |
//! |--------------------------------------------|----------|
//! | First 30 s after start                     | 1 s      |
//! | No discovery data, or no connections       | 1 s      |
//! | Connected to some advertised event-loops   | 5 s      |
//! | Connected to all advertised event-loops    | 30 s     |

pub mod config;
pub mod discovery;
pub mod error;
pub mod handlers;
pub mod handshake;
pub mod hooks;
pub mod identity;
pub mod inventory;
pub mod reconciler;
pub mod registry;
pub mod resolver;
pub mod scheduler;
pub mod service;
pub mod tracker;

pub use config::{ClusterConfig, ConfigStore, FileConfigStore, StaticConfigStore};
pub use discovery::{Discovery, DiscoverySource, EndpointSet, HttpDiscovery, RpcInfo};
pub use error::{ClusterError, Result};
pub use handlers::HandlerTable;
pub use handshake::{HandshakeContext, HandshakeState};
pub use hooks::{LifecycleHooks, LoggingHooks, ServiceMonitor, StopDependentServices};
pub use identity::{
    FileIdentityStore, FileSecretStore, IdentityStore, MemoryIdentityStore, SecretStore,
    StaticSecretStore,
};
pub use inventory::{HostInventory, StaticInventory, SystemInventory};
pub use registry::{Connection, ConnectionId, ConnectionRegistry, RegionClient};
pub use resolver::{Resolver, SystemResolver};
pub use scheduler::{PollScheduler, INTERVAL_HIGH, INTERVAL_LOW, INTERVAL_MID};
pub use service::{ClusterClientService, ServiceBuilder};
pub use tracker::ConnectionTracker;
