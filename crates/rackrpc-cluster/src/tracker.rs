//! Loss notification for registered connections.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::hooks::LifecycleHooks;
use crate::registry::{Connection, ConnectionId, ConnectionRegistry};
use crate::scheduler::PollScheduler;

/// Owns the registry and reacts when registered connections go away.
///
/// Every removal goes through [`ConnectionTracker::connection_lost`], whether
/// the transport closed by itself or the reconciler dropped it.
pub struct ConnectionTracker {
    registry: ConnectionRegistry,
    scheduler: PollScheduler,
    hooks: Arc<dyn LifecycleHooks>,
}

impl ConnectionTracker {
    pub fn new(hooks: Arc<dyn LifecycleHooks>) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            scheduler: PollScheduler::new(),
            hooks,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &PollScheduler {
        &self.scheduler
    }

    /// Recomputes the poll interval from a pass's observations.
    pub async fn update_interval(&self, eventloops: Option<usize>, connections: usize) {
        let changed = self.scheduler.update_interval(eventloops, connections);
        self.interval_changed(changed).await;
    }

    async fn interval_changed(&self, changed: Option<Duration>) {
        if let Some(interval) = changed {
            debug!("Cluster client poll interval changed to {:?}", interval);
            self.hooks.interval_changed(interval).await;
        }
    }

    /// Removes connection `id` of `eventloop`. Safe to call more than once.
    pub async fn connection_lost(&self, eventloop: &str, id: ConnectionId) {
        let Some(remaining) = self.registry.remove(eventloop, id) else {
            return;
        };
        info!("Connection {} to event-loop '{}' lost", id, eventloop);

        if remaining == 0 {
            self.hooks.all_connections_lost().await;
        }
        // Retry soon rather than at whatever interval was in force.
        let changed = self.scheduler.force_low();
        self.interval_changed(changed).await;
    }

    /// Removes `connection` from the registry once its transport closes.
    pub fn watch(self: &Arc<Self>, connection: Arc<Connection>) {
        let tracker = self.clone();
        tokio::spawn(async move {
            connection.channel.closed().await;
            tracker.connection_lost(&connection.eventloop, connection.id).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rackrpc_common::transport::Channel;
    use rackrpc_common::{Result as RpcResultOf, RpcArgs, RpcError, RpcResult};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    struct IdleChannel(SocketAddr);

    #[async_trait]
    impl Channel for IdleChannel {
        fn peer_addr(&self) -> SocketAddr {
            self.0
        }
        async fn call(&self, _method: &str, _args: RpcArgs) -> RpcResultOf<RpcResult> {
            Err(RpcError::ConnectionClosed)
        }
        async fn start_tls(&self) -> RpcResultOf<()> {
            Ok(())
        }
        fn close(&self) {}
        fn is_closed(&self) -> bool {
            false
        }
        async fn closed(&self) {
            std::future::pending::<()>().await
        }
    }

    #[derive(Default)]
    struct CountingHooks(AtomicUsize);

    #[async_trait]
    impl LifecycleHooks for CountingHooks {
        async fn all_connections_lost(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn connection(eventloop: &str) -> Arc<Connection> {
        let address: SocketAddr = "[2001:db8::1]:5250".parse().unwrap();
        Arc::new(Connection {
            id: ConnectionId::next(),
            eventloop: eventloop.to_string(),
            address,
            channel: Arc::new(IdleChannel(address)),
            local_ident: "rack-1".to_string(),
            remote_version: None,
            created_at: Instant::now(),
        })
    }

    #[tokio::test]
    async fn test_hook_fires_when_last_connection_goes() {
        let hooks = Arc::new(CountingHooks::default());
        let tracker = ConnectionTracker::new(hooks.clone());
        let a = connection("A");
        let b = connection("B");
        tracker.registry().insert(a.clone()).unwrap();
        tracker.registry().insert(b.clone()).unwrap();

        tracker.connection_lost("A", a.id).await;
        assert_eq!(hooks.0.load(Ordering::SeqCst), 0);

        tracker.connection_lost("B", b.id).await;
        tracker.connection_lost("B", b.id).await;
        assert_eq!(hooks.0.load(Ordering::SeqCst), 1);
        assert!(tracker.registry().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_simultaneous_losses_fire_hook_once() {
        for _ in 0..200 {
            let hooks = Arc::new(CountingHooks::default());
            let tracker = Arc::new(ConnectionTracker::new(hooks.clone()));
            let connections: Vec<_> = ["A", "B"].into_iter().map(connection).collect();
            for c in &connections {
                tracker.registry().insert(c.clone()).unwrap();
            }

            let tasks: Vec<_> = connections
                .into_iter()
                .map(|c| {
                    let tracker = tracker.clone();
                    tokio::spawn(async move { tracker.connection_lost(&c.eventloop, c.id).await })
                })
                .collect();
            for task in tasks {
                task.await.unwrap();
            }

            assert_eq!(hooks.0.load(Ordering::SeqCst), 1);
        }
    }
}
