//! Reactions to connectivity changes.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::error::Result;

/// Notified by the service when connectivity changes.
#[async_trait]
pub trait LifecycleHooks: Send + Sync + 'static {
    /// The last region connection was removed.
    async fn all_connections_lost(&self);

    /// The poll interval changed.
    async fn interval_changed(&self, _interval: Duration) {}
}

/// Logs and does nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHooks;

#[async_trait]
impl LifecycleHooks for LoggingHooks {
    async fn all_connections_lost(&self) {
        info!("Lost all connections to region controllers.");
    }

    async fn interval_changed(&self, interval: Duration) {
        debug!("Poll interval is now {:?}", interval);
    }
}

/// Controls local services that depend on a region connection.
#[async_trait]
pub trait ServiceMonitor: Send + Sync + 'static {
    async fn is_on(&self, service: &str) -> Result<bool>;

    async fn turn_off(&self, service: &str) -> Result<()>;

    /// Brings every monitored service to its expected state.
    async fn ensure_services(&self) -> Result<()>;
}

/// Services stopped when the rack loses its regions.
pub const DEFAULT_DEPENDENT_SERVICES: [&str; 2] = ["dhcpd", "dhcpd6"];

/// Turns off dependent services once no region connection remains.
pub struct StopDependentServices<M> {
    monitor: M,
    services: Vec<String>,
}

impl<M: ServiceMonitor> StopDependentServices<M> {
    pub fn new(monitor: M) -> Self {
        Self::with_services(monitor, DEFAULT_DEPENDENT_SERVICES)
    }

    pub fn with_services<I, S>(monitor: M, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            monitor,
            services: services.into_iter().map(Into::into).collect(),
        }
    }

    pub fn monitor(&self) -> &M {
        &self.monitor
    }

    async fn stop_running(&self) -> Vec<String> {
        let mut stopped = Vec::new();
        for service in &self.services {
            match self.monitor.is_on(service).await {
                Ok(true) => match self.monitor.turn_off(service).await {
                    Ok(()) => stopped.push(service.clone()),
                    Err(e) => error!("Failed to stop {}: {}", service, e),
                },
                Ok(false) => {}
                Err(e) => error!("Failed to query {}: {}", service, e),
            }
        }
        stopped
    }
}

#[async_trait]
impl<M: ServiceMonitor> LifecycleHooks for StopDependentServices<M> {
    async fn all_connections_lost(&self) {
        let stopped = self.stop_running().await;
        if stopped.is_empty() {
            return;
        }
        error!(
            "Lost all connections to region controllers. Stopping service(s) {}.",
            stopped.join(",")
        );
        if let Err(e) = self.monitor.ensure_services().await {
            error!("Failed to ensure services: {}", e);
        }
    }

    async fn interval_changed(&self, interval: Duration) {
        debug!("Poll interval is now {:?}", interval);
    }
}
