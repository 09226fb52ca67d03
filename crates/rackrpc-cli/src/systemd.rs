// Copyright 2025 rackrpc Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Dependent-service control through `systemctl`.

use async_trait::async_trait;
use rackrpc_cluster::{ClusterError, ServiceMonitor};
use std::process::Output;
use tokio::process::Command;

/// Checks and stops units with `systemctl`.
#[derive(Debug, Clone)]
pub struct SystemdMonitor {
    systemctl: String,
}

impl Default for SystemdMonitor {
    fn default() -> Self {
        Self::new("systemctl")
    }
}

impl SystemdMonitor {
    /// Uses `systemctl` as the control binary.
    pub fn new(systemctl: impl Into<String>) -> Self {
        Self {
            systemctl: systemctl.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> rackrpc_cluster::Result<Output> {
        Ok(Command::new(&self.systemctl).args(args).output().await?)
    }
}

#[async_trait]
impl ServiceMonitor for SystemdMonitor {
    async fn is_on(&self, service: &str) -> rackrpc_cluster::Result<bool> {
        let output = self.run(&["is-active", "--quiet", service]).await?;
        Ok(output.status.success())
    }

    async fn turn_off(&self, service: &str) -> rackrpc_cluster::Result<()> {
        let output = self.run(&["stop", service]).await?;
        if output.status.success() {
            return Ok(());
        }
        Err(ClusterError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!(
                "{} stop {} exited with {}: {}",
                self.systemctl,
                service,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        )))
    }

    /// Units stopped here stay stopped until the supervisor starts them.
    async fn ensure_services(&self) -> rackrpc_cluster::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exit_status_drives_state() {
        // `true` and `false` stand in for systemctl.
        assert!(SystemdMonitor::new("true").is_on("dhcpd").await.unwrap());
        assert!(!SystemdMonitor::new("false").is_on("dhcpd").await.unwrap());
        assert!(SystemdMonitor::new("true").turn_off("dhcpd").await.is_ok());
        assert!(SystemdMonitor::new("false").turn_off("dhcpd").await.is_err());
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_error() {
        let monitor = SystemdMonitor::new("/nonexistent/systemctl");
        assert!(matches!(
            monitor.is_on("dhcpd").await,
            Err(ClusterError::Io(_))
        ));
    }
}
