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

//! JSON reports printed by the CLI.

use anyhow::{Context, Result};
use rackrpc_cluster::{
    ClusterClientService, ConfigStore, Discovery, DiscoverySource, FileConfigStore,
    HttpDiscovery, SystemResolver,
};
use rackrpc_common::transport::unmapped;
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::Arc;

/// Renders a discovery outcome.
///
/// Addresses are printed the way the region advertised them, so IPv4
/// endpoints show up as plain IPv4 rather than in mapped form.
pub fn discovery_report(discovery: &Discovery) -> Value {
    match discovery {
        Discovery::Advertised(endpoints) => {
            let eventloops: Map<String, Value> = endpoints
                .iter()
                .map(|(name, addrs)| {
                    let addrs = addrs
                        .iter()
                        .map(|addr| Value::String(unmapped(*addr).to_string()))
                        .collect();
                    (name.to_string(), Value::Array(addrs))
                })
                .collect();
            json!({ "status": "advertised", "eventloops": eventloops })
        }
        Discovery::NotAdvertising => json!({ "status": "not-advertising", "eventloops": null }),
        Discovery::Unavailable => json!({ "status": "unavailable", "eventloops": null }),
    }
}

/// Snapshot of a running service, logged on shutdown.
pub fn service_report(service: &ClusterClientService) -> Value {
    json!({
        "running": service.is_running(),
        "interval_secs": service.interval().as_secs(),
        "advertised": service.eventloops().map(|endpoints| endpoints.len()),
        "connected": service.connected_eventloops(),
        "passes": service.passes_started(),
    })
}

/// Runs a single discovery against the region named in `config_path`.
pub async fn discover(config_path: &Path) -> Result<Value> {
    let store = Arc::new(FileConfigStore::new(config_path));
    // Surface configuration problems here; discovery itself only logs them.
    store
        .open()
        .await
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let discovery = HttpDiscovery::new(store, Arc::new(SystemResolver));
    Ok(discovery_report(&discovery.discover().await?))
}
