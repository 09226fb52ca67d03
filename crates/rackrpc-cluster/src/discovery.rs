//! Discovery of region event-loops.
//!
//! Regions publish the event-loops a rack should connect to at
//! `<base url>/rpc/`:
//!
//! ```json
//! {"eventloops": {"region:pid=1234": [["2001:db8::1", 5250], ["192.0.2.1", 5250]]}}
//! ```
//!
//! `"eventloops": null` (or an HTTP 503) means the region is up but not yet
//! advertising. The discovery host is resolved and every address is tried in
//! turn, IPv6 first, until one of them answers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::ConfigStore;
use crate::error::{ClusterError, Result};
use crate::resolver::{canonical_addr, Resolver};

/// Body of the discovery document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcInfo {
    pub eventloops: Option<BTreeMap<String, Vec<(String, u16)>>>,
}

/// Advertised event-loops and their addresses, in canonical form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointSet {
    eventloops: BTreeMap<String, Vec<SocketAddr>>,
}

impl EndpointSet {
    /// Builds the set from an advertised document.
    ///
    /// Addresses that are not IP literals are skipped.
    pub fn from_advertised(advertised: BTreeMap<String, Vec<(String, u16)>>) -> Self {
        let eventloops = advertised
            .into_iter()
            .map(|(eventloop, addresses)| {
                let mut canonical: Vec<SocketAddr> = Vec::with_capacity(addresses.len());
                for (host, port) in addresses {
                    match host.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
                        Ok(ip) => {
                            let addr = canonical_addr(SocketAddr::new(ip, port));
                            if !canonical.contains(&addr) {
                                canonical.push(addr);
                            }
                        }
                        Err(_) => warn!(
                            "Event-loop {} advertised an address that is not an IP: {}",
                            eventloop, host
                        ),
                    }
                }
                (eventloop, canonical)
            })
            .collect();
        Self { eventloops }
    }

    pub fn from_addrs<I, S>(eventloops: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<SocketAddr>)>,
        S: Into<String>,
    {
        Self {
            eventloops: eventloops
                .into_iter()
                .map(|(name, addrs)| (name.into(), addrs.into_iter().map(canonical_addr).collect()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.eventloops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.eventloops.is_empty()
    }

    pub fn contains(&self, eventloop: &str) -> bool {
        self.eventloops.contains_key(eventloop)
    }

    /// Addresses for `eventloop`, in advertised order.
    pub fn addresses(&self, eventloop: &str) -> &[SocketAddr] {
        self.eventloops
            .get(eventloop)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[SocketAddr])> {
        self.eventloops
            .iter()
            .map(|(name, addrs)| (name.as_str(), addrs.as_slice()))
    }
}

/// Outcome of one discovery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery {
    Advertised(EndpointSet),
    /// A region answered but is not advertising event-loops yet.
    NotAdvertising,
    /// No address for the region produced a usable answer.
    Unavailable,
}

impl Discovery {
    /// Number of advertised event-loops, `None` when there was no data.
    pub fn eventloop_count(&self) -> Option<usize> {
        match self {
            Discovery::Advertised(endpoints) => Some(endpoints.len()),
            Discovery::NotAdvertising | Discovery::Unavailable => None,
        }
    }
}

/// Produces the current set of advertised event-loops.
#[async_trait]
pub trait DiscoverySource: Send + Sync + 'static {
    async fn discover(&self) -> Result<Discovery>;
}

/// Fetches the discovery document over HTTP(S).
pub struct HttpDiscovery {
    config: Arc<dyn ConfigStore>,
    resolver: Arc<dyn Resolver>,
}

impl HttpDiscovery {
    pub fn new(config: Arc<dyn ConfigStore>, resolver: Arc<dyn Resolver>) -> Self {
        Self { config, resolver }
    }

    /// Fetches the document from one resolved address.
    ///
    /// Hostnames stay in the URL and are pinned to `addr`, so the `Host`
    /// header and TLS name verification are unaffected. IP-literal hosts
    /// resolve to themselves and need no pinning.
    async fn fetch(
        &self,
        url: &Url,
        host: &str,
        addr: SocketAddr,
        timeout: std::time::Duration,
    ) -> std::result::Result<RpcInfo, FetchError> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("rackrpc-cluster/", env!("CARGO_PKG_VERSION")));
        if host.parse::<IpAddr>().is_err() && !host.starts_with('[') {
            builder = builder.resolve(host, addr);
        }
        let client = builder.build().map_err(FetchError::Other)?;

        let response = client.get(url.clone()).send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                FetchError::Connect(e)
            } else {
                FetchError::Other(e)
            }
        })?;

        if response.status() == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return Ok(RpcInfo { eventloops: None });
        }
        let response = response.error_for_status().map_err(FetchError::Other)?;
        response.json::<RpcInfo>().await.map_err(FetchError::Other)
    }
}

enum FetchError {
    Connect(reqwest::Error),
    Other(reqwest::Error),
}

#[async_trait]
impl DiscoverySource for HttpDiscovery {
    async fn discover(&self) -> Result<Discovery> {
        let config = self.config.open().await?;
        let url = config.rpc_info_url();
        let host = url
            .host_str()
            .ok_or_else(|| ClusterError::Config(format!("url has no host: {}", url)))?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| ClusterError::Config(format!("url has no port: {}", url)))?;

        let addrs = self.resolver.resolve(&host, port).await?;
        for addr in addrs {
            debug!("Requesting RPC info at {} via {}", url, addr);
            match self.fetch(&url, &host, addr, config.discovery_timeout()).await {
                Ok(RpcInfo {
                    eventloops: Some(eventloops),
                }) => return Ok(Discovery::Advertised(EndpointSet::from_advertised(eventloops))),
                Ok(RpcInfo { eventloops: None }) => {
                    info!(
                        "Region is not advertising RPC endpoints. (While requesting RPC info at {} via {})",
                        url, addr
                    );
                    return Ok(Discovery::NotAdvertising);
                }
                Err(FetchError::Connect(e)) => {
                    info!(
                        "Region not available: {} (While requesting RPC info at {} via {}).",
                        e, url, addr
                    );
                }
                Err(FetchError::Other(e)) => {
                    error!(
                        "Failed to contact region: {} (While requesting RPC info at {} via {}).",
                        e, url, addr
                    );
                }
            }
        }

        warn!("{}", ClusterError::DiscoveryUnavailable(url.to_string()));
        Ok(Discovery::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_info_shapes() {
        let info: RpcInfo = serde_json::from_str(r#"{"eventloops": null}"#).unwrap();
        assert_eq!(info.eventloops, None);

        let info: RpcInfo = serde_json::from_str(
            r#"{"eventloops": {"A": [["2001:db8::1", 5250], ["192.0.2.1", 5251]]}}"#,
        )
        .unwrap();
        let eventloops = info.eventloops.unwrap();
        assert_eq!(eventloops["A"][1], ("192.0.2.1".to_string(), 5251));
    }

    #[test]
    fn test_endpoint_set_canonicalizes() {
        let mut advertised = BTreeMap::new();
        advertised.insert(
            "A".to_string(),
            vec![
                ("192.0.2.1".to_string(), 5250),
                ("::ffff:192.0.2.1".to_string(), 5250),
                ("2001:db8::1".to_string(), 5250),
                ("region.example".to_string(), 5250),
            ],
        );
        let set = EndpointSet::from_advertised(advertised);

        assert_eq!(set.len(), 1);
        assert_eq!(
            set.addresses("A"),
            &[
                "[::ffff:192.0.2.1]:5250".parse::<SocketAddr>().unwrap(),
                "[2001:db8::1]:5250".parse().unwrap(),
            ]
        );
        assert!(set.addresses("B").is_empty());
    }

    #[test]
    fn test_identity_without_usable_addresses_is_kept() {
        let mut advertised = BTreeMap::new();
        advertised.insert("A".to_string(), vec![]);
        let set = EndpointSet::from_advertised(advertised);
        assert!(set.contains("A"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_eventloop_count() {
        assert_eq!(Discovery::Unavailable.eventloop_count(), None);
        assert_eq!(Discovery::NotAdvertising.eventloop_count(), None);
        assert_eq!(
            Discovery::Advertised(EndpointSet::default()).eventloop_count(),
            Some(0)
        );
    }
}
