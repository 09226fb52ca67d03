//! Hostname resolution for the discovery URL.

use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};

use crate::error::{ClusterError, Result};

/// Resolves a host to candidate socket addresses.
#[async_trait]
pub trait Resolver: Send + Sync + 'static {
    /// Returns deduplicated addresses, IPv6 before IPv4, otherwise in the
    /// order the system returned them.
    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>>;
}

/// Uses the system resolver on a blocking thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>> {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![SocketAddr::new(ip, port)]);
        }

        let found = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| ClusterError::Resolution {
                host: host.to_string(),
                reason: e.to_string(),
            })?;
        let ordered = prefer_ipv6(found);
        if ordered.is_empty() {
            return Err(ClusterError::Resolution {
                host: host.to_string(),
                reason: "no addresses".to_string(),
            });
        }
        Ok(ordered)
    }
}

/// Drops duplicates and moves IPv6 addresses ahead of IPv4, keeping the
/// relative order within each family.
pub fn prefer_ipv6(addrs: impl IntoIterator<Item = SocketAddr>) -> Vec<SocketAddr> {
    let mut unique: Vec<SocketAddr> = Vec::new();
    for addr in addrs {
        if !unique.contains(&addr) {
            unique.push(addr);
        }
    }
    unique.sort_by_key(|addr| !addr.is_ipv6());
    unique
}

/// Maps an address into the IPv6 space so addresses of either family compare
/// equal when they name the same endpoint.
pub fn canonical_addr(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(v4) => SocketAddr::new(IpAddr::V6(v4.to_ipv6_mapped()), addr.port()),
        IpAddr::V6(_) => addr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_prefer_ipv6_is_stable() {
        let ordered = prefer_ipv6(vec![
            addr("192.0.2.1:80"),
            addr("[2001:db8::2]:80"),
            addr("192.0.2.2:80"),
            addr("[2001:db8::1]:80"),
            addr("192.0.2.1:80"),
        ]);
        assert_eq!(
            ordered,
            vec![
                addr("[2001:db8::2]:80"),
                addr("[2001:db8::1]:80"),
                addr("192.0.2.1:80"),
                addr("192.0.2.2:80"),
            ]
        );
    }

    #[test]
    fn test_canonical_addr() {
        assert_eq!(canonical_addr(addr("192.0.2.1:5250")), addr("[::ffff:192.0.2.1]:5250"));
        assert_eq!(canonical_addr(addr("[2001:db8::1]:5250")), addr("[2001:db8::1]:5250"));
        assert_eq!(
            canonical_addr(addr("[::ffff:192.0.2.1]:5250")),
            canonical_addr(addr("192.0.2.1:5250"))
        );
    }

    #[tokio::test]
    async fn test_literals_skip_lookup() {
        let resolver = SystemResolver;
        assert_eq!(
            resolver.resolve("[2001:db8::1]", 5240).await.unwrap(),
            vec![addr("[2001:db8::1]:5240")]
        );
        assert_eq!(
            resolver.resolve("192.0.2.7", 80).await.unwrap(),
            vec![addr("192.0.2.7:80")]
        );
    }

    #[tokio::test]
    async fn test_localhost_resolves() {
        let addrs = SystemResolver.resolve("localhost", 5240).await.unwrap();
        assert!(!addrs.is_empty());
        assert!(addrs.iter().all(|a| a.port() == 5240 && a.ip().is_loopback()));
    }

    #[tokio::test]
    async fn test_unresolvable_host() {
        let err = SystemResolver
            .resolve("does-not-exist.invalid", 80)
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Resolution { .. }));
        assert!(err.is_retryable());
    }
}
