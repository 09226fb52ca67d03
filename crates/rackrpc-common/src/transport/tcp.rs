use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

use crate::protocol::error::{Result, RpcError};
use crate::transport::channel::{Channel, Connector, FramedChannel, RequestHandler};

/// Default timeout for establishing a TCP connection (5 seconds)
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for a single call (2 minutes)
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Converts an IPv4-mapped IPv6 address back to plain IPv4.
///
/// Addresses are compared in IPv6-mapped form; sockets are opened to the
/// family the peer actually listens on.
///
/// ```
/// use rackrpc_common::transport::unmapped;
/// use std::net::SocketAddr;
///
/// let mapped: SocketAddr = "[::ffff:192.0.2.1]:5250".parse().unwrap();
/// assert_eq!(unmapped(mapped), "192.0.2.1:5250".parse::<SocketAddr>().unwrap());
/// ```
pub fn unmapped(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => SocketAddr::new(IpAddr::V4(v4), addr.port()),
            None => addr,
        },
        IpAddr::V4(_) => addr,
    }
}

/// Dials region event-loops over TCP.
///
/// # Example
///
/// ```no_run
/// use rackrpc_common::transport::{Connector, TcpConnector};
/// # use std::sync::Arc;
/// # async fn example(handler: Arc<dyn rackrpc_common::transport::RequestHandler>) -> rackrpc_common::Result<()> {
/// let connector = TcpConnector::default();
/// let channel = connector.connect("[::1]:5250".parse().unwrap(), handler).await?;
/// let ident = channel.call("Identify", serde_json::json!({})).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
    call_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration, call_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            call_timeout,
        }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT, DEFAULT_CALL_TIMEOUT)
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        addr: SocketAddr,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<Arc<dyn Channel>> {
        let target = unmapped(addr);
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(target))
            .await
            .map_err(|_| RpcError::Timeout(self.connect_timeout.as_millis() as u64))?
            .map_err(|e| RpcError::Connection(format!("Failed to connect to {}: {}", target, e)))?;

        stream.set_nodelay(true)?;

        let channel: Arc<dyn Channel> = FramedChannel::spawn(stream, addr, handler, self.call_timeout);
        Ok(channel)
    }
}

/// Accepts framed connections, as a region event-loop does.
pub struct TcpServer {
    listener: TcpListener,
    call_timeout: Duration,
}

impl TcpServer {
    /// Creates a new TCP server bound to the specified address.
    pub async fn bind(bind_addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| RpcError::Connection(format!("Failed to bind to {}: {}", bind_addr, e)))?;

        Ok(Self {
            listener,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        })
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Gets the actual bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| RpcError::Connection(format!("Failed to get local addr: {}", e)))
    }

    /// Waits for the next connection and starts serving it with `handler`.
    pub async fn accept(&self, handler: Arc<dyn RequestHandler>) -> Result<Arc<FramedChannel>> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(|e| RpcError::Connection(format!("Failed to accept connection: {}", e)))?;
        stream.set_nodelay(true)?;

        Ok(FramedChannel::spawn(stream, peer, handler, self.call_timeout))
    }
}
