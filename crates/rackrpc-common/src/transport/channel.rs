use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::protocol::error::{Result, RpcError};
use crate::protocol::{Frame, Request, RequestId, Response, RpcArgs, RpcResult};
use crate::transport::codec::{read_frame, write_frame};

/// Answers requests issued by the far end of a connection.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, request: Request) -> Response;
}

/// A live, bidirectional RPC connection.
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    /// The address this channel was opened to.
    fn peer_addr(&self) -> SocketAddr;

    /// Issues a call and waits for its response.
    async fn call(&self, method: &str, args: RpcArgs) -> Result<RpcResult>;

    /// Switches the established stream to TLS.
    async fn start_tls(&self) -> Result<()>;

    /// Closes the transport. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;

    /// Resolves once the transport is gone, whichever end closed it.
    async fn closed(&self);
}

/// Opens channels to remote endpoints.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(
        &self,
        addr: SocketAddr,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<Arc<dyn Channel>>;
}

type PendingCalls = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Response>>>>;

/// Framed connection over any byte stream.
///
/// A reader task routes incoming responses to the callers waiting on them
/// and hands incoming requests to the [`RequestHandler`]; a writer task
/// serializes outbound frames. When either task stops, the whole channel is
/// torn down and every pending call fails with [`RpcError::ConnectionClosed`].
///
/// # Example
///
/// ```no_run
/// # use std::sync::Arc;
/// # use std::time::Duration;
/// # use rackrpc_common::transport::{FramedChannel, RequestHandler};
/// # async fn example(handler: Arc<dyn RequestHandler>) -> Result<(), Box<dyn std::error::Error>> {
/// let stream = tokio::net::TcpStream::connect("127.0.0.1:5250").await?;
/// let peer = stream.peer_addr()?;
/// let channel = FramedChannel::spawn(stream, peer, handler, Duration::from_secs(30));
/// let ident = channel.request("Identify", serde_json::json!({})).await?;
/// # Ok(())
/// # }
/// ```
pub struct FramedChannel {
    peer: SocketAddr,
    outbound: mpsc::UnboundedSender<Frame>,
    pending: PendingCalls,
    shutdown: CancellationToken,
    closed: CancellationToken,
    call_timeout: Duration,
}

impl FramedChannel {
    /// Starts the reader and writer tasks for `stream`.
    pub fn spawn<S>(
        stream: S,
        peer: SocketAddr,
        handler: Arc<dyn RequestHandler>,
        call_timeout: Duration,
    ) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let pending: PendingCalls = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = CancellationToken::new();
        let closed = CancellationToken::new();

        tokio::spawn(write_loop(writer, outbound_rx, shutdown.clone()));
        tokio::spawn(read_loop(
            reader,
            peer,
            handler,
            outbound.clone(),
            pending.clone(),
            shutdown.clone(),
            closed.clone(),
        ));

        Arc::new(Self {
            peer,
            outbound,
            pending,
            shutdown,
            closed,
            call_timeout,
        })
    }

    /// Issues a call and waits for its response, up to the call timeout.
    pub async fn request(&self, method: &str, args: RpcArgs) -> Result<RpcResult> {
        let request = Request::new(method, args).with_timeout(self.call_timeout.as_millis() as u64);
        let id = request.id;
        let (tx, rx) = oneshot::channel();

        self.pending.lock().insert(id, tx);
        if self.shutdown.is_cancelled() || self.outbound.send(Frame::Request(request)).is_err() {
            self.pending.lock().remove(&id);
            return Err(RpcError::ConnectionClosed);
        }

        let waited = tokio::time::timeout(self.call_timeout, async {
            tokio::select! {
                response = rx => response.map_err(|_| RpcError::ConnectionClosed),
                _ = self.closed.cancelled() => Err(RpcError::ConnectionClosed),
            }
        })
        .await;

        match waited {
            Ok(response) => response?.into_result(),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(RpcError::Timeout(self.call_timeout.as_millis() as u64))
            }
        }
    }

    /// Number of calls still waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.pending.lock().len()
    }
}

#[async_trait]
impl Channel for FramedChannel {
    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    async fn call(&self, method: &str, args: RpcArgs) -> Result<RpcResult> {
        self.request(method, args).await
    }

    async fn start_tls(&self) -> Result<()> {
        Err(RpcError::Unsupported(
            "in-band TLS upgrade is not available on plain framed channels".to_string(),
        ))
    }

    fn close(&self) {
        self.shutdown.cancel();
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    async fn closed(&self) {
        self.closed.cancelled().await
    }
}

impl Drop for FramedChannel {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    shutdown: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = write_frame(&mut writer, &frame).await {
                        debug!("Write failed, closing channel: {}", e);
                        break;
                    }
                }
                None => break,
            },
        }
    }

    let _ = writer.shutdown().await;
    shutdown.cancel();
}

async fn read_loop<R>(
    mut reader: R,
    peer: SocketAddr,
    handler: Arc<dyn RequestHandler>,
    outbound: mpsc::UnboundedSender<Frame>,
    pending: PendingCalls,
    shutdown: CancellationToken,
    closed: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = read_frame(&mut reader) => frame,
        };

        match frame {
            Ok(Some(Frame::Response(response))) => {
                let waiter = pending.lock().remove(&response.id);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(response);
                    }
                    None => debug!("Dropping response {} from {} with no caller", response.id, peer),
                }
            }
            Ok(Some(Frame::Request(request))) => {
                let handler = handler.clone();
                let outbound = outbound.clone();
                tokio::spawn(async move {
                    let response = handler.handle(request).await;
                    let _ = outbound.send(Frame::Response(response));
                });
            }
            Ok(None) => {
                debug!("Connection to {} closed by peer", peer);
                break;
            }
            Err(e) => {
                warn!("Connection to {} failed: {}", peer, e);
                break;
            }
        }
    }

    shutdown.cancel();
    // Dropping the senders wakes every waiting caller with ConnectionClosed.
    pending.lock().clear();
    closed.cancel();
}
