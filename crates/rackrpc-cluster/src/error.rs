use rackrpc_common::RpcError;
use thiserror::Error;

/// Failures of the connection manager.
///
/// Per-connection failures are logged by the reconciler and never escape a
/// poll pass; only [`ClusterError::NoConnectionsAvailable`] is surfaced to
/// callers asking for a client.
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Failed to resolve {host}: {reason}")]
    Resolution { host: String, reason: String },

    #[error("Region unavailable: {0}")]
    DiscoveryUnavailable(String),

    #[error("Event-loop '{0}' failed authentication")]
    AuthenticationFailed(String),

    #[error("Event-loop '{0}' rejected registration")]
    RegistrationFailed(String),

    #[error("Event-loop '{0}' already connected")]
    DuplicateConnection(String),

    #[error("Service not running")]
    ServiceNotRunning,

    #[error("No connections available")]
    NoConnectionsAvailable,

    #[error("Event-loop identifies itself as '{actual}', but '{expected}' was expected")]
    IdentityMismatch { expected: String, actual: String },

    #[error("Event-loop '{0}' disconnected during handshake")]
    Disconnected(String),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClusterError {
    /// Whether the next poll pass may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClusterError::Resolution { .. }
            | ClusterError::DiscoveryUnavailable(_)
            | ClusterError::AuthenticationFailed(_)
            | ClusterError::RegistrationFailed(_)
            | ClusterError::DuplicateConnection(_)
            | ClusterError::NoConnectionsAvailable
            | ClusterError::IdentityMismatch { .. }
            | ClusterError::Disconnected(_)
            | ClusterError::Rpc(_)
            | ClusterError::Io(_) => true,
            ClusterError::ServiceNotRunning | ClusterError::Config(_) => false,
        }
    }
}

impl From<tokio::task::JoinError> for ClusterError {
    fn from(err: tokio::task::JoinError) -> Self {
        ClusterError::Io(std::io::Error::new(std::io::ErrorKind::Other, err))
    }
}

pub type Result<T> = std::result::Result<T, ClusterError>;
