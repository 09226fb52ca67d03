use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The remote handler ran and reported a failure.
    #[error("Remote error: {message}")]
    Remote {
        kind: Option<String>,
        message: String,
    },

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

impl RpcError {
    /// Returns true when the failure was reported by the remote end with the
    /// given error type name.
    pub fn is_remote_kind(&self, expected: &str) -> bool {
        matches!(self, RpcError::Remote { kind: Some(kind), .. } if kind == expected)
    }

    /// Returns true when the transport went away underneath the call.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, RpcError::ConnectionClosed)
    }
}

impl From<std::net::AddrParseError> for RpcError {
    fn from(err: std::net::AddrParseError) -> Self {
        RpcError::InvalidRequest(err.to_string())
    }
}

impl From<hex::FromHexError> for RpcError {
    fn from(err: hex::FromHexError) -> Self {
        RpcError::InvalidResponse(format!("bad hex payload: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
