use serde::{Deserialize, Serialize};

use super::{Request, Response};

/// A single message on a connection.
///
/// Connections are symmetric: the rack calls the region (`Authenticate`,
/// `RegisterRackController`, ...) and the region calls the rack (`Identify`,
/// `PowerOn`, ...) over the same stream, so every frame says which it is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Request(Request),
    Response(Response),
}

impl From<Request> for Frame {
    fn from(request: Request) -> Self {
        Frame::Request(request)
    }
}

impl From<Response> for Frame {
    fn from(response: Response) -> Self {
        Frame::Response(response)
    }
}
