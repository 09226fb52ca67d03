pub mod error;
pub mod frame;
pub mod methods;
pub mod requests;
pub mod responses;


pub use error::{Result, RpcError};
pub use frame::Frame;
pub use methods::ClusterCall;
pub use requests::{MethodName, Request, RequestId, RpcArgs};
pub use responses::{Response, RpcResult};
