//! rackrpc Common Types and Transport
//!
//! This crate provides the wire protocol, the framed TCP transport and the
//! authentication primitives shared by the rack controller agent and the
//! region controllers it talks to.
//!
//! # Overview
//!
//! A rack controller keeps one persistent, bidirectional RPC connection to
//! every region event-loop it is told about. Either end may issue calls on
//! that connection, so a frame is either a [`Request`] or a [`Response`]:
//!
//! - **Protocol Layer**: Request/Response/Frame types, method names, errors
//! - **Transport Layer**: length-prefixed JSON frames over TCP, demultiplexed
//!   by request id
//! - **Auth**: challenge generation and digest verification
//!
//! # Architecture
//!
//! - **Transport**: TCP, one long-lived connection per event-loop
//! - **Serialization**: JSON
//! - **Message Format**: `[4-byte length prefix as u32 big-endian] + [JSON data]`
//! - **Max Message Size**: 100 MB (prevents memory exhaustion)
//!
//! # Example
//!
//! ```no_run
//! use rackrpc_common::{Request, Response};
//! use serde_json::json;
//!
//! let request = Request::new("Identify", json!({}));
//! let response = Response::success(request.id, json!({"ident": "region:pid=1"}));
//! ```

pub mod auth;
pub mod protocol;
pub mod transport;

pub use protocol::*;
