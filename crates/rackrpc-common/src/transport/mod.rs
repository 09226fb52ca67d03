//! rackrpc Transport Layer
//!
//! This module provides the framed, bidirectional connections racks keep open
//! to region event-loops.
//!
//! # Architecture
//!
//! - **Codec**: JSON serialization of [`Frame`](crate::Frame)s
//! - **Wire Format**: `[4-byte length prefix as u32 big-endian] + [JSON data]`
//! - **Channel**: one reader task demultiplexing responses by request id and
//!   dispatching inbound requests, one writer task draining an outbound queue
//!
//! # Components
//!
//! - **[`JsonCodec`]**: Encode/decode frames
//! - **[`FramedChannel`]**: A live connection usable by both ends concurrently
//! - **[`Channel`]** / **[`Connector`]** / **[`RequestHandler`]**: Seams used by
//!   the connection manager, so it can be driven by fakes in tests
//! - **[`TcpConnector`]** / **[`TcpServer`]**: TCP dialing and accepting
//!
//! # Message Size Limits
//!
//! Frames larger than 100 MB are rejected and the connection is closed.

pub mod channel;
pub mod codec;
pub mod tcp;

pub use channel::{Channel, Connector, FramedChannel, RequestHandler};
pub use codec::{read_frame, write_frame, JsonCodec, MAX_MESSAGE_SIZE};
pub use tcp::{unmapped, TcpConnector, TcpServer};
