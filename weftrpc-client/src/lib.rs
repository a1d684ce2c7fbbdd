//! Client-side engine for a multiplexed streaming RPC protocol.
//!
//! A [`Channel`] is one logical connection to a server. Any number of
//! independent streams are multiplexed on it; each [`RpcStream`] is one RPC
//! exchange with explicit send/receive, and [`Channel::unary`] assembles a
//! full request/response call from the same primitives.
//!
//! The wire transport is pluggable: the engine exchanges typed frames with
//! a [`Transport`](transport::Transport) implementation and owns only the
//! stream lifecycle, routing, and call orchestration on top. Message
//! encoding is equally pluggable through [`Codec`]; protobuf and JSON
//! codecs ship in `weftrpc-core`.
//!
//! ## Unary call
//!
//! ```ignore
//! use weftrpc_client::{CallOptions, Channel, Endpoint};
//! use weftrpc_core::ProstCodec;
//! use std::time::Duration;
//!
//! let channel = Channel::connect(&transport, Endpoint::tls("api.example.com", 443)).await?;
//!
//! let reply = channel
//!     .unary(
//!         &request,
//!         "users.v1.UserService",
//!         "GetUser",
//!         ProstCodec::<GetUserRequest, GetUserResponse>::new(),
//!         CallOptions::new().timeout(Duration::from_secs(5)),
//!     )
//!     .await?;
//!
//! println!("user: {:?}", reply.message);
//! ```
//!
//! ## Streaming
//!
//! ```ignore
//! use weftrpc_client::StreamItem;
//!
//! let mut stream = channel.open_stream(
//!     "telemetry.v1.Ingest",
//!     "Record",
//!     ProstCodec::<Sample, Ack>::new(),
//! )?;
//!
//! stream.send(&sample_one).await?;
//! stream.send_last(&sample_two).await?;
//!
//! loop {
//!     match stream.recv().await? {
//!         StreamItem::Headers(h) => println!("headers: {:?}", h.metadata),
//!         StreamItem::Message(ack) => println!("ack: {:?}", ack),
//!         StreamItem::Trailers(t) => println!("trailers: {:?}", t),
//!         StreamItem::Eof => break,
//!     }
//! }
//! ```
//!
//! Streams are released on drop; stopping a channel aborts its streams and
//! unblocks any pending receivers with a transport error.

pub mod channel;
pub mod error;
pub mod options;
pub mod stream;
pub mod transport;
pub mod unary;

pub use channel::Channel;
pub use error::{ClientError, ErrorKind};
pub use options::{CallOptions, StreamOptions};
pub use stream::{ResponseHeaders, RpcStream, StreamItem};
pub use transport::{Endpoint, Mode, TlsOptions, Transport};
pub use unary::{UnaryError, UnaryReply};

// Re-export the core types callers touch directly.
pub use weftrpc_core::{Code, Codec, Encoding, JsonCodec, Metadata, ProstCodec, Status};
