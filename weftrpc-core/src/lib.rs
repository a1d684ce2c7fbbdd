//! Core protocol types for the weftrpc streaming RPC client.
//!
//! This crate holds everything that is independent of the connection and
//! stream engine in `weftrpc-client`:
//!
//! - [`Code`] and [`Status`]: protocol status codes and the RPC status
//!   carried in trailer metadata
//! - [`Metadata`]: header/trailer metadata with ASCII and binary entries
//! - [`envelope`]: length-prefixed message framing
//! - [`Codec`]: the pluggable message encoder/decoder, with
//!   [`ProstCodec`] and [`JsonCodec`] implementations
//! - [`Compressor`] and [`Encoding`]: per-message compression

pub mod code;
pub mod codec;
pub mod compression;
pub mod envelope;
pub mod metadata;

pub use code::{Code, ParseCodeError, Status};
pub use codec::{Codec, CodecError, JsonCodec, ProstCodec};
pub use compression::{Compressor, Encoding};
pub use envelope::{EnvelopeError, FRAME_HEADER_LEN, decode_frame, encode_frame};
pub use metadata::{InvalidMetadata, Metadata};

#[cfg(feature = "compression-gzip")]
pub use compression::GzipCompressor;
