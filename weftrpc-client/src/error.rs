//! Client-side error types.
//!
//! [`ClientError`] covers everything a stream or channel operation can
//! fail with. [`ErrorKind`] is the coarse classification used by unary
//! call results; see [`crate::unary`] for how outcomes map onto it.

use weftrpc_core::CodecError;

/// Errors surfaced by channel and stream operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// The transport session could not be established.
    #[error("connect error: {0}")]
    Connect(String),

    /// The transport failed mid-call (connection reset, lost, or refused a
    /// frame). The channel may need to be recreated.
    #[error("transport error: {0}")]
    Transport(String),

    /// A receive deadline elapsed. The stream remains usable.
    #[error("receive timed out")]
    Timeout,

    /// Message encoding or decoding failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The service or method name is malformed.
    #[error("invalid route: {0}")]
    InvalidRoute(String),

    /// Header metadata may only accompany the first message of a stream.
    #[error("metadata may only be sent with the first message")]
    MetadataAfterFirstSend,

    /// No sends are permitted after a last message half-closes the stream.
    #[error("stream is half-closed: a last message was already sent")]
    SendAfterLast,

    /// The stream handle was stopped; late use fails loudly.
    #[error("stream not found: handle was stopped")]
    StreamClosed,

    /// The owning channel was shut down.
    #[error("connection closed")]
    ConnectionClosed,
}

impl ClientError {
    /// The coarse classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Timeout => ErrorKind::Timeout,
            ClientError::Connect(_)
            | ClientError::Transport(_)
            | ClientError::ConnectionClosed => ErrorKind::Transport,
            ClientError::Codec(_)
            | ClientError::InvalidRoute(_)
            | ClientError::MetadataAfterFirstSend
            | ClientError::SendAfterLast
            | ClientError::StreamClosed => ErrorKind::Client,
        }
    }
}

/// Coarse failure classification for a completed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Local setup or usage failure; never worth an automatic retry.
    Client,
    /// Deadline exceeded awaiting a response; a fresh call may succeed.
    Timeout,
    /// Failure surfaced at the transport layer; the connection may need
    /// recreation.
    Transport,
    /// A well-formed response carrying a non-zero protocol status.
    Protocol,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Client => "client",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Transport => "transport",
            ErrorKind::Protocol => "protocol",
        }
    }
}
