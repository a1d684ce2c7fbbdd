//! The transport abstraction.
//!
//! The engine does not speak any wire protocol itself: it exchanges typed
//! [`Frame`]s, keyed by stream id, with a [`Transport`] implementation. A
//! transport owns framing, TLS, and connection mechanics; the engine owns
//! stream multiplexing and lifecycle on top.
//!
//! A [`TransportSession`] is a pair of channels. The engine pushes outbound
//! frames into `outbound` and reads [`TransportEvent`]s from `events`.
//! Dropping the outbound sender closes the session; a transport that loses
//! its connection must emit [`TransportEvent::ConnectionLost`] before
//! closing the event channel, so blocked receivers learn why.

use std::future::Future;

use bytes::Bytes;
use tokio::sync::mpsc;
use weftrpc_core::Metadata;

pub mod mock;

/// Multiplexed stream identifier. Client-initiated streams use odd ids.
pub type StreamId = u32;

/// A service/method pair addressing one RPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    service: String,
    method: String,
}

impl Route {
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// The request path form, `/{service}/{method}`.
    pub fn path(&self) -> String {
        format!("/{}/{}", self.service, self.method)
    }
}

/// Frames exchanged between the engine and the transport.
#[derive(Debug, Clone)]
pub enum Frame {
    /// Client-to-server: open a stream with its route and header metadata.
    Request {
        stream_id: StreamId,
        route: Route,
        metadata: Metadata,
        end_stream: bool,
    },
    /// Server-to-client: response headers with the transport-level status.
    Response {
        stream_id: StreamId,
        http_status: u16,
        metadata: Metadata,
        end_stream: bool,
    },
    /// A length-prefixed message payload, either direction.
    Message {
        stream_id: StreamId,
        payload: Bytes,
        end_stream: bool,
    },
    /// Server-to-client: trailing metadata; half-closes the server side.
    Trailers {
        stream_id: StreamId,
        metadata: Metadata,
    },
    /// Abrupt stream termination, either direction.
    Reset { stream_id: StreamId },
}

impl Frame {
    /// The stream this frame belongs to.
    pub fn stream_id(&self) -> StreamId {
        match self {
            Frame::Request { stream_id, .. }
            | Frame::Response { stream_id, .. }
            | Frame::Message { stream_id, .. }
            | Frame::Trailers { stream_id, .. }
            | Frame::Reset { stream_id } => *stream_id,
        }
    }
}

/// Events a transport delivers to the engine.
#[derive(Debug)]
pub enum TransportEvent {
    /// An inbound frame for one of the streams.
    Frame(Frame),
    /// The connection was lost; no further frames will arrive.
    ConnectionLost { reason: String },
}

/// An established session: outbound frame sink and inbound event source.
#[derive(Debug)]
pub struct TransportSession {
    pub outbound: mpsc::Sender<Frame>,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Transport-level failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// DNS, refused, TLS handshake, or peer identity failure at open time.
    #[error("connect failed: {0}")]
    Connect(String),
}

/// Opens sessions to an [`Endpoint`].
pub trait Transport: Send + Sync + 'static {
    fn open(
        &self,
        endpoint: &Endpoint,
    ) -> impl Future<Output = Result<TransportSession, TransportError>> + Send;
}

/// Transport security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Plaintext,
    Tls,
}

/// TLS options for a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsOptions {
    /// Verify the peer identity against the endpoint host.
    pub verify_peer: bool,
    /// Identity to verify instead of the host, for certificates whose
    /// subject legitimately differs from the connect address.
    pub override_authority: Option<String>,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            verify_peer: true,
            override_authority: None,
        }
    }
}

/// Where and how to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    mode: Mode,
    host: String,
    port: u16,
    tls: TlsOptions,
}

impl Endpoint {
    /// A plaintext endpoint.
    pub fn plaintext(host: impl Into<String>, port: u16) -> Self {
        Self {
            mode: Mode::Plaintext,
            host: host.into(),
            port,
            tls: TlsOptions::default(),
        }
    }

    /// A TLS endpoint with default options (peer verification on).
    pub fn tls(host: impl Into<String>, port: u16) -> Self {
        Self {
            mode: Mode::Tls,
            host: host.into(),
            port,
            tls: TlsOptions::default(),
        }
    }

    /// Replace the TLS options.
    pub fn tls_options(mut self, tls: TlsOptions) -> Self {
        self.tls = tls;
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn tls_opts(&self) -> &TlsOptions {
        &self.tls
    }

    /// The identity the transport should verify, honoring the override.
    pub fn expected_authority(&self) -> &str {
        self.tls
            .override_authority
            .as_deref()
            .unwrap_or(&self.host)
    }

    /// The `host:port` form.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = match self.mode {
            Mode::Plaintext => "http",
            Mode::Tls => "https",
        };
        write!(f, "{}://{}:{}", scheme, self.host, self.port)
    }
}
