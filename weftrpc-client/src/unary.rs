//! The unary call orchestrator.
//!
//! A unary call is assembled from the streaming primitives: open a stream,
//! send the request as the last message, then receive headers, the response
//! message, and trailers under one shared deadline. The outcome is
//! normalized into [`UnaryReply`] on success or [`UnaryError`] on failure,
//! and the stream is stopped on every exit path.

use tokio::time::Instant;
use tracing::debug;

use weftrpc_core::{Code, Codec, Metadata, Status};

use crate::channel::Channel;
use crate::error::{ClientError, ErrorKind};
use crate::options::CallOptions;
use crate::stream::{ResponseHeaders, RpcStream, StreamItem};

/// Fixed diagnostic for stream-setup failures: raw faults never escape to
/// the caller.
const STREAM_SETUP_FAILED: &str = "error creating stream";

/// A successful unary exchange.
#[derive(Debug)]
pub struct UnaryReply<T> {
    /// The decoded response message.
    pub message: T,
    /// The server's status message (often empty on success).
    pub status_message: String,
    /// Transport-level status; always 200 on success.
    pub http_status: u16,
    /// Protocol-level status; always [`Code::Ok`] on success.
    pub grpc_status: Code,
    /// Response headers.
    pub headers: Metadata,
    /// Response trailers.
    pub trailers: Metadata,
}

/// A failed unary exchange.
///
/// Carries whichever of the response pieces were obtained before the
/// failure, so callers can diagnose partial progress.
#[derive(Debug)]
pub struct UnaryError<T> {
    /// The failure classification.
    pub kind: ErrorKind,
    /// Human-readable failure description: the server's status message for
    /// protocol errors, the local diagnostic otherwise.
    pub status_message: Option<String>,
    /// Transport-level status, if headers were received.
    pub http_status: Option<u16>,
    /// Protocol-level status, if one was received.
    pub grpc_status: Option<Code>,
    /// Response headers, if received.
    pub headers: Option<Metadata>,
    /// Response trailers, if received.
    pub trailers: Option<Metadata>,
    /// A decoded response message received before the failure.
    pub partial: Option<T>,
}

impl<T> UnaryError<T> {
    /// The fixed client-classified error for stream setup failures.
    fn stream_setup() -> Self {
        Self {
            kind: ErrorKind::Client,
            status_message: Some(STREAM_SETUP_FAILED.to_string()),
            http_status: None,
            grpc_status: None,
            headers: None,
            trailers: None,
            partial: None,
        }
    }
}

impl<T> std::fmt::Display for UnaryError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unary call failed ({})", self.kind.as_str())?;
        if let Some(msg) = &self.status_message {
            write!(f, ": {}", msg)?;
        }
        Ok(())
    }
}

impl<T: std::fmt::Debug> std::error::Error for UnaryError<T> {}

impl Channel {
    /// Perform a full request/response exchange on a fresh stream.
    ///
    /// The options' timeout is one deadline shared across the headers,
    /// message, and trailers receives. The internally allocated stream is
    /// stopped before this returns, on success and on every failure path.
    pub async fn unary<C: Codec>(
        &self,
        request: &C::Encode,
        service: &str,
        method: &str,
        codec: C,
        options: CallOptions,
    ) -> Result<UnaryReply<C::Decode>, UnaryError<C::Decode>> {
        let (timeout, stream_options) = options.into_parts();
        let deadline = timeout.map(|t| Instant::now() + t);

        let mut stream =
            match self.open_stream_with_options(service, method, codec, stream_options) {
                Ok(stream) => stream,
                Err(err) => {
                    debug!(service, method, error = %err, "unary stream setup failed");
                    return Err(UnaryError::stream_setup());
                }
            };

        let result = exchange(&mut stream, request, deadline).await;
        // Stopping here covers every exit path; Drop backstops panics.
        stream.stop();
        result
    }
}

/// Everything observed so far; folded into the final reply or error.
struct Progress<T> {
    headers: Option<ResponseHeaders>,
    message: Option<T>,
    trailers: Option<Metadata>,
}

async fn exchange<C: Codec>(
    stream: &mut RpcStream<C>,
    request: &C::Encode,
    deadline: Option<Instant>,
) -> Result<UnaryReply<C::Decode>, UnaryError<C::Decode>> {
    let mut progress = Progress {
        headers: None,
        message: None,
        trailers: None,
    };

    if let Err(err) = stream.send_last(request).await {
        return Err(progress.fail(err));
    }

    loop {
        let item = match deadline {
            Some(deadline) => stream.recv_deadline(deadline).await,
            None => stream.recv().await,
        };
        match item {
            Ok(StreamItem::Headers(headers)) => {
                if progress.headers.is_none() {
                    progress.headers = Some(headers);
                }
            }
            Ok(StreamItem::Message(message)) => {
                if progress.message.is_some() {
                    return Err(
                        progress.protocol_violation("unary response has multiple messages")
                    );
                }
                progress.message = Some(message);
            }
            Ok(StreamItem::Trailers(trailers)) => progress.trailers = Some(trailers),
            Ok(StreamItem::Eof) => break,
            Err(err) => return Err(progress.fail(err)),
        }
    }

    progress.finish()
}

impl<T> Progress<T> {
    /// The protocol status: from trailers, or from headers for
    /// trailers-only responses.
    fn status(&self) -> Option<Status> {
        self.trailers
            .as_ref()
            .and_then(Status::from_trailers)
            .or_else(|| {
                self.headers
                    .as_ref()
                    .and_then(|h| Status::from_trailers(&h.metadata))
            })
    }

    fn http_status(&self) -> Option<u16> {
        self.headers.as_ref().map(|h| h.http_status)
    }

    /// Fold a stream error into an error value, preserving partials.
    fn fail(self, err: ClientError) -> UnaryError<T> {
        self.error(err.kind(), err.to_string())
    }

    fn protocol_violation(self, message: &str) -> UnaryError<T> {
        self.error(ErrorKind::Protocol, message.to_string())
    }

    fn error(self, kind: ErrorKind, message: String) -> UnaryError<T> {
        let http_status = self.http_status();
        let grpc_status = self.status().map(|s| s.code());
        UnaryError {
            kind,
            status_message: Some(message),
            http_status,
            grpc_status,
            headers: self.headers.map(|h| h.metadata),
            trailers: self.trailers,
            partial: self.message,
        }
    }

    /// Classify a completed exchange, most specific signal first.
    fn finish(self) -> Result<UnaryReply<T>, UnaryError<T>> {
        let status = self.status();

        if let Some(code) = self.http_status() {
            if code != 200 {
                let message = format!("transport status {}", code);
                return Err(self.error(ErrorKind::Transport, message));
            }
        }

        if let Some(status) = &status {
            if !status.is_ok() {
                let message = status.message().unwrap_or(status.code().as_str()).to_string();
                return Err(self.error(ErrorKind::Protocol, message));
            }
        }

        match (self.headers, self.message, self.trailers, status) {
            (Some(headers), Some(message), Some(trailers), Some(status)) => Ok(UnaryReply {
                message,
                status_message: status.message().unwrap_or_default().to_string(),
                http_status: headers.http_status,
                grpc_status: status.code(),
                headers: headers.metadata,
                trailers,
            }),
            (headers, message, trailers, _) => Err(UnaryError {
                kind: ErrorKind::Protocol,
                status_message: Some("incomplete response".to_string()),
                http_status: headers.as_ref().map(|h| h.http_status),
                grpc_status: None,
                headers: headers.map(|h| h.metadata),
                trailers,
                partial: message,
            }),
        }
    }
}
