//! The per-stream engine.
//!
//! An [`RpcStream`] owns one RPC exchange multiplexed on a channel: an
//! outbound send path with a checked state machine, and an inbound mailbox
//! fed by the channel's router. The stream holds only a weak back-reference
//! to the channel, which owns it; dropping the handle (or calling
//! [`RpcStream::stop`]) deregisters the stream on every exit path.
//!
//! # Send side
//!
//! The first message carries the opening headers, and only it may attach
//! extra metadata; [`send_last`](RpcStream::send_last) half-closes the
//! client side, after which further sends are rejected. Both rules are
//! enforced as explicit state checks with typed errors.
//!
//! # Receive side
//!
//! [`recv`](RpcStream::recv) suspends until an item arrives;
//! [`recv_timeout`](RpcStream::recv_timeout) bounds the wait, and a timeout
//! leaves the stream usable. [`try_recv`](RpcStream::try_recv) never
//! blocks. Once [`StreamItem::Eof`] is observed it is returned again on
//! every later receive rather than blocking or erroring.

use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::Instant;
use tracing::{debug, warn};

use weftrpc_core::compression::ENCODING_KEY;
use weftrpc_core::{Codec, CodecError, Compressor, EnvelopeError, Metadata};
use weftrpc_core::{decode_frame, encode_frame};

use crate::channel::{ChannelCore, InboundItem};
use crate::error::ClientError;
use crate::options::StreamOptions;
use crate::transport::{Frame, Route, StreamId};

/// Response headers: the transport-level status plus metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseHeaders {
    pub http_status: u16,
    pub metadata: Metadata,
}

/// One inbound item observed on a stream.
#[derive(Debug)]
pub enum StreamItem<T> {
    /// Initial response headers.
    Headers(ResponseHeaders),
    /// A decoded message.
    Message(T),
    /// Trailing metadata; the server has half-closed.
    Trailers(Metadata),
    /// Everything buffered has been drained and the server is done.
    /// Returned again on every later receive.
    Eof,
}

/// Send-side state: metadata rides only on the first message, and a last
/// message half-closes the client side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendState {
    /// Nothing sent yet; metadata still allowed.
    Ready,
    /// First message sent.
    Open,
    /// Last message sent; no further sends.
    HalfClosed,
}

#[derive(Debug, Clone)]
enum Terminal {
    Eof,
    Aborted(String),
}

/// One RPC exchange on a [`Channel`](crate::Channel).
pub struct RpcStream<C: Codec> {
    stream_id: StreamId,
    route: Route,
    codec: C,
    core: Weak<ChannelCore>,
    mailbox: mpsc::UnboundedReceiver<InboundItem>,
    send_state: SendState,
    terminal: Option<Terminal>,
    /// Consumed by the first send.
    initial_metadata: Option<Metadata>,
    compressor: Option<Box<dyn Compressor>>,
    max_message_size: usize,
    stopped: bool,
}

impl<C: Codec> RpcStream<C> {
    pub(crate) fn new(
        stream_id: StreamId,
        route: Route,
        codec: C,
        core: Weak<ChannelCore>,
        mailbox: mpsc::UnboundedReceiver<InboundItem>,
        options: StreamOptions,
    ) -> Self {
        let mut metadata = options.metadata;
        let reserved: Vec<String> = metadata
            .iter()
            .filter(|(name, _)| name.as_str().starts_with("grpc-"))
            .map(|(name, _)| name.as_str().to_owned())
            .collect();
        for key in &reserved {
            warn!(key = %key, "dropping reserved metadata key");
            metadata.remove(key);
        }
        if !options.encoding.is_identity() {
            // Static key and value; cannot fail.
            metadata.insert(ENCODING_KEY, options.encoding.as_str()).unwrap();
        }

        Self {
            stream_id,
            route,
            codec,
            core,
            mailbox,
            send_state: SendState::Ready,
            terminal: None,
            initial_metadata: Some(metadata),
            compressor: options.encoding.compressor(),
            max_message_size: options.max_message_size,
            stopped: false,
        }
    }

    /// The multiplexed stream identifier.
    pub fn id(&self) -> StreamId {
        self.stream_id
    }

    /// The service/method this stream addresses.
    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Send a message.
    pub async fn send(&mut self, message: &C::Encode) -> Result<(), ClientError> {
        self.send_inner(message, None, false).await
    }

    /// Send the first message with extra header metadata.
    ///
    /// Fails with [`ClientError::MetadataAfterFirstSend`] once any message
    /// has been sent; the stream state is untouched by the rejection.
    pub async fn send_with_metadata(
        &mut self,
        message: &C::Encode,
        metadata: Metadata,
    ) -> Result<(), ClientError> {
        self.send_inner(message, Some(metadata), false).await
    }

    /// Send a message and half-close the client side.
    ///
    /// For request-response and client-streaming shapes this is what
    /// triggers the server to produce its response.
    pub async fn send_last(&mut self, message: &C::Encode) -> Result<(), ClientError> {
        self.send_inner(message, None, true).await
    }

    /// As [`send_last`](Self::send_last), with first-message metadata.
    pub async fn send_last_with_metadata(
        &mut self,
        message: &C::Encode,
        metadata: Metadata,
    ) -> Result<(), ClientError> {
        self.send_inner(message, Some(metadata), true).await
    }

    async fn send_inner(
        &mut self,
        message: &C::Encode,
        metadata: Option<Metadata>,
        last: bool,
    ) -> Result<(), ClientError> {
        if self.stopped {
            return Err(ClientError::StreamClosed);
        }
        if self.send_state == SendState::HalfClosed {
            return Err(ClientError::SendAfterLast);
        }
        if metadata.is_some() && self.send_state != SendState::Ready {
            return Err(ClientError::MetadataAfterFirstSend);
        }

        let payload = self.codec.encode(message)?;
        let (payload, compressed) = match &self.compressor {
            Some(compressor) => {
                let compressed = compressor.compress(&payload).map_err(|e| {
                    ClientError::Codec(CodecError::Encode(format!("compression: {}", e)))
                })?;
                (compressed, true)
            }
            None => (payload, false),
        };
        let framed = encode_frame(&payload, compressed);

        let outbound = self.outbound()?;
        if self.send_state == SendState::Ready {
            let mut headers = self.initial_metadata.take().unwrap_or_default();
            if let Some(extra) = metadata {
                headers.merge(&extra);
            }
            outbound
                .send(Frame::Request {
                    stream_id: self.stream_id,
                    route: self.route.clone(),
                    metadata: headers,
                    end_stream: false,
                })
                .await
                .map_err(|_| ClientError::ConnectionClosed)?;
        }
        outbound
            .send(Frame::Message {
                stream_id: self.stream_id,
                payload: framed,
                end_stream: last,
            })
            .await
            .map_err(|_| ClientError::ConnectionClosed)?;

        self.send_state = if last {
            debug!(stream_id = self.stream_id, "client half-closed");
            SendState::HalfClosed
        } else {
            SendState::Open
        };
        Ok(())
    }

    /// Receive the next item, suspending until one is available.
    pub async fn recv(&mut self) -> Result<StreamItem<C::Decode>, ClientError> {
        self.recv_until(None).await
    }

    /// Receive with a wall-clock timeout measured from this call.
    ///
    /// On expiry returns [`ClientError::Timeout`] and the stream remains
    /// usable; a timeout is a client-observed condition, not a peer signal.
    pub async fn recv_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<StreamItem<C::Decode>, ClientError> {
        self.recv_until(Some(Instant::now() + timeout)).await
    }

    /// Receive with an absolute deadline, for budgets shared across calls.
    pub async fn recv_deadline(
        &mut self,
        deadline: Instant,
    ) -> Result<StreamItem<C::Decode>, ClientError> {
        self.recv_until(Some(deadline)).await
    }

    async fn recv_until(
        &mut self,
        deadline: Option<Instant>,
    ) -> Result<StreamItem<C::Decode>, ClientError> {
        if self.stopped {
            return Err(ClientError::StreamClosed);
        }
        if let Some(item) = self.terminal_item() {
            return item;
        }
        let item = match deadline {
            None => self.mailbox.recv().await,
            Some(deadline) => match tokio::time::timeout_at(deadline, self.mailbox.recv()).await {
                Ok(item) => item,
                Err(_) => return Err(ClientError::Timeout),
            },
        };
        self.accept(item)
    }

    /// Non-blocking receive: `Ok(None)` when nothing is queued.
    pub fn try_recv(&mut self) -> Result<Option<StreamItem<C::Decode>>, ClientError> {
        if self.stopped {
            return Err(ClientError::StreamClosed);
        }
        if let Some(item) = self.terminal_item() {
            return item.map(Some);
        }
        match self.mailbox.try_recv() {
            Ok(item) => self.accept(Some(item)).map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => self.accept(None).map(Some),
        }
    }

    /// Stop the stream and release its resources. Idempotent; also run on
    /// drop, so every exit path deregisters the stream.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        let completed = matches!(self.terminal, Some(Terminal::Eof));
        if let Some(core) = self.core.upgrade() {
            core.deregister_stream(self.stream_id);
            if !completed {
                // Best effort: tell the peer the stream is abandoned.
                if let Some(outbound) = core.outbound() {
                    let _ = outbound.try_send(Frame::Reset {
                        stream_id: self.stream_id,
                    });
                }
            }
        }
        debug!(stream_id = self.stream_id, "stream stopped");
    }

    fn outbound(&self) -> Result<mpsc::Sender<Frame>, ClientError> {
        let core = self.core.upgrade().ok_or(ClientError::ConnectionClosed)?;
        core.outbound().ok_or(ClientError::ConnectionClosed)
    }

    fn terminal_item(&self) -> Option<Result<StreamItem<C::Decode>, ClientError>> {
        match &self.terminal {
            Some(Terminal::Eof) => Some(Ok(StreamItem::Eof)),
            Some(Terminal::Aborted(reason)) => {
                Some(Err(ClientError::Transport(reason.clone())))
            }
            None => None,
        }
    }

    fn accept(
        &mut self,
        item: Option<InboundItem>,
    ) -> Result<StreamItem<C::Decode>, ClientError> {
        match item {
            Some(InboundItem::Headers {
                http_status,
                metadata,
            }) => Ok(StreamItem::Headers(ResponseHeaders {
                http_status,
                metadata,
            })),
            Some(InboundItem::Message(payload)) => {
                Ok(StreamItem::Message(self.decode_message(payload)?))
            }
            Some(InboundItem::Trailers(metadata)) => Ok(StreamItem::Trailers(metadata)),
            Some(InboundItem::End) => {
                self.terminal = Some(Terminal::Eof);
                Ok(StreamItem::Eof)
            }
            Some(InboundItem::Aborted(reason)) => {
                self.terminal = Some(Terminal::Aborted(reason.clone()));
                Err(ClientError::Transport(reason))
            }
            None => {
                self.terminal = Some(Terminal::Aborted("connection closed".to_string()));
                Err(ClientError::ConnectionClosed)
            }
        }
    }

    fn decode_message(&self, payload: Bytes) -> Result<C::Decode, ClientError> {
        let mut buf = BytesMut::from(payload.as_ref());
        let frame = decode_frame(&mut buf, self.max_message_size).map_err(envelope_error)?;
        let Some((compressed, body)) = frame else {
            return Err(ClientError::Codec(CodecError::Decode(
                "truncated message frame".to_string(),
            )));
        };
        let body = if compressed {
            let Some(compressor) = &self.compressor else {
                return Err(ClientError::Codec(CodecError::Decode(
                    "compressed message on a stream without negotiated encoding".to_string(),
                )));
            };
            compressor.decompress(&body).map_err(|e| {
                ClientError::Codec(CodecError::Decode(format!("decompression: {}", e)))
            })?
        } else {
            body
        };
        Ok(self.codec.decode(body)?)
    }
}

fn envelope_error(err: EnvelopeError) -> ClientError {
    ClientError::Codec(CodecError::Decode(err.to_string()))
}

impl<C: Codec> Drop for RpcStream<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<C: Codec> std::fmt::Debug for RpcStream<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcStream")
            .field("stream_id", &self.stream_id)
            .field("route", &self.route)
            .field("send_state", &self.send_state)
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}

/// Yields items until `Eof`; a terminal abort surfaces as one final error.
impl<C: Codec + Unpin> futures::Stream for RpcStream<C> {
    type Item = Result<StreamItem<C::Decode>, ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.stopped || this.terminal.is_some() {
            return Poll::Ready(None);
        }
        match this.mailbox.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(item) => match this.accept(item) {
                Ok(StreamItem::Eof) => Poll::Ready(None),
                Ok(other) => Poll::Ready(Some(Ok(other))),
                Err(err) => Poll::Ready(Some(Err(err))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::transport::Endpoint;
    use crate::transport::mock::{MockTransport, PeerReply};
    use weftrpc_core::JsonCodec;

    async fn quiet_channel() -> Channel {
        let transport = MockTransport::new(|_f: Frame| PeerReply::Ignore);
        Channel::connect(&transport, Endpoint::plaintext("localhost", 1))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_metadata_after_first_send_rejected() {
        let channel = quiet_channel().await;
        let mut stream = channel
            .open_stream("svc", "m", JsonCodec::<u32, u32>::new())
            .unwrap();

        stream.send(&1).await.unwrap();

        let mut md = Metadata::new();
        md.insert("x-late", "too late").unwrap();
        let err = stream.send_with_metadata(&2, md).await.unwrap_err();
        assert!(matches!(err, ClientError::MetadataAfterFirstSend));

        // The rejection does not corrupt the stream: plain sends still work.
        stream.send(&3).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_after_last_rejected() {
        let channel = quiet_channel().await;
        let mut stream = channel
            .open_stream("svc", "m", JsonCodec::<u32, u32>::new())
            .unwrap();

        stream.send_last(&1).await.unwrap();
        let err = stream.send(&2).await.unwrap_err();
        assert!(matches!(err, ClientError::SendAfterLast));
    }

    #[tokio::test]
    async fn test_try_recv_empty_never_blocks() {
        let channel = quiet_channel().await;
        let mut stream = channel
            .open_stream("svc", "m", JsonCodec::<u32, u32>::new())
            .unwrap();

        assert!(matches!(stream.try_recv(), Ok(None)));
        assert!(matches!(stream.try_recv(), Ok(None)));
    }

    #[tokio::test]
    async fn test_stopped_handle_fails_loudly() {
        let channel = quiet_channel().await;
        let mut stream = channel
            .open_stream("svc", "m", JsonCodec::<u32, u32>::new())
            .unwrap();

        stream.stop();
        stream.stop(); // idempotent

        assert!(matches!(
            stream.send(&1).await,
            Err(ClientError::StreamClosed)
        ));
        assert!(matches!(stream.recv().await, Err(ClientError::StreamClosed)));
        assert!(matches!(stream.try_recv(), Err(ClientError::StreamClosed)));
        assert_eq!(channel.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_drop_deregisters() {
        let channel = quiet_channel().await;
        let stream = channel
            .open_stream("svc", "m", JsonCodec::<u32, u32>::new())
            .unwrap();
        assert_eq!(channel.stream_count(), 1);
        drop(stream);
        assert_eq!(channel.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_recv_timeout_leaves_stream_usable() {
        let channel = quiet_channel().await;
        let mut stream = channel
            .open_stream("svc", "m", JsonCodec::<u32, u32>::new())
            .unwrap();

        let err = stream
            .recv_timeout(Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout));

        // Still usable for sends after the timeout.
        stream.send(&1).await.unwrap();
    }
}
