//! The connection manager.
//!
//! A [`Channel`] owns one transport session and any number of multiplexed
//! streams on it. A router task reads inbound transport events and fans each
//! frame out to the mailbox of the stream it belongs to; connection loss is
//! fanned to every stream so no receiver is left hanging.
//!
//! The handle is cheap to clone; all clones refer to the same session.
//! Streams hold only a weak back-reference to the channel internals, so a
//! channel (and its transport session) is torn down as soon as the last
//! handle is dropped or [`Channel::shutdown`] is called, whichever first.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use weftrpc_core::{Codec, Metadata};

use crate::error::ClientError;
use crate::options::StreamOptions;
use crate::stream::RpcStream;
use crate::transport::{Endpoint, Frame, Route, StreamId, Transport, TransportEvent};

/// Items routed into a stream's mailbox.
#[derive(Debug)]
pub(crate) enum InboundItem {
    /// Response headers with the transport-level status.
    Headers { http_status: u16, metadata: Metadata },
    /// One enveloped message payload.
    Message(Bytes),
    /// Trailing metadata; the server has half-closed.
    Trailers(Metadata),
    /// Server side fully closed; nothing further will arrive.
    End,
    /// The stream or its connection was torn down.
    Aborted(String),
}

/// A handle to one logical connection.
#[derive(Clone)]
pub struct Channel {
    core: Arc<ChannelCore>,
}

pub(crate) struct ChannelCore {
    endpoint: Endpoint,
    /// Taken on shutdown; dropping the sender closes the transport session.
    outbound: Mutex<Option<mpsc::Sender<Frame>>>,
    registry: Mutex<HashMap<StreamId, mpsc::UnboundedSender<InboundItem>>>,
    next_stream_id: AtomicU32,
    closed: AtomicBool,
    router: Mutex<Option<JoinHandle<()>>>,
}

/// Lock a mutex, ignoring poisoning: the guarded state stays consistent
/// under every panic path that can reach it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Channel {
    /// Establish a connection to `endpoint` over `transport`.
    ///
    /// Fails with [`ClientError::Connect`] if the transport session cannot
    /// be established (DNS, refused, TLS handshake, identity mismatch).
    pub async fn connect<T: Transport>(
        transport: &T,
        endpoint: Endpoint,
    ) -> Result<Channel, ClientError> {
        let session = transport
            .open(&endpoint)
            .await
            .map_err(|e| ClientError::Connect(e.to_string()))?;
        debug!(endpoint = %endpoint, "transport session established");

        let core = Arc::new(ChannelCore {
            endpoint,
            outbound: Mutex::new(Some(session.outbound)),
            registry: Mutex::new(HashMap::new()),
            // Client-initiated streams use odd identifiers.
            next_stream_id: AtomicU32::new(1),
            closed: AtomicBool::new(false),
            router: Mutex::new(None),
        });

        let router = tokio::spawn(route_events(Arc::downgrade(&core), session.events));
        *lock(&core.router) = Some(router);

        Ok(Channel { core })
    }

    /// The endpoint this channel is connected to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.core.endpoint
    }

    /// Returns true once the channel has been shut down or lost.
    pub fn is_closed(&self) -> bool {
        self.core.closed.load(Ordering::SeqCst)
    }

    /// The number of live streams registered on this channel.
    pub fn stream_count(&self) -> usize {
        lock(&self.core.registry).len()
    }

    /// Open a stream for `service`/`method` with default options.
    pub fn open_stream<C: Codec>(
        &self,
        service: &str,
        method: &str,
        codec: C,
    ) -> Result<RpcStream<C>, ClientError> {
        self.open_stream_with_options(service, method, codec, StreamOptions::default())
    }

    /// Open a stream with per-stream metadata and compression options.
    ///
    /// The options' metadata travels with the first message sent on the
    /// stream. Fails with [`ClientError::InvalidRoute`] for malformed names
    /// and [`ClientError::ConnectionClosed`] on a shut-down channel.
    pub fn open_stream_with_options<C: Codec>(
        &self,
        service: &str,
        method: &str,
        codec: C,
        options: StreamOptions,
    ) -> Result<RpcStream<C>, ClientError> {
        let route = validate_route(service, method)?;
        let (stream_id, mailbox) = self.core.register_stream()?;
        debug!(stream_id, path = %route.path(), "stream opened");
        Ok(RpcStream::new(
            stream_id,
            route,
            codec,
            Arc::downgrade(&self.core),
            mailbox,
            options,
        ))
    }

    /// Shut the connection down.
    ///
    /// Every owned stream is aborted (pending receivers unblock with a
    /// transport error), the registry is cleared, and the transport session
    /// is closed. Idempotent: repeated calls are no-ops.
    pub fn shutdown(&self) {
        if self.core.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(endpoint = %self.core.endpoint, "shutting down channel");
        self.core.abort_streams("connection stopped");
        lock(&self.core.outbound).take();
        if let Some(router) = lock(&self.core.router).take() {
            router.abort();
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("endpoint", &self.core.endpoint)
            .field("closed", &self.is_closed())
            .field("streams", &self.stream_count())
            .finish()
    }
}

impl ChannelCore {
    /// Allocate a stream id and mailbox; fails on a closed channel.
    fn register_stream(
        &self,
    ) -> Result<(StreamId, mpsc::UnboundedReceiver<InboundItem>), ClientError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::ConnectionClosed);
        }
        let stream_id = self.next_stream_id.fetch_add(2, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.registry).insert(stream_id, tx);
        // Re-check after inserting: a concurrent shutdown that drained the
        // registry before this insert must not leave the entry behind.
        if self.closed.load(Ordering::SeqCst) {
            lock(&self.registry).remove(&stream_id);
            return Err(ClientError::ConnectionClosed);
        }
        Ok((stream_id, rx))
    }

    /// Remove a stream's mailbox. Safe to call for already-removed ids.
    pub(crate) fn deregister_stream(&self, stream_id: StreamId) {
        if lock(&self.registry).remove(&stream_id).is_some() {
            debug!(stream_id, "stream deregistered");
        }
    }

    /// A clone of the outbound frame sender, `None` once shut down.
    pub(crate) fn outbound(&self) -> Option<mpsc::Sender<Frame>> {
        lock(&self.outbound).clone()
    }

    /// Deliver one inbound frame to its stream's mailbox.
    fn route_frame(&self, frame: Frame) {
        let stream_id = frame.stream_id();
        let Some(tx) = lock(&self.registry).get(&stream_id).cloned() else {
            debug!(stream_id, "dropping frame for unknown stream");
            return;
        };

        let mut finished = false;
        let delivered = match frame {
            Frame::Response {
                http_status,
                metadata,
                end_stream,
                ..
            } => {
                finished = end_stream;
                tx.send(InboundItem::Headers {
                    http_status,
                    metadata,
                })
            }
            Frame::Message {
                payload,
                end_stream,
                ..
            } => {
                finished = end_stream;
                tx.send(InboundItem::Message(payload))
            }
            Frame::Trailers { metadata, .. } => {
                finished = true;
                tx.send(InboundItem::Trailers(metadata))
            }
            Frame::Reset { .. } => {
                let _ = tx.send(InboundItem::Aborted("stream reset by peer".to_string()));
                self.deregister_stream(stream_id);
                return;
            }
            Frame::Request { .. } => {
                warn!(stream_id, "ignoring request frame from peer");
                return;
            }
        };

        if finished {
            // The server side is done; nothing further will arrive for this
            // stream, so the registry entry can go.
            let _ = tx.send(InboundItem::End);
            self.deregister_stream(stream_id);
        } else if delivered.is_err() {
            // Receiver dropped without deregistering; clean up.
            self.deregister_stream(stream_id);
        }
    }

    /// Abort every registered stream, unblocking pending receivers.
    fn abort_streams(&self, reason: &str) {
        let mailboxes: Vec<_> = lock(&self.registry).drain().map(|(_, tx)| tx).collect();
        if !mailboxes.is_empty() {
            debug!(streams = mailboxes.len(), reason, "aborting streams");
        }
        for tx in mailboxes {
            let _ = tx.send(InboundItem::Aborted(reason.to_string()));
        }
    }
}

/// Router task: fan inbound transport events out to stream mailboxes.
async fn route_events(core: Weak<ChannelCore>, mut events: mpsc::Receiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        let Some(core) = core.upgrade() else {
            return;
        };
        match event {
            TransportEvent::Frame(frame) => core.route_frame(frame),
            TransportEvent::ConnectionLost { reason } => {
                warn!(%reason, "connection lost");
                core.closed.store(true, Ordering::SeqCst);
                lock(&core.outbound).take();
                core.abort_streams(&reason);
                return;
            }
        }
    }
    // The transport closed its event stream without a loss notification;
    // treat it the same so receivers still unblock.
    if let Some(core) = core.upgrade() {
        core.closed.store(true, Ordering::SeqCst);
        lock(&core.outbound).take();
        core.abort_streams("transport closed");
    }
}

fn validate_route(service: &str, method: &str) -> Result<Route, ClientError> {
    for (what, name) in [("service", service), ("method", method)] {
        if name.is_empty() {
            return Err(ClientError::InvalidRoute(format!("empty {} name", what)));
        }
        if name.contains(|c: char| c.is_whitespace() || c == '/') {
            return Err(ClientError::InvalidRoute(format!(
                "{} name {:?} contains illegal characters",
                what, name
            )));
        }
    }
    Ok(Route::new(service, method))
}
