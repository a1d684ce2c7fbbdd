//! In-memory transport with a scriptable peer.
//!
//! `MockTransport` backs the integration tests: every outbound frame is
//! handed to a [`MockPeer`], whose reply frames are delivered back to the
//! engine as inbound events. Closures implement `MockPeer` directly, so a
//! test peer is usually a few lines:
//!
//! ```ignore
//! let transport = MockTransport::new(|frame| match frame {
//!     Frame::Message { stream_id, payload, .. } => PeerReply::Reply(vec![
//!         Frame::Message { stream_id, payload, end_stream: false },
//!     ]),
//!     _ => PeerReply::Ignore,
//! });
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;

use super::{Endpoint, Frame, Transport, TransportError, TransportEvent, TransportSession};

/// How the peer reacts to one client frame.
#[derive(Debug)]
pub enum PeerReply {
    /// No reaction.
    Ignore,
    /// Deliver these frames to the client, in order.
    Reply(Vec<Frame>),
    /// Deliver these frames, then drop the connection with a reason.
    Disconnect(Vec<Frame>, String),
}

/// A scripted peer: invoked once per frame the client sends.
pub trait MockPeer: Send + Sync + 'static {
    fn on_frame(&self, frame: Frame) -> PeerReply;
}

impl<F> MockPeer for F
where
    F: Fn(Frame) -> PeerReply + Send + Sync + 'static,
{
    fn on_frame(&self, frame: Frame) -> PeerReply {
        self(frame)
    }
}

/// An in-memory [`Transport`] for tests.
pub struct MockTransport {
    peer: Option<Arc<dyn MockPeer>>,
    refuse: Option<String>,
}

impl MockTransport {
    /// A transport whose sessions are served by `peer`.
    pub fn new(peer: impl MockPeer) -> Self {
        Self {
            peer: Some(Arc::new(peer)),
            refuse: None,
        }
    }

    /// A transport that refuses every open with `reason`.
    pub fn refusing(reason: impl Into<String>) -> Self {
        Self {
            peer: None,
            refuse: Some(reason.into()),
        }
    }
}

impl Transport for MockTransport {
    async fn open(&self, _endpoint: &Endpoint) -> Result<TransportSession, TransportError> {
        if let Some(reason) = &self.refuse {
            return Err(TransportError::Connect(reason.clone()));
        }
        // `refuse` and `peer` are mutually exclusive by construction.
        let peer = self.peer.as_ref().cloned().ok_or_else(|| {
            TransportError::Connect("mock transport has no peer".to_string())
        })?;

        let (out_tx, mut out_rx) = mpsc::channel::<Frame>(32);
        let (evt_tx, evt_rx) = mpsc::channel::<TransportEvent>(32);

        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                match peer.on_frame(frame) {
                    PeerReply::Ignore => {}
                    PeerReply::Reply(frames) => {
                        for f in frames {
                            if evt_tx.send(TransportEvent::Frame(f)).await.is_err() {
                                return;
                            }
                        }
                    }
                    PeerReply::Disconnect(frames, reason) => {
                        for f in frames {
                            if evt_tx.send(TransportEvent::Frame(f)).await.is_err() {
                                return;
                            }
                        }
                        let _ = evt_tx.send(TransportEvent::ConnectionLost { reason }).await;
                        return;
                    }
                }
            }
            // Client closed the session; dropping evt_tx ends the event
            // stream without a loss notification.
        });

        Ok(TransportSession {
            outbound: out_tx,
            events: evt_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_refusing_transport() {
        let transport = MockTransport::refusing("connection refused");
        let err = transport
            .open(&Endpoint::plaintext("localhost", 1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_echo_peer() {
        let transport = MockTransport::new(|frame: Frame| match frame {
            Frame::Message {
                stream_id, payload, ..
            } => PeerReply::Reply(vec![Frame::Message {
                stream_id,
                payload,
                end_stream: false,
            }]),
            _ => PeerReply::Ignore,
        });

        let mut session = transport
            .open(&Endpoint::plaintext("localhost", 1))
            .await
            .unwrap();

        session
            .outbound
            .send(Frame::Message {
                stream_id: 1,
                payload: Bytes::from_static(b"ping"),
                end_stream: false,
            })
            .await
            .unwrap();

        match session.events.recv().await.unwrap() {
            TransportEvent::Frame(Frame::Message {
                stream_id, payload, ..
            }) => {
                assert_eq!(stream_id, 1);
                assert_eq!(&payload[..], b"ping");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disconnecting_peer() {
        let transport = MockTransport::new(|_frame: Frame| {
            PeerReply::Disconnect(vec![], "peer went away".to_string())
        });

        let mut session = transport
            .open(&Endpoint::plaintext("localhost", 1))
            .await
            .unwrap();

        session
            .outbound
            .send(Frame::Reset { stream_id: 1 })
            .await
            .unwrap();

        match session.events.recv().await.unwrap() {
            TransportEvent::ConnectionLost { reason } => {
                assert_eq!(reason, "peer went away");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        // The event stream ends after a loss notification.
        assert!(session.events.recv().await.is_none());
    }
}
