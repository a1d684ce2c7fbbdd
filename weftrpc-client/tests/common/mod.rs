//! Shared scaffolding for the integration tests: scripted peers and frame
//! builders over the mock transport.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use weftrpc_client::transport::mock::{MockPeer, PeerReply};
use weftrpc_client::transport::{Frame, StreamId};
use weftrpc_core::Metadata;

/// Route engine logs into the test output; safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// The message type used across the integration tests.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Note {
    pub text: String,
    pub seq: u32,
}

pub fn note(text: &str, seq: u32) -> Note {
    Note {
        text: text.to_string(),
        seq,
    }
}

/// Response headers with a transport status.
pub fn response_headers(stream_id: StreamId, http_status: u16) -> Frame {
    let mut metadata = Metadata::new();
    metadata.insert("x-served-by", "mock-peer").unwrap();
    Frame::Response {
        stream_id,
        http_status,
        metadata,
        end_stream: false,
    }
}

/// Trailers carrying a protocol status and optional message.
pub fn trailers(stream_id: StreamId, status: i32, message: Option<&str>) -> Frame {
    let mut metadata = Metadata::new();
    metadata.insert("grpc-status", &status.to_string()).unwrap();
    if let Some(message) = message {
        metadata.insert("grpc-message", message).unwrap();
    }
    Frame::Trailers {
        stream_id,
        metadata,
    }
}

/// A peer that answers every completed request by echoing all its message
/// payloads back, framed as headers + messages + ok trailers.
///
/// Payloads are passed through verbatim (envelope included), so the echo
/// works for compressed messages too.
pub struct UnaryEchoPeer {
    pending: Mutex<HashMap<StreamId, Vec<Bytes>>>,
}

impl UnaryEchoPeer {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }
}

impl MockPeer for UnaryEchoPeer {
    fn on_frame(&self, frame: Frame) -> PeerReply {
        match frame {
            Frame::Message {
                stream_id,
                payload,
                end_stream,
            } => {
                let mut pending = self.pending.lock().unwrap();
                pending.entry(stream_id).or_default().push(payload);
                if !end_stream {
                    return PeerReply::Ignore;
                }
                let payloads = pending.remove(&stream_id).unwrap_or_default();
                drop(pending);

                let mut reply = vec![response_headers(stream_id, 200)];
                for payload in payloads {
                    reply.push(Frame::Message {
                        stream_id,
                        payload,
                        end_stream: false,
                    });
                }
                reply.push(trailers(stream_id, 0, None));
                PeerReply::Reply(reply)
            }
            _ => PeerReply::Ignore,
        }
    }
}

/// A peer that records every frame it sees and never replies.
pub struct CapturePeer {
    pub frames: Arc<Mutex<Vec<Frame>>>,
}

impl CapturePeer {
    pub fn new() -> (Self, Arc<Mutex<Vec<Frame>>>) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                frames: frames.clone(),
            },
            frames,
        )
    }
}

impl MockPeer for CapturePeer {
    fn on_frame(&self, frame: Frame) -> PeerReply {
        self.frames.lock().unwrap().push(frame);
        PeerReply::Ignore
    }
}
