//! Pluggable message encoding.
//!
//! The stream engine never touches message bytes directly: every stream is
//! parameterized by a [`Codec`] that turns outgoing messages into payload
//! bytes and inbound payload bytes back into messages. Two implementations
//! are provided, [`ProstCodec`] for protobuf and [`JsonCodec`] for JSON.

use std::marker::PhantomData;

use bytes::Bytes;
use prost::Message;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Encodes outgoing messages and decodes inbound payloads for one RPC shape.
pub trait Codec: Send + Sync + 'static {
    /// The client-to-server message type.
    type Encode: Send + 'static;
    /// The server-to-client message type.
    type Decode: Send + 'static;

    /// Encode a message to payload bytes.
    fn encode(&self, message: &Self::Encode) -> Result<Bytes, CodecError>;

    /// Decode payload bytes into a message.
    fn decode(&self, payload: Bytes) -> Result<Self::Decode, CodecError>;
}

/// Encoding or decoding failure.
#[derive(Clone, Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encode error: {0}")]
    Encode(String),

    #[error("decode error: {0}")]
    Decode(String),
}

/// Protobuf codec backed by prost.
pub struct ProstCodec<Req, Res> {
    _marker: PhantomData<fn(Req) -> Res>,
}

impl<Req, Res> ProstCodec<Req, Res> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<Req, Res> Default for ProstCodec<Req, Res> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Req, Res> Clone for ProstCodec<Req, Res> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<Req, Res> Codec for ProstCodec<Req, Res>
where
    Req: Message + 'static,
    Res: Message + Default + 'static,
{
    type Encode = Req;
    type Decode = Res;

    fn encode(&self, message: &Req) -> Result<Bytes, CodecError> {
        Ok(Bytes::from(message.encode_to_vec()))
    }

    fn decode(&self, payload: Bytes) -> Result<Res, CodecError> {
        Res::decode(payload).map_err(|e| CodecError::Decode(format!("protobuf: {}", e)))
    }
}

/// JSON codec backed by serde_json.
pub struct JsonCodec<Req, Res> {
    _marker: PhantomData<fn(Req) -> Res>,
}

impl<Req, Res> JsonCodec<Req, Res> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<Req, Res> Default for JsonCodec<Req, Res> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Req, Res> Clone for JsonCodec<Req, Res> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<Req, Res> Codec for JsonCodec<Req, Res>
where
    Req: Serialize + Send + Sync + 'static,
    Res: DeserializeOwned + Send + Sync + 'static,
{
    type Encode = Req;
    type Decode = Res;

    fn encode(&self, message: &Req) -> Result<Bytes, CodecError> {
        serde_json::to_vec(message)
            .map(Bytes::from)
            .map_err(|e| CodecError::Encode(format!("json: {}", e)))
    }

    fn decode(&self, payload: Bytes) -> Result<Res, CodecError> {
        serde_json::from_slice(&payload).map_err(|e| CodecError::Decode(format!("json: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Greeting {
        name: String,
        count: u32,
    }

    #[test]
    fn test_json_codec_round_trip() {
        let codec = JsonCodec::<Greeting, Greeting>::new();
        let msg = Greeting {
            name: "weft".into(),
            count: 3,
        };

        let bytes = codec.encode(&msg).unwrap();
        let decoded = codec.decode(bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_json_codec_decode_error() {
        let codec = JsonCodec::<Greeting, Greeting>::new();
        let err = codec.decode(Bytes::from_static(b"{broken")).unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }

    // prost::Message is implemented by hand so the test does not depend on
    // generated code.
    #[derive(Clone, PartialEq, Debug, Default)]
    struct Ping {
        seq: u64,
    }

    impl Message for Ping {
        fn encode_raw(&self, buf: &mut impl bytes::BufMut) {
            if self.seq != 0 {
                prost::encoding::uint64::encode(1, &self.seq, buf);
            }
        }

        fn merge_field(
            &mut self,
            tag: u32,
            wire_type: prost::encoding::WireType,
            buf: &mut impl bytes::Buf,
            ctx: prost::encoding::DecodeContext,
        ) -> Result<(), prost::DecodeError> {
            if tag == 1 {
                prost::encoding::uint64::merge(wire_type, &mut self.seq, buf, ctx)
            } else {
                prost::encoding::skip_field(wire_type, tag, buf, ctx)
            }
        }

        fn encoded_len(&self) -> usize {
            if self.seq == 0 {
                0
            } else {
                prost::encoding::uint64::encoded_len(1, &self.seq)
            }
        }

        fn clear(&mut self) {
            self.seq = 0;
        }
    }

    #[test]
    fn test_prost_codec_round_trip() {
        let codec = ProstCodec::<Ping, Ping>::new();
        let msg = Ping { seq: 42 };

        let bytes = codec.encode(&msg).unwrap();
        let decoded = codec.decode(bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_prost_codec_decode_error() {
        let codec = ProstCodec::<Ping, Ping>::new();
        // Tag 1 declared as varint but truncated.
        let err = codec.decode(Bytes::from_static(&[0x08])).unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }
}
