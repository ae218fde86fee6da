//! Codec trait and implementations for serializing/deserializing messages.
//!
//! Nodes never touch bytes directly; they hand a [`WireMessage`](crate::WireMessage)
//! to a [`Codec`] and pass the result to the transport.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Turns serializable values into bytes and back.
///
/// `Send + Sync + 'static` so one codec can be shared by a node's receipt
/// loop and every task that sends on its behalf.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// Readable in logs and packet captures. Behind the `json` feature
/// (enabled by default).
///
/// ## Example
///
/// ```rust
/// use courier_protocol::{Codec, EndpointName, InterfaceShape, JsonCodec, WireMessage};
///
/// let codec = JsonCodec;
/// let endpoint = EndpointName::new("ticks", &InterfaceShape::new("Ticker"));
/// let msg = WireMessage::ImplementorGained { endpoint };
///
/// let bytes = codec.encode(&msg).unwrap();
/// let decoded: WireMessage = codec.decode(&bytes).unwrap();
/// assert_eq!(msg, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::WireMessage;

    #[test]
    fn test_json_codec_decode_garbage_is_decode_error() {
        let result: Result<WireMessage, _> = JsonCodec.decode(b"{not json");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_json_codec_unknown_type_is_decode_error() {
        let result: Result<WireMessage, _> = JsonCodec.decode(br#"{"type":"Teleport"}"#);
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_json_codec_encodes_tagged_object() {
        let bytes = JsonCodec.encode(&WireMessage::DirectoryRequest).unwrap();
        assert_eq!(bytes, br#"{"type":"DirectoryRequest"}"#);
    }
}
