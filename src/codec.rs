use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Trait for encoding and decoding wire messages
pub trait Codec: Send + Sync + std::fmt::Debug + 'static {
    /// Encode a serializable value into bytes
    fn encode<T: Serialize>(&self, data: &T) -> Result<Vec<u8>>;

    /// Decode bytes into a deserializable value
    fn decode<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T>;
}

/// Default codec (JSON). Payloads are opaque JSON values, so the codec must be self-describing.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, data: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(data)?)
    }

    fn decode<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// MessagePack codec - compact binary, cross-language compatible
#[cfg(feature = "codec-messagepack")]
#[derive(Debug, Clone, Copy, Default)]
pub struct MessagePackCodec;

#[cfg(feature = "codec-messagepack")]
impl Codec for MessagePackCodec {
    fn encode<T: Serialize>(&self, data: &T) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(data)
            .map_err(|e| crate::error::ChannelError::Serialization(e.to_string()))
    }

    fn decode<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T> {
        rmp_serde::from_slice(data)
            .map_err(|e| crate::error::ChannelError::Serialization(e.to_string()))
    }
}

/// CBOR codec - binary JSON (RFC 8949), self-describing
#[cfg(feature = "codec-cbor")]
#[derive(Debug, Clone, Copy, Default)]
pub struct CborCodec;

#[cfg(feature = "codec-cbor")]
impl Codec for CborCodec {
    fn encode<T: Serialize>(&self, data: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(data, &mut buf)
            .map_err(|e| crate::error::ChannelError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    fn decode<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T> {
        ciborium::from_reader(data)
            .map_err(|e| crate::error::ChannelError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Login {
        user_id: String,
        timestamp: u64,
    }

    #[test]
    fn test_json_codec() {
        let codec = JsonCodec;
        let login = Login {
            user_id: "123".into(),
            timestamp: 1_700_000_000,
        };

        let bytes = codec.encode(&login).unwrap();
        let decoded: Login = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, login);
    }

    #[test]
    fn test_json_codec_rejects_garbage() {
        let err = JsonCodec.decode::<Login>(b"not json").unwrap_err();
        assert!(matches!(err, crate::error::ChannelError::Serialization(_)));
    }
}
