use serde::{Serialize, de::DeserializeOwned};

use crate::{Error, Result};

/// Turns message values into record payloads and back.
///
/// The harness never looks inside the bytes. Use the same encoding as the
/// application under test.
pub trait Codec: Send + Sync + 'static {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// JSON encoding via `serde_json`. The default codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct OrderCreated {
        id: u64,
    }

    #[test]
    fn json_encodes_plain_objects() {
        let bytes = JsonCodec.encode(&OrderCreated { id: 42 }).unwrap();
        assert_eq!(bytes, br#"{"id":42}"#);
    }

    #[test]
    fn malformed_input_is_a_codec_error() {
        let err = JsonCodec.decode::<OrderCreated>(b"not json").unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }
}
