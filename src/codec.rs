//! Value encoding for records, keys, and index entries.
//!
//! The store binds one encoding at open time and uses it for everything it
//! persists: record bodies, record keys, index values, and the key lists
//! stored under non-unique index entries. Both supported encodings are
//! self-describing, which lets the query layer decode any stored value into
//! a dynamic [`serde_json::Value`] without knowing the record type.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, StoreError};

/// Wire encoding used by a store.
///
/// `MessagePack` is the default: compact, binary, and self-describing
/// (struct fields are encoded by name). `Json` can be substituted at open
/// time when human-readable on-disk values matter more than size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// MessagePack with named struct fields (default).
    MessagePack,
    /// UTF-8 JSON.
    Json,
}

impl Default for Encoding {
    fn default() -> Self {
        Encoding::MessagePack
    }
}

impl Encoding {
    /// Encodes a value to bytes.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Encoding::MessagePack => {
                rmp_serde::to_vec_named(value).map_err(|e| StoreError::Codec(e.to_string()))
            }
            Encoding::Json => {
                serde_json::to_vec(value).map_err(|e| StoreError::Codec(e.to_string()))
            }
        }
    }

    /// Decodes bytes into a concrete type.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            Encoding::MessagePack => {
                rmp_serde::from_slice(bytes).map_err(|e| StoreError::Codec(e.to_string()))
            }
            Encoding::Json => {
                serde_json::from_slice(bytes).map_err(|e| StoreError::Codec(e.to_string()))
            }
        }
    }

    /// Decodes bytes into a dynamic value without a target type.
    ///
    /// Works for both encodings because both are self-describing; this is
    /// what the query executor uses to inspect stored records and keys.
    pub fn decode_dynamic(&self, bytes: &[u8]) -> Result<Value> {
        self.decode::<Value>(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Sample {
        id: u64,
        name: String,
        tags: Option<Vec<String>>,
    }

    #[test]
    fn test_messagepack_round_trip() {
        let sample = Sample {
            id: 42,
            name: "alpha".to_string(),
            tags: Some(vec!["a".to_string(), "b".to_string()]),
        };

        let bytes = Encoding::MessagePack.encode(&sample).unwrap();
        let decoded: Sample = Encoding::MessagePack.decode(&bytes).unwrap();
        assert_eq!(decoded, sample);
    }

    #[test]
    fn test_json_round_trip() {
        let sample = Sample {
            id: 7,
            name: "beta".to_string(),
            tags: None,
        };

        let bytes = Encoding::Json.encode(&sample).unwrap();
        let decoded: Sample = Encoding::Json.decode(&bytes).unwrap();
        assert_eq!(decoded, sample);
    }

    #[test]
    fn test_dynamic_decode_sees_field_names() {
        let sample = Sample {
            id: 1,
            name: "gamma".to_string(),
            tags: None,
        };

        for encoding in [Encoding::MessagePack, Encoding::Json] {
            let bytes = encoding.encode(&sample).unwrap();
            let value = encoding.decode_dynamic(&bytes).unwrap();
            assert_eq!(value["name"], Value::String("gamma".to_string()));
            assert_eq!(value["id"], serde_json::json!(1));
        }
    }

    #[test]
    fn test_scalar_keys_round_trip() {
        let bytes = Encoding::MessagePack.encode(&12u64).unwrap();
        let back: u64 = Encoding::MessagePack.decode(&bytes).unwrap();
        assert_eq!(back, 12);

        let bytes = Encoding::MessagePack.encode("record-key").unwrap();
        let back: String = Encoding::MessagePack.decode(&bytes).unwrap();
        assert_eq!(back, "record-key");
    }

    #[test]
    fn test_decode_error_is_codec_error() {
        let result = Encoding::Json.decode::<Sample>(b"not json");
        assert!(matches!(result, Err(StoreError::Codec(_))));
    }
}
