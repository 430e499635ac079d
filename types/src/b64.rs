//! Serde helpers to encode byte blobs as base64 strings in the JSON encoding.
//!
//! Protobuf carries `bytes` fields natively, but a JSON rendering of raw
//! bytes as number arrays would be both bloated and incompatible with the
//! browser peers, which expect base64 like `protojson` produces.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S: Serializer>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD.decode(encoded).map_err(serde::de::Error::custom)
}

/// Same as the parent module, for `Option<Vec<u8>>` fields.
pub mod option {
    use super::*;

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&STANDARD.encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Blobs {
        #[serde(with = "crate::b64")]
        plain: Vec<u8>,
        #[serde(with = "crate::b64::option")]
        maybe: Option<Vec<u8>>,
    }

    #[test]
    fn roundtrip() {
        let blobs = Blobs {
            plain: b"hello".to_vec(),
            maybe: Some(vec![0, 1, 2, 255]),
        };
        let json = serde_json::to_string(&blobs).unwrap();
        assert!(json.contains("aGVsbG8="));
        assert_eq!(serde_json::from_str::<Blobs>(&json).unwrap(), blobs);
    }

    #[test]
    fn none_stays_null() {
        let json = serde_json::to_string(&Blobs { plain: vec![], maybe: None }).unwrap();
        assert_eq!(json, r#"{"plain":"","maybe":null}"#);
    }
}
