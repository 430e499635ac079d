//! Encoding negotiation and envelope (de)serialization.
//!
//! Peers pick the frame encoding with a WebSocket subprotocol string during
//! the upgrade; the broker offers both and echoes the chosen one.

use prost::Message;
use thiserror::Error;

use crate::envelope::Envelope;

/// Subprotocol string selecting binary Protobuf frames.
pub const SUBPROTOCOL_PROTOBUF: &str = "wasimoff.v1.protobuf";
/// Subprotocol string selecting JSON text frames.
pub const SUBPROTOCOL_JSON: &str = "wasimoff.v1.json";

/// Frame encoding negotiated via WebSocket subprotocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    Protobuf,
    Json,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("protobuf decode: {0}")]
    ProtobufDecode(#[from] prost::DecodeError),
    #[error("json codec: {0}")]
    Json(#[from] serde_json::Error),
}

impl Encoding {
    /// All subprotocols the broker offers, preferred first.
    pub const OFFERED: [&'static str; 2] = [SUBPROTOCOL_PROTOBUF, SUBPROTOCOL_JSON];

    /// Match a negotiated subprotocol string. `None` for anything unknown.
    pub fn from_subprotocol(protocol: &str) -> Option<Self> {
        match protocol {
            SUBPROTOCOL_PROTOBUF => Some(Encoding::Protobuf),
            SUBPROTOCOL_JSON => Some(Encoding::Json),
            _ => None,
        }
    }

    pub fn subprotocol(&self) -> &'static str {
        match self {
            Encoding::Protobuf => SUBPROTOCOL_PROTOBUF,
            Encoding::Json => SUBPROTOCOL_JSON,
        }
    }

    pub fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
        match self {
            Encoding::Protobuf => Ok(envelope.encode_to_vec()),
            Encoding::Json => Ok(serde_json::to_vec(envelope)?),
        }
    }

    pub fn decode(&self, frame: &[u8]) -> Result<Envelope, CodecError> {
        match self {
            Encoding::Protobuf => Ok(Envelope::decode(frame)?),
            Encoding::Json => Ok(serde_json::from_slice(frame)?),
        }
    }
}
