//! Message codec seam and the bincode reference codec.

use bytes::Bytes;
use thiserror::Error;

use super::message::{Inbound, Outbound};

/// Codec failure.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode message: {0}")]
    Encode(String),

    #[error("failed to decode message: {0}")]
    Decode(String),
}

/// Client-side codec: requests out, indications in.
///
/// Implementations are pure; they hold no per-message state.
pub trait Codec: Send + Sync + 'static {
    /// Serializes an outbound request envelope.
    fn encode(&self, message: &Outbound) -> Result<Bytes, CodecError>;

    /// Parses an inbound indication envelope.
    fn decode(&self, payload: &[u8]) -> Result<Inbound, CodecError>;
}

/// Codec using bincode over the serde representation of the messages.
///
/// Also exposes the engine-side direction, which the simulated engine uses.
#[derive(Clone, Copy, Debug, Default)]
pub struct BincodeCodec;

impl BincodeCodec {
    pub fn new() -> Self {
        Self
    }

    /// Engine side: parses a request envelope.
    pub fn decode_request(&self, payload: &[u8]) -> Result<Outbound, CodecError> {
        bincode::deserialize(payload).map_err(|e| CodecError::Decode(e.to_string()))
    }

    /// Engine side: serializes an indication envelope.
    pub fn encode_indication(&self, message: &Inbound) -> Result<Bytes, CodecError> {
        bincode::serialize(message)
            .map(Bytes::from)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }
}

impl Codec for BincodeCodec {
    fn encode(&self, message: &Outbound) -> Result<Bytes, CodecError> {
        bincode::serialize(message)
            .map(Bytes::from)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, payload: &[u8]) -> Result<Inbound, CodecError> {
        bincode::deserialize(payload).map_err(|e| CodecError::Decode(e.to_string()))
    }
}
