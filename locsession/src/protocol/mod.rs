//! Engine protocol: message types and the codec/transport seams.
//!
//! ```text
//! Request ──► Outbound{socket_name} ──► Codec::encode ──► Transport::send ──► engine
//!
//! engine ──► payload ──► Codec::decode ──► Inbound{socket_name} ──► Indication
//! ```
//!
//! The session machinery only ever sees the typed [`Request`] and
//! [`Indication`] values; raw payloads stop at the codec.

mod codec;
mod message;
mod transport;
pub mod types;

pub use codec::{BincodeCodec, Codec, CodecError};
pub use message::{
    EntryResult, GeofenceAddEntry, GeofenceModifyEntry, Inbound, Indication, MessageId, Outbound,
    Request,
};
pub use transport::{loopback, ClientLink, EngineLink, LoopbackTransport, Transport, TransportError};
