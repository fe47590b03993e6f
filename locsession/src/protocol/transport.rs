//! Transport seam and an in-process loopback implementation.
//!
//! A transport only moves opaque payloads. Sending happens from whichever
//! task issues a request; receiving is a stream of payloads the client's
//! listener task forwards onto the message loop.

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

/// Transport failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The peer is gone.
    #[error("transport closed")]
    Closed,

    /// The engine service is temporarily unreachable.
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

/// Outbound half of a transport.
///
/// Implementations must be safe to call from several tasks at once.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, payload: Bytes) -> Result<(), TransportError>;
}

/// Client end of a loopback link.
#[derive(Clone, Debug)]
pub struct LoopbackTransport {
    to_engine: mpsc::UnboundedSender<Bytes>,
}

impl Transport for LoopbackTransport {
    fn send(&self, payload: Bytes) -> Result<(), TransportError> {
        self.to_engine
            .send(payload)
            .map_err(|_| TransportError::Closed)
    }
}

/// Engine end of a loopback link.
#[derive(Debug)]
pub struct EngineLink {
    /// Requests written by the client.
    pub requests: mpsc::UnboundedReceiver<Bytes>,
    /// Indications for the client.
    pub indications: mpsc::UnboundedSender<Bytes>,
}

/// Client side of a loopback link: the transport plus its inbound stream.
#[derive(Debug)]
pub struct ClientLink {
    pub transport: LoopbackTransport,
    pub inbound: mpsc::UnboundedReceiver<Bytes>,
}

/// Creates a connected client/engine pair.
pub fn loopback() -> (ClientLink, EngineLink) {
    let (req_tx, req_rx) = mpsc::unbounded_channel();
    let (ind_tx, ind_rx) = mpsc::unbounded_channel();
    (
        ClientLink {
            transport: LoopbackTransport { to_engine: req_tx },
            inbound: ind_rx,
        },
        EngineLink {
            requests: req_rx,
            indications: ind_tx,
        },
    )
}
