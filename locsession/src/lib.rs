//! LocSession - client-side positioning session manager
//!
//! A [`LocationClient`] talks to a positioning engine over an asynchronous
//! message channel. It keeps tracking, batching and geofence sessions alive
//! across engine restarts, correlates responses with requests, replays
//! requests the engine answered with busy, and delivers reports to a
//! [`LocationListener`].
//!
//! ```ignore
//! use std::sync::Arc;
//! use locsession::{loopback, ClientConfig, LocationClient, TrackingOptions};
//! use locsession::sim::SimulatedEngine;
//!
//! let (client_link, engine_link) = loopback();
//! let (_engine, _task) = SimulatedEngine::spawn(engine_link, "demo");
//! let (client, _loop) = LocationClient::builder(ClientConfig::new("demo"))
//!     .spawn(Arc::new(client_link.transport), client_link.inbound)?;
//! client.start_tracking(TrackingOptions::new(1000, 0), |response| {
//!     println!("tracking: {response}");
//! })?;
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod exchange;
pub mod geofence_map;
pub mod ids;
pub mod logging;
pub mod mask;
pub mod protocol;
pub mod reconciler;
pub mod session;
pub mod sim;
pub mod telemetry;

pub use client::{
    ClientBuilder, ClientDaemon, ClientEvent, ClientSnapshot, EventForwarder, LocationClient,
    LocationListener, NoopListener,
};
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult, LocationResponse};
pub use mask::EventMask;
pub use protocol::types::{
    BatchingOptions, BatchingStatus, BreachType, GeofenceBreach, GeofenceOptions, GeofenceSpec,
    Location, TrackingOptions,
};
pub use protocol::{loopback, BincodeCodec, Codec, Transport};
pub use session::SessionState;
pub use telemetry::TelemetrySnapshot;

/// Crate version, as reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
