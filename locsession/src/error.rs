//! Response taxonomy and client-facing error types.
//!
//! Every operation outcome that reaches a caller is a [`LocationResponse`].
//! The remaining error types describe failures of the surrounding plumbing
//! (configuration, id allocation, the message loop itself) and are converted
//! into a `LocationResponse` before they reach an operation callback.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::config::ConfigError;
use crate::ids::IdError;

/// Outcome of a caller-facing operation.
///
/// The same taxonomy travels on the wire inside engine responses, so the
/// discriminants are stable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LocationResponse {
    /// The operation completed.
    Success = 0,
    /// Unspecified failure.
    GeneralFailure = 1,
    /// The engine does not support the operation.
    NotSupported = 2,
    /// A parameter was rejected, or referenced an unknown id.
    InvalidParameter = 3,
    /// No correlated response arrived in time.
    Timeout = 4,
    /// An exclusive one-shot operation is already running.
    AlreadyInProgress = 5,
    /// The engine has not registered this client yet.
    SystemNotReady = 6,
    /// The engine is transiently busy; the request is replayed on resume.
    Busy = 7,
    /// The geofence table is full.
    CapacityExceeded = 8,
}

impl LocationResponse {
    /// Returns true for [`LocationResponse::Success`].
    pub fn is_success(self) -> bool {
        self == LocationResponse::Success
    }
}

impl fmt::Display for LocationResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LocationResponse::Success => "success",
            LocationResponse::GeneralFailure => "general failure",
            LocationResponse::NotSupported => "not supported",
            LocationResponse::InvalidParameter => "invalid parameter",
            LocationResponse::Timeout => "timeout",
            LocationResponse::AlreadyInProgress => "already in progress",
            LocationResponse::SystemNotReady => "system not ready",
            LocationResponse::Busy => "engine busy",
            LocationResponse::CapacityExceeded => "capacity exceeded",
        };
        f.write_str(name)
    }
}

/// Errors returned by [`LocationClient`](crate::client::LocationClient) methods.
///
/// These only describe failures to hand an operation to the message loop.
/// Once accepted, the outcome is always delivered through the callback.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The message loop has stopped.
    #[error("location client is shut down")]
    Shutdown,

    /// The message loop queue is full.
    #[error("location client queue is full")]
    QueueFull,

    /// Id allocation failed on the caller thread.
    #[error(transparent)]
    Ids(#[from] IdError),

    /// The supplied configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result alias for client handle operations.
pub type ClientResult<T> = Result<T, ClientError>;
