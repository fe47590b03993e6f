//! Request/response exchange with the engine.
//!
//! - [`CorrelatedRequester`] sends requests and matches responses to them,
//!   with a bounded wait per request kind.
//! - [`BusyRetryQueue`] keeps requests the engine rejected as busy until the
//!   engine reports that it resumed.

mod requester;
mod retry;

pub use requester::{
    response_of, CorrelatedRequester, PendingReply, RequestError, RequestResult, ResendEntry,
};
pub use retry::{BusyRetryQueue, Capture, RESEND_QUEUE_MAX_SIZE};
