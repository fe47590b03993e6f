//! Correlated request engine.
//!
//! [`CorrelatedRequester::submit`] encodes a request, records it as pending
//! under its message id and hands it to the transport. The returned
//! [`PendingReply`] resolves when the message loop feeds the matching
//! response to [`CorrelatedRequester::complete`], or when the request's
//! deadline passes.
//!
//! ```text
//!  submit(req) ──► encode ──► in flight for id? ── no ──► transport.send ──► in_flight[id]
//!                                   │ yes
//!                                   ▼
//!                             waiting[id] (FIFO) ──► sent when in_flight[id] resolves
//!
//!  complete(indication) ──► in_flight.remove(id) ──► reply ──► send next waiting[id]
//!  deadline ──────────────► in_flight.remove(id) ──► Timeout (or success per policy)
//!  close() ───────────────► every in-flight and waiting request ──► Shutdown
//! ```
//!
//! At most one request per message id is in flight, so a response can never
//! be matched to the wrong request of the same kind.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::config::{OnTimeout, TimeoutPolicy};
use crate::error::LocationResponse;
use crate::protocol::{Codec, CodecError, Indication, MessageId, Outbound, Request, Transport, TransportError};
use crate::telemetry::ClientMetrics;

/// A request captured verbatim for replay after a busy response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResendEntry {
    pub message_id: MessageId,
    pub payload: Bytes,
}

/// Why a correlated request did not produce a usable response.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The engine is busy; the payload is handed to the retry queue.
    #[error("engine busy")]
    Busy(ResendEntry),

    #[error("request timed out")]
    Timeout,

    /// The engine answered with a failure status.
    #[error("engine rejected request: {0}")]
    Engine(LocationResponse),

    #[error(transparent)]
    Encode(#[from] CodecError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The requester went away before answering.
    #[error("request abandoned")]
    Closed,

    /// The client is shutting down; the request was not (or will not be)
    /// answered by the engine.
    #[error("client shutting down")]
    Shutdown,
}

impl RequestError {
    /// The caller-visible outcome for this error.
    pub fn response(&self) -> LocationResponse {
        match self {
            RequestError::Busy(_) => LocationResponse::Busy,
            RequestError::Timeout => LocationResponse::Timeout,
            RequestError::Engine(response) => *response,
            RequestError::Shutdown => LocationResponse::SystemNotReady,
            RequestError::Encode(_) | RequestError::Transport(_) | RequestError::Closed => {
                LocationResponse::GeneralFailure
            }
        }
    }
}

/// Result of a correlated request.
pub type RequestResult = Result<Indication, RequestError>;

/// Collapses a request result into a single response code.
pub fn response_of(result: &RequestResult) -> LocationResponse {
    match result {
        Ok(indication) => indication.status().unwrap_or(LocationResponse::Success),
        Err(err) => err.response(),
    }
}

/// A request that has been submitted but not yet answered.
#[derive(Debug)]
struct PendingRequest {
    seq: u64,
    payload: Bytes,
    expiry: Instant,
    reply: oneshot::Sender<RequestResult>,
}

#[derive(Debug, Default)]
struct PendingTable {
    closed: bool,
    next_seq: u64,
    in_flight: HashMap<MessageId, PendingRequest>,
    waiting: HashMap<MessageId, VecDeque<PendingRequest>>,
}

impl PendingTable {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn pop_waiting(&mut self, id: MessageId) -> Option<PendingRequest> {
        let queue = self.waiting.get_mut(&id)?;
        let next = queue.pop_front();
        if queue.is_empty() {
            self.waiting.remove(&id);
        }
        next
    }
}

/// Sends requests and correlates their responses.
pub struct CorrelatedRequester {
    socket_name: String,
    codec: Arc<dyn Codec>,
    transport: Arc<dyn Transport>,
    policy: TimeoutPolicy,
    metrics: Arc<ClientMetrics>,
    table: Mutex<PendingTable>,
}

impl CorrelatedRequester {
    pub fn new(
        socket_name: impl Into<String>,
        codec: Arc<dyn Codec>,
        transport: Arc<dyn Transport>,
        policy: TimeoutPolicy,
        metrics: Arc<ClientMetrics>,
    ) -> Self {
        Self {
            socket_name: socket_name.into(),
            codec,
            transport,
            policy,
            metrics,
            table: Mutex::new(PendingTable::default()),
        }
    }

    /// Encodes and sends `request`, or queues it behind an in-flight request
    /// of the same kind.
    ///
    /// Never blocks on the engine; the wait happens in [`PendingReply::wait`].
    pub fn submit(self: &Arc<Self>, request: Request) -> PendingReply {
        let timeout = self.policy.timeout_for(request.message_id());
        self.submit_timed(request, timeout)
    }

    /// Like [`submit`](Self::submit), but waits at least `at_least` before
    /// giving up. For requests that carry their own engine-side timeout.
    pub fn submit_waiting_at_least(self: &Arc<Self>, request: Request, at_least: Duration) -> PendingReply {
        let timeout = self.policy.timeout_for(request.message_id()).max(at_least);
        self.submit_timed(request, timeout)
    }

    fn submit_timed(self: &Arc<Self>, request: Request, timeout: Duration) -> PendingReply {
        let id = request.message_id();
        let outbound = Outbound {
            socket_name: self.socket_name.clone(),
            request,
        };
        match self.codec.encode(&outbound) {
            Ok(payload) => self.submit_payload(id, payload, timeout),
            Err(err) => {
                error!(msg_id = %id, error = %err, "Failed to encode request");
                self.resolved(id, Err(err.into()))
            }
        }
    }

    /// Sends a request whose answer is not a correlated response
    /// (register, deregister).
    pub fn notify(&self, request: Request) -> Result<(), RequestError> {
        let id = request.message_id();
        let outbound = Outbound {
            socket_name: self.socket_name.clone(),
            request,
        };
        let payload = self.codec.encode(&outbound)?;
        self.transport.send(payload)?;
        self.metrics.request_sent();
        debug!(msg_id = %id, "Notification sent");
        Ok(())
    }

    /// Sends a previously captured payload again.
    pub fn resend(self: &Arc<Self>, entry: ResendEntry) -> PendingReply {
        self.metrics.resent();
        debug!(msg_id = %entry.message_id, "Resending busy request");
        let timeout = self.policy.timeout_for(entry.message_id);
        self.submit_payload(entry.message_id, entry.payload, timeout)
    }

    fn submit_payload(self: &Arc<Self>, id: MessageId, payload: Bytes, timeout: Duration) -> PendingReply {
        let (reply, rx) = oneshot::channel();
        let expiry = Instant::now() + timeout;

        let mut table = self.table.lock();
        if table.closed {
            drop(table);
            debug!(msg_id = %id, "Requester closed, refusing request");
            return self.resolved(id, Err(RequestError::Shutdown));
        }
        let seq = table.next_seq();
        let pending = PendingRequest {
            seq,
            payload,
            expiry,
            reply,
        };

        if table.in_flight.contains_key(&id) {
            debug!(msg_id = %id, seq, "Request queued behind in-flight request of same kind");
            table.waiting.entry(id).or_default().push_back(pending);
        } else {
            self.dispatch(&mut table, id, Some(pending));
        }
        drop(table);

        PendingReply {
            requester: Arc::clone(self),
            id,
            seq,
            expiry,
            rx,
        }
    }

    fn resolved(self: &Arc<Self>, id: MessageId, result: RequestResult) -> PendingReply {
        let (reply, rx) = oneshot::channel();
        let _ = reply.send(result);
        PendingReply {
            requester: Arc::clone(self),
            id,
            seq: 0,
            expiry: Instant::now(),
            rx,
        }
    }

    /// Sends `next` and, on transport failure, keeps promoting waiting
    /// requests until one goes out or none are left.
    fn dispatch(&self, table: &mut PendingTable, id: MessageId, mut next: Option<PendingRequest>) {
        while let Some(pending) = next.take() {
            if pending.reply.is_closed() {
                debug!(msg_id = %id, seq = pending.seq, "Skipping abandoned request");
                next = table.pop_waiting(id);
                continue;
            }
            match self.transport.send(pending.payload.clone()) {
                Ok(()) => {
                    self.metrics.request_sent();
                    debug!(msg_id = %id, seq = pending.seq, "Request sent");
                    table.in_flight.insert(id, pending);
                    return;
                }
                Err(err) => {
                    error!(msg_id = %id, error = %err, "Transport send failed");
                    let _ = pending.reply.send(Err(err.into()));
                    next = table.pop_waiting(id);
                }
            }
        }
    }

    /// Feeds a decoded indication to the pending table.
    ///
    /// Returns true if it answered an in-flight request.
    pub fn complete(&self, indication: Indication) -> bool {
        let Some(id) = indication.correlation() else {
            return false;
        };

        let mut table = self.table.lock();
        let Some(pending) = table.in_flight.remove(&id) else {
            warn!(msg_id = %id, "Unsolicited response, no request in flight");
            return false;
        };
        self.metrics.response_matched();

        let result = match indication.status() {
            Some(LocationResponse::Busy) => Err(RequestError::Busy(ResendEntry {
                message_id: id,
                payload: pending.payload.clone(),
            })),
            Some(status) if !status.is_success() => Err(RequestError::Engine(status)),
            _ => Ok(indication),
        };
        debug!(msg_id = %id, seq = pending.seq, ok = result.is_ok(), "Response matched");
        let _ = pending.reply.send(result);

        let next = table.pop_waiting(id);
        self.dispatch(&mut table, id, next);
        true
    }

    /// Drops the request `seq` if it is still pending. Returns false when it
    /// was already answered.
    fn expire(&self, id: MessageId, seq: u64) -> bool {
        let mut table = self.table.lock();

        if table.in_flight.get(&id).map(|p| p.seq) == Some(seq) {
            table.in_flight.remove(&id);
            self.metrics.timed_out();
            let next = table.pop_waiting(id);
            self.dispatch(&mut table, id, next);
            return true;
        }

        if let Some(queue) = table.waiting.get_mut(&id) {
            if let Some(pos) = queue.iter().position(|p| p.seq == seq) {
                queue.remove(pos);
                if queue.is_empty() {
                    table.waiting.remove(&id);
                }
                self.metrics.timed_out();
                return true;
            }
        }
        false
    }

    /// Answers every in-flight and waiting request with
    /// [`RequestError::Shutdown`] and refuses later submissions.
    ///
    /// Returns how many requests were failed.
    pub fn close(&self) -> usize {
        let mut table = self.table.lock();
        table.closed = true;
        let in_flight: Vec<PendingRequest> = table.in_flight.drain().map(|(_, p)| p).collect();
        let waiting: Vec<PendingRequest> = table.waiting.drain().flat_map(|(_, q)| q).collect();
        drop(table);

        let failed = in_flight.len() + waiting.len();
        for pending in in_flight.into_iter().chain(waiting) {
            let _ = pending.reply.send(Err(RequestError::Shutdown));
        }
        if failed > 0 {
            debug!(failed, "Pending requests failed on close");
        }
        failed
    }

    /// Number of requests in flight plus waiting.
    pub fn pending_count(&self) -> usize {
        let table = self.table.lock();
        table.in_flight.len() + table.waiting.values().map(VecDeque::len).sum::<usize>()
    }

    /// Whether a request of this kind is in flight.
    pub fn is_in_flight(&self, id: MessageId) -> bool {
        self.table.lock().in_flight.contains_key(&id)
    }

    pub fn policy(&self) -> &TimeoutPolicy {
        &self.policy
    }

    #[cfg(test)]
    fn expiry_of(&self, id: MessageId) -> Option<Instant> {
        self.table.lock().in_flight.get(&id).map(|p| p.expiry)
    }
}

/// Handle on a submitted request.
#[derive(Debug)]
pub struct PendingReply {
    requester: Arc<CorrelatedRequester>,
    id: MessageId,
    seq: u64,
    expiry: Instant,
    rx: oneshot::Receiver<RequestResult>,
}

impl std::fmt::Debug for CorrelatedRequester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never block: the caller may already hold the table lock
        let pending = self.table.try_lock().map(|table| {
            table.in_flight.len() + table.waiting.values().map(VecDeque::len).sum::<usize>()
        });
        f.debug_struct("CorrelatedRequester")
            .field("socket_name", &self.socket_name)
            .field("pending", &pending)
            .finish()
    }
}

impl PendingReply {
    pub fn message_id(&self) -> MessageId {
        self.id
    }

    /// Waits for the response or the deadline, whichever comes first.
    pub async fn wait(mut self) -> RequestResult {
        match tokio::time::timeout_at(self.expiry, &mut self.rx).await {
            Ok(result) => result.unwrap_or(Err(RequestError::Closed)),
            Err(_) => {
                if self.requester.expire(self.id, self.seq) {
                    match self.requester.policy.on_timeout(self.id) {
                        OnTimeout::Fail => {
                            warn!(msg_id = %self.id, "Request timed out");
                            Err(RequestError::Timeout)
                        }
                        OnTimeout::TreatAsSuccess => {
                            debug!(msg_id = %self.id, "Request timed out, tolerated as success");
                            Ok(Indication::Response {
                                request: self.id,
                                response: LocationResponse::Success,
                            })
                        }
                    }
                } else {
                    // answered while the deadline fired
                    self.rx.await.unwrap_or(Err(RequestError::Closed))
                }
            }
        }
    }
}
