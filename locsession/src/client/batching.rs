//! Batching indications and batched-location read-back.

use std::sync::Arc;

use tracing::{debug, info};

use super::listener::{ResponseCallback, ValueCallback};
use super::state::ClientCore;
use crate::error::LocationResponse;
use crate::exchange::RequestError;
use crate::protocol::types::{BatchingOptions, BatchingStatus, Location};
use crate::protocol::{Indication, Request};
use crate::reconciler::{BatchChunk, BatchReadOutcome, BatchReconciler};

impl ClientCore {
    pub(super) fn start_batching(&mut self, options: BatchingOptions, callback: ResponseCallback) {
        if !self.batching.is_active() {
            self.trip_report.reset();
        }
        self.start_session(options, callback);
    }

    pub(super) fn on_batching_indication(&mut self, status: BatchingStatus, fixes: Vec<Location>) {
        if !self.batching.is_active() {
            self.drop_indication("batching");
            return;
        }
        match status {
            BatchingStatus::TripCompleted => {
                info!(fixes = fixes.len(), "Trip completed, stopping batching");
                self.listener.on_batch(&fixes, BatchingStatus::Done);
                self.stop_session::<BatchingOptions>(Box::new(|response| {
                    debug!(%response, "Batching stopped after trip completion");
                }));
            }
            status => self.listener.on_batch(&fixes, status),
        }
    }

    /// Reads up to `count` buffered fixes on a worker. Only one read runs at
    /// a time.
    pub(super) fn get_batched_locations(&mut self, count: usize, callback: ValueCallback<Vec<Location>>) {
        if !self.registered {
            callback(Err(LocationResponse::SystemNotReady));
            return;
        }
        if count == 0 {
            callback(Err(LocationResponse::InvalidParameter));
            return;
        }
        if self.batch_read_running {
            callback(Err(LocationResponse::AlreadyInProgress));
            return;
        }
        self.batch_read_running = true;
        debug!(count, "Reading batched locations");

        let requester = Arc::clone(&self.requester);
        let reconciler = BatchReconciler::new(self.config.batch_read_chunk);
        let read = async move {
            reconciler
                .read(count, |max_entries| {
                    let reply = requester.submit(Request::GetBatchedLocations {
                        max_entries: u32::try_from(max_entries).unwrap_or(u32::MAX),
                    });
                    async move {
                        let chunk = match reply.wait().await {
                            Ok(Indication::BatchedLocations {
                                fixes,
                                accumulated_distance_m,
                            }) => BatchChunk {
                                fixes,
                                accumulated_distance_m,
                            },
                            // bare status: nothing buffered
                            Ok(_) => BatchChunk::default(),
                            Err(err) => return Err(err),
                        };
                        Ok(chunk)
                    }
                })
                .await
        };
        self.spawn_then(read, move |core, outcome| core.finish_batch_read(outcome, callback));
    }

    fn finish_batch_read(
        &mut self,
        outcome: Result<BatchReadOutcome, RequestError>,
        callback: ValueCallback<Vec<Location>>,
    ) {
        self.batch_read_running = false;
        match outcome {
            Ok(outcome) => {
                let trip = self
                    .trip_report
                    .check(self.batching.desired_options(), outcome.accumulated_distance_m);
                if let Some(distance_m) = trip {
                    self.listener.on_trip_distance_completed(distance_m);
                }
                callback(Ok(outcome.fixes));
            }
            Err(err) => {
                debug!(error = %err, "Batched location read failed");
                callback(Err(err.response()));
            }
        }
    }
}
