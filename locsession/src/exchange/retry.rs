//! Busy-retry queue.
//!
//! Requests the engine answered with "busy" are captured verbatim and
//! replayed once, in arrival order, when the engine signals it resumed.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use super::requester::ResendEntry;

/// Maximum number of requests held for replay.
pub const RESEND_QUEUE_MAX_SIZE: usize = 128;

/// Outcome of [`BusyRetryQueue::capture`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capture {
    /// Queued, and the queue was empty before: the owner must subscribe to
    /// engine-state transitions.
    First,
    /// Queued behind earlier entries.
    Queued,
    /// Queue full; the entry will not be replayed.
    Dropped,
}

/// FIFO of requests waiting for the engine to resume.
#[derive(Debug, Default)]
pub struct BusyRetryQueue {
    queue: VecDeque<ResendEntry>,
}

impl BusyRetryQueue {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Appends a busy request.
    pub fn capture(&mut self, entry: ResendEntry) -> Capture {
        if self.queue.len() >= RESEND_QUEUE_MAX_SIZE {
            warn!(
                msg_id = %entry.message_id,
                max = RESEND_QUEUE_MAX_SIZE,
                "Resend queue full, dropping busy request"
            );
            return Capture::Dropped;
        }

        let first = self.queue.is_empty();
        debug!(
            msg_id = %entry.message_id,
            queue_size = self.queue.len() + 1,
            "Captured busy request for resend"
        );
        self.queue.push_back(entry);
        if first {
            Capture::First
        } else {
            Capture::Queued
        }
    }

    /// Takes every entry in FIFO order, leaving the queue empty.
    ///
    /// Each entry is handed out exactly once; the caller resends them
    /// without re-capturing, so a resume event is always a single pass.
    pub fn on_engine_resumed(&mut self) -> Vec<ResendEntry> {
        let count = self.queue.len();
        if count > 0 {
            info!(count, "Engine resumed, replaying busy requests");
        }
        self.queue.drain(..).collect()
    }

    /// Forgets every entry without replaying it. Returns how many there were.
    pub fn clear(&mut self) -> usize {
        let count = self.queue.len();
        self.queue.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageId;
    use bytes::Bytes;
    use proptest::prelude::*;

    fn entry(id: MessageId, tag: u8) -> ResendEntry {
        ResendEntry {
            message_id: id,
            payload: Bytes::from(vec![tag]),
        }
    }

    #[test]
    fn test_first_capture_is_flagged() {
        let mut queue = BusyRetryQueue::new();
        assert_eq!(
            queue.capture(entry(MessageId::StartTracking, 1)),
            Capture::First
        );
        assert_eq!(
            queue.capture(entry(MessageId::StartBatching, 2)),
            Capture::Queued
        );
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_resume_drains_in_fifo_order() {
        let mut queue = BusyRetryQueue::new();
        queue.capture(entry(MessageId::StartTracking, 1));
        queue.capture(entry(MessageId::AddGeofences, 2));
        queue.capture(entry(MessageId::StartTracking, 3));

        let tags: Vec<u8> = queue
            .on_engine_resumed()
            .into_iter()
            .map(|e| e.payload[0])
            .collect();
        assert_eq!(tags, vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_respects_max_size() {
        let mut queue = BusyRetryQueue::new();
        for i in 0..RESEND_QUEUE_MAX_SIZE {
            assert_ne!(
                queue.capture(entry(MessageId::PingTest, i as u8)),
                Capture::Dropped
            );
        }
        assert_eq!(
            queue.capture(entry(MessageId::PingTest, 0)),
            Capture::Dropped
        );
        assert_eq!(queue.len(), RESEND_QUEUE_MAX_SIZE);
    }

    #[test]
    fn test_clear_discards_entries() {
        let mut queue = BusyRetryQueue::new();
        queue.capture(entry(MessageId::PingTest, 1));
        queue.capture(entry(MessageId::StopTracking, 2));
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        assert!(queue.on_engine_resumed().is_empty());
    }

    #[test]
    fn test_first_flag_rearms_after_drain() {
        let mut queue = BusyRetryQueue::new();
        queue.capture(entry(MessageId::StartTracking, 1));
        queue.on_engine_resumed();
        assert_eq!(
            queue.capture(entry(MessageId::StartTracking, 2)),
            Capture::First
        );
    }

    proptest! {
        #[test]
        fn prop_each_entry_replayed_once_per_resume(
            rounds in prop::collection::vec(0usize..20, 1..6)
        ) {
            let mut queue = BusyRetryQueue::new();
            let mut tag = 0u8;
            for count in rounds {
                let mut expected = Vec::new();
                for _ in 0..count {
                    queue.capture(entry(MessageId::StartTracking, tag));
                    expected.push(tag);
                    tag = tag.wrapping_add(1);
                }
                let replayed: Vec<u8> = queue
                    .on_engine_resumed()
                    .into_iter()
                    .map(|e| e.payload[0])
                    .collect();
                prop_assert_eq!(replayed, expected);
                prop_assert!(queue.is_empty());
                prop_assert!(queue.on_engine_resumed().is_empty());
            }
        }
    }
}
