//! Batched location read-back.
//!
//! The engine buffers fixes while batching. Reading them back takes several
//! round trips of bounded size. The engine may append a fresh fix while a
//! "read everything" is in progress, so every read asks for one slot more
//! than wanted. When that extra fix does arrive it is the newest one, but
//! depending on where the engine's ring buffer wrapped it can land in the
//! middle of the returned list; the reconciler moves it to the tail. This
//! holds whether or not the read came back full: a read asking for more
//! than is buffered still sees the fix race in between two chunks.

use std::future::Future;

use tracing::debug;

use crate::protocol::types::Location;

/// One round trip worth of buffered fixes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchChunk {
    pub fixes: Vec<Location>,
    /// Trip distance covered so far, when trip batching.
    pub accumulated_distance_m: Option<u32>,
}

/// Result of a full read.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchReadOutcome {
    /// Fixes in chronological order.
    pub fixes: Vec<Location>,
    /// Last trip distance reported by the engine during the read.
    pub accumulated_distance_m: Option<u32>,
}

/// Bookkeeping for one read.
#[derive(Debug)]
pub struct BatchReadState {
    total_requested: usize,
    scratch: Vec<Location>,
}

impl BatchReadState {
    /// Starts a read for `desired` fixes; one extra slot is always reserved.
    pub fn new(desired: usize) -> Self {
        Self {
            total_requested: desired + 1,
            scratch: Vec::with_capacity(desired + 1),
        }
    }

    pub fn total_requested(&self) -> usize {
        self.total_requested
    }

    pub fn received(&self) -> usize {
        self.scratch.len()
    }

    pub fn remaining(&self) -> usize {
        self.total_requested - self.scratch.len()
    }

    /// Appends a chunk, ignoring anything past the requested total.
    pub fn absorb(&mut self, mut fixes: Vec<Location>) {
        fixes.truncate(self.remaining());
        self.scratch.extend(fixes);
    }

    /// Returns the fixes in chronological order.
    pub fn finish(mut self) -> Vec<Location> {
        move_newest_to_tail(&mut self.scratch);
        self.scratch
    }
}

/// Moves the fix with the latest timestamp to the end of the list.
fn move_newest_to_tail(fixes: &mut Vec<Location>) {
    let newest = fixes
        .iter()
        .enumerate()
        .max_by_key(|(_, fix)| fix.timestamp_ms)
        .map(|(idx, _)| idx);

    if let Some(idx) = newest {
        if idx + 1 != fixes.len() {
            debug!(
                position = idx,
                len = fixes.len(),
                "Moving racing fix to the tail of the batch"
            );
            let fix = fixes.remove(idx);
            fixes.push(fix);
        }
    }
}

/// Reads buffered fixes in bounded chunks.
#[derive(Clone, Copy, Debug)]
pub struct BatchReconciler {
    max_chunk: usize,
}

impl BatchReconciler {
    pub fn new(max_chunk: usize) -> Self {
        Self {
            max_chunk: max_chunk.max(1),
        }
    }

    /// Reads up to `desired` fixes (plus the racing extra).
    ///
    /// `fetch(n)` performs one round trip asking for at most `n` fixes.
    /// Rounds stop once the total is reached or the engine returns nothing.
    pub async fn read<F, Fut, E>(&self, desired: usize, mut fetch: F) -> Result<BatchReadOutcome, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<BatchChunk, E>>,
    {
        let mut state = BatchReadState::new(desired);
        let mut accumulated_distance_m = None;

        while state.remaining() > 0 {
            let ask = state.remaining().min(self.max_chunk);
            let chunk = fetch(ask).await?;
            if chunk.accumulated_distance_m.is_some() {
                accumulated_distance_m = chunk.accumulated_distance_m;
            }
            if chunk.fixes.is_empty() {
                break;
            }
            state.absorb(chunk.fixes);
        }

        debug!(
            requested = state.total_requested(),
            received = state.received(),
            "Batch read finished"
        );
        Ok(BatchReadOutcome {
            fixes: state.finish(),
            accumulated_distance_m,
        })
    }
}
