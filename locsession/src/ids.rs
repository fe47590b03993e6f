//! Id allocation for sessions and geofences.
//!
//! Ids are handed out from a fixed inclusive range. When the range is used
//! up the allocator fails closed: it returns [`IdError::Exhausted`] forever
//! rather than wrapping around and reusing an id that may still be live.
//!
//! Allocators are plain values owned by whoever needs them, so tests can
//! inject a tiny range to exercise exhaustion.

use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;

/// Id allocation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// Every id in the range has been handed out.
    #[error("{kind} id space exhausted")]
    Exhausted {
        /// What the allocator hands out ids for.
        kind: &'static str,
    },
}

/// Monotonic, thread-safe id allocator over an inclusive range.
#[derive(Debug)]
pub struct IdAllocator {
    kind: &'static str,
    next: AtomicU32,
    last: u32,
}

impl IdAllocator {
    /// Creates an allocator for `first..=last`.
    ///
    /// `first` must be non-zero: zero is reserved as the invalid id.
    pub fn new(kind: &'static str, first: u32, last: u32) -> Self {
        debug_assert!(first != 0, "id 0 is reserved");
        Self {
            kind,
            next: AtomicU32::new(first.max(1)),
            last,
        }
    }

    /// Creates an allocator covering every non-zero `u32`.
    pub fn full_range(kind: &'static str) -> Self {
        Self::new(kind, 1, u32::MAX)
    }

    /// Hands out the next id.
    pub fn allocate(&self) -> Result<u32, IdError> {
        let last = self.last;
        self.next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                // 0 marks exhaustion once u32::MAX has been handed out.
                if current > last || current == 0 {
                    None
                } else {
                    Some(current.checked_add(1).unwrap_or(0))
                }
            })
            .map_err(|_| IdError::Exhausted { kind: self.kind })
    }

    /// Allocates `count` ids. Ids taken before a failure are not returned to
    /// the range.
    pub fn allocate_many(&self, count: usize) -> Result<Vec<u32>, IdError> {
        (0..count).map(|_| self.allocate()).collect()
    }

    /// Number of ids still available.
    pub fn remaining(&self) -> u64 {
        let next = self.next.load(Ordering::Relaxed);
        if next == 0 || next > self.last {
            0
        } else {
            u64::from(self.last - next) + 1
        }
    }
}
