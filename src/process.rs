//! Process identity tracking.
//!
//! A process is the checker's notion of a single sequential client. Ids are
//! issued from one shared counter and never reused. A worker keeps its id
//! across operations until an operation resolves indeterminately; from then
//! on the old id is retired and the worker continues under a fresh one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::history::EventKind;

/// Shared issuer of process ids.
#[derive(Debug, Clone, Default)]
pub struct ProcessIds {
    next: Arc<AtomicU64>,
}

impl ProcessIds {
    /// Create a tracker that issues ids starting at 0.
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Create a tracker that issues ids starting at `first`.
    pub fn starting_at(first: u64) -> Self {
        ProcessIds {
            next: Arc::new(AtomicU64::new(first)),
        }
    }

    /// Issue a fresh process id.
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// Keep `current` unless the last completion was `info`, in which case
    /// `current` is retired and a fresh id is issued.
    pub fn retain_or_advance(&self, current: u64, last: EventKind) -> u64 {
        match last {
            EventKind::Info => self.next(),
            _ => current,
        }
    }
}
