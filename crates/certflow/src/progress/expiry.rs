use crate::progress::SessionId;
use core::cmp::Reverse;
use parking_lot::Mutex;
use std::collections::BinaryHeap;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum ExpiryKind {
    /// Check whether the session has been quiet for its full timeout.
    Timeout,
    /// Drop a terminal session from the registry.
    Evict,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Expiry {
    pub at: Instant,
    pub id: SessionId,
    pub kind: ExpiryKind,
}

/// Min-heap of pending deadlines, shared by every session of a tracker.
///
/// Entries are never removed early: a stale entry (session gone, re-armed,
/// or already terminal) is recognized and skipped when it comes due.
#[derive(Debug, Default)]
pub(crate) struct ExpiryQueue {
    heap: Mutex<BinaryHeap<Reverse<Expiry>>>,
    wake: Notify,
}

impl ExpiryQueue {
    pub fn schedule(&self, at: Instant, id: SessionId, kind: ExpiryKind) {
        let earliest = {
            let mut heap = self.heap.lock();
            let earliest = heap.peek().is_none_or(|Reverse(top)| at < top.at);
            heap.push(Reverse(Expiry { at, id, kind }));
            earliest
        };
        if earliest {
            self.wake.notify_one();
        }
    }

    /// Pops the earliest entry if it is due at `now`.
    pub fn pop_due(&self, now: Instant) -> Option<Expiry> {
        let mut heap = self.heap.lock();
        match heap.peek() {
            Some(Reverse(top)) if top.at <= now => heap.pop().map(|Reverse(e)| e),
            _ => None,
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.lock().peek().map(|Reverse(top)| top.at)
    }

    /// Resolves once an entry earlier than every previous one was scheduled.
    pub async fn changed(&self) {
        self.wake.notified().await;
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }
}
