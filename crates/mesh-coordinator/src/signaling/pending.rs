//! Signals received for a remote that has no peer link yet.

use super::message::SignalMessage;
use common::types::ParticipantId;
use std::collections::{HashMap, VecDeque};

/// Result of [`PendingSignalQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// Buffered.
    Queued,
    /// Buffered, oldest entry for this remote dropped to stay under the limit.
    QueuedDroppedOldest,
}

/// Per-remote FIFO of early signals.
#[derive(Debug)]
pub struct PendingSignalQueue {
    limit: usize,
    queues: HashMap<ParticipantId, VecDeque<SignalMessage>>,
}

impl PendingSignalQueue {
    /// Create a queue holding at most `limit` signals per remote (minimum 1).
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            queues: HashMap::new(),
        }
    }

    pub fn enqueue(&mut self, remote: ParticipantId, signal: SignalMessage) -> Enqueued {
        let queue = self.queues.entry(remote).or_default();

        let mut outcome = Enqueued::Queued;
        if queue.len() >= self.limit {
            queue.pop_front();
            outcome = Enqueued::QueuedDroppedOldest;
        }

        queue.push_back(signal);
        outcome
    }

    /// Remove and return everything buffered for `remote`, in receipt order.
    pub fn drain(&mut self, remote: &ParticipantId) -> Vec<SignalMessage> {
        self.queues
            .remove(remote)
            .map(Vec::from)
            .unwrap_or_default()
    }

    /// Discard everything buffered for `remote`. Returns how many were dropped.
    pub fn clear(&mut self, remote: &ParticipantId) -> usize {
        self.queues.remove(remote).map_or(0, |q| q.len())
    }

    /// Discard everything.
    pub fn clear_all(&mut self) {
        self.queues.clear();
    }

    #[must_use]
    pub fn len_for(&self, remote: &ParticipantId) -> usize {
        self.queues.get(remote).map_or(0, VecDeque::len)
    }

    #[must_use]
    pub fn total_len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }
}
