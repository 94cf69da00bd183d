// Two-lane envelope queue
//
// Priority lane always drains before the normal lane; FIFO within a lane.
// Enqueue fires the arrival notification exactly once per call, after the
// whole batch is inserted, so a burst of submissions cannot outrun the
// activation logic with redundant wakeups.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::envelope::Envelope;

#[derive(Default)]
struct Lanes {
    priority: VecDeque<Envelope>,
    normal: VecDeque<Envelope>,
}

/// Thread-safe FIFO collection of pending envelopes with two lanes
#[derive(Default)]
pub struct EnvelopeQueue {
    lanes: Mutex<Lanes>,
    arrival: Notify,
}

impl EnvelopeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of envelopes across both lanes
    pub fn len(&self) -> usize {
        let lanes = self.lanes.lock();
        lanes.priority.len() + lanes.normal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert one envelope and fire the arrival notification
    pub fn enqueue(&self, envelope: Envelope, priority: bool) {
        {
            let mut lanes = self.lanes.lock();
            let lane = if priority {
                &mut lanes.priority
            } else {
                &mut lanes.normal
            };
            lane.push_back(envelope);
        }
        self.arrival.notify_one();
    }

    /// Insert a batch of envelopes, firing the arrival notification once
    pub fn enqueue_many(&self, envelopes: impl IntoIterator<Item = Envelope>, priority: bool) {
        {
            let mut lanes = self.lanes.lock();
            let lane = if priority {
                &mut lanes.priority
            } else {
                &mut lanes.normal
            };
            lane.extend(envelopes);
        }
        self.arrival.notify_one();
    }

    /// Take the next envelope, preferring the priority lane; never blocks
    pub fn dequeue(&self) -> Option<Envelope> {
        let mut lanes = self.lanes.lock();
        lanes.priority.pop_front().or_else(|| lanes.normal.pop_front())
    }

    /// Wait for the next arrival notification
    ///
    /// Notifications coalesce: one stored permit is enough to observe any
    /// number of enqueues that happened while nobody was waiting.
    pub async fn arrival(&self) {
        self.arrival.notified().await;
    }
}
