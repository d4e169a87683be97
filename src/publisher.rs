//! Live statistics for observers.
//!
//! Each published quantity is a `watch` cell: sending never waits for
//! receivers, and a receiver created at any time starts from the current
//! value. Publication is serialized so every cell moves forward within an
//! era, and all values of one publication come from a single snapshot.

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::trace;

use crate::counters::{CounterSet, Outcome};

/// Signal fired whenever a blocked request is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatisticsUpdated;

pub struct Publisher {
    total: watch::Sender<u64>,
    blocked: watch::Sender<u64>,
    allowed: watch::Sender<u64>,
    redirected: watch::Sender<u64>,
    block_percentage: watch::Sender<f64>,
    counters: watch::Sender<CounterSet>,
    updates: broadcast::Sender<StatisticsUpdated>,
    publish_lock: Mutex<()>,
}

impl Publisher {
    pub fn new(initial: CounterSet, update_capacity: usize) -> Self {
        Self {
            total: watch::Sender::new(initial.total),
            blocked: watch::Sender::new(initial.blocked),
            allowed: watch::Sender::new(initial.allowed),
            redirected: watch::Sender::new(initial.redirected),
            block_percentage: watch::Sender::new(initial.block_percentage()),
            counters: watch::Sender::new(initial),
            updates: broadcast::channel(update_capacity.max(1)).0,
            publish_lock: Mutex::new(()),
        }
    }

    fn cell(&self, outcome: Outcome) -> &watch::Sender<u64> {
        match outcome {
            Outcome::Blocked => &self.blocked,
            Outcome::Allowed => &self.allowed,
            Outcome::Redirected => &self.redirected,
        }
    }

    /// Publish the effect of one recorded request.
    ///
    /// `read` is called under the publication lock so the published values
    /// are never older than ones already sent by another thread.
    pub fn publish<F>(&self, outcome: Outcome, read: F)
    where
        F: FnOnce() -> CounterSet,
    {
        let set = {
            let _publish = self.publish_lock.lock();
            let set = read();

            set_if_changed(&self.total, set.total);
            set_if_changed(self.cell(outcome), set.get(outcome));
            set_if_changed(&self.block_percentage, set.block_percentage());
            set_if_changed(&self.counters, set);
            set
        };

        trace!("Published {} request, total={}", outcome, set.total);

        if outcome == Outcome::Blocked {
            // No receivers is fine
            let _ = self.updates.send(StatisticsUpdated);
        }
    }

    /// Run `reset` and publish zero to every cell as one step.
    pub fn publish_reset<F>(&self, reset: F)
    where
        F: FnOnce(),
    {
        let _publish = self.publish_lock.lock();
        reset();

        self.total.send_replace(0);
        self.blocked.send_replace(0);
        self.allowed.send_replace(0);
        self.redirected.send_replace(0);
        self.block_percentage.send_replace(0.0);
        self.counters.send_replace(CounterSet::default());
    }

    pub fn subscribe_total(&self) -> watch::Receiver<u64> {
        replaying(&self.total)
    }

    pub fn subscribe_blocked(&self) -> watch::Receiver<u64> {
        replaying(&self.blocked)
    }

    pub fn subscribe_allowed(&self) -> watch::Receiver<u64> {
        replaying(&self.allowed)
    }

    pub fn subscribe_redirected(&self) -> watch::Receiver<u64> {
        replaying(&self.redirected)
    }

    pub fn subscribe_block_percentage(&self) -> watch::Receiver<f64> {
        replaying(&self.block_percentage)
    }

    pub fn subscribe_counters(&self) -> watch::Receiver<CounterSet> {
        replaying(&self.counters)
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<StatisticsUpdated> {
        self.updates.subscribe()
    }
}

/// A receiver whose first `changed()` resolves immediately with the current value.
fn replaying<T>(sender: &watch::Sender<T>) -> watch::Receiver<T> {
    let mut rx = sender.subscribe();
    rx.mark_changed();
    rx
}

fn set_if_changed<T: PartialEq>(sender: &watch::Sender<T>, value: T) {
    sender.send_if_modified(|current| {
        if *current == value {
            return false;
        }
        *current = value;
        true
    });
}
