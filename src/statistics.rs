use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::info;

use crate::{
    config::StatsConfig,
    counters::{CounterSet, Counters, Outcome},
    publisher::{Publisher, StatisticsUpdated},
    storage::{JsonFileStore, MemoryStore, StatsStore},
};

/// Request counters together with their live observers.
///
/// One instance per running service, shared through `Arc`.
pub struct Statistics {
    counters: Counters,
    publisher: Publisher,
}

impl Statistics {
    pub fn new(store: Arc<dyn StatsStore>, update_capacity: usize) -> Self {
        let counters = Counters::load(store);
        let publisher = Publisher::new(counters.snapshot(), update_capacity);

        Self {
            counters,
            publisher,
        }
    }

    pub fn from_config(config: &StatsConfig) -> Self {
        let store: Arc<dyn StatsStore> = match &config.state_file {
            Some(path) => {
                let store = JsonFileStore::new(path);
                info!("Persisting statistics to {}", store.path().display());
                Arc::new(store)
            }
            None => {
                info!("No state file configured, statistics are kept in memory");
                Arc::new(MemoryStore::new())
            }
        };

        Self::new(store, config.update_channel_capacity)
    }

    /// Count a request, persist, and notify observers. Returns `(total, specific)`.
    pub fn record(&self, outcome: Outcome) -> (u64, u64) {
        let counts = self.counters.record(outcome);
        self.publisher.publish(outcome, || self.counters.snapshot());
        counts
    }

    pub fn record_blocked(&self) -> (u64, u64) {
        self.record(Outcome::Blocked)
    }

    pub fn record_allowed(&self) -> (u64, u64) {
        self.record(Outcome::Allowed)
    }

    pub fn record_redirected(&self) -> (u64, u64) {
        self.record(Outcome::Redirected)
    }

    pub fn reset(&self) -> CounterSet {
        let mut zeroed = CounterSet::default();
        self.publisher.publish_reset(|| zeroed = self.counters.reset());
        info!("Statistics reset");
        zeroed
    }

    pub fn snapshot(&self) -> CounterSet {
        self.counters.snapshot()
    }

    pub fn block_percentage(&self) -> f64 {
        self.counters.block_percentage()
    }

    pub fn subscribe_total(&self) -> watch::Receiver<u64> {
        self.publisher.subscribe_total()
    }

    pub fn subscribe_blocked(&self) -> watch::Receiver<u64> {
        self.publisher.subscribe_blocked()
    }

    pub fn subscribe_allowed(&self) -> watch::Receiver<u64> {
        self.publisher.subscribe_allowed()
    }

    pub fn subscribe_redirected(&self) -> watch::Receiver<u64> {
        self.publisher.subscribe_redirected()
    }

    pub fn subscribe_block_percentage(&self) -> watch::Receiver<f64> {
        self.publisher.subscribe_block_percentage()
    }

    pub fn subscribe_counters(&self) -> watch::Receiver<CounterSet> {
        self.publisher.subscribe_counters()
    }

    /// Signal fired on every blocked request, for notification refreshers.
    pub fn subscribe_updates(&self) -> broadcast::Receiver<StatisticsUpdated> {
        self.publisher.subscribe_updates()
    }
}
