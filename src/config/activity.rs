use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::activity::DEFAULT_CAPACITY;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Number of recent hosts retained
    pub capacity: usize,

    /// Default number of entries returned by a query
    pub display_limit: usize,

    /// Hosts waiting for classification before new ones are dropped
    pub queue_capacity: usize,

    /// How long shutdown waits for queued hosts to be classified
    #[serde(with = "humantime_serde")]
    pub drain_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            display_limit: 5,
            queue_capacity: 1024,
            drain_timeout: Duration::from_secs(2),
        }
    }
}
