use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// File holding the persisted counters. Counters stay in memory when unset.
    pub state_file: Option<PathBuf>,

    /// Buffered "statistics updated" signals kept for slow receivers
    pub update_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_file: Some(PathBuf::from("data/vpn_statistics.json")),
            update_channel_capacity: 16,
        }
    }
}
