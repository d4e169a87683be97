use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Hosts files whose entries are blocked
    #[serde(default)]
    pub blocked_lists: Vec<PathBuf>,

    /// Hosts files whose entries are explicitly allowed
    #[serde(default)]
    pub allowed_lists: Vec<PathBuf>,

    /// Hosts files whose entries are redirected
    #[serde(default)]
    pub redirected_lists: Vec<PathBuf>,
}

impl Config {
    pub fn is_empty(&self) -> bool {
        self.blocked_lists.is_empty()
            && self.allowed_lists.is_empty()
            && self.redirected_lists.is_empty()
    }
}
