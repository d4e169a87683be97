//! Recent activity: the last few classified hosts, newest first.
//!
//! The buffer is volatile and only meant for "what just happened" views.
//! It is independent of the counters and may be lost at any time.

use std::collections::VecDeque;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::counters::Outcome;

pub const DEFAULT_CAPACITY: usize = 50;

/// List membership of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListType {
    Blocked,
    Allowed,
    Redirected,
    /// Not present in any list
    Unknown,
}

impl From<Outcome> for ListType {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Blocked => Self::Blocked,
            Outcome::Allowed => Self::Allowed,
            Outcome::Redirected => Self::Redirected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    host: String,
    list_type: ListType,
}

impl LogEntry {
    pub fn new(host: impl Into<String>, list_type: ListType) -> Self {
        Self {
            host: host.into(),
            list_type,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn list_type(&self) -> ListType {
        self.list_type
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFilter {
    #[default]
    All,
    #[serde(rename = "blocked")]
    BlockedOnly,
    /// Allowed entries and hosts found in no list
    #[serde(rename = "allowed")]
    AllowedOnly,
}

impl LogFilter {
    pub fn matches(&self, entry: &LogEntry) -> bool {
        match self {
            Self::All => true,
            Self::BlockedOnly => entry.list_type == ListType::Blocked,
            Self::AllowedOnly => matches!(entry.list_type, ListType::Allowed | ListType::Unknown),
        }
    }
}

impl std::str::FromStr for LogFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" => Ok(Self::All),
            "blocked" => Ok(Self::BlockedOnly),
            "allowed" => Ok(Self::AllowedOnly),
            other => Err(format!("unknown filter {other:?}")),
        }
    }
}

#[derive(Debug)]
pub struct RecentActivity {
    entries: RwLock<VecDeque<LogEntry>>,
    capacity: usize,
}

impl Default for RecentActivity {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl RecentActivity {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity + 1)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert at the head, evicting from the tail past capacity.
    pub fn append(&self, host: impl Into<String>, list_type: ListType) {
        let entry = LogEntry::new(host, list_type);

        let mut entries = self.entries.write();
        entries.push_front(entry);
        while entries.len() > self.capacity {
            entries.pop_back();
        }
    }

    /// Up to `limit` matching entries, newest first.
    pub fn query(&self, filter: LogFilter, limit: usize) -> Vec<LogEntry> {
        self.entries
            .read()
            .iter()
            .filter(|entry| filter.matches(entry))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
