//! Host list lookups used to label recent activity.

use std::{collections::HashSet, fs, net::IpAddr, path::Path};

use tracing::{debug, info};

use crate::{activity::ListType, config::ClassifierConfig, errors::ClassifyError};

/// Looks up which list, if any, a host belongs to. May be slow.
pub trait HostClassifier: Send + Sync {
    fn classify(&self, host: &str) -> Result<ListType, ClassifyError>;
}

/// Classify `host`, treating any lookup failure as "in no list".
pub fn classify_or_unknown(classifier: &dyn HostClassifier, host: &str) -> ListType {
    match classifier.classify(host) {
        Ok(list_type) => list_type,
        Err(e) => {
            debug!("Classification of {} failed, using unknown: {}", host, e);
            ListType::Unknown
        }
    }
}

/// In-memory host lists. Allowed entries win over redirected, redirected over blocked.
#[derive(Debug, Default)]
pub struct HostListClassifier {
    blocked: HashSet<String>,
    allowed: HashSet<String>,
    redirected: HashSet<String>,
}

impl HostListClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ClassifierConfig) -> Result<Self, ClassifyError> {
        let mut classifier = Self::new();

        for path in &config.blocked_lists {
            classifier.load_file(path, ListType::Blocked)?;
        }
        for path in &config.allowed_lists {
            classifier.load_file(path, ListType::Allowed)?;
        }
        for path in &config.redirected_lists {
            classifier.load_file(path, ListType::Redirected)?;
        }

        info!(
            "Host lists loaded: {} blocked, {} allowed, {} redirected",
            classifier.blocked.len(),
            classifier.allowed.len(),
            classifier.redirected.len()
        );

        Ok(classifier)
    }

    pub fn insert(&mut self, host: &str, list_type: ListType) {
        let Some(host) = normalize(host) else {
            return;
        };

        match list_type {
            ListType::Blocked => self.blocked.insert(host),
            ListType::Allowed => self.allowed.insert(host),
            ListType::Redirected => self.redirected.insert(host),
            ListType::Unknown => false,
        };
    }

    pub fn with_host(mut self, host: &str, list_type: ListType) -> Self {
        self.insert(host, list_type);
        self
    }

    /// Load a hosts-style file: one host per line, optionally preceded by an
    /// address column, `#` starting a comment.
    pub fn load_file(&mut self, path: &Path, list_type: ListType) -> Result<usize, ClassifyError> {
        let content = fs::read_to_string(path).map_err(|source| ClassifyError::ListLoad {
            path: path.to_path_buf(),
            source,
        })?;

        let mut loaded = 0;
        for line in content.lines() {
            if let Some(host) = parse_hosts_line(line) {
                self.insert(host, list_type);
                loaded += 1;
            }
        }

        debug!("Loaded {} {:?} hosts from {}", loaded, list_type, path.display());
        Ok(loaded)
    }
}

impl HostClassifier for HostListClassifier {
    fn classify(&self, host: &str) -> Result<ListType, ClassifyError> {
        let host = normalize(host).ok_or_else(|| ClassifyError::InvalidHost(host.to_string()))?;

        if self.allowed.contains(&host) {
            Ok(ListType::Allowed)
        } else if self.redirected.contains(&host) {
            Ok(ListType::Redirected)
        } else if self.blocked.contains(&host) {
            Ok(ListType::Blocked)
        } else {
            Ok(ListType::Unknown)
        }
    }
}

fn parse_hosts_line(line: &str) -> Option<&str> {
    let line = line.split('#').next().unwrap_or_default();
    let mut fields = line.split_whitespace();
    let first = fields.next()?;

    if first.parse::<IpAddr>().is_ok() {
        fields.next()
    } else {
        Some(first)
    }
}

fn normalize(host: &str) -> Option<String> {
    let host = host.trim().trim_end_matches('.');
    if host.is_empty() {
        return None;
    }
    Some(host.to_ascii_lowercase())
}
