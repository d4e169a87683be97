//! Durable request counters.
//!
//! The four counters are independent atomics. A shared "era" lock is held
//! while `total` and the specific counter are bumped, so readers that take the
//! exclusive side (`snapshot`, `reset`) never see one without the other, and a
//! record racing a reset lands entirely before or entirely after it.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::storage::{
    StatsStore, KEY_ALLOWED_REQUESTS, KEY_BLOCKED_REQUESTS, KEY_REDIRECTED_REQUESTS,
    KEY_TOTAL_REQUESTS,
};

/// Result of classifying a single DNS request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Blocked,
    Allowed,
    Redirected,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blocked => write!(f, "blocked"),
            Self::Allowed => write!(f, "allowed"),
            Self::Redirected => write!(f, "redirected"),
        }
    }
}

impl std::str::FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "blocked" => Ok(Self::Blocked),
            "allowed" => Ok(Self::Allowed),
            "redirected" => Ok(Self::Redirected),
            other => Err(format!("unknown outcome {other:?}")),
        }
    }
}

/// Point-in-time copy of the request counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSet {
    pub total: u64,
    pub blocked: u64,
    pub allowed: u64,
    pub redirected: u64,
}

impl CounterSet {
    /// Percentage of requests that were blocked, `0.0` before any request.
    pub fn block_percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.blocked as f64 * 100.0 / self.total as f64
    }

    pub fn get(&self, outcome: Outcome) -> u64 {
        match outcome {
            Outcome::Blocked => self.blocked,
            Outcome::Allowed => self.allowed,
            Outcome::Redirected => self.redirected,
        }
    }

    fn entries(&self) -> [(&'static str, u64); 4] {
        [
            (KEY_TOTAL_REQUESTS, self.total),
            (KEY_BLOCKED_REQUESTS, self.blocked),
            (KEY_ALLOWED_REQUESTS, self.allowed),
            (KEY_REDIRECTED_REQUESTS, self.redirected),
        ]
    }
}

pub struct Counters {
    total: AtomicU64,
    blocked: AtomicU64,
    allowed: AtomicU64,
    redirected: AtomicU64,
    /// Shared by recorders, exclusive for snapshot and reset
    era: RwLock<()>,
    /// Held by the one thread currently writing to the store
    persist_lock: Mutex<()>,
    /// Set by every mutation, cleared by the writer before it snapshots
    dirty: AtomicBool,
    store: Arc<dyn StatsStore>,
}

impl Counters {
    /// Load persisted counters. Unreadable keys count as zero.
    pub fn load(store: Arc<dyn StatsStore>) -> Self {
        let read = |key: &str| match store.get(key) {
            Ok(value) => value.unwrap_or(0),
            Err(e) => {
                warn!("Failed to read {}, starting from zero: {}", key, e);
                0
            }
        };

        let mut set = CounterSet {
            total: read(KEY_TOTAL_REQUESTS),
            blocked: read(KEY_BLOCKED_REQUESTS),
            allowed: read(KEY_ALLOWED_REQUESTS),
            redirected: read(KEY_REDIRECTED_REQUESTS),
        };

        let categorized = set
            .blocked
            .saturating_add(set.allowed)
            .saturating_add(set.redirected);
        if categorized > set.total {
            warn!(
                "Persisted total {} is below categorized requests {}, repairing",
                set.total, categorized
            );
            set.total = categorized;
        }

        info!(
            "Loaded statistics: total={} blocked={} allowed={} redirected={}",
            set.total, set.blocked, set.allowed, set.redirected
        );

        Self {
            total: AtomicU64::new(set.total),
            blocked: AtomicU64::new(set.blocked),
            allowed: AtomicU64::new(set.allowed),
            redirected: AtomicU64::new(set.redirected),
            era: RwLock::new(()),
            persist_lock: Mutex::new(()),
            dirty: AtomicBool::new(false),
            store,
        }
    }

    fn cell(&self, outcome: Outcome) -> &AtomicU64 {
        match outcome {
            Outcome::Blocked => &self.blocked,
            Outcome::Allowed => &self.allowed,
            Outcome::Redirected => &self.redirected,
        }
    }

    /// Count one request and persist. Returns the new `(total, specific)` pair.
    pub fn record(&self, outcome: Outcome) -> (u64, u64) {
        let counts = {
            let _era = self.era.read();
            // total first, so a concurrent persist never stores specific > total
            let total = increment(&self.total);
            let specific = increment(self.cell(outcome));
            (total, specific)
        };

        self.persist();
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

    /// Zero every counter and persist.
    pub fn reset(&self) -> CounterSet {
        {
            let _era = self.era.write();
            self.total.store(0, Ordering::Release);
            self.blocked.store(0, Ordering::Release);
            self.allowed.store(0, Ordering::Release);
            self.redirected.store(0, Ordering::Release);
        }

        debug!("Statistics reset");
        self.persist();
        CounterSet::default()
    }

    /// Consistent copy of all counters. Never touches storage.
    pub fn snapshot(&self) -> CounterSet {
        let _era = self.era.write();
        self.load_unlocked()
    }

    pub fn block_percentage(&self) -> f64 {
        self.snapshot().block_percentage()
    }

    fn load_unlocked(&self) -> CounterSet {
        CounterSet {
            total: self.total.load(Ordering::Acquire),
            blocked: self.blocked.load(Ordering::Acquire),
            allowed: self.allowed.load(Ordering::Acquire),
            redirected: self.redirected.load(Ordering::Acquire),
        }
    }

    /// Write the current counters unless another thread is already writing.
    ///
    /// A caller that finds a write in flight only marks the state dirty and
    /// returns. The writer keeps writing fresh snapshots until nothing is
    /// dirty, so the last write to land always carries the newest values.
    fn persist(&self) {
        self.dirty.store(true, Ordering::Release);

        loop {
            let Some(guard) = self.persist_lock.try_lock() else {
                return;
            };

            while self.dirty.swap(false, Ordering::AcqRel) {
                let set = self.snapshot();
                if let Err(e) = self.store.put_all(&set.entries()) {
                    warn!("Failed to persist statistics: {}", e);
                }
            }

            drop(guard);
            // a mutation may have landed between the last swap and the unlock
            if !self.dirty.load(Ordering::Acquire) {
                return;
            }
        }
    }
}

fn increment(cell: &AtomicU64) -> u64 {
    let previous = cell
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
            Some(v.saturating_add(1))
        })
        .unwrap_or_else(|v| v);
    previous.saturating_add(1)
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{atomic::AtomicUsize, mpsc},
        thread,
    };

    use super::*;
    use crate::{
        errors::StorageError,
        storage::{JsonFileStore, MemoryStore},
    };
    use tempfile::tempdir;

    /// Store whose first write blocks until released.
    struct GatedStore {
        inner: MemoryStore,
        gate: Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
        writes: AtomicUsize,
    }

    impl StatsStore for GatedStore {
        fn get(&self, key: &str) -> Result<Option<u64>, StorageError> {
            self.inner.get(key)
        }

        fn put_all(&self, entries: &[(&str, u64)]) -> Result<(), StorageError> {
            let gate = self.gate.lock().take();
            if let Some((entered, release)) = gate {
                entered.send(()).unwrap();
                release.recv().unwrap();
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.put_all(entries)
        }
    }

    fn memory_counters() -> (Counters, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (Counters::load(store.clone()), store)
    }

    #[test]
    fn test_fresh_store_scenario() {
        let (counters, _) = memory_counters();

        counters.record_blocked();
        counters.record_blocked();
        counters.record_blocked();
        counters.record_allowed();

        let snapshot = counters.snapshot();
        assert_eq!(
            snapshot,
            CounterSet {
                total: 4,
                blocked: 3,
                allowed: 1,
                redirected: 0,
            }
        );
        assert_eq!(snapshot.block_percentage(), 75.0);
    }

    #[test]
    fn test_record_returns_new_pair() {
        let (counters, _) = memory_counters();

        assert_eq!(counters.record_redirected(), (1, 1));
        assert_eq!(counters.record_allowed(), (2, 1));
        assert_eq!(counters.record_redirected(), (3, 2));
    }

    #[test]
    fn test_block_percentage() {
        assert_eq!(CounterSet::default().block_percentage(), 0.0);

        let set = CounterSet {
            total: 3,
            blocked: 1,
            allowed: 2,
            redirected: 0,
        };
        assert!((set.block_percentage() - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_reset_then_snapshot() {
        let (counters, store) = memory_counters();
        counters.record_blocked();
        counters.record_redirected();

        assert_eq!(counters.reset(), CounterSet::default());
        assert_eq!(counters.snapshot(), CounterSet::default());
        assert_eq!(counters.block_percentage(), 0.0);
        assert_eq!(store.get(KEY_TOTAL_REQUESTS).unwrap(), Some(0));
    }

    #[test]
    fn test_concurrent_records_are_not_lost() {
        let (counters, store) = memory_counters();
        let counters = Arc::new(counters);
        let threads = 8;
        let per_thread = 500;

        let handles: Vec<_> = (0..threads)
            .map(|i| {
                let counters = Arc::clone(&counters);
                thread::spawn(move || {
                    for j in 0..per_thread {
                        match (i + j) % 3 {
                            0 => counters.record_blocked(),
                            1 => counters.record_allowed(),
                            _ => counters.record_redirected(),
                        };
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let n = (threads * per_thread) as u64;
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.total, n);
        assert_eq!(snapshot.blocked + snapshot.allowed + snapshot.redirected, n);

        // last persisted state matches memory
        assert_eq!(store.get(KEY_TOTAL_REQUESTS).unwrap(), Some(n));
    }

    #[test]
    fn test_snapshot_invariant_under_concurrency() {
        let (counters, _) = memory_counters();
        let counters = Arc::new(counters);

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let counters = Arc::clone(&counters);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        counters.record_blocked();
                    }
                })
            })
            .collect();

        let reader = {
            let counters = Arc::clone(&counters);
            thread::spawn(move || {
                for _ in 0..1000 {
                    let s = counters.snapshot();
                    assert_eq!(s.blocked + s.allowed + s.redirected, s.total);
                    assert!(s.block_percentage() <= 100.0);
                }
            })
        };

        let resetter = {
            let counters = Arc::clone(&counters);
            thread::spawn(move || {
                for _ in 0..20 {
                    counters.reset();
                    thread::yield_now();
                }
            })
        };

        for handle in writers {
            handle.join().unwrap();
        }
        reader.join().unwrap();
        resetter.join().unwrap();

        let s = counters.snapshot();
        assert_eq!(s.total, s.blocked);
    }

    #[test]
    fn test_round_trip_through_file_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.json");

        let counters = Counters::load(Arc::new(JsonFileStore::new(&path)));
        counters.record_blocked();
        counters.record_allowed();
        counters.record_redirected();
        counters.record_blocked();
        let before = counters.snapshot();
        drop(counters);

        let reloaded = Counters::load(Arc::new(JsonFileStore::new(&path)));
        assert_eq!(reloaded.snapshot(), before);
    }

    #[test]
    fn test_partial_store_defaults_to_zero() {
        let store = Arc::new(MemoryStore::new());
        store.insert(KEY_TOTAL_REQUESTS, 10);
        store.insert(KEY_BLOCKED_REQUESTS, 4);

        let counters = Counters::load(store);
        assert_eq!(
            counters.snapshot(),
            CounterSet {
                total: 10,
                blocked: 4,
                allowed: 0,
                redirected: 0,
            }
        );
    }

    #[test]
    fn test_inconsistent_store_is_repaired() {
        let store = Arc::new(MemoryStore::new());
        store.insert(KEY_TOTAL_REQUESTS, 1);
        store.insert(KEY_BLOCKED_REQUESTS, 2);
        store.insert(KEY_ALLOWED_REQUESTS, 3);

        let counters = Counters::load(store);
        assert_eq!(counters.snapshot().total, 5);
    }

    #[test]
    fn test_corrupt_file_starts_from_zero() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.json");
        std::fs::write(&path, "garbage").unwrap();

        let counters = Counters::load(Arc::new(JsonFileStore::new(&path)));
        assert_eq!(counters.snapshot(), CounterSet::default());

        // next write heals the file
        counters.record_blocked();
        let reloaded = Counters::load(Arc::new(JsonFileStore::new(&path)));
        assert_eq!(reloaded.snapshot().blocked, 1);
    }

    #[test]
    fn test_write_failure_keeps_memory_authoritative() {
        let (counters, store) = memory_counters();
        counters.record_blocked();

        store.set_fail_writes(true);
        counters.record_blocked();
        assert_eq!(counters.snapshot().blocked, 2);
        assert_eq!(store.get(KEY_BLOCKED_REQUESTS).unwrap(), Some(1));

        store.set_fail_writes(false);
        counters.record_allowed();
        assert_eq!(store.get(KEY_BLOCKED_REQUESTS).unwrap(), Some(2));
        assert_eq!(store.get(KEY_TOTAL_REQUESTS).unwrap(), Some(3));
    }

    #[test]
    fn test_records_do_not_wait_for_inflight_write() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let store = Arc::new(GatedStore {
            inner: MemoryStore::new(),
            gate: Mutex::new(Some((entered_tx, release_rx))),
            writes: AtomicUsize::new(0),
        });
        let counters = Arc::new(Counters::load(store.clone()));

        let writer = {
            let counters = Arc::clone(&counters);
            thread::spawn(move || counters.record_blocked())
        };
        entered_rx.recv().unwrap();

        // the first write is stuck, other categories still count
        for _ in 0..100 {
            counters.record_allowed();
        }
        assert_eq!(counters.snapshot().total, 101);
        assert_eq!(store.writes.load(Ordering::SeqCst), 0);

        release_tx.send(()).unwrap();
        assert_eq!(writer.join().unwrap(), (1, 1));

        // the pending changes were folded into a single follow-up write
        assert_eq!(store.writes.load(Ordering::SeqCst), 2);
        assert_eq!(store.get(KEY_TOTAL_REQUESTS).unwrap(), Some(101));
        assert_eq!(store.get(KEY_ALLOWED_REQUESTS).unwrap(), Some(100));
        assert_eq!(store.get(KEY_BLOCKED_REQUESTS).unwrap(), Some(1));
    }

    #[test]
    fn test_outcome_parsing() {
        assert_eq!("Blocked".parse::<Outcome>().unwrap(), Outcome::Blocked);
        assert_eq!("redirected".parse::<Outcome>().unwrap(), Outcome::Redirected);
        assert!("dropped".parse::<Outcome>().is_err());
    }
}
