//! Time-bounded batch deduplication.
//!
//! A batch seen on the primary stream, the fallback stream and the gap
//! recovery poller within the retention window is forwarded once. Entries
//! expire through an explicit queue ordered by deadline rather than per-batch
//! timer tasks, so eviction can be inspected and driven by a [`ManualClock`]
//! in tests.
//!
//! Forgetting is deliberate: after the window a re-emitted batch (for example
//! after a reorg) is forwarded again, and the consumer is expected to check
//! the batch's `responded` state itself.

use parking_lot::Mutex;
use relay_types::{BatchEvent, BatchIdentifier};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// How long a seen batch suppresses duplicates.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(5 * 60);

/// Source of the current time for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Tokio's clock. Follows `tokio::time::pause` in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

#[derive(Default)]
struct SeenSet {
    deadlines: HashMap<BatchIdentifier, Instant>,
    /// Deadlines are `insert time + retention` with a monotonic clock, so this
    /// queue is already sorted.
    expiries: VecDeque<(Instant, BatchIdentifier)>,
}

impl SeenSet {
    fn evict_expired(&mut self, now: Instant) -> usize {
        let mut evicted = 0;
        while let Some(&(deadline, id)) = self.expiries.front() {
            if deadline > now {
                break;
            }
            self.expiries.pop_front();
            self.deadlines.remove(&id);
            evicted += 1;
        }
        evicted
    }
}

/// Decides whether a batch is novel within the retention window.
pub struct BatchDeduplicator {
    retention: Duration,
    clock: Arc<dyn Clock>,
    seen: Mutex<SeenSet>,
}

impl BatchDeduplicator {
    pub fn new(retention: Duration) -> Self {
        Self::with_clock(retention, Arc::new(SystemClock))
    }

    pub fn with_clock(retention: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            retention,
            clock,
            seen: Mutex::new(SeenSet::default()),
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Record `batch` and return whether it should be forwarded.
    ///
    /// `true` the first time an identifier is seen within the window, `false`
    /// for every repeat until the entry expires.
    pub fn observe(&self, batch: &BatchEvent) -> bool {
        let id = batch.identifier();
        let now = self.clock.now();
        let mut seen = self.seen.lock();
        seen.evict_expired(now);

        if seen.deadlines.contains_key(&id) {
            debug!(batch_identifier = %id, "dropping duplicate batch");
            return false;
        }

        info!(
            batch_merkle_root = %batch.merkle_root,
            sender_address = %batch.sender,
            batch_identifier = %id,
            "Received new task"
        );
        let deadline = now + self.retention;
        seen.deadlines.insert(id, deadline);
        seen.expiries.push_back((deadline, id));
        true
    }

    /// Drop every entry whose retention has elapsed. Returns how many went.
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        self.seen.lock().evict_expired(now)
    }

    pub fn contains(&self, id: &BatchIdentifier) -> bool {
        let now = self.clock.now();
        let mut seen = self.seen.lock();
        seen.evict_expired(now);
        seen.deadlines.contains_key(id)
    }

    /// Number of identifiers currently suppressed, including any that expired
    /// since the last eviction.
    pub fn len(&self) -> usize {
        self.seen.lock().deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deadline of the oldest entry.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.seen.lock().expiries.front().map(|(deadline, _)| *deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_types::{Address, BatchEventVersion, B256};

    fn batch(root: u8, sender: u8) -> BatchEvent {
        BatchEvent {
            version: BatchEventVersion::V3,
            merkle_root: B256::repeat_byte(root),
            sender: Address::repeat_byte(sender),
            task_created_block: 1,
            data_pointer: String::new(),
            respond_to_task_fee_limit: None,
            block_number: 1,
            log_index: 0,
        }
    }

    fn dedup() -> (ManualClock, BatchDeduplicator) {
        let clock = ManualClock::new();
        let d = BatchDeduplicator::with_clock(DEFAULT_RETENTION, Arc::new(clock.clone()));
        (clock, d)
    }

    #[test]
    fn test_same_batch_within_window_forwarded_once() {
        let (clock, d) = dedup();
        let live = batch(1, 2);
        let mut recovered = batch(1, 2);
        recovered.block_number = 500;

        assert!(d.observe(&live));
        clock.advance(Duration::from_secs(1));
        assert!(!d.observe(&recovered));
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn test_batch_forwarded_again_after_window() {
        let (clock, d) = dedup();
        let b = batch(1, 2);

        assert!(d.observe(&b));
        clock.advance(DEFAULT_RETENTION - Duration::from_millis(1));
        assert!(!d.observe(&b));
        clock.advance(Duration::from_millis(1));
        assert!(d.observe(&b));
    }

    #[test]
    fn test_distinct_batches_are_independent() {
        let (_clock, d) = dedup();
        assert!(d.observe(&batch(1, 2)));
        assert!(d.observe(&batch(1, 3)));
        assert!(d.observe(&batch(2, 2)));
        assert_eq!(d.len(), 3);
    }

    #[test]
    fn test_eviction_removes_each_entry_once_in_order() {
        let (clock, d) = dedup();
        let first = batch(1, 1);
        d.observe(&first);
        clock.advance(Duration::from_secs(60));
        let second = batch(2, 2);
        d.observe(&second);

        let first_deadline = clock.now() - Duration::from_secs(60) + DEFAULT_RETENTION;
        assert_eq!(d.next_expiry(), Some(first_deadline));

        clock.advance(DEFAULT_RETENTION - Duration::from_secs(60));
        assert_eq!(d.evict_expired(), 1);
        assert!(!d.contains(&first.identifier()));
        assert!(d.contains(&second.identifier()));
        assert_eq!(d.evict_expired(), 0);

        clock.advance(Duration::from_secs(60));
        assert_eq!(d.evict_expired(), 1);
        assert!(d.is_empty());
        assert_eq!(d.next_expiry(), None);
    }
}
