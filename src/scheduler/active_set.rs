use crate::timer::CountdownTimer;
use std::sync::Arc;
use std::time::Instant;

/// The running timers, ordered by descending remaining time so the one
/// closest to expiry sits at the tail.
///
/// The hot path, "is anything about to expire", is an O(1) look at the tail.
/// Insertion binary-searches for the slot: O(log n) comparisons plus an O(n)
/// shift in the contiguous storage. Removal by identity is a linear scan,
/// acceptable because removal is rare next to insert and expiry.
pub(crate) struct ActiveSet {
    entries: Vec<Arc<CountdownTimer>>,
}

impl ActiveSet {
    pub(crate) fn new() -> Self {
        ActiveSet {
            entries: Vec::new(),
        }
    }

    /// Inserts a timer at the slot matching its remaining time as of `now`.
    /// Ties may land at either bound.
    pub(crate) async fn insert(&mut self, timer: Arc<CountdownTimer>, now: Instant) {
        let key = timer.remaining_at(now).await;
        let mut lo = 0;
        let mut hi = self.entries.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.entries[mid].remaining_at(now).await > key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        self.entries.insert(lo, timer);
    }

    /// Removes the entry that is this exact timer (pointer identity). No-op
    /// when absent, so membership mutations stay idempotent.
    pub(crate) fn remove(&mut self, timer: &Arc<CountdownTimer>) -> bool {
        match self.entries.iter().position(|entry| Arc::ptr_eq(entry, timer)) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// The timer with the least remaining time, if any.
    pub(crate) fn peek_tail(&self) -> Option<&Arc<CountdownTimer>> {
        self.entries.last()
    }

    pub(crate) fn pop_tail(&mut self) -> Option<Arc<CountdownTimer>> {
        self.entries.pop()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    // A paused timer's remaining time is its frozen snapshot, so fresh timers
    // give the set deterministic keys without any clock arithmetic.
    fn timer(label: &str, secs: u64) -> Arc<CountdownTimer> {
        Arc::new(CountdownTimer::new(label, Duration::from_secs(secs)))
    }

    fn tail_order(set: &mut ActiveSet) -> Vec<String> {
        let mut labels = Vec::new();
        while let Some(timer) = set.pop_tail() {
            labels.push(timer.label().to_string());
        }
        labels
    }

    #[tokio::test]
    async fn least_remaining_sits_at_the_tail() {
        let now = Instant::now();
        let mut set = ActiveSet::new();
        for (label, secs) in [("mid", 5), ("long", 10), ("short", 1), ("medium", 7)] {
            set.insert(timer(label, secs), now).await;
        }
        assert_eq!(tail_order(&mut set), ["short", "mid", "medium", "long"]);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let now = Instant::now();
        let mut set = ActiveSet::new();
        let a = timer("a", 3);
        let b = timer("b", 6);
        set.insert(Arc::clone(&a), now).await;
        set.insert(Arc::clone(&b), now).await;

        assert!(set.remove(&a));
        assert!(!set.remove(&a));
        assert_eq!(set.len(), 1);

        // A timer never inserted is a no-op too
        let stranger = timer("stranger", 9);
        assert!(!set.remove(&stranger));
        assert_eq!(set.len(), 1);
    }

    #[tokio::test]
    async fn equal_remaining_times_are_accepted_at_either_bound() {
        let now = Instant::now();
        let mut set = ActiveSet::new();
        set.insert(timer("first", 4), now).await;
        set.insert(timer("second", 4), now).await;
        set.insert(timer("third", 4), now).await;
        assert_eq!(set.len(), 3);
        let tail = set.pop_tail().map(|t| t.label().to_string());
        assert!(tail.is_some());
    }
}
