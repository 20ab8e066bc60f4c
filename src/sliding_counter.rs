use crate::time::{Clock, Tick};
use std::collections::VecDeque;
use std::time::Duration;

/// A sealed one-second bucket of observations. Per spec §3, the queue is
/// strictly ordered by `recorded_at` and every record still enqueued
/// satisfies `now - recorded_at <= detection_window`.
#[derive(Debug, Clone, Copy)]
struct HistoryRecord {
    recorded_at: Tick,
    total: u32,
    failed: u32,
}

/// Per-destination windowed failed/total request counters (spec §3, §4.2).
/// Mutated under the owning `Destination`'s exclusive lock — see
/// `Destination::sliding` — so `add_new` itself does no locking.
pub struct SlidingCounter {
    records: VecDeque<HistoryRecord>,
    aggregate_total: u64,
    aggregate_failed: u64,
    accumulating_created_at: Option<Tick>,
    accumulating_total: u32,
    accumulating_failed: u32,
}

impl SlidingCounter {
    pub fn new() -> Self {
        Self {
            records: VecDeque::new(),
            aggregate_total: 0,
            aggregate_failed: 0,
            accumulating_created_at: None,
            accumulating_total: 0,
            accumulating_failed: 0,
        }
    }

    /// Current windowed failure rate without recording a new observation —
    /// used by tests and by callers that want to inspect the window between
    /// requests.
    pub fn aggregate_total(&self) -> u64 {
        self.aggregate_total
    }

    pub fn aggregate_failed(&self) -> u64 {
        self.aggregate_failed
    }

    /// Record one observation and return the resulting windowed failure
    /// rate. Implements spec §4.2's six numbered steps exactly.
    pub fn add_new(
        &mut self,
        clock: &dyn Clock,
        failed: bool,
        detection_window: Duration,
        minimal_total_count_threshold: u32,
    ) -> f64 {
        let now = clock.now();
        let freq = clock.tick_frequency();

        // Step 2: first-ever call seeds the accumulating bucket's boundary.
        let created_at = *self.accumulating_created_at.get_or_insert(now + freq);

        // Step 3: seal the accumulating bucket once its second has elapsed.
        if now >= created_at {
            self.records.push_back(HistoryRecord {
                recorded_at: created_at,
                total: self.accumulating_total,
                failed: self.accumulating_failed,
            });
            self.accumulating_total = 0;
            self.accumulating_failed = 0;
            self.accumulating_created_at = Some(now + freq);
        }

        // Step 4: fold the new observation into the accumulating bucket and
        // the running aggregate.
        self.accumulating_total += 1;
        self.aggregate_total += 1;
        if failed {
            self.accumulating_failed += 1;
            self.aggregate_failed += 1;
        }

        // Step 5: evict records that have aged out of the window.
        let window_ticks = clock.duration_to_ticks(detection_window);
        while let Some(front) = self.records.front() {
            if now.saturating_sub(front.recorded_at) > window_ticks {
                let evicted = self.records.pop_front().unwrap();
                self.aggregate_total -= evicted.total as u64;
                self.aggregate_failed -= evicted.failed as u64;
            } else {
                break;
            }
        }

        // Step 6: insufficient evidence reports as a clean bill of health.
        if self.aggregate_total == 0 || self.aggregate_total < minimal_total_count_threshold as u64
        {
            return 0.0;
        }

        self.aggregate_failed as f64 / self.aggregate_total as f64
    }

    #[cfg(test)]
    fn check_invariants(&self) {
        let mut sum_total: u64 = self.accumulating_total as u64;
        let mut sum_failed: u64 = self.accumulating_failed as u64;
        let mut prev_recorded_at: Option<Tick> = None;
        for r in &self.records {
            if let Some(prev) = prev_recorded_at {
                assert!(r.recorded_at >= prev, "records must be ordered");
            }
            prev_recorded_at = Some(r.recorded_at);
            sum_total += r.total as u64;
            sum_failed += r.failed as u64;
            assert!(r.failed <= r.total);
        }
        assert_eq!(sum_total, self.aggregate_total);
        assert_eq!(sum_failed, self.aggregate_failed);
        assert!(self.aggregate_failed <= self.aggregate_total);
    }
}

impl Default for SlidingCounter {
    fn default() -> Self {
        Self::new()
    }
}
