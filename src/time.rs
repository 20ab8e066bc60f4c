use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic ticks, counted from an arbitrary origin. Never wraps for any
/// process lifetime worth caring about at `tick_frequency()` ticks/sec.
pub type Tick = u64;

/// Injectable monotonic time source. Production uses the OS monotonic clock
/// (`Instant`); tests inject a `ManualClock` so window/reactivation math is
/// deterministic. Per spec §9 "Monotonic time" — never wall-clock.
pub trait Clock: Send + Sync {
    /// Current time, in ticks.
    fn now(&self) -> Tick;

    /// Ticks per second. `SlidingCounter::add_new` uses this to size its
    /// one-second coalescing bucket regardless of the clock's resolution.
    fn tick_frequency(&self) -> u64;

    fn duration_to_ticks(&self, d: Duration) -> u64 {
        (d.as_secs_f64() * self.tick_frequency() as f64).round() as u64
    }
}

/// Production clock: wraps `std::time::Instant`, scaled to nanosecond ticks.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

const NANOS_PER_SEC: u64 = 1_000_000_000;

impl Clock for SystemClock {
    fn now(&self) -> Tick {
        self.origin.elapsed().as_nanos() as u64
    }

    fn tick_frequency(&self) -> u64 {
        NANOS_PER_SEC
    }
}

/// Test clock: ticks only advance when explicitly told to. Shared via `Arc`
/// so a test can hold a handle while the component under test holds a
/// `Arc<dyn Clock>` pointing at the same counter.
pub struct ManualClock {
    ticks: AtomicU64,
    frequency: u64,
}

impl ManualClock {
    pub fn new(frequency: u64) -> Arc<Self> {
        Arc::new(Self {
            ticks: AtomicU64::new(0),
            frequency,
        })
    }

    pub fn advance(&self, d: Duration) {
        let delta = (d.as_secs_f64() * self.frequency as f64).round() as u64;
        self.ticks.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn set(&self, tick: Tick) {
        self.ticks.store(tick, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Tick {
        self.ticks.load(Ordering::SeqCst)
    }

    fn tick_frequency(&self) -> u64 {
        self.frequency
    }
}
