use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

/// A per-request random source, matching spec §4.1's tie-break note and the
/// "Random source indirection" design note in §9: a process-wide **factory**
/// that yields a fresh RNG **instance per call**, so tests can inject
/// deterministic sequences without touching global/thread-local RNG state.
pub trait RngFactory: Send + Sync {
    fn create(&self) -> Box<dyn RandomPick>;
}

/// The narrow surface the Forwarder actually needs: pick a uniform index in
/// `[0, len)`. Kept minimal rather than exposing a full `rand::Rng` so test
/// doubles don't need to implement dozens of trait methods.
pub trait RandomPick {
    fn pick_index(&mut self, len: usize) -> usize;
}

/// Default factory: each `create()` call wraps a fresh, securely-seeded
/// `StdRng`. Mirrors `upstream::loadbalance::random::RandomBalancer`'s use of
/// `rand::thread_rng()`, but avoids the thread-local entirely so the factory
/// itself stays `Send + Sync` and swappable.
pub struct ThreadRngFactory;

impl RngFactory for ThreadRngFactory {
    fn create(&self) -> Box<dyn RandomPick> {
        Box::new(StdRngPick(StdRng::from_entropy()))
    }
}

struct StdRngPick(StdRng);

impl RandomPick for StdRngPick {
    fn pick_index(&mut self, len: usize) -> usize {
        self.0.gen_range(0..len)
    }
}

/// Deterministic factory for tests (S3 in spec §8): always returns the same
/// scripted sequence of indices, one per `create()`'s worth of picks.
pub struct ScriptedRngFactory {
    sequence: Mutex<Vec<usize>>,
}

impl ScriptedRngFactory {
    pub fn new(sequence: Vec<usize>) -> Self {
        Self {
            sequence: Mutex::new(sequence),
        }
    }
}

impl RngFactory for ScriptedRngFactory {
    fn create(&self) -> Box<dyn RandomPick> {
        let mut seq = self.sequence.lock().unwrap();
        let next = if seq.is_empty() { 0 } else { seq.remove(0) };
        Box::new(FixedPick(next))
    }
}

struct FixedPick(usize);

impl RandomPick for FixedPick {
    fn pick_index(&mut self, len: usize) -> usize {
        if len == 0 {
            0
        } else {
            self.0 % len
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_factory_replays_sequence() {
        let factory = ScriptedRngFactory::new(vec![1, 0, 2]);
        assert_eq!(factory.create().pick_index(3), 1);
        assert_eq!(factory.create().pick_index(3), 0);
        assert_eq!(factory.create().pick_index(3), 2);
    }

    #[test]
    fn thread_rng_factory_stays_in_bounds() {
        let factory = ThreadRngFactory;
        for _ in 0..1000 {
            let idx = factory.create().pick_index(5);
            assert!(idx < 5);
        }
    }
}
