//! Jittered exponential backoff.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

/// Delay before retry `attempt`: the base doubles each attempt up to the
/// ceiling, then jitter spreads callers over the upper half of the window so
/// N workers racing for the same resource don't retry in lockstep.
///
/// Jitter is derived from a hash of `(seed, attempt)` rather than an RNG;
/// distinct workers hash to distinct offsets, which is all the thundering
/// herd needs broken.
pub fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64, seed: &str) -> Duration {
    let shift = attempt.min(16);
    let exp = base_ms
        .saturating_mul(1u64 << shift)
        .min(max_ms.max(base_ms));

    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    attempt.hash(&mut hasher);
    let jitter = hasher.finish() % (exp / 2 + 1);

    Duration::from_millis(exp / 2 + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let d0 = backoff_delay(0, 100, 1_000, "w1");
        let d3 = backoff_delay(3, 100, 1_000, "w1");
        let d10 = backoff_delay(10, 100, 1_000, "w1");

        assert!(d0.as_millis() >= 50 && d0.as_millis() <= 100);
        assert!(d3.as_millis() >= 400 && d3.as_millis() <= 800);
        // Capped at the ceiling regardless of attempt count.
        assert!(d10.as_millis() >= 500 && d10.as_millis() <= 1_000);
    }

    #[test]
    fn test_jitter_separates_workers() {
        let delays: Vec<u128> = (0..8)
            .map(|i| backoff_delay(2, 100, 10_000, &format!("worker-{}", i)).as_millis())
            .collect();
        let first = delays[0];
        assert!(
            delays.iter().any(|&d| d != first),
            "all workers backed off identically: {:?}",
            delays
        );
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let d = backoff_delay(u32::MAX, 100, 5_000, "w1");
        assert!(d.as_millis() <= 5_000);
    }
}
