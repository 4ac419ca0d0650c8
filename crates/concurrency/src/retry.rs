//! Retry backoff
//!
//! Conflicting transactions back off with jittered exponential delays so
//! repeated losers do not re-collide in lockstep. The delay for attempt `n`
//! is drawn uniformly from the upper half of `initial * 2^n`, capped at
//! `max`.

use rand::Rng;
use std::time::Duration;

/// Delay before re-entering after the `attempt`-th failed attempt
/// (zero-based)
pub fn backoff_delay(attempt: u32, initial_ms: u64, max_ms: u64) -> Duration {
    let ceiling = initial_ms
        .saturating_mul(1u64 << attempt.min(16))
        .clamp(1, max_ms.max(1));
    let half = ceiling / 2;
    let jitter = if half == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=half)
    };
    Duration::from_millis(ceiling - half + jitter)
}
