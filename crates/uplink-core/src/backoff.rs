//! Reconnect backoff policy.

use rand::Rng;
use std::time::Duration;

/// Delay before reconnect attempt number `attempt` (0-based):
/// `base * 2^attempt`, capped at `max`, plus up to 25% uniform jitter so
/// a fleet of clients does not reconnect in lockstep.
pub(crate) fn delay_for_attempt(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 1u32 << attempt.min(16);
    let capped = base.saturating_mul(factor).min(max);
    let jitter = capped.mul_f64(rand::thread_rng().gen_range(0.0..0.25));
    capped + jitter
}
