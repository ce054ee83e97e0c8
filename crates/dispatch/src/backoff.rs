use std::time::Duration;

use rand::Rng;

/// Jitter spread applied to every retry delay.
const JITTER: f64 = 0.2;

/// Delay before retrying after `failed_attempt` (1-based) failed:
/// `min(max, base · 2^(attempt-1))` scaled by `1 ± 0.2` jitter.
pub fn retry_delay(base: Duration, max: Duration, failed_attempt: u32) -> Duration {
    let factor = rand::thread_rng().gen_range(1.0 - JITTER..=1.0 + JITTER);
    retry_delay_with_jitter(base, max, failed_attempt, factor)
}

/// Deterministic variant used by [`retry_delay`] and tests.
pub fn retry_delay_with_jitter(
    base: Duration,
    max: Duration,
    failed_attempt: u32,
    jitter_factor: f64,
) -> Duration {
    let exponent = failed_attempt.saturating_sub(1).min(31);
    let uncapped = base.saturating_mul(2u32.saturating_pow(exponent));
    let capped = uncapped.min(max);
    capped.mul_f64(jitter_factor)
}
