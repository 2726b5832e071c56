//! Interval jitter and start-up staggering.

use std::time::Duration;

use rand::Rng;

/// Maximum relative perturbation applied to a poll interval.
pub const JITTER_FRACTION: f64 = 0.2;

/// `interval` perturbed by a uniform random ±20%.
pub fn add_jitter(interval: Duration) -> Duration {
    let factor: f64 = rand::rng().random_range(-1.0..=1.0);
    jitter_with(interval, factor)
}

/// `interval × (1 + 0.2 × factor)`, with `factor` clamped to [-1, 1].
pub fn jitter_with(interval: Duration, factor: f64) -> Duration {
    interval.mul_f64(1.0 + JITTER_FRACTION * factor.clamp(-1.0, 1.0))
}

/// Initial offset of the `index`-th of `count` repos sharing `interval`:
/// `index × interval / (count + 1)`.
pub fn stagger_offset(index: usize, count: usize, interval: Duration) -> Duration {
    if count == 0 {
        return Duration::ZERO;
    }
    interval.mul_f64(index as f64 / (count + 1) as f64)
}
