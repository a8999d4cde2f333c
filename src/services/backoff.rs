// src/services/backoff.rs

//! Adaptive rate-limit backoff shared by every request of a run.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rand::Rng;

use crate::models::{BackoffConfig, PauseRange};

/// Current backoff delay plus the rules that move it.
///
/// Invariant: `floor <= current <= max(floor, ceiling)`. A rate-limit
/// signal multiplies the delay by `factor` (capped at `ceiling`); a clean
/// success multiplies it by `decay` (clamped at `floor`).
#[derive(Debug)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    factor: f64,
    decay: f64,
    current: Mutex<Duration>,
}

impl Backoff {
    pub fn new(floor: Duration, ceiling: Duration, factor: f64, decay: f64) -> Self {
        let ceiling = ceiling.max(floor);
        Self {
            floor,
            ceiling,
            factor: factor.max(1.0),
            decay: decay.clamp(f64::MIN_POSITIVE, 1.0),
            current: Mutex::new(floor),
        }
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(
            Duration::from_millis(config.floor_ms),
            Duration::from_millis(config.ceiling_ms),
            config.factor,
            config.decay,
        )
    }

    pub fn floor(&self) -> Duration {
        self.floor
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    pub fn current(&self) -> Duration {
        *self.lock()
    }

    /// Record a rate-limit signal; returns the new delay to sleep.
    pub fn on_rate_limited(&self) -> Duration {
        let mut current = self.lock();
        *current = scaled(*current, self.factor).min(self.ceiling);
        *current
    }

    /// Record a clean success; returns the decayed delay.
    pub fn on_success(&self) -> Duration {
        let mut current = self.lock();
        *current = current.mul_f64(self.decay).max(self.floor);
        *current
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Duration> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// `delay * factor`, saturating at `Duration::MAX` instead of panicking.
fn scaled(delay: Duration, factor: f64) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

/// Stretch `delay` by a random share in `[0, ratio]`.
pub fn jittered(delay: Duration, ratio: f64) -> Duration {
    if !(ratio > 0.0 && ratio.is_finite()) || delay.is_zero() {
        return delay;
    }
    let stretch = rand::rng().random_range(0.0..=ratio);
    scaled(delay, 1.0 + stretch)
}

/// Pick a random pause inside `range`.
pub fn pause_duration(range: PauseRange) -> Duration {
    let (min, max) = (range.min(), range.max());
    if max <= min {
        return min;
    }
    let millis = rand::rng().random_range(range.min_ms..=range.max_ms);
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn backoff() -> Backoff {
        Backoff::new(
            Duration::from_secs(1),
            Duration::from_secs(60),
            2.0,
            0.9,
        )
    }

    #[test]
    fn starts_at_floor() {
        assert_eq!(backoff().current(), Duration::from_secs(1));
    }

    #[test]
    fn doubles_per_signal_up_to_ceiling() {
        let b = backoff();
        for k in 1..=10u32 {
            let expected = (Duration::from_secs(1) * 2u32.pow(k)).min(Duration::from_secs(60));
            assert_eq!(b.on_rate_limited(), expected, "after {k} signals");
        }
        assert_eq!(b.current(), Duration::from_secs(60));
    }

    #[test]
    fn success_decays_toward_floor() {
        let b = backoff();
        b.on_rate_limited();
        b.on_rate_limited();
        assert_eq!(b.current(), Duration::from_secs(4));

        let decayed = b.on_success();
        assert_eq!(decayed, Duration::from_secs(4).mul_f64(0.9));

        for _ in 0..50 {
            b.on_success();
        }
        assert_eq!(b.current(), Duration::from_secs(1));
    }

    #[test]
    fn success_at_floor_stays_at_floor() {
        let b = backoff();
        assert_eq!(b.on_success(), Duration::from_secs(1));
    }

    #[test]
    fn ceiling_below_floor_is_raised() {
        let b = Backoff::new(Duration::from_secs(5), Duration::from_secs(1), 2.0, 0.9);
        assert_eq!(b.ceiling(), Duration::from_secs(5));
        assert_eq!(b.on_rate_limited(), Duration::from_secs(5));
    }

    #[test]
    fn huge_factor_saturates_at_ceiling() {
        let b = Backoff::new(Duration::from_secs(1), Duration::from_secs(60), 1e30, 0.9);
        assert_eq!(b.on_rate_limited(), Duration::from_secs(60));
        assert_eq!(b.on_rate_limited(), Duration::from_secs(60));
        assert_eq!(jittered(Duration::MAX, 0.5), Duration::MAX);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_signals_are_all_counted() {
        let b = Arc::new(Backoff::new(
            Duration::from_millis(1),
            Duration::from_secs(60),
            2.0,
            0.9,
        ));
        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let b = Arc::clone(&b);
                tokio::spawn(async move {
                    for _ in 0..3 {
                        b.on_rate_limited();
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        // 12 signals: 1ms * 2^12
        assert_eq!(b.current(), Duration::from_millis(4096));
    }

    #[test]
    fn jitter_stays_in_band() {
        let base = Duration::from_millis(1000);
        for _ in 0..100 {
            let d = jittered(base, 0.5);
            assert!(d >= base && d <= Duration::from_millis(1500), "{d:?}");
        }
        assert_eq!(jittered(base, 0.0), base);
    }

    #[test]
    fn pause_stays_in_range() {
        let range = PauseRange::millis(200, 400);
        for _ in 0..100 {
            let d = pause_duration(range);
            assert!(d >= Duration::from_millis(200) && d <= Duration::from_millis(400));
        }
        assert_eq!(
            pause_duration(PauseRange::millis(300, 300)),
            Duration::from_millis(300)
        );
    }
}
