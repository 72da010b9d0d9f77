//! Jitter and backoff timing
//!
//! Every sleep here races the run's cancellation token so an operator
//! interrupt is observed at each blocking point.

use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::ScrapeError;

/// Exponential backoff delay: `min(cap, base * 2^(attempt-1))`
///
/// `attempt` is 1-based; `attempt` 0 is treated as 1. Deterministic, no jitter.
pub fn backoff(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent)
        .map_or(cap, |delay| delay.min(cap))
}

/// Uniformly random duration in `[min, max]`
pub fn jitter_duration(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let secs = rand::rng().random_range(min.as_secs_f64()..=max.as_secs_f64());
    Duration::from_secs_f64(secs)
}

/// Sleep for a random duration in `[min, max]`
pub async fn jitter(
    min: Duration,
    max: Duration,
    cancel: &CancellationToken,
) -> Result<(), ScrapeError> {
    sleep_or_cancel(jitter_duration(min, max), cancel).await
}

/// Sleep unless the token fires first
pub async fn sleep_or_cancel(
    duration: Duration,
    cancel: &CancellationToken,
) -> Result<(), ScrapeError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ScrapeError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_secs(1);
    const CAP: Duration = Duration::from_secs(20);

    #[test]
    fn backoff_doubles_until_cap() {
        assert_eq!(backoff(1, BASE, CAP), Duration::from_secs(1));
        assert_eq!(backoff(2, BASE, CAP), Duration::from_secs(2));
        assert_eq!(backoff(4, BASE, CAP), Duration::from_secs(8));
        assert_eq!(backoff(5, BASE, CAP), Duration::from_secs(16));
        assert_eq!(backoff(6, BASE, CAP), CAP);
        assert_eq!(backoff(10, BASE, CAP), CAP);
    }

    #[test]
    fn backoff_is_monotonic_and_bounded() {
        let mut previous = Duration::ZERO;
        for attempt in 1..200 {
            let delay = backoff(attempt, Duration::from_millis(250), CAP);
            assert!(delay >= previous, "attempt {attempt} went backwards");
            assert!(delay <= CAP);
            previous = delay;
        }
    }

    #[test]
    fn backoff_treats_zero_as_first_attempt() {
        assert_eq!(backoff(0, BASE, CAP), BASE);
    }

    #[test]
    fn backoff_survives_huge_attempts() {
        assert_eq!(backoff(u32::MAX, Duration::from_secs(3600), CAP), CAP);
    }

    #[test]
    fn jitter_stays_in_range() {
        let min = Duration::from_millis(150);
        let max = Duration::from_millis(450);
        for _ in 0..500 {
            let d = jitter_duration(min, max);
            assert!(d >= min && d <= max, "{d:?} out of range");
        }
    }

    #[test]
    fn jitter_with_empty_range_returns_min() {
        let d = Duration::from_millis(300);
        assert_eq!(jitter_duration(d, d), d);
        assert_eq!(jitter_duration(d, Duration::ZERO), d);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_completes_without_cancel() {
        let token = CancellationToken::new();
        assert_eq!(sleep_or_cancel(Duration::from_secs(30), &token).await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_is_cut_short_by_cancel() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });
        let started = tokio::time::Instant::now();
        let result = sleep_or_cancel(Duration::from_secs(3600), &token).await;
        assert_eq!(result, Err(ScrapeError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
