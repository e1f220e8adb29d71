use shardline_core::{ceil_div_ms, duration_ms};
use std::time::Duration;

/// How long the operation that received slot `count` must wait.
///
/// `ttl` is the time left until the counter's stretched expiry, as returned by
/// the store alongside the post-increment `count`. A zero `limit` is treated
/// as one.
pub fn delay_from(window: Duration, limit: u32, count: u64, ttl: Duration) -> Duration {
    let window_ms = duration_ms(window);
    if window_ms == 0 || count == 0 {
        return Duration::ZERO;
    }
    let limit = limit.max(1);

    let w = i64::try_from(window_ms).unwrap_or(i64::MAX);
    let l = i64::from(limit);
    let c = i64::try_from(count).unwrap_or(i64::MAX);
    let per_request = i64::try_from(ceil_div_ms(window_ms, u64::from(limit))).unwrap_or(i64::MAX);
    let ttl = i64::try_from(duration_ms(ttl)).unwrap_or(i64::MAX);

    let elapsed = c.saturating_mul(per_request).saturating_sub(ttl);
    let elapsed_windows = elapsed.div_euclid(w);
    let completed = elapsed_windows.saturating_mul(l);
    let remaining = c.saturating_sub(completed);
    let remaining_windows = (remaining - 1).div_euclid(l);
    if remaining_windows <= 0 {
        return Duration::ZERO;
    }

    let delay = remaining_windows
        .saturating_mul(w)
        .saturating_sub(elapsed.rem_euclid(w));
    Duration::from_millis(u64::try_from(delay).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Replays `calls` back-to-back increments at time zero the way the
    /// store would, returning each call's delay.
    fn burst(window_ms: u64, limit: u32, calls: u64) -> Vec<u64> {
        let per_request = ceil_div_ms(window_ms, u64::from(limit));
        (1..=calls)
            .map(|count| {
                let ttl = Duration::from_millis(count * per_request);
                duration_ms(delay_from(Duration::from_millis(window_ms), limit, count, ttl))
            })
            .collect()
    }

    #[test]
    fn test_first_limit_calls_are_free() {
        for (window, limit) in [(1000, 1), (1000, 2), (5000, 1), (60_500, 120), (1000, 7)] {
            let delays = burst(window, limit, u64::from(limit));
            assert!(delays.iter().all(|d| *d == 0), "{window}/{limit}: {delays:?}");
        }
    }

    #[test]
    fn test_third_call_waits_a_window() {
        assert_eq!(burst(1000, 2, 3), vec![0, 0, 1000]);
    }

    #[test]
    fn test_slot_reused_after_delay() {
        // Three calls at t=0, the fourth at t=1000: the counter now expires
        // at 2000, so ttl is 1000.
        let delay = delay_from(
            Duration::from_millis(1000),
            2,
            4,
            Duration::from_millis(1000),
        );
        assert_eq!(delay, Duration::ZERO);
    }

    #[test]
    fn test_delay_is_monotonic_within_cycle() {
        for (window, limit) in [(1000, 2), (1000, 3), (5000, 1), (60_500, 120)] {
            let delays = burst(window, limit, u64::from(limit) * 4);
            assert!(
                delays.windows(2).all(|pair| pair[0] <= pair[1]),
                "{window}/{limit}: {delays:?}"
            );
        }
    }

    #[test]
    fn test_whole_windows_per_overflowing_batch() {
        assert_eq!(burst(1000, 2, 6), vec![0, 0, 1000, 1000, 2000, 2000]);
    }

    #[test]
    fn test_degenerate_inputs() {
        let window = Duration::from_millis(1000);
        assert_eq!(delay_from(Duration::ZERO, 2, 5, Duration::ZERO), Duration::ZERO);
        assert_eq!(delay_from(window, 2, 0, Duration::ZERO), Duration::ZERO);
        // limit 0 behaves like limit 1
        assert_eq!(
            delay_from(window, 0, 2, Duration::from_millis(2000)),
            Duration::from_millis(1000)
        );
    }
}
