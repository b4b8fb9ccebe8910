//! Fixed-window counter implementation.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Mutable part of a counter, always read and written under one lock.
#[derive(Debug, Clone, Copy)]
struct WindowState {
    /// When the current window started
    window_start: Instant,
    /// Weight accumulated since `window_start`
    count: u64,
}

/// A counter that tracks accumulated weight within a fixed time window.
///
/// The window is fixed, not sliding: once `window` has elapsed since the
/// window start, the next call resets the count to zero. A burst straddling a
/// boundary can therefore briefly see up to twice the capacity.
///
/// Reset, check and increment happen as one step under a per-counter lock,
/// so concurrent callers never overshoot the capacity.
#[derive(Debug)]
pub struct WindowCounter {
    /// Maximum weight allowed per window
    capacity: u64,
    /// Length of one window
    window: Duration,
    state: Mutex<WindowState>,
}

impl WindowCounter {
    /// Create a counter with an empty window starting at `now`.
    pub fn new(capacity: u64, window: Duration, now: Instant) -> Self {
        Self {
            capacity,
            window,
            state: Mutex::new(WindowState {
                window_start: now,
                count: 0,
            }),
        }
    }

    /// Try to add `weight` to the current window.
    ///
    /// Returns `true` and records the weight if it fits, `false` without
    /// touching the count otherwise.
    pub fn try_consume(&self, now: Instant, weight: u64) -> bool {
        let mut state = self.state.lock();
        self.roll(&mut state, now);

        match state.count.checked_add(weight) {
            Some(next) if next <= self.capacity => {
                state.count = next;
                true
            }
            _ => false,
        }
    }

    /// Weight accumulated in the window that is current at `now`.
    pub fn current_count(&self, now: Instant) -> u64 {
        let mut state = self.state.lock();
        self.roll(&mut state, now);
        state.count
    }

    /// Weight still available in the window that is current at `now`.
    pub fn remaining(&self, now: Instant) -> u64 {
        self.capacity.saturating_sub(self.current_count(now))
    }

    /// Time left until the current window resets.
    pub fn duration_until_reset(&self, now: Instant) -> Duration {
        let state = self.state.lock();
        let elapsed = now.saturating_duration_since(state.window_start);
        self.window.saturating_sub(elapsed)
    }

    /// Whether the window has fully elapsed, i.e. the next call would reset.
    pub fn is_expired(&self, now: Instant) -> bool {
        let state = self.state.lock();
        now.saturating_duration_since(state.window_start) >= self.window
    }

    /// Get the capacity of this counter.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Get the window length of this counter.
    pub fn window(&self) -> Duration {
        self.window
    }

    fn roll(&self, state: &mut WindowState, now: Instant) {
        if now.saturating_duration_since(state.window_start) >= self.window {
            state.window_start = now;
            state.count = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_counter_consume_within_capacity() {
        let t0 = Instant::now();
        let counter = WindowCounter::new(10, ms(1000), t0);

        assert!(counter.try_consume(t0, 1));
        assert_eq!(counter.current_count(t0), 1);
        assert_eq!(counter.remaining(t0), 9);
    }

    #[test]
    fn test_counter_rejects_past_capacity() {
        let t0 = Instant::now();
        let counter = WindowCounter::new(5, ms(1000), t0);

        for _ in 0..5 {
            assert!(counter.try_consume(t0, 1));
        }

        // The 6th request should be rejected
        assert!(!counter.try_consume(t0, 1));
        assert_eq!(counter.current_count(t0), 5);
    }

    #[test]
    fn test_rejected_weight_is_not_recorded() {
        let t0 = Instant::now();
        let counter = WindowCounter::new(10, ms(1000), t0);

        assert!(counter.try_consume(t0, 8));
        assert!(!counter.try_consume(t0, 3)); // 8 + 3 = 11, exceeds capacity
        assert!(counter.try_consume(t0, 2)); // 8 + 2 = 10, still fits
        assert_eq!(counter.remaining(t0), 0);
    }

    #[test]
    fn test_window_resets_after_elapsed() {
        let t0 = Instant::now();
        let counter = WindowCounter::new(2, ms(10_000), t0);

        assert!(counter.try_consume(t0, 2));
        assert!(!counter.try_consume(t0 + ms(9_999), 1));
        assert!(counter.try_consume(t0 + ms(10_000), 1));
        assert_eq!(counter.current_count(t0 + ms(10_000)), 1);
    }

    #[test]
    fn test_boundary_burst_allows_double_capacity() {
        let t0 = Instant::now();
        let counter = WindowCounter::new(3, ms(1000), t0);

        let late = t0 + ms(999);
        let early_next = t0 + ms(1000);
        let allowed = (0..3).filter(|_| counter.try_consume(late, 1)).count()
            + (0..3).filter(|_| counter.try_consume(early_next, 1)).count();
        assert_eq!(allowed, 6);
    }

    #[test]
    fn test_duration_until_reset_and_expiry() {
        let t0 = Instant::now();
        let counter = WindowCounter::new(1, ms(1000), t0);

        assert_eq!(counter.duration_until_reset(t0 + ms(400)), ms(600));
        assert!(!counter.is_expired(t0 + ms(999)));
        assert!(counter.is_expired(t0 + ms(1000)));
        assert_eq!(counter.duration_until_reset(t0 + ms(5000)), Duration::ZERO);
    }

    #[test]
    fn test_overweight_request_never_fits() {
        let t0 = Instant::now();
        let counter = WindowCounter::new(5, ms(1000), t0);

        assert!(!counter.try_consume(t0, 6));
        assert!(!counter.try_consume(t0, u64::MAX));
        assert_eq!(counter.current_count(t0), 0);
    }

    #[test]
    fn test_concurrent_consumers_never_overshoot() {
        let t0 = Instant::now();
        let counter = WindowCounter::new(50, ms(60_000), t0);

        let allowed: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| (0..25).filter(|_| counter.try_consume(t0, 1)).count())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(allowed, 50);
        assert_eq!(counter.current_count(t0), 50);
    }
}
