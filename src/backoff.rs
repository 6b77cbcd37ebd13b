//! Exponential backoff for polling remote APIs.

use std::time::Duration;

/// Exponential backoff with a ceiling and no jitter.
///
/// The interval only grows on [`Backoff::increase`] and returns to the
/// initial value on [`Backoff::reset`]. There is no elapsed-time limit.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    current: Duration,
}

impl Backoff {
    /// Creates a backoff starting at `initial` and capped at `max`.
    ///
    /// A multiplier below 1.0 (or not finite) is treated as 1.0, and a cap
    /// below the initial interval is raised to it.
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        let multiplier = if multiplier.is_finite() && multiplier >= 1.0 {
            multiplier
        } else {
            1.0
        };
        Self {
            initial,
            max: max.max(initial),
            multiplier,
            current: initial,
        }
    }

    /// The interval to wait before the next attempt.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// The interval restored by [`Backoff::reset`].
    pub fn initial(&self) -> Duration {
        self.initial
    }

    /// The ceiling the interval saturates at.
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Grow the interval after a failed attempt, saturating at the cap.
    pub fn increase(&mut self) -> Duration {
        let next = self.current.as_secs_f64() * self.multiplier;
        self.current = if next >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(next).max(self.current)
        };
        self.current
    }

    /// Return to the initial interval after a successful attempt.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_sequence() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10), 2.0);
        assert_eq!(backoff.current(), Duration::from_secs(1));

        let intervals: Vec<u64> = (0..6).map(|_| backoff.increase().as_secs()).collect();
        assert_eq!(intervals, vec![2, 4, 8, 10, 10, 10]);

        backoff.reset();
        assert_eq!(backoff.current(), Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_never_decreases() {
        let mut backoff = Backoff::new(Duration::from_millis(200), Duration::from_secs(300), 1.5);
        let mut last = backoff.current();
        for _ in 0..100 {
            let next = backoff.increase();
            assert!(next >= last);
            assert!(next <= backoff.max());
            last = next;
        }
        assert_eq!(last, Duration::from_secs(300));
    }

    #[test]
    fn test_backoff_degenerate_inputs() {
        let mut flat = Backoff::new(Duration::from_secs(5), Duration::from_secs(60), 0.5);
        assert_eq!(flat.increase(), Duration::from_secs(5));

        let mut nan = Backoff::new(Duration::from_secs(5), Duration::from_secs(60), f64::NAN);
        assert_eq!(nan.increase(), Duration::from_secs(5));

        let capped = Backoff::new(Duration::from_secs(30), Duration::from_secs(1), 2.0);
        assert_eq!(capped.max(), Duration::from_secs(30));

        let mut zero = Backoff::new(Duration::ZERO, Duration::from_secs(1), 2.0);
        assert_eq!(zero.increase(), Duration::ZERO);
        assert_eq!(zero.initial(), Duration::ZERO);
    }
}
