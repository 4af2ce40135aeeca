use std::time::Duration;

use rand::Rng;

/// Exponential reconnect delay: 1s, 2s, 4s, ... capped at 30s. Attempts are
/// never capped; the notifier keeps retrying until it gets back in.
pub struct Backoff {
    base: Duration,
    cap: Duration,
    current: Option<Duration>,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            current: None,
        }
    }

    /// Advance to the next delay and return it.
    pub fn next_delay(&mut self) -> Duration {
        let next = match self.current {
            None => self.base,
            Some(prev) => self.cap.min(prev * 2),
        };
        self.current = Some(next);
        next
    }

    /// Called after a successful handshake so the next drop starts over
    /// from the base delay.
    pub fn reset(&mut self) {
        self.current = None;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

/// Add up to 25% random jitter so a fleet of clients does not reconnect in
/// lockstep after a server restart.
pub fn jittered(delay: Duration) -> Duration {
    let max_extra = delay.as_millis() as u64 / 4;
    if max_extra == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::rng().random_range(0..=max_extra))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double_up_to_the_cap() {
        let mut backoff = Backoff::default();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        assert_eq!(backoff.next_delay(), Duration::from_secs(8));
        assert_eq!(backoff.next_delay(), Duration::from_secs(16));
        assert_eq!(backoff.next_delay(), Duration::from_secs(30));
        assert_eq!(backoff.next_delay(), Duration::from_secs(30));
    }

    #[test]
    fn test_reset_starts_over_from_base() {
        let mut backoff = Backoff::default();
        backoff.next_delay();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_stays_within_a_quarter() {
        let base = Duration::from_secs(8);
        for _ in 0..50 {
            let delay = jittered(base);
            assert!(delay >= base);
            assert!(delay <= base + Duration::from_secs(2));
        }
    }
}
