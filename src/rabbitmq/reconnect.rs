use std::time::Duration;

pub const DEFAULT_MAX_RECONNECT_DELAY_SECS: u64 = 30;

/// Linear backoff between connect attempts: 1s after the first failure, 2s
/// after the second, and so on up to the cap. Reset on every success.
#[derive(Debug, Clone)]
pub struct ReconnectState {
    delay_secs: u64,
    max_delay_secs: u64,
}

impl Default for ReconnectState {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECONNECT_DELAY_SECS)
    }
}

impl ReconnectState {
    /// A cap of 0 is treated as 1s; retries never run back to back.
    pub fn new(max_delay_secs: u64) -> Self {
        Self {
            delay_secs: 0,
            max_delay_secs: max_delay_secs.max(1),
        }
    }

    /// Current delay in seconds (0 when the last connect succeeded).
    pub fn delay_secs(&self) -> u64 {
        self.delay_secs
    }

    /// Record a failure and return how long to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.delay_secs = self.delay_secs.saturating_add(1).min(self.max_delay_secs);
        Duration::from_secs(self.delay_secs)
    }

    pub fn reset(&mut self) {
        self.delay_secs = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_linearly_and_saturates() {
        let mut state = ReconnectState::default();
        for attempt in 1..=40u64 {
            let delay = state.next_delay();
            assert_eq!(delay, Duration::from_secs(attempt.min(30)));
        }
        assert_eq!(state.delay_secs(), 30);
    }

    #[test]
    fn reset_returns_to_zero() {
        let mut state = ReconnectState::new(5);
        state.next_delay();
        state.next_delay();
        assert_eq!(state.delay_secs(), 2);

        state.reset();
        assert_eq!(state.delay_secs(), 0);
        assert_eq!(state.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn custom_cap_is_honoured() {
        let mut state = ReconnectState::new(3);
        let delays: Vec<u64> = (0..5).map(|_| state.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 3, 3, 3]);
    }

    #[test]
    fn zero_cap_still_waits_a_second() {
        let mut state = ReconnectState::new(0);
        assert_eq!(state.next_delay(), Duration::from_secs(1));
        assert_eq!(state.next_delay(), Duration::from_secs(1));
    }
}
