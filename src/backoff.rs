use std::time::Duration;

use crate::constants::{DEFAULT_BACKOFF_FACTOR, INITIAL_BACKOFF, MAX_BACKOFF_SECONDS};

/// 带上限的指数退避
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    attempts: u32,
    max_attempts: Option<u32>,
}

impl Backoff {
    /// `max_attempts`为None时无限重试
    pub fn new(max_attempts: Option<u32>) -> Self {
        Backoff {
            current: *INITIAL_BACKOFF,
            attempts: 0,
            max_attempts,
        }
    }

    /// 下一次重试前的等待时间，重试次数用完时返回None
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if self.attempts >= max {
                return None;
            }
        }
        self.attempts += 1;

        let delay = self.current;
        let cap = Duration::from_secs(MAX_BACKOFF_SECONDS);
        self.current = std::cmp::min(self.current * DEFAULT_BACKOFF_FACTOR, cap);
        Some(delay)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.current = *INITIAL_BACKOFF;
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_cap() {
        let mut backoff = Backoff::new(None);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(400)));
        for _ in 0..20 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let mut backoff = Backoff::new(Some(3));
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.attempts(), 3);
    }

    #[test]
    fn reset_starts_over() {
        let mut backoff = Backoff::new(Some(2));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
    }
}
