//! Time source and TTL arithmetic.
//!
//! Instants are whole unix seconds. An entry is live while `now < expires_at`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub type Timestamp = u64;

/// Expiry instant for something created at `created` that lives for `ttl`.
pub fn expiry(created: Timestamp, ttl: Duration) -> Timestamp {
    created.saturating_add(ttl.as_secs())
}

pub fn is_live(expires_at: Timestamp, now: Timestamp) -> bool {
    now < expires_at
}

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Clock that only moves when told to. Lets expiry be exercised without
/// sleeping.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self { now: AtomicU64::new(start) }
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_secs(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_boundary() {
        let expires = expiry(1_000, Duration::from_secs(600));
        assert_eq!(expires, 1_600);
        assert!(is_live(expires, 1_599));
        assert!(!is_live(expires, 1_600));
        assert!(!is_live(expires, 1_601));
    }

    #[test]
    fn test_expiry_saturates() {
        assert_eq!(expiry(u64::MAX - 1, Duration::from_secs(10)), u64::MAX);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(50);
        clock.advance(Duration::from_secs(10));
        assert_eq!(clock.now(), 60);
        clock.set(5);
        assert_eq!(clock.now(), 5);
    }

    #[test]
    fn test_system_clock_is_past_epoch() {
        assert!(SystemClock.now() > 1_600_000_000);
    }
}
