//! Time sources shared by storage backends and limiters

use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Microsecond wall clock
pub trait Clock: Send + Sync + Debug {
    /// Microseconds since the unix epoch
    fn now_micros(&self) -> i64;

    /// Milliseconds since the unix epoch
    fn now_millis(&self) -> i64 {
        self.now_micros().div_euclid(1_000)
    }
}

/// Reads the system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_micros(&self) -> i64 {
        chrono::Utc::now().timestamp_micros()
    }
}

/// A clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    /// Start at the given number of microseconds since the epoch
    pub fn new(start_micros: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start_micros)),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(duration_micros(by), Ordering::SeqCst);
    }

    /// Jump to an absolute time
    pub fn set(&self, micros: i64) {
        self.now.store(micros, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_micros(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Shared default clock
pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

/// Saturating conversion of a duration to whole microseconds
pub fn duration_micros(d: Duration) -> i64 {
    i64::try_from(d.as_micros()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(1_000_000);
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now_micros(), 1_250_000);
        assert_eq!(clock.now_millis(), 1_250);

        // clones share the same time
        let other = clock.clone();
        other.set(5);
        assert_eq!(clock.now_micros(), 5);
    }

    #[test]
    fn test_system_clock_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now_micros() > 1_577_836_800_000_000);
    }
}
