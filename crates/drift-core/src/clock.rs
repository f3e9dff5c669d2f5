//! Wall-clock access abstraction.
//!
//! Grounded on `aura_core::effects::time::PhysicalTimeEffects`: a narrow
//! trait over wall-clock access with a blanket `Arc<T>` impl, kept
//! synchronous here (rather than `async_trait`) so the HLC's `now`/`merge`
//! remain pure, cheaply-testable functions that never cross a suspension
//! point on their own.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Supplies the current wall-clock time in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn wall_millis(&self) -> u64;
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn wall_millis(&self) -> u64 {
        (**self).wall_millis()
    }
}

/// Production clock backed by [`SystemTime::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn wall_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::Clock;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Deterministic clock for tests: starts at a fixed instant and only
    /// advances when told to.
    #[derive(Debug, Default)]
    pub struct TestClock(AtomicU64);

    impl TestClock {
        pub fn new(start_ms: u64) -> Self {
            Self(AtomicU64::new(start_ms))
        }

        pub fn set(&self, ms: u64) {
            self.0.store(ms, Ordering::SeqCst);
        }

        pub fn advance(&self, delta_ms: u64) -> u64 {
            self.0.fetch_add(delta_ms, Ordering::SeqCst) + delta_ms
        }
    }

    impl Clock for TestClock {
        fn wall_millis(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::TestClock;
    use super::Clock;

    #[test]
    fn test_clock_advances_deterministically() {
        let clock = TestClock::new(1000);
        assert_eq!(clock.wall_millis(), 1000);
        assert_eq!(clock.advance(500), 1500);
        assert_eq!(clock.wall_millis(), 1500);
    }
}
