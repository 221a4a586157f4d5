//! Time abstraction, allowing mockable clocks in tests.
//!
//! Periodic IR refresh and context pruning are wallclock-driven; the
//! endpoints read time through this trait so tests can steer it.

use std::fmt::Debug;
use std::time::Instant;

/// Source of "now" for an endpoint.
pub trait Clock: Send + Sync + Debug {
    /// Current instant.
    fn now(&self) -> Instant;
}

/// Default clock backed by `std::time::Instant`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Test utilities for steering time.
pub mod mock_clock {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// A clock advanced manually by the test.
    #[derive(Debug)]
    pub struct MockClock {
        current: Mutex<Instant>,
    }

    impl MockClock {
        /// Creates a clock frozen at `start`.
        pub fn new(start: Instant) -> Self {
            Self {
                current: Mutex::new(start),
            }
        }

        /// Moves time forward by `duration`.
        pub fn advance(&self, duration: Duration) {
            *self.current.lock().unwrap() += duration;
        }
    }

    impl Default for MockClock {
        fn default() -> Self {
            Self::new(Instant::now())
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> Instant {
            *self.current.lock().unwrap()
        }
    }
}
