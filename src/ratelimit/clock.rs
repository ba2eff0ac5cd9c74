//! Time source for the in-process strategy.

use std::fmt::Debug;

/// A source of wall-clock time in integer microseconds since the Unix epoch.
pub trait Clock: Debug + Send + Sync {
    /// Current time in microseconds since the Unix epoch.
    fn now_micros(&self) -> i64;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_micros(&self) -> i64 {
        chrono::Utc::now().timestamp_micros()
    }
}

#[cfg(test)]
pub(crate) use manual::ManualClock;

#[cfg(test)]
mod manual {
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::Duration;

    use super::Clock;

    /// A clock that only moves when told to.
    #[derive(Debug, Default)]
    pub(crate) struct ManualClock {
        now_us: AtomicI64,
    }

    impl ManualClock {
        pub(crate) fn new(now_us: i64) -> Self {
            Self {
                now_us: AtomicI64::new(now_us),
            }
        }

        pub(crate) fn advance(&self, by: Duration) {
            self.now_us
                .fetch_add(by.as_micros() as i64, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_micros(&self) -> i64 {
            self.now_us.load(Ordering::SeqCst)
        }
    }
}
