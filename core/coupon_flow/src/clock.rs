//! Wall-clock access for the resend cooldown.
//!
//! The countdown shown next to "Resend" is a pure function of the current time
//! and the deadline, so there is no ticking counter to drift.

use std::time::Duration;

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Time left until `available_at`, zero once it has passed.
pub fn cooldown_remaining(now: DateTime<Utc>, available_at: DateTime<Utc>) -> Duration {
    (available_at - now).to_std().unwrap_or(Duration::ZERO)
}

/// Whole seconds for a countdown label, rounded up so "0s" only shows once
/// resend is actually allowed.
pub fn seconds_label(remaining: Duration) -> u64 {
    let secs = remaining.as_secs();
    if remaining.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

#[cfg(any(test, feature = "testutils"))]
pub use manual::ManualClock;

#[cfg(any(test, feature = "testutils"))]
mod manual {
    use std::sync::{Mutex, PoisonError};
    use std::time::Duration;

    use chrono::{DateTime, TimeZone, Utc};

    use super::Clock;

    /// Clock that only moves when told to.
    #[derive(Debug)]
    pub struct ManualClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl Default for ManualClock {
        fn default() -> Self {
            let start = Utc
                .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or_default();
            Self::at(start)
        }
    }

    impl ManualClock {
        pub fn at(now: DateTime<Utc>) -> Self {
            Self {
                now: Mutex::new(now),
            }
        }

        pub fn advance(&self, by: Duration) {
            let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
            *now += chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }
}
