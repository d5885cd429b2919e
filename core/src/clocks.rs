// III-IV
// Copyright 2023 Julio Merino
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not
// use this file except in compliance with the License.  You may obtain a copy
// of the License at:
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.  See the
// License for the specific language governing permissions and limitations
// under the License.

//! Sources of time.
//!
//! Everything that stamps records or checks token lifetimes goes through a `Clock` so that tests
//! can control the passage of time.

use async_trait::async_trait;
use std::time::Duration;
use time::OffsetDateTime;

/// Generic definition of a clock.
#[async_trait]
pub trait Clock {
    /// Returns the current UTC time.
    fn now_utc(&self) -> OffsetDateTime;

    /// Returns the current time as seconds since the Unix epoch.
    fn now_unix(&self) -> i64 {
        self.now_utc().unix_timestamp()
    }

    /// Pauses execution of the current task for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Clock implementation that uses the system clock.
#[derive(Clone, Default)]
pub struct SystemClock {}

#[async_trait]
impl Clock for SystemClock {
    fn now_utc(&self) -> OffsetDateTime {
        // Stored timestamps carry microseconds only, so truncate here to make values read back
        // from the database compare equal to the values we wrote.
        let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1000 * 1000;
        OffsetDateTime::from_unix_timestamp_nanos(nanos)
            .expect("nanos must be in range because they come from the current timestamp")
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await
    }
}

/// Test utilities.
#[cfg(any(test, feature = "testutils"))]
pub mod testutils {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Converts `t` to microseconds since the epoch, rejecting sub-microsecond precision.
    fn to_micros(t: OffsetDateTime) -> i64 {
        let nanos = t.unix_timestamp_nanos();
        assert!(nanos % 1000 == 0, "Nanosecond precision not supported");
        i64::try_from(nanos / 1000).unwrap()
    }

    /// A clock that returns a preconfigured instant and that can be modified at will.
    ///
    /// Only supports microsecond-level precision.
    #[derive(Debug)]
    pub struct SettableClock {
        /// Current fake time in microseconds.
        now_us: AtomicI64,
    }

    impl SettableClock {
        /// Creates a new clock that returns `now` until reconfigured with `set`.
        pub fn new(now: OffsetDateTime) -> Self {
            Self { now_us: AtomicI64::new(to_micros(now)) }
        }

        /// Sets the new value of `now` that the clock returns.
        pub fn set(&self, now: OffsetDateTime) {
            self.now_us.store(to_micros(now), Ordering::SeqCst);
        }

        /// Advances the current time by `delta`.
        pub fn advance(&self, delta: Duration) {
            let delta_ns = delta.as_nanos();
            assert!(delta_ns % 1000 == 0, "Nanosecond precision not supported");
            let delta_us = i64::try_from(delta_ns / 1000).unwrap();
            self.now_us.fetch_add(delta_us, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Clock for SettableClock {
        fn now_utc(&self) -> OffsetDateTime {
            let now_us = self.now_us.load(Ordering::SeqCst);
            OffsetDateTime::from_unix_timestamp_nanos(i128::from(now_us) * 1000).unwrap()
        }

        async fn sleep(&self, duration: Duration) {
            self.advance(duration);
            tokio::task::yield_now().await;
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::panic::catch_unwind;
        use time::macros::datetime;

        #[test]
        fn test_settableclock_set_and_advance() {
            let clock = SettableClock::new(datetime!(2024-03-05 08:00:00.000001 UTC));
            assert_eq!(datetime!(2024-03-05 08:00:00.000001 UTC), clock.now_utc());

            clock.set(datetime!(2024-03-05 09:30:00 UTC));
            assert_eq!(datetime!(2024-03-05 09:30:00 UTC), clock.now_utc());

            clock.advance(Duration::from_secs(90));
            assert_eq!(datetime!(2024-03-05 09:31:30 UTC), clock.now_utc());
            assert_eq!(datetime!(2024-03-05 09:31:30 UTC).unix_timestamp(), clock.now_unix());
        }

        #[test]
        fn test_settableclock_rejects_nanoseconds() {
            catch_unwind(|| SettableClock::new(datetime!(2024-03-05 08:00:00.000000001 UTC)))
                .unwrap_err();

            let clock = SettableClock::new(datetime!(2024-03-05 08:00:00 UTC));
            catch_unwind(|| clock.advance(Duration::from_nanos(10))).unwrap_err();
        }

        #[tokio::test]
        async fn test_settableclock_sleep_does_not_block() {
            let clock = SettableClock::new(datetime!(2024-03-05 08:00:00 UTC));
            clock.sleep(Duration::from_secs(7 * 24 * 3600)).await;
            assert_eq!(datetime!(2024-03-12 08:00:00 UTC), clock.now_utc());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_systemclock_is_monotonic_enough() {
        let clock = SystemClock::default();
        let now1 = clock.now_utc();
        let now2 = clock.now_utc();
        assert!(now2 >= now1);
        assert!(clock.now_unix() > 0);
    }

    #[test]
    fn test_systemclock_microsecond_resolution() {
        let now = SystemClock::default().now_utc();
        assert_eq!(0, now.nanosecond() % 1000);
    }
}
