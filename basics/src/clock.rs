use chrono::{Duration, NaiveDateTime, Utc};

use std::sync::{Arc, Mutex};

/// A source of wall-clock timestamps.
///
/// The executor and the lineage client both read physical time through this
/// trait so that tests can pin it.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

/// A clock that is shareable between a node and its lineage client.
pub type SharedClock = Arc<dyn Clock + Send + Sync>;

/// The real wall clock.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().naive_utc()
    }
}

/// A clock that stands still until told otherwise.
///
/// Cloning yields a handle onto the same instant, so a test can keep one
/// handle and hand another to the node under test:
///
/// ```
/// use rill_basics::clock::{Clock, MockClock};
/// use chrono::Duration;
///
/// let clock = MockClock::new();
/// let handle = clock.clone();
/// handle.advance(Duration::seconds(1));
/// assert_eq!(clock.now(), MockClock::epoch() + Duration::seconds(1));
/// ```
#[derive(Clone, Debug)]
pub struct MockClock {
    now: Arc<Mutex<NaiveDateTime>>,
}

impl MockClock {
    pub fn new() -> Self {
        MockClock {
            now: Arc::new(Mutex::new(Self::epoch())),
        }
    }

    /// Where every `MockClock` starts: the unix epoch.
    pub fn epoch() -> NaiveDateTime {
        NaiveDateTime::default()
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now = *now + by;
    }

    pub fn set(&self, to: NaiveDateTime) {
        *self.now.lock().unwrap() = to;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        MockClock::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_clock_advances_all_handles() {
        let clock = MockClock::new();
        let handle = clock.clone();
        assert_eq!(clock.now(), MockClock::epoch());

        handle.advance(Duration::seconds(2));
        assert_eq!(clock.now(), MockClock::epoch() + Duration::seconds(2));

        handle.advance(Duration::seconds(1));
        assert_eq!(clock.now(), MockClock::epoch() + Duration::seconds(3));
    }

    #[test]
    fn system_clock_is_monotonic_enough() {
        let clock = SystemClock::default();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
