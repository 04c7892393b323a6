//! Clock abstraction for lifecycle timing.
//!
//! The stage machine compares idle durations against multi-day windows;
//! tests drive a manual clock forward instead of sleeping.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

enum ClockInner {
    System,
    Manual(Mutex<DateTime<Utc>>),
}

/// System or manually-advanced time source
pub struct Clock {
    inner: ClockInner,
}

impl Clock {
    pub fn system() -> Self {
        Self {
            inner: ClockInner::System,
        }
    }

    /// Manual clock starting at `start`; advanced explicitly.
    pub fn manual(start: DateTime<Utc>) -> Self {
        Self {
            inner: ClockInner::Manual(Mutex::new(start)),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        match &self.inner {
            ClockInner::System => Utc::now(),
            ClockInner::Manual(t) => *t.lock().expect("clock lock poisoned"),
        }
    }

    /// Advance a manual clock; no-op on the system clock.
    pub fn advance(&self, by: Duration) {
        if let ClockInner::Manual(t) = &self.inner {
            let mut now = t.lock().expect("clock lock poisoned");
            *now += by;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc::now();
        let clock = Clock::manual(start);
        assert_eq!(clock.now(), start);
        clock.advance(Duration::days(8));
        assert_eq!(clock.now(), start + Duration::days(8));
    }

    #[test]
    fn test_system_clock_ignores_advance() {
        let clock = Clock::system();
        let before = clock.now();
        clock.advance(Duration::days(100));
        let after = clock.now();
        assert!(after - before < Duration::seconds(5));
    }
}
