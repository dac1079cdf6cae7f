use std::sync::{Arc, Mutex};

use time::{Duration, OffsetDateTime, Time, UtcOffset};

/// Source of "now". Injected everywhere a deadline is evaluated so tests can
/// drive time explicitly.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;

    /// Local midnight of the current day.
    fn start_of_day(&self) -> OffsetDateTime {
        self.now().replace_time(Time::MIDNIGHT)
    }
}

/// Wall clock expressed in the service's local offset, which decides where
/// "today" starts for capacity accounting.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: UtcOffset,
}

impl SystemClock {
    pub fn new(offset: UtcOffset) -> Self {
        Self { offset }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(UtcOffset::UTC)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<OffsetDateTime>>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, at: OffsetDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(datetime!(2026-10-17 14:30 UTC));
        clock.advance(Duration::minutes(45));
        assert_eq!(clock.now(), datetime!(2026-10-17 15:15 UTC));
        assert_eq!(clock.start_of_day(), datetime!(2026-10-17 0:00 UTC));
    }
}
