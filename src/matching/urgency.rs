use serde::Serialize;
use time::{Duration, OffsetDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UrgencyLevel {
    Critical,
    Urgent,
    Standard,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Urgency {
    pub score: f64,
    pub level: UrgencyLevel,
    pub tier: u8,
}

impl Urgency {
    pub fn is_critical(&self) -> bool {
        self.tier == 1
    }

    pub fn is_standard(&self) -> bool {
        self.tier == 3
    }
}

/// Tier the time left before `expiry`. Evaluated against the caller's `now`
/// on every call; already-expired food counts as critical.
pub fn classify(expiry: OffsetDateTime, now: OffsetDateTime) -> Urgency {
    let remaining = expiry - now;
    if remaining < Duration::hours(3) {
        Urgency {
            score: 100.0,
            level: UrgencyLevel::Critical,
            tier: 1,
        }
    } else if remaining < Duration::hours(6) {
        Urgency {
            score: 60.0,
            level: UrgencyLevel::Urgent,
            tier: 2,
        }
    } else {
        Urgency {
            score: 20.0,
            level: UrgencyLevel::Standard,
            tier: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn tier_boundaries() {
        let now = datetime!(2026-10-17 12:00 UTC);
        let at = |m: i64| classify(now + Duration::minutes(m), now);

        assert_eq!(at(179).tier, 1);
        assert_eq!(at(180).tier, 2);
        assert_eq!(at(359).tier, 2);
        assert_eq!(at(360).tier, 3);
        assert_eq!(at(-30).level, UrgencyLevel::Critical);

        assert_eq!(at(60).score, 100.0);
        assert_eq!(at(240).score, 60.0);
        assert_eq!(at(24 * 60).score, 20.0);
    }
}
