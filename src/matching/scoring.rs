//! Suitability scores for NGO and volunteer candidates.
//!
//! Both scores start from `100 / (km + 1)`. NGO scores are clamped to 100;
//! volunteer scores are not, so equity and vehicle bonuses can rank a
//! candidate above the nominal scale.

use time::OffsetDateTime;

use super::urgency::Urgency;
use crate::domain::{geo::km, NgoProfile, VolunteerProfile, VolunteerTier};

/// Share of daily capacity above which non-critical donations are penalised.
pub const LOAD_THRESHOLD: f64 = 0.8;
pub const URGENT_NEED_BOOST: f64 = 1.2;
pub const LOAD_PENALTY: f64 = 0.5;
pub const EQUITY_BOOST: f64 = 30.0;
pub const VEHICLE_BONUS: f64 = 20.0;
/// Estimated weight above which a car or van earns the vehicle bonus.
pub const HEAVY_LOAD: f64 = 20.0;

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

pub fn distance_score(distance_m: f64) -> f64 {
    100.0 / (km(distance_m.max(0.0)) + 1.0)
}

pub fn ngo_score(urgency: Urgency, ngo: &NgoProfile, distance_m: f64, unmet_need: u32) -> f64 {
    let mut score = distance_score(distance_m) * 0.4 + urgency.score * 0.6;

    if ngo.is_urgent_need {
        score *= URGENT_NEED_BOOST;
    }

    // Critical rescues ignore load: getting the food out wins.
    if !urgency.is_critical() && ngo.daily_capacity > 0 {
        let capacity = ngo.daily_capacity as f64;
        let claimed = capacity - unmet_need as f64;
        if claimed / capacity > LOAD_THRESHOLD {
            score *= LOAD_PENALTY;
        }
    }

    round2(score.min(100.0))
}

pub fn tier_score(tier: VolunteerTier) -> f64 {
    match tier {
        VolunteerTier::Champion => 100.0,
        VolunteerTier::Hero => 60.0,
        VolunteerTier::Rookie => 20.0,
    }
}

/// No mission yet today, or nothing in hand right now.
pub fn is_idle(volunteer: &VolunteerProfile, start_of_day: OffsetDateTime) -> bool {
    let no_mission_today = volunteer
        .last_mission_date
        .map_or(true, |d| d < start_of_day);
    no_mission_today || volunteer.active_tasks == 0
}

pub fn volunteer_score(
    volunteer: &VolunteerProfile,
    distance_m: f64,
    urgency: Urgency,
    start_of_day: OffsetDateTime,
) -> f64 {
    let distance = distance_score(distance_m);
    if urgency.is_critical() {
        return round2(distance);
    }

    let mut score = distance * 0.5 + tier_score(volunteer.tier) * 0.5;
    if urgency.is_standard() && is_idle(volunteer, start_of_day) {
        score += EQUITY_BOOST;
    }
    round2(score)
}

pub fn vehicle_bonus(volunteer: &VolunteerProfile, estimated_weight: f64) -> f64 {
    let heavy_capable = volunteer
        .vehicle_type
        .is_some_and(|v| v.carries_heavy_loads());
    if estimated_weight > HEAVY_LOAD && heavy_capable {
        VEHICLE_BONUS
    } else {
        0.0
    }
}
