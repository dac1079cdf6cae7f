use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{donation::StorageReq, geo::GeoPoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Donor,
    Ngo,
    Volunteer,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Donor => "donor",
            Role::Ngo => "ngo",
            Role::Volunteer => "volunteer",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "donor" => Ok(Role::Donor),
            "ngo" => Ok(Role::Ngo),
            "volunteer" => Ok(Role::Volunteer),
            "admin" => Ok(Role::Admin),
            other => anyhow::bail!("unknown role: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Pending,
    Deactivated,
    Rejected,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Pending => "pending",
            AccountStatus::Deactivated => "deactivated",
            AccountStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for AccountStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AccountStatus::Active),
            "pending" => Ok(AccountStatus::Pending),
            "deactivated" => Ok(AccountStatus::Deactivated),
            "rejected" => Ok(AccountStatus::Rejected),
            other => anyhow::bail!("unknown account status: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolunteerTier {
    Rookie,
    Hero,
    Champion,
}

impl VolunteerTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolunteerTier::Rookie => "rookie",
            VolunteerTier::Hero => "hero",
            VolunteerTier::Champion => "champion",
        }
    }

    /// Unknown or missing tiers rank as rookies.
    pub fn parse_or_default(s: Option<&str>) -> Self {
        match s {
            Some("champion") => VolunteerTier::Champion,
            Some("hero") => VolunteerTier::Hero,
            _ => VolunteerTier::Rookie,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleType {
    Bicycle,
    Scooter,
    Car,
    Van,
}

impl VehicleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleType::Bicycle => "bicycle",
            VehicleType::Scooter => "scooter",
            VehicleType::Car => "car",
            VehicleType::Van => "van",
        }
    }

    pub fn carries_heavy_loads(&self) -> bool {
        matches!(self, VehicleType::Car | VehicleType::Van)
    }
}

impl FromStr for VehicleType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bicycle" => Ok(VehicleType::Bicycle),
            "scooter" => Ok(VehicleType::Scooter),
            "car" => Ok(VehicleType::Car),
            "van" => Ok(VehicleType::Van),
            other => anyhow::bail!("unknown vehicle type: {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NgoProfile {
    pub daily_capacity: u32,
    pub storage_facilities: Vec<StorageReq>,
    pub is_urgent_need: bool,
}

impl NgoProfile {
    /// Donations without a storage requirement always fit.
    pub fn can_store(&self, req: Option<StorageReq>) -> bool {
        req.map_or(true, |r| self.storage_facilities.contains(&r))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolunteerProfile {
    pub tier: VolunteerTier,
    pub vehicle_type: Option<VehicleType>,
    pub max_weight: Option<f64>,
    pub current_location: Option<GeoPoint>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_location_update: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_mission_date: Option<OffsetDateTime>,
    pub is_online: bool,
    pub active_tasks: u32,
}

impl Default for VolunteerProfile {
    fn default() -> Self {
        Self {
            tier: VolunteerTier::Rookie,
            vehicle_type: None,
            max_weight: None,
            current_location: None,
            last_location_update: None,
            last_mission_date: None,
            is_online: false,
            active_tasks: 0,
        }
    }
}

/// Role plus the capability profile that role activates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", content = "profile", rename_all = "lowercase")]
pub enum Profile {
    Donor,
    Ngo(NgoProfile),
    Volunteer(VolunteerProfile),
    Admin,
}

impl Profile {
    pub fn role(&self) -> Role {
        match self {
            Profile::Donor => Role::Donor,
            Profile::Ngo(_) => Role::Ngo,
            Profile::Volunteer(_) => Role::Volunteer,
            Profile::Admin => Role::Admin,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub trust_score: f64,
    pub total_ratings: u32,
    pub completed_donations: u32,
    pub cancelled_donations: u32,
}

impl UserStats {
    /// Weighted running average of ratings.
    pub fn with_rating(&self, rating: f64) -> Self {
        let count = self.total_ratings as f64;
        Self {
            trust_score: (self.trust_score * count + rating) / (count + 1.0),
            total_ratings: self.total_ratings + 1,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(flatten)]
    pub profile: Profile,
    pub status: AccountStatus,
    pub organization: Option<String>,
    pub address: Option<String>,
    pub coordinates: Option<GeoPoint>,
    pub stats: UserStats,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl User {
    pub fn role(&self) -> Role {
        self.profile.role()
    }

    pub fn ngo(&self) -> Option<&NgoProfile> {
        match &self.profile {
            Profile::Ngo(p) => Some(p),
            _ => None,
        }
    }

    pub fn volunteer(&self) -> Option<&VolunteerProfile> {
        match &self.profile {
            Profile::Volunteer(p) => Some(p),
            _ => None,
        }
    }

    /// Where the user is right now: a volunteer's heartbeat position, else the
    /// registered coordinates.
    pub fn position(&self) -> Option<GeoPoint> {
        self.volunteer()
            .and_then(|v| v.current_location)
            .or(self.coordinates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_is_a_weighted_running_average() {
        let stats = UserStats {
            trust_score: 4.0,
            total_ratings: 1,
            ..Default::default()
        };
        let next = stats.with_rating(5.0);
        assert_eq!(next.trust_score, 4.5);
        assert_eq!(next.total_ratings, 2);

        let first = UserStats::default().with_rating(3.0);
        assert_eq!(first.trust_score, 3.0);
        assert_eq!(first.total_ratings, 1);
    }

    #[test]
    fn unknown_tier_defaults_to_rookie() {
        assert_eq!(VolunteerTier::parse_or_default(None), VolunteerTier::Rookie);
        assert_eq!(VolunteerTier::parse_or_default(Some("legend")), VolunteerTier::Rookie);
        assert_eq!(VolunteerTier::parse_or_default(Some("hero")), VolunteerTier::Hero);
    }

    #[test]
    fn storage_compatibility() {
        let ngo = NgoProfile {
            daily_capacity: 10,
            storage_facilities: vec![StorageReq::Dry, StorageReq::Cold],
            is_urgent_need: false,
        };
        assert!(ngo.can_store(None));
        assert!(ngo.can_store(Some(StorageReq::Cold)));
        assert!(!ngo.can_store(Some(StorageReq::Frozen)));
    }
}
