use std::{fmt, str::FromStr};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use super::geo::GeoPoint;
use crate::error::AppError;

/// Minimum time between creation and expiry.
pub const MIN_SAFETY_MARGIN: Duration = Duration::hours(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageReq {
    Cold,
    Dry,
    Frozen,
}

impl StorageReq {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageReq::Cold => "cold",
            StorageReq::Dry => "dry",
            StorageReq::Frozen => "frozen",
        }
    }
}

impl FromStr for StorageReq {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cold" => Ok(StorageReq::Cold),
            "dry" => Ok(StorageReq::Dry),
            "frozen" => Ok(StorageReq::Frozen),
            other => anyhow::bail!("unknown storage requirement: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Perishability {
    High,
    Medium,
    Low,
}

impl Perishability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Perishability::High => "high",
            Perishability::Medium => "medium",
            Perishability::Low => "low",
        }
    }
}

impl FromStr for Perishability {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Perishability::High),
            "medium" => Ok(Perishability::Medium),
            "low" => Ok(Perishability::Low),
            other => anyhow::bail!("unknown perishability: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FoodCategory {
    Cooked,
    Raw,
    Packaged,
}

impl FoodCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FoodCategory::Cooked => "cooked",
            FoodCategory::Raw => "raw",
            FoodCategory::Packaged => "packaged",
        }
    }
}

impl FromStr for FoodCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cooked" => Ok(FoodCategory::Cooked),
            "raw" => Ok(FoodCategory::Raw),
            "packaged" => Ok(FoodCategory::Packaged),
            other => anyhow::bail!("unknown food category: {other}"),
        }
    }
}

/// Courier progress while a donation is assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Idle,
    PendingPickup,
    HeadingToPickup,
    AtPickup,
    PickedUp,
    InTransit,
    ArrivedAtDelivery,
    Delivered,
}

impl DeliveryStatus {
    pub const ALL: [DeliveryStatus; 8] = [
        DeliveryStatus::Idle,
        DeliveryStatus::PendingPickup,
        DeliveryStatus::HeadingToPickup,
        DeliveryStatus::AtPickup,
        DeliveryStatus::PickedUp,
        DeliveryStatus::InTransit,
        DeliveryStatus::ArrivedAtDelivery,
        DeliveryStatus::Delivered,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Idle => "idle",
            DeliveryStatus::PendingPickup => "pending_pickup",
            DeliveryStatus::HeadingToPickup => "heading_to_pickup",
            DeliveryStatus::AtPickup => "at_pickup",
            DeliveryStatus::PickedUp => "picked_up",
            DeliveryStatus::InTransit => "in_transit",
            DeliveryStatus::ArrivedAtDelivery => "arrived_at_delivery",
            DeliveryStatus::Delivered => "delivered",
        }
    }

    /// A courier is working this mission.
    pub fn is_in_flight(&self) -> bool {
        !matches!(self, DeliveryStatus::Idle | DeliveryStatus::Delivered)
    }

    /// Statuses a volunteer may set through the generic progress update.
    pub fn is_progress_target(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::HeadingToPickup
                | DeliveryStatus::AtPickup
                | DeliveryStatus::InTransit
                | DeliveryStatus::ArrivedAtDelivery
        )
    }

    /// States from which a progress update may move to `self`. Progress only
    /// moves forward, and never across pickup: that takes the pickup action.
    pub fn progress_sources(&self) -> &'static [DeliveryStatus] {
        match self {
            DeliveryStatus::HeadingToPickup => &[DeliveryStatus::PendingPickup],
            DeliveryStatus::AtPickup => {
                &[DeliveryStatus::PendingPickup, DeliveryStatus::HeadingToPickup]
            }
            DeliveryStatus::InTransit => &[DeliveryStatus::PickedUp],
            DeliveryStatus::ArrivedAtDelivery => {
                &[DeliveryStatus::PickedUp, DeliveryStatus::InTransit]
            }
            _ => &[],
        }
    }

    /// Courier states in which the food is still at the donor.
    pub const BEFORE_PICKUP: [DeliveryStatus; 3] = [
        DeliveryStatus::PendingPickup,
        DeliveryStatus::HeadingToPickup,
        DeliveryStatus::AtPickup,
    ];

    /// Courier states in which the food is on its way to the NGO.
    pub const CARRYING: [DeliveryStatus; 3] = [
        DeliveryStatus::PickedUp,
        DeliveryStatus::InTransit,
        DeliveryStatus::ArrivedAtDelivery,
    ];
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = anyhow::Error;

    /// Accepts hyphenated and spaced spellings ("picked-up", "in transit").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        DeliveryStatus::ALL
            .into_iter()
            .find(|d| d.as_str() == normalized)
            .ok_or_else(|| anyhow::anyhow!("unknown delivery status: {s}"))
    }
}

/// Outer lifecycle state as stored in the `status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DonationStatus {
    Active,
    Assigned,
    Completed,
    Cancelled,
    Expired,
    Rejected,
}

impl DonationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DonationStatus::Active => "active",
            DonationStatus::Assigned => "assigned",
            DonationStatus::Completed => "completed",
            DonationStatus::Cancelled => "cancelled",
            DonationStatus::Expired => "expired",
            DonationStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, DonationStatus::Active | DonationStatus::Assigned)
    }
}

impl fmt::Display for DonationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DonationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(DonationStatus::Active),
            "assigned" => Ok(DonationStatus::Assigned),
            "completed" => Ok(DonationStatus::Completed),
            "cancelled" => Ok(DonationStatus::Cancelled),
            "expired" => Ok(DonationStatus::Expired),
            "rejected" => Ok(DonationStatus::Rejected),
            other => anyhow::bail!("unknown donation status: {other}"),
        }
    }
}

/// Donation lifecycle. Courier progress only exists inside `Assigned` and the
/// rejection reason only inside `Rejected`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Lifecycle {
    Active,
    Assigned {
        #[serde(rename = "deliveryStatus")]
        delivery_status: DeliveryStatus,
    },
    Completed,
    Cancelled,
    Expired,
    Rejected {
        #[serde(rename = "rejectionReason")]
        rejection_reason: String,
    },
}

impl Lifecycle {
    pub fn status(&self) -> DonationStatus {
        match self {
            Lifecycle::Active => DonationStatus::Active,
            Lifecycle::Assigned { .. } => DonationStatus::Assigned,
            Lifecycle::Completed => DonationStatus::Completed,
            Lifecycle::Cancelled => DonationStatus::Cancelled,
            Lifecycle::Expired => DonationStatus::Expired,
            Lifecycle::Rejected { .. } => DonationStatus::Rejected,
        }
    }

    pub fn delivery_status(&self) -> Option<DeliveryStatus> {
        match self {
            Lifecycle::Assigned { delivery_status } => Some(*delivery_status),
            _ => None,
        }
    }

    pub fn assigned(delivery_status: DeliveryStatus) -> Self {
        Lifecycle::Assigned { delivery_status }
    }

    /// Rebuild from the flat `status`/`delivery_status`/`rejection_reason` columns.
    pub fn from_columns(
        status: &str,
        delivery_status: Option<&str>,
        rejection_reason: Option<String>,
    ) -> anyhow::Result<Self> {
        Ok(match status.parse::<DonationStatus>()? {
            DonationStatus::Active => Lifecycle::Active,
            DonationStatus::Assigned => Lifecycle::Assigned {
                delivery_status: delivery_status
                    .map(str::parse)
                    .transpose()?
                    .unwrap_or(DeliveryStatus::Idle),
            },
            DonationStatus::Completed => Lifecycle::Completed,
            DonationStatus::Cancelled => Lifecycle::Cancelled,
            DonationStatus::Expired => Lifecycle::Expired,
            DonationStatus::Rejected => Lifecycle::Rejected {
                rejection_reason: rejection_reason.unwrap_or_default(),
            },
        })
    }

    /// Human-readable state used in transition errors.
    pub fn describe(&self) -> String {
        match self {
            Lifecycle::Assigned { delivery_status } => format!("assigned/{delivery_status}"),
            other => other.status().to_string(),
        }
    }
}

lazy_static! {
    static ref NUMBER_RE: Regex = Regex::new(r"\d+(?:[.,]\d+)*").unwrap();
    static ref GROUPED_RE: Regex = Regex::new(r"^\d{1,3}(?:,\d{3})+(?:\.\d+)?$").unwrap();
}

/// "1,000" and "1,250.5" use commas as thousands separators; any other
/// comma is a decimal point ("2,5").
fn magnitude(number: &str) -> f64 {
    let normalized = if GROUPED_RE.is_match(number) {
        number.replace(',', "")
    } else {
        let mut parts = number.splitn(3, ['.', ',']);
        match (parts.next(), parts.next()) {
            (Some(int), Some(frac)) => format!("{int}.{frac}"),
            (Some(int), None) => int.to_string(),
            _ => String::new(),
        }
    };
    normalized.parse().unwrap_or(0.0)
}

/// Quantity text split into its numeric magnitude and the remaining unit text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub raw: String,
    pub magnitude: f64,
    pub unit: String,
}

impl Quantity {
    /// Text without a number parses to magnitude 0.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim().to_string();
        let (magnitude, unit) = match NUMBER_RE.find(&raw) {
            Some(m) => {
                let unit = format!("{}{}", &raw[..m.start()], &raw[m.end()..]);
                (self::magnitude(m.as_str()), unit.trim().to_string())
            }
            None => (0.0, raw.clone()),
        };
        Self {
            raw,
            magnitude,
            unit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct RawWindow {
    #[serde(with = "time::serde::rfc3339")]
    start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    end: OffsetDateTime,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WindowRepr {
    Object(RawWindow),
    Encoded(String),
}

/// Pickup window. Accepts an object or a JSON-encoded string of one
/// (multipart form submissions send the latter).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WindowRepr")]
pub struct PickupWindow {
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end: OffsetDateTime,
}

impl TryFrom<WindowRepr> for PickupWindow {
    type Error = String;

    fn try_from(repr: WindowRepr) -> Result<Self, Self::Error> {
        let raw = match repr {
            WindowRepr::Object(raw) => raw,
            WindowRepr::Encoded(s) => serde_json::from_str::<RawWindow>(&s)
                .map_err(|e| format!("invalid pickupWindow: {e}"))?,
        };
        Ok(PickupWindow {
            start: raw.start,
            end: raw.end,
        })
    }
}

/// Validated input for a new donation.
#[derive(Debug, Clone)]
pub struct NewDonation {
    pub title: String,
    pub description: String,
    pub food_type: String,
    pub quantity: Quantity,
    pub perishability: Perishability,
    pub food_category: FoodCategory,
    pub storage_req: Option<StorageReq>,
    pub allergens: Vec<String>,
    pub dietary_tags: Vec<String>,
    pub expiry_date: OffsetDateTime,
    pub pickup_window: PickupWindow,
    pub coordinates: GeoPoint,
}

impl NewDonation {
    pub fn validate(&self, now: OffsetDateTime) -> Result<(), AppError> {
        if self.title.trim().is_empty() {
            return Err(AppError::Validation("title is required".into()));
        }
        if self.coordinates.is_unset() {
            return Err(AppError::Validation("pickup coordinates are required".into()));
        }
        if self.expiry_date - now <= MIN_SAFETY_MARGIN {
            return Err(AppError::Validation(
                "expiry date must be at least 2 hours from now".into(),
            ));
        }
        if self.pickup_window.end <= self.pickup_window.start {
            return Err(AppError::Validation(
                "pickup window must end after it starts".into(),
            ));
        }
        if self.pickup_window.end >= self.expiry_date {
            return Err(AppError::Validation(
                "pickup window must end before the food expires".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Donation {
    pub id: Uuid,
    pub donor: Uuid,
    pub title: String,
    pub description: String,
    pub food_type: String,
    pub quantity: Quantity,
    pub perishability: Perishability,
    pub food_category: FoodCategory,
    pub storage_req: Option<StorageReq>,
    pub allergens: Vec<String>,
    pub dietary_tags: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub expiry_date: OffsetDateTime,
    pub pickup_window: PickupWindow,
    pub coordinates: GeoPoint,
    #[serde(flatten)]
    pub lifecycle: Lifecycle,
    pub claimed_by: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub claimed_at: Option<OffsetDateTime>,
    pub volunteer: Option<Uuid>,
    pub pickup_photo: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub picked_up_at: Option<OffsetDateTime>,
    pub delivery_photo: Option<String>,
    pub delivery_notes: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub delivered_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub estimated_arrival_at: Option<OffsetDateTime>,
    pub dispatched_to: Vec<Uuid>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub dispatched_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Donation {
    pub fn create(donor: Uuid, input: NewDonation, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            donor,
            title: input.title,
            description: input.description,
            food_type: input.food_type,
            quantity: input.quantity,
            perishability: input.perishability,
            food_category: input.food_category,
            storage_req: input.storage_req,
            allergens: input.allergens,
            dietary_tags: input.dietary_tags,
            expiry_date: input.expiry_date,
            pickup_window: input.pickup_window,
            coordinates: input.coordinates,
            lifecycle: Lifecycle::Active,
            claimed_by: None,
            claimed_at: None,
            volunteer: None,
            pickup_photo: None,
            picked_up_at: None,
            delivery_photo: None,
            delivery_notes: None,
            delivered_at: None,
            estimated_arrival_at: None,
            dispatched_to: Vec::new(),
            dispatched_at: None,
            created_at: now,
        }
    }

    pub fn status(&self) -> DonationStatus {
        self.lifecycle.status()
    }

    pub fn delivery_status(&self) -> Option<DeliveryStatus> {
        self.lifecycle.delivery_status()
    }

    /// Weight estimate used by the vehicle bonus.
    pub fn estimated_weight(&self) -> f64 {
        self.quantity.magnitude
    }
}
