//! Entity store: donations, users and notifications.
//!
//! State-changing donation writes go through [`Store::update_donation`], a
//! single conditional update: the guard is evaluated as part of the write and
//! a guard miss returns `None` instead of touching the record.

use std::collections::HashSet;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::{
    AccountStatus, DeliveryStatus, Donation, DonationStatus, GeoPoint, Lifecycle, Notification,
    Role, StorageReq, User, UserStats,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VolunteerGuard {
    #[default]
    Any,
    Unset,
    Is(Uuid),
}

/// Precondition of a conditional donation update. Empty lists match anything.
#[derive(Debug, Clone, Default)]
pub struct Guard {
    pub statuses: Vec<DonationStatus>,
    pub delivery: Vec<DeliveryStatus>,
    pub volunteer: VolunteerGuard,
    pub donor: Option<Uuid>,
    pub claimed_by: Option<Uuid>,
}

impl Guard {
    pub fn status_in(statuses: impl IntoIterator<Item = DonationStatus>) -> Self {
        Self {
            statuses: statuses.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn delivery_in(mut self, delivery: impl IntoIterator<Item = DeliveryStatus>) -> Self {
        self.delivery = delivery.into_iter().collect();
        self
    }

    pub fn volunteer(mut self, volunteer: VolunteerGuard) -> Self {
        self.volunteer = volunteer;
        self
    }

    pub fn donor(mut self, donor: Uuid) -> Self {
        self.donor = Some(donor);
        self
    }

    pub fn claimed_by(mut self, ngo: Uuid) -> Self {
        self.claimed_by = Some(ngo);
        self
    }

    pub fn matches(&self, d: &Donation) -> bool {
        let status_ok = self.statuses.is_empty() || self.statuses.contains(&d.status());
        let delivery_ok = self.delivery.is_empty()
            || d.delivery_status()
                .is_some_and(|ds| self.delivery.contains(&ds));
        let volunteer_ok = match self.volunteer {
            VolunteerGuard::Any => true,
            VolunteerGuard::Unset => d.volunteer.is_none(),
            VolunteerGuard::Is(id) => d.volunteer == Some(id),
        };
        let donor_ok = self.donor.map_or(true, |id| d.donor == id);
        let claimant_ok = self.claimed_by.map_or(true, |id| d.claimed_by == Some(id));
        status_ok && delivery_ok && volunteer_ok && donor_ok && claimant_ok
    }
}

/// Fields to write. `None` leaves a field untouched; the nested options
/// (`volunteer`, `estimated_arrival_at`, `dispatched_at`) use `Some(None)` to clear.
#[derive(Debug, Clone, Default)]
pub struct DonationPatch {
    pub lifecycle: Option<Lifecycle>,
    pub claimed_by: Option<Uuid>,
    pub claimed_at: Option<OffsetDateTime>,
    pub volunteer: Option<Option<Uuid>>,
    pub estimated_arrival_at: Option<Option<OffsetDateTime>>,
    pub pickup_photo: Option<String>,
    pub picked_up_at: Option<OffsetDateTime>,
    pub delivery_photo: Option<String>,
    pub delivery_notes: Option<String>,
    pub delivered_at: Option<OffsetDateTime>,
    pub dispatched_to: Option<Vec<Uuid>>,
    pub dispatched_at: Option<Option<OffsetDateTime>>,
}

impl DonationPatch {
    pub fn lifecycle(lifecycle: Lifecycle) -> Self {
        Self {
            lifecycle: Some(lifecycle),
            ..Default::default()
        }
    }

    pub fn apply(self, d: &mut Donation) {
        if let Some(v) = self.lifecycle {
            d.lifecycle = v;
        }
        if let Some(v) = self.claimed_by {
            d.claimed_by = Some(v);
        }
        if let Some(v) = self.claimed_at {
            d.claimed_at = Some(v);
        }
        if let Some(v) = self.volunteer {
            d.volunteer = v;
        }
        if let Some(v) = self.estimated_arrival_at {
            d.estimated_arrival_at = v;
        }
        if let Some(v) = self.pickup_photo {
            d.pickup_photo = Some(v);
        }
        if let Some(v) = self.picked_up_at {
            d.picked_up_at = Some(v);
        }
        if let Some(v) = self.delivery_photo {
            d.delivery_photo = Some(v);
        }
        if let Some(v) = self.delivery_notes {
            d.delivery_notes = Some(v);
        }
        if let Some(v) = self.delivered_at {
            d.delivered_at = Some(v);
        }
        if let Some(v) = self.dispatched_to {
            d.dispatched_to = v;
        }
        if let Some(v) = self.dispatched_at {
            d.dispatched_at = v;
        }
    }
}

/// Donation query. Unset fields match anything.
#[derive(Debug, Clone, Default)]
pub struct DonationFilter {
    pub statuses: Vec<DonationStatus>,
    pub delivery: Vec<DeliveryStatus>,
    pub donor: Option<Uuid>,
    pub volunteer: Option<Uuid>,
    pub claimed_by: Option<Uuid>,
    pub claimed_since: Option<OffsetDateTime>,
    pub claimed_before: Option<OffsetDateTime>,
    pub expiry_before: Option<OffsetDateTime>,
    pub expiry_after: Option<OffsetDateTime>,
    /// Donations with no storage requirement, or one of these.
    pub storage_within: Option<Vec<StorageReq>>,
}

impl DonationFilter {
    pub fn status(status: DonationStatus) -> Self {
        Self {
            statuses: vec![status],
            ..Default::default()
        }
    }

    pub fn matches(&self, d: &Donation) -> bool {
        let before = |v: Option<OffsetDateTime>, bound: Option<OffsetDateTime>| match bound {
            Some(b) => v.is_some_and(|v| v < b),
            None => true,
        };
        let since = |v: Option<OffsetDateTime>, bound: Option<OffsetDateTime>| match bound {
            Some(b) => v.is_some_and(|v| v >= b),
            None => true,
        };

        (self.statuses.is_empty() || self.statuses.contains(&d.status()))
            && (self.delivery.is_empty()
                || d.delivery_status()
                    .is_some_and(|ds| self.delivery.contains(&ds)))
            && self.donor.map_or(true, |id| d.donor == id)
            && self.volunteer.map_or(true, |id| d.volunteer == Some(id))
            && self.claimed_by.map_or(true, |id| d.claimed_by == Some(id))
            && since(d.claimed_at, self.claimed_since)
            && before(d.claimed_at, self.claimed_before)
            && before(Some(d.expiry_date), self.expiry_before)
            && self.expiry_after.map_or(true, |b| d.expiry_date > b)
            && self.storage_within.as_ref().map_or(true, |set| {
                d.storage_req.map_or(true, |req| set.contains(&req))
            })
    }
}

#[derive(Debug, Clone)]
pub struct UserFilter {
    pub role: Role,
    pub status: Option<AccountStatus>,
    pub online: Option<bool>,
    /// NGOs whose storage facilities include this requirement.
    pub storage: Option<StorageReq>,
}

impl UserFilter {
    pub fn role(role: Role) -> Self {
        Self {
            role,
            status: None,
            online: None,
            storage: None,
        }
    }

    pub fn matches(&self, u: &User) -> bool {
        u.role() == self.role
            && self.status.map_or(true, |s| u.status == s)
            && self
                .online
                .map_or(true, |online| u.volunteer().is_some_and(|v| v.is_online == online))
            && self.storage.map_or(true, |req| {
                u.ngo().is_some_and(|n| n.can_store(Some(req)))
            })
    }
}

/// Proximity query: everything within `radius_m` of `center`.
#[derive(Debug, Clone, Copy)]
pub struct Near {
    pub center: GeoPoint,
    pub radius_m: f64,
}

impl Near {
    pub fn new(center: GeoPoint, radius_m: f64) -> Self {
        Self { center, radius_m }
    }

    /// Distance to `point` if it lies inside the radius.
    pub fn distance_to(&self, point: Option<GeoPoint>) -> Option<f64> {
        let point = point.filter(|p| !p.is_unset())?;
        let d = self.center.distance_m(&point);
        (d <= self.radius_m).then_some(d)
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Writes the donation as given, lifecycle fields included.
    async fn insert_donation(&self, donation: &Donation) -> anyhow::Result<()>;
    async fn donation(&self, id: Uuid) -> anyhow::Result<Option<Donation>>;

    /// Atomically apply `patch` if `guard` still holds. `None` when the
    /// donation is missing or the guard no longer matches.
    async fn update_donation(
        &self,
        id: Uuid,
        guard: &Guard,
        patch: DonationPatch,
    ) -> anyhow::Result<Option<Donation>>;

    /// Matches in insertion order.
    async fn list_donations(&self, filter: &DonationFilter) -> anyhow::Result<Vec<Donation>>;
    async fn count_donations(&self, filter: &DonationFilter) -> anyhow::Result<u64>;

    /// Matches inside the radius, nearest first, with their distance in meters.
    async fn donations_near(
        &self,
        near: Near,
        filter: &DonationFilter,
    ) -> anyhow::Result<Vec<(Donation, f64)>>;

    async fn insert_user(&self, user: &User) -> anyhow::Result<()>;
    async fn user(&self, id: Uuid) -> anyhow::Result<Option<User>>;

    /// Users whose position lies inside the radius, nearest first.
    async fn users_near(&self, near: Near, filter: &UserFilter) -> anyhow::Result<Vec<(User, f64)>>;

    /// Volunteers referenced by an assigned donation whose courier progress is
    /// neither idle nor delivered.
    async fn volunteers_on_mission(&self) -> anyhow::Result<HashSet<Uuid>>;

    /// Heartbeat: position, timestamp and online flag in one write.
    async fn update_volunteer_location(
        &self,
        id: Uuid,
        location: GeoPoint,
        at: OffsetDateTime,
    ) -> anyhow::Result<bool>;
    async fn set_volunteer_online(&self, id: Uuid, online: bool) -> anyhow::Result<bool>;

    /// Bump the active-task count and stamp the mission date.
    async fn record_mission_start(&self, id: Uuid, at: OffsetDateTime) -> anyhow::Result<()>;

    /// Add `delta` to the active-task count, floored at zero.
    async fn adjust_active_tasks(&self, id: Uuid, delta: i32) -> anyhow::Result<()>;

    /// Fold a rating into the weighted trust score; returns the new stats.
    async fn record_rating(&self, id: Uuid, rating: f64) -> anyhow::Result<Option<UserStats>>;
    async fn increment_completed(&self, id: Uuid) -> anyhow::Result<()>;
    async fn increment_cancelled(&self, id: Uuid) -> anyhow::Result<()>;

    async fn insert_notification(&self, notification: &Notification) -> anyhow::Result<()>;
    async fn notifications_for(&self, recipient: Uuid, limit: i64)
        -> anyhow::Result<Vec<Notification>>;
    async fn mark_notification_read(&self, id: Uuid, recipient: Uuid) -> anyhow::Result<bool>;
}
