//! Fixtures shared by the unit tests.

use std::sync::Arc;

use time::{macros::datetime, Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{
    auth::Actor,
    clock::{Clock, ManualClock},
    config::DispatchConfig,
    domain::{
        AccountStatus, Donation, FoodCategory, GeoPoint, Lifecycle, NgoProfile, Perishability,
        PickupWindow, Profile, Quantity, Role, StorageReq, User, UserStats, VolunteerProfile,
    },
    lifecycle::LifecycleService,
    matching::Dispatcher,
    notify::{Notifier, StoreNotifier},
    store::{MemoryStore, Store},
};

fn user(name: &str, profile: Profile, coordinates: Option<GeoPoint>) -> User {
    let id = Uuid::new_v4();
    User {
        id,
        name: name.to_string(),
        email: format!("{}+{}@example.org", name.replace(' ', "."), id.simple()),
        profile,
        status: AccountStatus::Active,
        organization: None,
        address: None,
        coordinates,
        stats: UserStats::default(),
        created_at: datetime!(2026-01-01 0:00 UTC),
    }
}

pub fn donor(name: &str) -> User {
    user(name, Profile::Donor, Some(GeoPoint::new(77.59, 12.97)))
}

pub fn ngo_at(
    name: &str,
    lng: f64,
    lat: f64,
    daily_capacity: u32,
    storage_facilities: Vec<StorageReq>,
    _now: OffsetDateTime,
) -> User {
    let profile = NgoProfile {
        daily_capacity,
        storage_facilities,
        is_urgent_need: false,
    };
    user(name, Profile::Ngo(profile), Some(GeoPoint::new(lng, lat)))
}

/// Online, idle volunteer whose heartbeat was just received.
pub fn volunteer_at(name: &str, lng: f64, lat: f64, now: OffsetDateTime) -> User {
    let point = GeoPoint::new(lng, lat);
    let profile = VolunteerProfile {
        current_location: Some(point),
        last_location_update: Some(now),
        is_online: true,
        ..Default::default()
    };
    user(name, Profile::Volunteer(profile), Some(point))
}

/// Active donation at the given point with a one-hour pickup window.
pub fn donation_at(
    donor: Uuid,
    lng: f64,
    lat: f64,
    expiry: OffsetDateTime,
    now: OffsetDateTime,
) -> Donation {
    Donation {
        id: Uuid::new_v4(),
        donor,
        title: "Surplus lunch".into(),
        description: "Sealed trays".into(),
        food_type: "meal".into(),
        quantity: Quantity::parse("10 kg"),
        perishability: Perishability::High,
        food_category: FoodCategory::Cooked,
        storage_req: None,
        allergens: vec![],
        dietary_tags: vec![],
        expiry_date: expiry,
        pickup_window: PickupWindow {
            start: now,
            end: now + Duration::hours(1),
        },
        coordinates: GeoPoint::new(lng, lat),
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
        dispatched_to: vec![],
        dispatched_at: None,
        created_at: now,
    }
}

/// In-memory wiring of the core on a manual clock.
pub struct Harness {
    pub store: Arc<dyn Store>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<dyn Notifier>,
    pub dispatcher: Arc<Dispatcher>,
    pub lifecycle: Arc<LifecycleService>,
}

impl Harness {
    pub fn new() -> Self {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(datetime!(2026-10-17 14:00 UTC)));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let notifier: Arc<dyn Notifier> =
            Arc::new(StoreNotifier::new(store.clone(), dyn_clock.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            dyn_clock.clone(),
            DispatchConfig::default(),
        ));
        let lifecycle = Arc::new(LifecycleService::new(
            store.clone(),
            notifier.clone(),
            dyn_clock,
        ));
        Self {
            store,
            clock,
            notifier,
            dispatcher,
            lifecycle,
        }
    }

    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    pub async fn add_donor(&self) -> Uuid {
        let d = donor("corner bakery");
        self.store.insert_user(&d).await.unwrap();
        d.id
    }

    pub async fn add_ngo(&self, lng: f64, lat: f64) -> Uuid {
        let n = ngo_at("shelter", lng, lat, 10, vec![], self.now());
        self.store.insert_user(&n).await.unwrap();
        n.id
    }

    pub async fn add_volunteer(&self, lng: f64, lat: f64) -> Uuid {
        let v = volunteer_at("rider", lng, lat, self.now());
        self.store.insert_user(&v).await.unwrap();
        v.id
    }
}

pub fn actor(id: Uuid, role: Role) -> Actor {
    Actor::new(id, role)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn harness_holds_several_users_per_role() {
        let h = Harness::new();
        let donors = [h.add_donor().await, h.add_donor().await];
        let ngos = [h.add_ngo(77.6, 12.97).await, h.add_ngo(77.6, 12.98).await];
        let riders = [
            h.add_volunteer(77.59, 12.97).await,
            h.add_volunteer(77.59, 12.98).await,
        ];
        for id in donors.iter().chain(&ngos).chain(&riders) {
            assert!(h.store.user(*id).await.unwrap().is_some());
        }
        assert_ne!(donor("bakery").email, donor("bakery").email);
    }
}
