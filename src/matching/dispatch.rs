use std::sync::Arc;

use futures::future::try_join_all;
use serde::Serialize;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{
    scoring::{ngo_score, round2, vehicle_bonus, volunteer_score},
    urgency::{classify, Urgency},
};
use crate::{
    clock::Clock,
    config::DispatchConfig,
    domain::{
        AccountStatus, DeliveryStatus, Donation, DonationStatus, NgoProfile, Role, User,
    },
    error::{AppError, AppResult},
    store::{DonationFilter, Near, Store, UserFilter},
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NgoCandidate {
    pub ngo: User,
    pub distance_m: f64,
    pub unmet_need: u32,
    pub score: f64,
    pub urgency: Urgency,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationCandidate {
    pub donation: Donation,
    pub distance_m: f64,
    pub score: f64,
    pub urgency: Urgency,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VolunteerCandidate {
    pub volunteer: User,
    pub distance_m: f64,
    pub score: f64,
}

/// Ranks NGOs, donations and volunteers against each other. Read-only: state
/// changes go through the lifecycle.
pub struct Dispatcher {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, config: DispatchConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Remaining intake for today: capacity minus claims still in flight.
    pub async fn unmet_need(&self, ngo_id: Uuid, profile: &NgoProfile) -> AppResult<u32> {
        let filter = DonationFilter {
            statuses: vec![DonationStatus::Assigned],
            delivery: DeliveryStatus::ALL
                .into_iter()
                .filter(|d| *d != DeliveryStatus::Delivered)
                .collect(),
            claimed_by: Some(ngo_id),
            claimed_since: Some(self.clock.start_of_day()),
            ..Default::default()
        };
        let in_flight = self.store.count_donations(&filter).await?;
        Ok(profile
            .daily_capacity
            .saturating_sub(u32::try_from(in_flight).unwrap_or(u32::MAX)))
    }

    #[instrument(skip(self))]
    pub async fn best_ngos_for_donation(&self, donation_id: Uuid) -> AppResult<Vec<NgoCandidate>> {
        let donation = self
            .store
            .donation(donation_id)
            .await?
            .ok_or(AppError::NotFound("donation"))?;
        let urgency = classify(donation.expiry_date, self.clock.now());

        let filter = UserFilter {
            status: Some(AccountStatus::Active),
            storage: donation.storage_req,
            ..UserFilter::role(Role::Ngo)
        };
        let near = Near::new(donation.coordinates, self.config.ngo_radius_m);
        let ngos = self.store.users_near(near, &filter).await?;

        let scored = try_join_all(ngos.into_iter().map(|(ngo, distance_m)| async move {
            let profile = ngo.ngo().cloned().unwrap_or_default();
            let unmet_need = self.unmet_need(ngo.id, &profile).await?;
            let score = ngo_score(urgency, &profile, distance_m, unmet_need);
            Ok::<_, AppError>(NgoCandidate {
                ngo,
                distance_m,
                unmet_need,
                score,
                urgency,
            })
        }))
        .await?;

        let mut ranked = scored;
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        debug!(%donation_id, candidates = ranked.len(), "ranked ngos");
        Ok(ranked)
    }

    #[instrument(skip(self))]
    pub async fn best_donations_for_ngo(&self, ngo_id: Uuid) -> AppResult<Vec<DonationCandidate>> {
        let ngo = self
            .store
            .user(ngo_id)
            .await?
            .ok_or(AppError::NotFound("ngo"))?;
        let profile = ngo
            .ngo()
            .cloned()
            .ok_or_else(|| AppError::unauthorized("only NGOs can browse donations to claim"))?;
        let center = ngo
            .coordinates
            .filter(|c| !c.is_unset())
            .ok_or(AppError::CoordinatesNotSet)?;

        let now = self.clock.now();
        let filter = DonationFilter {
            statuses: vec![DonationStatus::Active],
            expiry_after: Some(now),
            storage_within: Some(profile.storage_facilities.clone()),
            ..Default::default()
        };
        let donations = self
            .store
            .donations_near(Near::new(center, self.config.ngo_radius_m), &filter)
            .await?;
        let unmet_need = self.unmet_need(ngo_id, &profile).await?;

        let mut ranked: Vec<DonationCandidate> = donations
            .into_iter()
            .map(|(donation, distance_m)| {
                let urgency = classify(donation.expiry_date, now);
                DonationCandidate {
                    score: ngo_score(urgency, &profile, distance_m, unmet_need),
                    donation,
                    distance_m,
                    urgency,
                }
            })
            .collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        debug!(%ngo_id, candidates = ranked.len(), "ranked donations");
        Ok(ranked)
    }

    /// Online, active, idle volunteers within `radius_m` (default radius when
    /// `None`), best first, at most `volunteer_top_n`.
    #[instrument(skip(self, donation), fields(donation_id = %donation.id))]
    pub async fn suitable_volunteers(
        &self,
        donation: &Donation,
        radius_m: Option<f64>,
    ) -> AppResult<Vec<VolunteerCandidate>> {
        let radius_m = radius_m.unwrap_or(self.config.volunteer_radius_m);
        let filter = UserFilter {
            status: Some(AccountStatus::Active),
            online: Some(true),
            ..UserFilter::role(Role::Volunteer)
        };
        let near = Near::new(donation.coordinates, radius_m);
        let (candidates, on_mission) = tokio::try_join!(
            self.store.users_near(near, &filter),
            self.store.volunteers_on_mission(),
        )?;

        let urgency = classify(donation.expiry_date, self.clock.now());
        let start_of_day = self.clock.start_of_day();
        let weight = donation.estimated_weight();

        let mut ranked: Vec<VolunteerCandidate> = candidates
            .into_iter()
            .filter(|(v, _)| !on_mission.contains(&v.id))
            .filter_map(|(volunteer, distance_m)| {
                let profile = volunteer.volunteer()?;
                let score = volunteer_score(profile, distance_m, urgency, start_of_day)
                    + vehicle_bonus(profile, weight);
                Some(VolunteerCandidate {
                    score: round2(score),
                    volunteer,
                    distance_m,
                })
            })
            .collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked.truncate(self.config.volunteer_top_n);
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Lifecycle, StorageReq};
    use crate::testutil::{donation_at, ngo_at, volunteer_at, Harness};
    use time::Duration;

    #[tokio::test]
    async fn ngos_are_filtered_by_storage_and_radius() {
        let h = Harness::new();
        let donor = h.add_donor().await;
        let now = h.clock.now();
        let mut d = donation_at(donor, 77.59, 12.97, now + Duration::hours(10), now);
        d.storage_req = Some(StorageReq::Cold);
        h.store.insert_donation(&d).await.unwrap();

        let cold = ngo_at("cold", 77.60, 12.98, 10, vec![StorageReq::Cold], now);
        let dry = ngo_at("dry", 77.60, 12.98, 10, vec![StorageReq::Dry], now);
        let far = ngo_at("far", 78.40, 12.98, 10, vec![StorageReq::Cold], now);
        for n in [&cold, &dry, &far] {
            h.store.insert_user(n).await.unwrap();
        }

        let ranked = h.dispatcher.best_ngos_for_donation(d.id).await.unwrap();
        let ids: Vec<Uuid> = ranked.iter().map(|c| c.ngo.id).collect();
        assert_eq!(ids, vec![cold.id]);
        assert_eq!(ranked[0].unmet_need, 10);
        assert_eq!(ranked[0].urgency.tier, 3);
    }

    #[tokio::test]
    async fn loaded_ngo_ranks_below_idle_one() {
        let h = Harness::new();
        let donor = h.add_donor().await;
        let now = h.clock.now();
        let d = donation_at(donor, 77.59, 12.97, now + Duration::hours(10), now);
        h.store.insert_donation(&d).await.unwrap();

        let busy = ngo_at("busy", 77.595, 12.97, 10, vec![], now);
        let idle = ngo_at("idle", 77.62, 12.97, 10, vec![], now);
        h.store.insert_user(&busy).await.unwrap();
        h.store.insert_user(&idle).await.unwrap();
        for _ in 0..9 {
            let mut claimed = donation_at(donor, 77.59, 12.97, now + Duration::hours(10), now);
            claimed.lifecycle = Lifecycle::assigned(DeliveryStatus::PendingPickup);
            claimed.claimed_by = Some(busy.id);
            claimed.claimed_at = Some(now);
            h.store.insert_donation(&claimed).await.unwrap();
        }

        let ranked = h.dispatcher.best_ngos_for_donation(d.id).await.unwrap();
        assert_eq!(ranked[0].ngo.id, idle.id);
        assert_eq!(ranked[1].unmet_need, 1);
    }

    #[tokio::test]
    async fn delivered_and_yesterdays_claims_do_not_count_against_capacity() {
        let h = Harness::new();
        let donor = h.add_donor().await;
        let now = h.clock.now();
        let ngo = ngo_at("n", 77.6, 12.9, 3, vec![], now);
        h.store.insert_user(&ngo).await.unwrap();

        let mut delivered = donation_at(donor, 77.59, 12.97, now + Duration::hours(10), now);
        delivered.lifecycle = Lifecycle::assigned(DeliveryStatus::Delivered);
        delivered.claimed_by = Some(ngo.id);
        delivered.claimed_at = Some(now);
        let mut yesterday = delivered.clone();
        yesterday.id = Uuid::new_v4();
        yesterday.lifecycle = Lifecycle::assigned(DeliveryStatus::InTransit);
        yesterday.claimed_at = Some(h.clock.start_of_day() - Duration::hours(1));
        let mut today = yesterday.clone();
        today.id = Uuid::new_v4();
        today.claimed_at = Some(now);
        for d in [&delivered, &yesterday, &today] {
            h.store.insert_donation(d).await.unwrap();
        }

        let unmet = h
            .dispatcher
            .unmet_need(ngo.id, ngo.ngo().unwrap())
            .await
            .unwrap();
        assert_eq!(unmet, 2);
    }

    #[tokio::test]
    async fn donations_for_ngo_require_coordinates() {
        let h = Harness::new();
        let now = h.clock.now();
        let mut ngo = ngo_at("nowhere", 77.6, 12.9, 5, vec![], now);
        ngo.coordinates = None;
        h.store.insert_user(&ngo).await.unwrap();
        let err = h.dispatcher.best_donations_for_ngo(ngo.id).await.unwrap_err();
        assert!(matches!(err, AppError::CoordinatesNotSet));
    }

    #[tokio::test]
    async fn donations_for_ngo_respect_storage_facilities() {
        let h = Harness::new();
        let donor = h.add_donor().await;
        let now = h.clock.now();
        let ngo = ngo_at("dry only", 77.6, 12.97, 5, vec![StorageReq::Dry], now);
        h.store.insert_user(&ngo).await.unwrap();

        let plain = donation_at(donor, 77.59, 12.97, now + Duration::hours(10), now);
        let mut frozen = donation_at(donor, 77.59, 12.97, now + Duration::hours(10), now);
        frozen.storage_req = Some(StorageReq::Frozen);
        let mut dry = donation_at(donor, 77.59, 12.97, now + Duration::hours(2) + Duration::minutes(30), now);
        dry.storage_req = Some(StorageReq::Dry);
        for d in [&plain, &frozen, &dry] {
            h.store.insert_donation(d).await.unwrap();
        }

        let ranked = h.dispatcher.best_donations_for_ngo(ngo.id).await.unwrap();
        let ids: Vec<Uuid> = ranked.iter().map(|c| c.donation.id).collect();
        // the near-expiry dry donation is critical and outranks the standard one
        assert_eq!(ids, vec![dry.id, plain.id]);
    }

    #[tokio::test]
    async fn donations_for_ngo_skip_expired_food() {
        let h = Harness::new();
        let donor = h.add_donor().await;
        let now = h.clock.now();
        let ngo = ngo_at("shelter", 77.6, 12.97, 5, vec![], now);
        h.store.insert_user(&ngo).await.unwrap();

        // still active because the expiry sweep has not run yet
        let stale = donation_at(donor, 77.59, 12.97, now - Duration::minutes(5), now - Duration::hours(3));
        let soon = donation_at(donor, 77.59, 12.97, now + Duration::hours(1), now);
        let fresh = donation_at(donor, 77.59, 12.97, now + Duration::hours(10), now);
        for d in [&stale, &soon, &fresh] {
            h.store.insert_donation(d).await.unwrap();
        }

        let ranked = h.dispatcher.best_donations_for_ngo(ngo.id).await.unwrap();
        let ids: Vec<Uuid> = ranked.iter().map(|c| c.donation.id).collect();
        assert!(!ids.contains(&stale.id));
        assert_eq!(ids.len(), 2);

        h.clock.advance(Duration::hours(2));
        let ranked = h.dispatcher.best_donations_for_ngo(ngo.id).await.unwrap();
        let ids: Vec<Uuid> = ranked.iter().map(|c| c.donation.id).collect();
        assert_eq!(ids, vec![fresh.id]);
    }

    #[tokio::test]
    async fn volunteer_ranking_combines_distance_and_tier() {
        let h = Harness::new();
        let donor = h.add_donor().await;
        let now = h.clock.now();
        let d = donation_at(donor, 77.5946, 12.9716, now + Duration::hours(10), now);
        h.store.insert_donation(&d).await.unwrap();

        use crate::domain::{Profile, VolunteerTier};
        let mut champion = volunteer_at("champion", 77.6009, 12.9716, now); // ~0.7 km
        let mut hero = volunteer_at("hero", 77.6666, 12.9716, now); // ~7.8 km
        let mut rookie = volunteer_at("rookie", 77.6084, 12.9716, now); // ~1.5 km
        for (u, tier) in [
            (&mut champion, VolunteerTier::Champion),
            (&mut hero, VolunteerTier::Hero),
            (&mut rookie, VolunteerTier::Rookie),
        ] {
            if let Profile::Volunteer(v) = &mut u.profile {
                v.tier = tier;
            }
            h.store.insert_user(u).await.unwrap();
        }

        let ranked = h.dispatcher.suitable_volunteers(&d, None).await.unwrap();
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].volunteer.id, champion.id);
        assert!((ranked[0].distance_m - 680.0).abs() < 60.0);
    }

    #[tokio::test]
    async fn busy_and_offline_volunteers_are_excluded() {
        let h = Harness::new();
        let donor = h.add_donor().await;
        let now = h.clock.now();
        let d = donation_at(donor, 77.59, 12.97, now + Duration::hours(10), now);
        h.store.insert_donation(&d).await.unwrap();

        let free = volunteer_at("free", 77.60, 12.97, now);
        let busy = volunteer_at("busy", 77.60, 12.97, now);
        let offline = volunteer_at("offline", 77.60, 12.97, now);
        for u in [&free, &busy, &offline] {
            h.store.insert_user(u).await.unwrap();
        }
        h.store.set_volunteer_online(offline.id, false).await.unwrap();

        let mut mission = donation_at(donor, 77.59, 12.97, now + Duration::hours(10), now);
        mission.lifecycle = Lifecycle::assigned(DeliveryStatus::HeadingToPickup);
        mission.volunteer = Some(busy.id);
        h.store.insert_donation(&mission).await.unwrap();

        let ranked = h.dispatcher.suitable_volunteers(&d, None).await.unwrap();
        let ids: Vec<Uuid> = ranked.iter().map(|c| c.volunteer.id).collect();
        assert_eq!(ids, vec![free.id]);
    }

    #[tokio::test]
    async fn heavy_donation_favours_vans() {
        let h = Harness::new();
        let donor = h.add_donor().await;
        let now = h.clock.now();
        let mut d = donation_at(donor, 77.59, 12.97, now + Duration::hours(4), now);
        d.quantity = crate::domain::Quantity::parse("40 kg");
        h.store.insert_donation(&d).await.unwrap();

        use crate::domain::{Profile, VehicleType};
        let bike = volunteer_at("bike", 77.595, 12.97, now);
        let mut van = volunteer_at("van", 77.61, 12.97, now);
        if let Profile::Volunteer(v) = &mut van.profile {
            v.vehicle_type = Some(VehicleType::Van);
        }
        h.store.insert_user(&bike).await.unwrap();
        h.store.insert_user(&van).await.unwrap();

        let ranked = h.dispatcher.suitable_volunteers(&d, None).await.unwrap();
        assert_eq!(ranked[0].volunteer.id, van.id);
    }
}
