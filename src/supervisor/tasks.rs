use std::{sync::Arc, time::Duration};

use tracing::{debug, error, info, warn};

use super::Task;
use crate::{
    clock::Clock,
    config::DispatchConfig,
    domain::{DeliveryStatus, Donation, DonationStatus},
    error::AppResult,
    lifecycle::{LifecycleService, StallReason},
    matching::Dispatcher,
    store::{DonationFilter, Store},
};

const PING_TIMEOUT: Duration = Duration::from_secs(10);

/// Dependencies of the periodic tasks.
pub struct Jobs {
    pub store: Arc<dyn Store>,
    pub lifecycle: Arc<LifecycleService>,
    pub dispatcher: Arc<Dispatcher>,
    pub clock: Arc<dyn Clock>,
    pub config: DispatchConfig,
    /// Health endpoint to ping; `None` disables the ping.
    pub ping_url: Option<String>,
    pub http: reqwest::Client,
}

impl Jobs {
    pub async fn run(&self, task: Task) -> AppResult<usize> {
        let acted = match task {
            Task::StallDetector => self.detect_stalls().await?,
            Task::ExpirationWatchdog => self.expire_donations().await?,
            Task::RadiusEscalation => self.escalate().await?,
            Task::HeartbeatPing => self.ping().await,
        };
        debug!(task = task.name(), acted, "supervisor pass finished");
        Ok(acted)
    }

    /// Why `d`'s courier should lose the mission, if they should.
    async fn stall_reason(&self, d: &Donation) -> AppResult<Option<StallReason>> {
        let Some(volunteer_id) = d.volunteer else {
            return Ok(None);
        };
        let now = self.clock.now();
        let heartbeat = self
            .store
            .user(volunteer_id)
            .await?
            .and_then(|u| u.volunteer().and_then(|v| v.last_location_update));
        if heartbeat.map_or(true, |at| now - at > self.config.heartbeat_timeout) {
            return Ok(Some(StallReason::HeartbeatTimeout));
        }
        if d
            .estimated_arrival_at
            .is_some_and(|eta| now - eta > self.config.eta_grace)
        {
            return Ok(Some(StallReason::EtaViolation));
        }
        Ok(None)
    }

    async fn detect_stalls(&self) -> AppResult<usize> {
        let filter = DonationFilter {
            delivery: DeliveryStatus::ALL
                .into_iter()
                .filter(DeliveryStatus::is_in_flight)
                .collect(),
            ..DonationFilter::status(DonationStatus::Assigned)
        };
        let missions = self.store.list_donations(&filter).await?;
        let mut reassigned = 0;
        for d in &missions {
            let outcome = async {
                let Some(reason) = self.stall_reason(d).await? else {
                    return Ok(false);
                };
                let Some(volunteer) = d.volunteer else {
                    return Ok(false);
                };
                let moved = self.lifecycle.reassign_mission(d.id, volunteer, reason).await?;
                AppResult::Ok(moved.is_some())
            }
            .await;
            match outcome {
                Ok(true) => reassigned += 1,
                Ok(false) => {}
                Err(e) => error!(donation_id = %d.id, error = %e, "stall check failed"),
            }
        }
        info!(checked = missions.len(), reassigned, "stall detector pass");
        Ok(reassigned)
    }

    async fn expire_donations(&self) -> AppResult<usize> {
        let filter = DonationFilter {
            expiry_before: Some(self.clock.now()),
            ..DonationFilter::status(DonationStatus::Active)
        };
        let overdue = self.store.list_donations(&filter).await?;
        let mut expired = 0;
        for d in &overdue {
            match self.lifecycle.expire(d.id).await {
                Ok(Some(_)) => expired += 1,
                Ok(None) => {}
                Err(e) => error!(donation_id = %d.id, error = %e, "expiry failed"),
            }
        }
        info!(expired, "expiration watchdog pass");
        Ok(expired)
    }

    /// Claimed but courier-less for too long: page the best volunteers in a
    /// wider radius. While nobody accepts, the search repeats once the last
    /// page is `escalation_delay` old, paging only volunteers not asked yet.
    async fn escalate(&self) -> AppResult<usize> {
        let now = self.clock.now();
        let repage_before = now - self.config.escalation_delay;
        let filter = DonationFilter {
            delivery: vec![DeliveryStatus::Idle],
            claimed_before: Some(repage_before),
            ..DonationFilter::status(DonationStatus::Assigned)
        };
        let waiting = self.store.list_donations(&filter).await?;
        let mut escalated = 0;
        for d in waiting.iter().filter(|d| {
            d.volunteer.is_none() && d.dispatched_at.map_or(true, |at| at <= repage_before)
        }) {
            let outcome = async {
                let candidates = self
                    .dispatcher
                    .suitable_volunteers(d, Some(self.config.escalation_radius_m))
                    .await?;
                let picked: Vec<_> = candidates
                    .iter()
                    .map(|c| c.volunteer.id)
                    .filter(|id| !d.dispatched_to.contains(id))
                    .take(self.config.escalation_fan_out)
                    .collect();
                if picked.is_empty() {
                    warn!(donation_id = %d.id, "no new volunteer within the escalation radius");
                    return Ok(false);
                }
                let sent = self.lifecycle.record_dispatch(d, picked).await?;
                AppResult::Ok(sent.is_some())
            }
            .await;
            match outcome {
                Ok(true) => escalated += 1,
                Ok(false) => {}
                Err(e) => error!(donation_id = %d.id, error = %e, "escalation failed"),
            }
        }
        info!(escalated, "radius escalation pass");
        Ok(escalated)
    }

    /// Keep-alive request against our own health endpoint.
    async fn ping(&self) -> usize {
        let Some(url) = &self.ping_url else {
            return 0;
        };
        match self.http.get(url).timeout(PING_TIMEOUT).send().await {
            Ok(res) => {
                debug!(status = %res.status(), "heartbeat ping");
                1
            }
            Err(e) => {
                warn!(error = %e, "heartbeat ping failed");
                0
            }
        }
    }
}

#[cfg(test)]
impl Jobs {
    pub fn for_harness(h: &crate::testutil::Harness) -> Self {
        Self {
            store: h.store.clone(),
            lifecycle: h.lifecycle.clone(),
            dispatcher: h.dispatcher.clone(),
            clock: h.clock.clone(),
            config: DispatchConfig::default(),
            ping_url: None,
            http: reqwest::Client::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::Actor,
        domain::{Lifecycle, NotificationKind, Role},
        supervisor::Supervisor,
        testutil::{actor, donation_at, Harness},
    };
    use time::Duration;
    use uuid::Uuid;

    struct Mission {
        donation: Uuid,
        volunteer: Actor,
        ngo: Actor,
    }

    async fn accepted_mission(h: &Harness) -> Mission {
        let now = h.now();
        let donor = h.add_donor().await;
        let ngo = actor(h.add_ngo(77.60, 12.98).await, Role::Ngo);
        let volunteer = actor(h.add_volunteer(77.59, 12.97).await, Role::Volunteer);
        let d = donation_at(donor, 77.59, 12.97, now + Duration::hours(8), now);
        h.store.insert_donation(&d).await.unwrap();
        h.lifecycle.claim(&ngo, d.id).await.unwrap();
        h.lifecycle.accept_mission(&volunteer, d.id).await.unwrap();
        Mission {
            donation: d.id,
            volunteer,
            ngo,
        }
    }

    #[tokio::test]
    async fn stale_heartbeat_triggers_reassignment() {
        let h = Harness::new();
        let m = accepted_mission(&h).await;
        let supervisor = Supervisor::new(Jobs::for_harness(&h));

        h.clock.advance(Duration::minutes(10));
        assert_eq!(supervisor.run_once(Task::StallDetector).await.unwrap(), 0);

        h.clock.advance(Duration::minutes(10));
        assert_eq!(supervisor.run_once(Task::StallDetector).await.unwrap(), 1);

        let d = h.store.donation(m.donation).await.unwrap().unwrap();
        assert_eq!(d.status(), DonationStatus::Assigned);
        assert_eq!(d.delivery_status(), Some(DeliveryStatus::Idle));
        assert_eq!(d.volunteer, None);
        assert_eq!(d.claimed_by, Some(m.ngo.id));

        let inbox = h.store.notifications_for(m.volunteer.id, 10).await.unwrap();
        assert!(inbox
            .iter()
            .any(|n| n.kind == NotificationKind::MissionReassigned));
    }

    #[tokio::test]
    async fn overdue_eta_triggers_reassignment() {
        let h = Harness::new();
        let m = accepted_mission(&h).await;
        let supervisor = Supervisor::new(Jobs::for_harness(&h));
        let eta = h.now() + Duration::minutes(5);
        h.lifecycle.set_eta(&m.volunteer, m.donation, eta).await.unwrap();

        // heartbeats keep coming; only the ETA is missed
        h.clock.advance(Duration::minutes(15));
        let location = crate::domain::GeoPoint::new(77.59, 12.97);
        h.store
            .update_volunteer_location(m.volunteer.id, location, h.now())
            .await
            .unwrap();
        assert_eq!(supervisor.run_once(Task::StallDetector).await.unwrap(), 0);

        h.clock.advance(Duration::minutes(12));
        h.store
            .update_volunteer_location(m.volunteer.id, location, h.now())
            .await
            .unwrap();
        assert_eq!(supervisor.run_once(Task::StallDetector).await.unwrap(), 1);
        let d = h.store.donation(m.donation).await.unwrap().unwrap();
        assert_eq!(d.estimated_arrival_at, None);
    }

    #[tokio::test]
    async fn watchdog_expires_only_active_donations() {
        let h = Harness::new();
        let now = h.now();
        let donor = h.add_donor().await;
        let open = donation_at(donor, 77.59, 12.97, now + Duration::hours(3), now);
        let mut claimed = donation_at(donor, 77.59, 12.97, now + Duration::hours(3), now);
        claimed.lifecycle = Lifecycle::assigned(DeliveryStatus::Idle);
        let fresh = donation_at(donor, 77.59, 12.97, now + Duration::hours(9), now);
        for d in [&open, &claimed, &fresh] {
            h.store.insert_donation(d).await.unwrap();
        }
        let supervisor = Supervisor::new(Jobs::for_harness(&h));

        h.clock.advance(Duration::hours(4));
        assert_eq!(supervisor.run_once(Task::ExpirationWatchdog).await.unwrap(), 1);
        // idempotent
        assert_eq!(supervisor.run_once(Task::ExpirationWatchdog).await.unwrap(), 0);

        let status = |id| {
            let store = h.store.clone();
            async move { store.donation(id).await.unwrap().unwrap().status() }
        };
        assert_eq!(status(open.id).await, DonationStatus::Expired);
        assert_eq!(status(claimed.id).await, DonationStatus::Assigned);
        assert_eq!(status(fresh.id).await, DonationStatus::Active);

        let inbox = h.store.notifications_for(donor, 10).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind, NotificationKind::DonationExpired);
    }

    #[tokio::test]
    async fn escalation_pages_volunteers_in_the_wider_radius_once() {
        let h = Harness::new();
        let now = h.now();
        let donor = h.add_donor().await;
        let ngo = actor(h.add_ngo(77.60, 12.98).await, Role::Ngo);
        let d = donation_at(donor, 77.5946, 12.9716, now + Duration::hours(8), now);
        h.store.insert_donation(&d).await.unwrap();
        h.lifecycle.claim(&ngo, d.id).await.unwrap();

        // ~15 km east: outside the default radius, inside the escalation one
        let far = h.add_volunteer(77.733, 12.9716).await;
        let too_far = h.add_volunteer(77.90, 12.9716).await;
        let supervisor = Supervisor::new(Jobs::for_harness(&h));

        h.clock.advance(Duration::minutes(3));
        assert_eq!(supervisor.run_once(Task::RadiusEscalation).await.unwrap(), 0);

        h.clock.advance(Duration::minutes(3));
        assert_eq!(supervisor.run_once(Task::RadiusEscalation).await.unwrap(), 1);
        let stored = h.store.donation(d.id).await.unwrap().unwrap();
        assert_eq!(stored.dispatched_to, vec![far]);
        assert_eq!(stored.dispatched_at, Some(h.now()));

        let inbox = h.store.notifications_for(far, 10).await.unwrap();
        assert_eq!(inbox[0].kind, NotificationKind::UrgentDispatch);
        assert!(h.store.notifications_for(too_far, 10).await.unwrap().is_empty());

        assert_eq!(supervisor.run_once(Task::RadiusEscalation).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn escalation_repages_new_volunteers_while_nobody_accepts() {
        let h = Harness::new();
        let now = h.now();
        let donor = h.add_donor().await;
        let ngo = actor(h.add_ngo(77.60, 12.98).await, Role::Ngo);
        let d = donation_at(donor, 77.5946, 12.9716, now + Duration::hours(8), now);
        h.store.insert_donation(&d).await.unwrap();
        h.lifecycle.claim(&ngo, d.id).await.unwrap();

        let first = h.add_volunteer(77.733, 12.9716).await;
        let supervisor = Supervisor::new(Jobs::for_harness(&h));
        h.clock.advance(Duration::minutes(6));
        assert_eq!(supervisor.run_once(Task::RadiusEscalation).await.unwrap(), 1);

        // the paged volunteer drops off and someone else comes online
        h.store.set_volunteer_online(first, false).await.unwrap();
        let second = h.add_volunteer(77.70, 12.9716).await;

        h.clock.advance(Duration::minutes(2));
        assert_eq!(supervisor.run_once(Task::RadiusEscalation).await.unwrap(), 0);

        h.clock.advance(Duration::minutes(4));
        assert_eq!(supervisor.run_once(Task::RadiusEscalation).await.unwrap(), 1);
        let stored = h.store.donation(d.id).await.unwrap().unwrap();
        assert_eq!(stored.dispatched_to, vec![first, second]);
        assert_eq!(stored.dispatched_at, Some(h.now()));
        let inbox = h.store.notifications_for(second, 10).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind, NotificationKind::UrgentDispatch);
        assert_eq!(h.store.notifications_for(first, 10).await.unwrap().len(), 1);

        // nobody new to ask: later passes stay quiet
        h.clock.advance(Duration::minutes(6));
        assert_eq!(supervisor.run_once(Task::RadiusEscalation).await.unwrap(), 0);
    }
}
