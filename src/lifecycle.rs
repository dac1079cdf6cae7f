//! Donation lifecycle: every state-changing donation operation lives here.
//!
//! Each transition is one conditional store update. When the guard misses,
//! the donation is reloaded only to report what it turned into.

use std::{fmt, sync::Arc};

use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::Actor,
    clock::Clock,
    domain::{
        DeliveryStatus, Donation, DonationStatus, Lifecycle, NewDonation, NotificationKind, Role,
    },
    error::{AppError, AppResult},
    notify::{best_effort, Notifier},
    store::{DonationFilter, DonationPatch, Guard, Store, VolunteerGuard},
};

/// Why the supervisor took a mission away from its volunteer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallReason {
    HeartbeatTimeout,
    EtaViolation,
}

impl fmt::Display for StallReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StallReason::HeartbeatTimeout => "location heartbeat timed out",
            StallReason::EtaViolation => "estimated arrival time was exceeded",
        })
    }
}

fn in_flight() -> Vec<DeliveryStatus> {
    DeliveryStatus::ALL
        .into_iter()
        .filter(DeliveryStatus::is_in_flight)
        .collect()
}

/// Guard that pins a donation to exactly the state it was observed in.
fn observed(d: &Donation) -> Guard {
    let mut guard = Guard::status_in([d.status()]).volunteer(match d.volunteer {
        Some(v) => VolunteerGuard::Is(v),
        None => VolunteerGuard::Unset,
    });
    if let Some(ds) = d.delivery_status() {
        guard = guard.delivery_in([ds]);
    }
    guard
}

pub struct LifecycleService {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl LifecycleService {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            notifier,
            clock,
        }
    }

    async fn load(&self, id: Uuid) -> AppResult<Donation> {
        self.store
            .donation(id)
            .await?
            .ok_or(AppError::NotFound("donation"))
    }

    /// Run a conditional update; on a guard miss, build the error from the
    /// donation's current state.
    async fn transition(
        &self,
        id: Uuid,
        guard: Guard,
        patch: DonationPatch,
        on_miss: impl FnOnce(&Donation) -> AppError,
    ) -> AppResult<Donation> {
        match self.store.update_donation(id, &guard, patch).await? {
            Some(d) => Ok(d),
            None => Err(on_miss(&self.load(id).await?)),
        }
    }

    async fn tell(
        &self,
        recipient: Option<Uuid>,
        message: String,
        kind: NotificationKind,
        donation: Uuid,
    ) {
        if let Some(recipient) = recipient {
            best_effort(self.notifier.as_ref(), recipient, message, kind, Some(donation)).await;
        }
    }

    /// The caller must be the volunteer currently assigned to the donation.
    fn check_courier(actor: &Actor, d: &Donation) -> AppResult<()> {
        actor.require(Role::Volunteer)?;
        if d.volunteer != Some(actor.id) {
            return Err(AppError::unauthorized(
                "volunteer is not assigned to this donation",
            ));
        }
        Ok(())
    }

    /// Load a donation and check that `actor` is its courier. Lets callers
    /// authorize before doing expensive work such as storing evidence photos.
    pub async fn courier_mission(&self, actor: &Actor, id: Uuid) -> AppResult<Donation> {
        let d = self.load(id).await?;
        Self::check_courier(actor, &d)?;
        Ok(d)
    }

    /// Courier-side miss: the volunteer lost the mission or the state moved.
    fn courier_miss(actor: &Actor, message: &'static str) -> impl FnOnce(&Donation) -> AppError {
        let actor = *actor;
        move |d| {
            if d.volunteer != Some(actor.id) {
                AppError::unauthorized("volunteer is not assigned to this donation")
            } else {
                AppError::invalid(d.lifecycle.describe(), message)
            }
        }
    }

    // --- donor operations ---

    #[instrument(skip(self, input), fields(donor = %actor.id))]
    pub async fn create_donation(&self, actor: &Actor, input: NewDonation) -> AppResult<Donation> {
        actor.require(Role::Donor)?;
        let now = self.clock.now();
        input.validate(now)?;
        let donation = Donation::create(actor.id, input, now);
        self.store.insert_donation(&donation).await?;
        info!(donation_id = %donation.id, "donation created");
        Ok(donation)
    }

    pub async fn donation(&self, id: Uuid) -> AppResult<Donation> {
        self.load(id).await
    }

    pub async fn donations_of(&self, actor: &Actor) -> AppResult<Vec<Donation>> {
        actor.require(Role::Donor)?;
        let filter = DonationFilter {
            donor: Some(actor.id),
            ..Default::default()
        };
        Ok(self.store.list_donations(&filter).await?)
    }

    #[instrument(skip(self), fields(donor = %actor.id))]
    pub async fn cancel(&self, actor: &Actor, id: Uuid) -> AppResult<Donation> {
        actor.require(Role::Donor)?;
        let current = self.load(id).await?;
        if current.donor != actor.id {
            return Err(AppError::unauthorized("only the donor can cancel a donation"));
        }
        if current.status().is_terminal() {
            return Err(AppError::invalid(
                current.lifecycle.describe(),
                "only active or assigned donations can be cancelled",
            ));
        }

        let patch = DonationPatch {
            estimated_arrival_at: Some(None),
            ..DonationPatch::lifecycle(Lifecycle::Cancelled)
        };
        let guard = observed(&current).donor(actor.id);
        let d = self
            .transition(id, guard, patch, |d| {
                AppError::invalid(d.lifecycle.describe(), "donation changed while cancelling")
            })
            .await?;

        self.store.increment_cancelled(actor.id).await?;
        let courier_busy = current.delivery_status().is_some_and(|ds| ds.is_in_flight());
        if let (Some(v), true) = (d.volunteer, courier_busy) {
            self.store.adjust_active_tasks(v, -1).await?;
        }
        info!(donation_id = %id, "donation cancelled");

        let message = format!("Donation \"{}\" was cancelled by the donor", d.title);
        self.tell(d.claimed_by, message.clone(), NotificationKind::DonationCancelled, id)
            .await;
        if courier_busy {
            self.tell(d.volunteer, message, NotificationKind::DonationCancelled, id)
                .await;
        }
        Ok(d)
    }

    // --- NGO operations ---

    #[instrument(skip(self), fields(ngo = %actor.id))]
    pub async fn claim(&self, actor: &Actor, id: Uuid) -> AppResult<Donation> {
        actor.require(Role::Ngo)?;
        let now = self.clock.now();
        let patch = DonationPatch {
            claimed_by: Some(actor.id),
            claimed_at: Some(now),
            ..DonationPatch::lifecycle(Lifecycle::assigned(DeliveryStatus::Idle))
        };
        let d = self
            .transition(
                id,
                Guard::status_in([DonationStatus::Active]),
                patch,
                |_| AppError::NotAvailable,
            )
            .await?;
        info!(donation_id = %id, "donation claimed");
        self.tell(
            Some(d.donor),
            format!("Your donation \"{}\" was claimed", d.title),
            NotificationKind::DonationClaimed,
            id,
        )
        .await;
        Ok(d)
    }

    #[instrument(skip(self, reason), fields(ngo = %actor.id))]
    pub async fn reject(&self, actor: &Actor, id: Uuid, reason: &str) -> AppResult<Donation> {
        actor.require(Role::Ngo)?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::Validation("a rejection reason is required".into()));
        }
        let current = self.load(id).await?;
        let mut guard = observed(&current);
        match current.status() {
            DonationStatus::Active => {}
            DonationStatus::Assigned => {
                if current.claimed_by != Some(actor.id) {
                    return Err(AppError::unauthorized(
                        "only the claiming NGO can reject an assigned donation",
                    ));
                }
                guard = guard.claimed_by(actor.id);
            }
            _ => {
                return Err(AppError::invalid(
                    current.lifecycle.describe(),
                    "only active or assigned donations can be rejected",
                ))
            }
        }

        let patch = DonationPatch {
            estimated_arrival_at: Some(None),
            ..DonationPatch::lifecycle(Lifecycle::Rejected {
                rejection_reason: reason.to_string(),
            })
        };
        let d = self
            .transition(id, guard, patch, |d| {
                AppError::invalid(d.lifecycle.describe(), "donation changed while rejecting")
            })
            .await?;

        let courier_busy = current.delivery_status().is_some_and(|ds| ds.is_in_flight());
        if let (Some(v), true) = (d.volunteer, courier_busy) {
            self.store.adjust_active_tasks(v, -1).await?;
        }
        info!(donation_id = %id, "donation rejected");
        self.tell(
            Some(d.donor),
            format!("Your donation \"{}\" was rejected: {reason}", d.title),
            NotificationKind::DonationRejected,
            id,
        )
        .await;
        Ok(d)
    }

    /// Close a delivered donation. A rating (1 to 5) feeds the donor's trust score.
    #[instrument(skip(self, comment), fields(ngo = %actor.id))]
    pub async fn complete(
        &self,
        actor: &Actor,
        id: Uuid,
        rating: Option<u8>,
        comment: Option<&str>,
    ) -> AppResult<Donation> {
        actor.require(Role::Ngo)?;
        if rating.is_some_and(|r| !(1..=5).contains(&r)) {
            return Err(AppError::Validation("rating must be between 1 and 5".into()));
        }
        let current = self.load(id).await?;
        if current.claimed_by != Some(actor.id) {
            return Err(AppError::unauthorized(
                "only the claiming NGO can complete a donation",
            ));
        }

        let guard = Guard::status_in([DonationStatus::Assigned])
            .delivery_in([DeliveryStatus::Delivered])
            .claimed_by(actor.id);
        let d = self
            .transition(
                id,
                guard,
                DonationPatch::lifecycle(Lifecycle::Completed),
                |d| AppError::invalid(d.lifecycle.describe(), "donation has not been delivered"),
            )
            .await?;

        if let Some(r) = rating {
            self.store.record_rating(d.donor, f64::from(r)).await?;
        }
        self.store.increment_completed(d.donor).await?;
        if let Some(v) = d.volunteer {
            self.store.increment_completed(v).await?;
        }
        info!(donation_id = %id, ?rating, "donation completed");

        let mut message = format!("Your donation \"{}\" was received", d.title);
        if let Some(r) = rating {
            message.push_str(&format!(" and rated {r}/5"));
        }
        if let Some(c) = comment.map(str::trim).filter(|c| !c.is_empty()) {
            message.push_str(&format!(": {c}"));
        }
        self.tell(Some(d.donor), message, NotificationKind::DonationCompleted, id)
            .await;
        Ok(d)
    }

    // --- volunteer operations ---

    #[instrument(skip(self), fields(volunteer = %actor.id))]
    pub async fn accept_mission(&self, actor: &Actor, id: Uuid) -> AppResult<Donation> {
        actor.require(Role::Volunteer)?;
        let now = self.clock.now();
        let guard = Guard::status_in([DonationStatus::Assigned])
            .delivery_in([DeliveryStatus::Idle])
            .volunteer(VolunteerGuard::Unset);
        let patch = DonationPatch {
            volunteer: Some(Some(actor.id)),
            ..DonationPatch::lifecycle(Lifecycle::assigned(DeliveryStatus::PendingPickup))
        };
        let d = self
            .transition(id, guard, patch, |_| AppError::NotAvailable)
            .await?;
        self.store.record_mission_start(actor.id, now).await?;
        info!(donation_id = %id, "mission accepted");

        let message = format!("A volunteer is on the way for \"{}\"", d.title);
        self.tell(d.claimed_by, message.clone(), NotificationKind::MissionAccepted, id)
            .await;
        self.tell(Some(d.donor), message, NotificationKind::MissionAccepted, id)
            .await;
        Ok(d)
    }

    /// Generic courier progress. Pickup and delivery have their own actions.
    #[instrument(skip(self), fields(volunteer = %actor.id))]
    pub async fn update_delivery_status(
        &self,
        actor: &Actor,
        id: Uuid,
        target: DeliveryStatus,
    ) -> AppResult<Donation> {
        let current = self.load(id).await?;
        Self::check_courier(actor, &current)?;
        if !target.is_progress_target() {
            let message = match target {
                DeliveryStatus::PickedUp => "use the pickup action to confirm pickup".to_string(),
                DeliveryStatus::Delivered => {
                    "use the deliver action to confirm delivery".to_string()
                }
                other => format!("{other} cannot be set by a volunteer"),
            };
            return Err(AppError::invalid(current.lifecycle.describe(), message));
        }

        let guard = Guard::status_in([DonationStatus::Assigned])
            .volunteer(VolunteerGuard::Is(actor.id))
            .delivery_in(target.progress_sources().iter().copied());
        let d = self
            .transition(
                id,
                guard,
                DonationPatch::lifecycle(Lifecycle::assigned(target)),
                Self::courier_miss(actor, "delivery status cannot move there from here"),
            )
            .await?;
        info!(donation_id = %id, status = %target, "delivery status updated");
        Ok(d)
    }

    /// Record the volunteer's arrival commitment. The stall detector holds
    /// them to it.
    #[instrument(skip(self), fields(volunteer = %actor.id))]
    pub async fn set_eta(&self, actor: &Actor, id: Uuid, eta: OffsetDateTime) -> AppResult<Donation> {
        let current = self.load(id).await?;
        Self::check_courier(actor, &current)?;
        if eta <= self.clock.now() {
            return Err(AppError::Validation("estimated arrival must be in the future".into()));
        }
        let guard = Guard::status_in([DonationStatus::Assigned])
            .volunteer(VolunteerGuard::Is(actor.id))
            .delivery_in(in_flight());
        let patch = DonationPatch {
            estimated_arrival_at: Some(Some(eta)),
            ..Default::default()
        };
        self.transition(
            id,
            guard,
            patch,
            Self::courier_miss(actor, "mission is not in progress"),
        )
        .await
    }

    #[instrument(skip(self, photo_url), fields(volunteer = %actor.id))]
    pub async fn confirm_pickup(
        &self,
        actor: &Actor,
        id: Uuid,
        photo_url: String,
    ) -> AppResult<Donation> {
        let current = self.load(id).await?;
        Self::check_courier(actor, &current)?;
        if photo_url.trim().is_empty() {
            return Err(AppError::Validation("a pickup photo is required".into()));
        }
        let guard = Guard::status_in([DonationStatus::Assigned])
            .volunteer(VolunteerGuard::Is(actor.id))
            .delivery_in(DeliveryStatus::BEFORE_PICKUP);
        let patch = DonationPatch {
            pickup_photo: Some(photo_url),
            picked_up_at: Some(self.clock.now()),
            ..DonationPatch::lifecycle(Lifecycle::assigned(DeliveryStatus::PickedUp))
        };
        let d = self
            .transition(
                id,
                guard,
                patch,
                Self::courier_miss(actor, "donation is not waiting for pickup"),
            )
            .await?;
        info!(donation_id = %id, "pickup confirmed");

        let message = format!("\"{}\" has been picked up", d.title);
        self.tell(d.claimed_by, message.clone(), NotificationKind::PickupConfirmed, id)
            .await;
        self.tell(Some(d.donor), message, NotificationKind::PickupConfirmed, id)
            .await;
        Ok(d)
    }

    /// Hand-over at the NGO. The donation stays assigned until the NGO completes it.
    #[instrument(skip(self, photo_url, notes), fields(volunteer = %actor.id))]
    pub async fn confirm_delivery(
        &self,
        actor: &Actor,
        id: Uuid,
        photo_url: String,
        notes: Option<String>,
    ) -> AppResult<Donation> {
        let current = self.load(id).await?;
        Self::check_courier(actor, &current)?;
        if photo_url.trim().is_empty() {
            return Err(AppError::Validation("a delivery photo is required".into()));
        }
        let guard = Guard::status_in([DonationStatus::Assigned])
            .volunteer(VolunteerGuard::Is(actor.id))
            .delivery_in(DeliveryStatus::CARRYING);
        let patch = DonationPatch {
            delivery_photo: Some(photo_url),
            delivery_notes: notes.filter(|n| !n.trim().is_empty()),
            delivered_at: Some(self.clock.now()),
            estimated_arrival_at: Some(None),
            ..DonationPatch::lifecycle(Lifecycle::assigned(DeliveryStatus::Delivered))
        };
        let d = self
            .transition(
                id,
                guard,
                patch,
                Self::courier_miss(actor, "donation has not been picked up"),
            )
            .await?;
        self.store.adjust_active_tasks(actor.id, -1).await?;
        info!(donation_id = %id, "delivery confirmed");

        self.tell(
            d.claimed_by,
            format!("\"{}\" was delivered, please confirm receipt", d.title),
            NotificationKind::DeliveryConfirmed,
            id,
        )
        .await;
        Ok(d)
    }

    // --- supervisor operations ---

    /// Take a stalled mission away from `volunteer`. The donation stays with
    /// its NGO, courier-less. `None` when the mission already moved on.
    #[instrument(skip(self))]
    pub async fn reassign_mission(
        &self,
        id: Uuid,
        volunteer: Uuid,
        reason: StallReason,
    ) -> AppResult<Option<Donation>> {
        let guard = Guard::status_in([DonationStatus::Assigned])
            .volunteer(VolunteerGuard::Is(volunteer))
            .delivery_in(in_flight());
        let patch = DonationPatch {
            volunteer: Some(None),
            estimated_arrival_at: Some(None),
            dispatched_to: Some(Vec::new()),
            dispatched_at: Some(None),
            ..DonationPatch::lifecycle(Lifecycle::assigned(DeliveryStatus::Idle))
        };
        let Some(d) = self.store.update_donation(id, &guard, patch).await? else {
            return Ok(None);
        };
        self.store.adjust_active_tasks(volunteer, -1).await?;
        warn!(donation_id = %id, %volunteer, %reason, "mission reassigned");

        self.tell(
            Some(volunteer),
            format!("You were released from \"{}\": {reason}", d.title),
            NotificationKind::MissionReassigned,
            id,
        )
        .await;
        self.tell(
            d.claimed_by,
            format!("Looking for a new volunteer for \"{}\": {reason}", d.title),
            NotificationKind::MissionReassigned,
            id,
        )
        .await;
        Ok(Some(d))
    }

    /// Expire an unclaimed donation. `None` when it is no longer active.
    pub async fn expire(&self, id: Uuid) -> AppResult<Option<Donation>> {
        let Some(d) = self
            .store
            .update_donation(
                id,
                &Guard::status_in([DonationStatus::Active]),
                DonationPatch::lifecycle(Lifecycle::Expired),
            )
            .await?
        else {
            return Ok(None);
        };
        info!(donation_id = %id, "donation expired");
        self.tell(
            Some(d.donor),
            format!("Your donation \"{}\" expired before it was claimed", d.title),
            NotificationKind::DonationExpired,
            id,
        )
        .await;
        Ok(Some(d))
    }

    /// Page `paged` for a courier-less mission and add them to the volunteers
    /// already asked. `None` when a volunteer accepted in the meantime.
    pub async fn record_dispatch(
        &self,
        donation: &Donation,
        paged: Vec<Uuid>,
    ) -> AppResult<Option<Donation>> {
        let id = donation.id;
        let mut asked = donation.dispatched_to.clone();
        asked.extend(paged.iter().filter(|v| !donation.dispatched_to.contains(v)));
        let guard = Guard::status_in([DonationStatus::Assigned])
            .delivery_in([DeliveryStatus::Idle])
            .volunteer(VolunteerGuard::Unset);
        let patch = DonationPatch {
            dispatched_to: Some(asked),
            dispatched_at: Some(Some(self.clock.now())),
            ..Default::default()
        };
        let Some(d) = self.store.update_donation(id, &guard, patch).await? else {
            return Ok(None);
        };
        info!(donation_id = %id, paged = paged.len(), asked = d.dispatched_to.len(), "urgent dispatch sent");
        for v in paged {
            self.tell(
                Some(v),
                format!("Urgent: \"{}\" needs a volunteer nearby", d.title),
                NotificationKind::UrgentDispatch,
                id,
            )
            .await;
        }
        Ok(Some(d))
    }
}
