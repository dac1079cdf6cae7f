//! Route planning for a volunteer's active missions.

use std::sync::Arc;

use tracing::{instrument, warn};
use uuid::Uuid;

use crate::{
    clock::Clock,
    config::DispatchConfig,
    domain::{DeliveryStatus, Donation, DonationStatus},
    error::{AppError, AppResult},
    matching::classify,
    store::{DonationFilter, Near, Store},
};

pub mod optimizer;
pub mod provider;

pub use optimizer::{optimize_route, Route, Stop, StopKind};
pub use provider::{StraightLineProvider, TravelCostProvider};

const DROPOFF_PRIORITY: u8 = 5;
const DIVERSION_PRIORITY: u8 = 10;

/// Pickup priority by urgency tier.
fn pickup_priority(tier: u8) -> u8 {
    match tier {
        1 => 9,
        2 => 6,
        _ => 3,
    }
}

pub struct RoutePlanner {
    store: Arc<dyn Store>,
    provider: Arc<dyn TravelCostProvider>,
    clock: Arc<dyn Clock>,
    config: DispatchConfig,
}

impl RoutePlanner {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn TravelCostProvider>,
        clock: Arc<dyn Clock>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            store,
            provider,
            clock,
            config,
        }
    }

    async fn mission_stops(&self, d: &Donation) -> AppResult<Vec<Stop>> {
        let now = self.clock.now();
        let mut stops = Vec::with_capacity(2);
        let pickup_id = format!("pickup:{}", d.id);
        let before_pickup = d
            .delivery_status()
            .is_some_and(|ds| DeliveryStatus::BEFORE_PICKUP.contains(&ds));
        if before_pickup {
            stops.push(Stop {
                id: pickup_id.clone(),
                kind: StopKind::Pickup,
                donation: d.id,
                point: d.coordinates,
                priority: Some(pickup_priority(classify(d.expiry_date, now).tier)),
                after: None,
            });
        }

        let ngo = match d.claimed_by {
            Some(id) => self.store.user(id).await?,
            None => None,
        };
        match ngo.and_then(|n| n.coordinates).filter(|p| !p.is_unset()) {
            Some(point) => stops.push(Stop {
                id: format!("dropoff:{}", d.id),
                kind: StopKind::Dropoff,
                donation: d.id,
                point,
                priority: Some(DROPOFF_PRIORITY),
                after: before_pickup.then_some(pickup_id),
            }),
            None => warn!(donation_id = %d.id, "claiming NGO has no coordinates; dropoff left out"),
        }
        Ok(stops)
    }

    /// Nearest critical, unclaimed donation around the volunteer, offered as
    /// an optional first stop.
    async fn diversion(&self, near: Near) -> AppResult<Option<Stop>> {
        let now = self.clock.now();
        let filter = DonationFilter {
            expiry_after: Some(now),
            ..DonationFilter::status(DonationStatus::Active)
        };
        let candidates = self.store.donations_near(near, &filter).await?;
        Ok(candidates
            .into_iter()
            .find(|(d, _)| classify(d.expiry_date, now).is_critical())
            .map(|(d, _)| Stop {
                id: format!("divert:{}", d.id),
                kind: StopKind::Diversion,
                donation: d.id,
                point: d.coordinates,
                priority: Some(DIVERSION_PRIORITY),
                after: None,
            }))
    }

    #[instrument(skip(self))]
    pub async fn active_route(&self, volunteer_id: Uuid) -> AppResult<Route> {
        let volunteer = self
            .store
            .user(volunteer_id)
            .await?
            .ok_or(AppError::NotFound("volunteer"))?;
        let location = volunteer
            .volunteer()
            .and_then(|v| v.current_location)
            .filter(|p| !p.is_unset())
            .ok_or(AppError::LocationUnavailable)?;

        let filter = DonationFilter {
            statuses: vec![DonationStatus::Assigned],
            delivery: DeliveryStatus::ALL
                .into_iter()
                .filter(DeliveryStatus::is_in_flight)
                .collect(),
            volunteer: Some(volunteer_id),
            ..Default::default()
        };
        let missions = self.store.list_donations(&filter).await?;

        let mut stops = Vec::new();
        for d in &missions {
            stops.extend(self.mission_stops(d).await?);
        }
        if let Some(divert) = self
            .diversion(Near::new(location, self.config.diversion_radius_m))
            .await?
        {
            stops.push(divert);
        }

        Ok(optimize_route(self.provider.as_ref(), location, stops).await)
    }
}
