use std::collections::HashSet;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{DonationFilter, DonationPatch, Guard, Near, Store, UserFilter};
use crate::domain::{
    DonationStatus, Donation, GeoPoint, Notification, Profile, User, UserStats,
};

#[derive(Default)]
struct Tables {
    donations: Vec<Donation>,
    users: Vec<User>,
    notifications: Vec<Notification>,
}

/// Process-local store. Conditional updates check and write under one write
/// lock, which gives the same single-winner behaviour as the SQL store.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn with_volunteer<F>(&self, id: Uuid, f: F) -> bool
    where
        F: FnOnce(&mut crate::domain::VolunteerProfile),
    {
        let mut t = self.tables.write().await;
        match t.users.iter_mut().find(|u| u.id == id) {
            Some(User {
                profile: Profile::Volunteer(v),
                ..
            }) => {
                f(v);
                true
            }
            _ => false,
        }
    }

    async fn with_stats<F>(&self, id: Uuid, f: F) -> Option<UserStats>
    where
        F: FnOnce(&mut UserStats),
    {
        let mut t = self.tables.write().await;
        let user = t.users.iter_mut().find(|u| u.id == id)?;
        f(&mut user.stats);
        Some(user.stats.clone())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_donation(&self, donation: &Donation) -> anyhow::Result<()> {
        let mut t = self.tables.write().await;
        anyhow::ensure!(
            !t.donations.iter().any(|d| d.id == donation.id),
            "duplicate donation id {}",
            donation.id
        );
        t.donations.push(donation.clone());
        Ok(())
    }

    async fn donation(&self, id: Uuid) -> anyhow::Result<Option<Donation>> {
        let t = self.tables.read().await;
        Ok(t.donations.iter().find(|d| d.id == id).cloned())
    }

    async fn update_donation(
        &self,
        id: Uuid,
        guard: &Guard,
        patch: DonationPatch,
    ) -> anyhow::Result<Option<Donation>> {
        let mut t = self.tables.write().await;
        let Some(d) = t.donations.iter_mut().find(|d| d.id == id) else {
            return Ok(None);
        };
        if !guard.matches(d) {
            return Ok(None);
        }
        patch.apply(d);
        Ok(Some(d.clone()))
    }

    async fn list_donations(&self, filter: &DonationFilter) -> anyhow::Result<Vec<Donation>> {
        let t = self.tables.read().await;
        Ok(t.donations
            .iter()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect())
    }

    async fn count_donations(&self, filter: &DonationFilter) -> anyhow::Result<u64> {
        let t = self.tables.read().await;
        Ok(t.donations.iter().filter(|d| filter.matches(d)).count() as u64)
    }

    async fn donations_near(
        &self,
        near: Near,
        filter: &DonationFilter,
    ) -> anyhow::Result<Vec<(Donation, f64)>> {
        let t = self.tables.read().await;
        let mut out: Vec<(Donation, f64)> = t
            .donations
            .iter()
            .filter(|d| filter.matches(d))
            .filter_map(|d| near.distance_to(Some(d.coordinates)).map(|m| (d.clone(), m)))
            .collect();
        out.sort_by(|a, b| a.1.total_cmp(&b.1));
        Ok(out)
    }

    async fn insert_user(&self, user: &User) -> anyhow::Result<()> {
        let mut t = self.tables.write().await;
        anyhow::ensure!(
            !t.users.iter().any(|u| u.id == user.id || u.email == user.email),
            "duplicate user {}",
            user.email
        );
        t.users.push(user.clone());
        Ok(())
    }

    async fn user(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let t = self.tables.read().await;
        Ok(t.users.iter().find(|u| u.id == id).cloned())
    }

    async fn users_near(&self, near: Near, filter: &UserFilter) -> anyhow::Result<Vec<(User, f64)>> {
        let t = self.tables.read().await;
        let mut out: Vec<(User, f64)> = t
            .users
            .iter()
            .filter(|u| filter.matches(u))
            .filter_map(|u| near.distance_to(u.position()).map(|m| (u.clone(), m)))
            .collect();
        out.sort_by(|a, b| a.1.total_cmp(&b.1));
        Ok(out)
    }

    async fn volunteers_on_mission(&self) -> anyhow::Result<HashSet<Uuid>> {
        let t = self.tables.read().await;
        Ok(t.donations
            .iter()
            .filter(|d| d.status() == DonationStatus::Assigned)
            .filter(|d| d.delivery_status().is_some_and(|ds| ds.is_in_flight()))
            .filter_map(|d| d.volunteer)
            .collect())
    }

    async fn update_volunteer_location(
        &self,
        id: Uuid,
        location: GeoPoint,
        at: OffsetDateTime,
    ) -> anyhow::Result<bool> {
        Ok(self
            .with_volunteer(id, |v| {
                v.current_location = Some(location);
                v.last_location_update = Some(at);
                v.is_online = true;
            })
            .await)
    }

    async fn set_volunteer_online(&self, id: Uuid, online: bool) -> anyhow::Result<bool> {
        Ok(self.with_volunteer(id, |v| v.is_online = online).await)
    }

    async fn record_mission_start(&self, id: Uuid, at: OffsetDateTime) -> anyhow::Result<()> {
        self.with_volunteer(id, |v| {
            v.active_tasks += 1;
            v.last_mission_date = Some(at);
        })
        .await;
        Ok(())
    }

    async fn adjust_active_tasks(&self, id: Uuid, delta: i32) -> anyhow::Result<()> {
        self.with_volunteer(id, |v| {
            v.active_tasks = (v.active_tasks as i64 + delta as i64).max(0) as u32;
        })
        .await;
        Ok(())
    }

    async fn record_rating(&self, id: Uuid, rating: f64) -> anyhow::Result<Option<UserStats>> {
        Ok(self
            .with_stats(id, |s| *s = s.with_rating(rating))
            .await)
    }

    async fn increment_completed(&self, id: Uuid) -> anyhow::Result<()> {
        self.with_stats(id, |s| s.completed_donations += 1).await;
        Ok(())
    }

    async fn increment_cancelled(&self, id: Uuid) -> anyhow::Result<()> {
        self.with_stats(id, |s| s.cancelled_donations += 1).await;
        Ok(())
    }

    async fn insert_notification(&self, notification: &Notification) -> anyhow::Result<()> {
        self.tables
            .write()
            .await
            .notifications
            .push(notification.clone());
        Ok(())
    }

    async fn notifications_for(
        &self,
        recipient: Uuid,
        limit: i64,
    ) -> anyhow::Result<Vec<Notification>> {
        let t = self.tables.read().await;
        Ok(t.notifications
            .iter()
            .rev()
            .filter(|n| n.recipient == recipient)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn mark_notification_read(&self, id: Uuid, recipient: Uuid) -> anyhow::Result<bool> {
        let mut t = self.tables.write().await;
        match t
            .notifications
            .iter_mut()
            .find(|n| n.id == id && n.recipient == recipient)
        {
            Some(n) => {
                n.is_read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
