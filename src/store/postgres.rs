use std::collections::HashSet;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{DonationFilter, DonationPatch, Guard, Near, Store, UserFilter, VolunteerGuard};
use crate::domain::{
    AccountStatus, Donation, GeoPoint, Lifecycle, NgoProfile, Notification, PickupWindow, Profile,
    Quantity, Role, StorageReq, User, UserStats, VolunteerProfile, VolunteerTier,
};

const DONATION_COLUMNS: &str = r#"
    id, donor, title, description, food_type, quantity_raw, quantity_magnitude, quantity_unit,
    perishability, food_category, storage_req, allergens, dietary_tags, expiry_date,
    pickup_start, pickup_end, lng, lat, status, delivery_status, rejection_reason,
    claimed_by, claimed_at, volunteer, pickup_photo, picked_up_at, delivery_photo,
    delivery_notes, delivered_at, estimated_arrival_at, dispatched_to, dispatched_at, created_at
"#;

const USER_COLUMNS: &str = r#"
    id, name, email, role, status, organization, address, lng, lat,
    trust_score, total_ratings, completed_donations, cancelled_donations,
    daily_capacity, storage_facilities, is_urgent_need,
    tier, vehicle_type, max_weight, current_lng, current_lat,
    last_location_update, last_mission_date, is_online, active_tasks, created_at
"#;

#[derive(Debug, FromRow)]
struct DonationRow {
    id: Uuid,
    donor: Uuid,
    title: String,
    description: String,
    food_type: String,
    quantity_raw: String,
    quantity_magnitude: f64,
    quantity_unit: String,
    perishability: String,
    food_category: String,
    storage_req: Option<String>,
    allergens: Vec<String>,
    dietary_tags: Vec<String>,
    expiry_date: OffsetDateTime,
    pickup_start: OffsetDateTime,
    pickup_end: OffsetDateTime,
    lng: f64,
    lat: f64,
    status: String,
    delivery_status: Option<String>,
    rejection_reason: Option<String>,
    claimed_by: Option<Uuid>,
    claimed_at: Option<OffsetDateTime>,
    volunteer: Option<Uuid>,
    pickup_photo: Option<String>,
    picked_up_at: Option<OffsetDateTime>,
    delivery_photo: Option<String>,
    delivery_notes: Option<String>,
    delivered_at: Option<OffsetDateTime>,
    estimated_arrival_at: Option<OffsetDateTime>,
    dispatched_to: Vec<Uuid>,
    dispatched_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
}

impl TryFrom<DonationRow> for Donation {
    type Error = anyhow::Error;

    fn try_from(r: DonationRow) -> Result<Self, Self::Error> {
        Ok(Donation {
            lifecycle: Lifecycle::from_columns(
                &r.status,
                r.delivery_status.as_deref(),
                r.rejection_reason,
            )?,
            id: r.id,
            donor: r.donor,
            title: r.title,
            description: r.description,
            food_type: r.food_type,
            quantity: Quantity {
                raw: r.quantity_raw,
                magnitude: r.quantity_magnitude,
                unit: r.quantity_unit,
            },
            perishability: r.perishability.parse()?,
            food_category: r.food_category.parse()?,
            storage_req: r.storage_req.as_deref().map(str::parse).transpose()?,
            allergens: r.allergens,
            dietary_tags: r.dietary_tags,
            expiry_date: r.expiry_date,
            pickup_window: PickupWindow {
                start: r.pickup_start,
                end: r.pickup_end,
            },
            coordinates: GeoPoint::new(r.lng, r.lat),
            claimed_by: r.claimed_by,
            claimed_at: r.claimed_at,
            volunteer: r.volunteer,
            pickup_photo: r.pickup_photo,
            picked_up_at: r.picked_up_at,
            delivery_photo: r.delivery_photo,
            delivery_notes: r.delivery_notes,
            delivered_at: r.delivered_at,
            estimated_arrival_at: r.estimated_arrival_at,
            dispatched_to: r.dispatched_to,
            dispatched_at: r.dispatched_at,
            created_at: r.created_at,
        })
    }
}

impl From<&Donation> for DonationRow {
    fn from(d: &Donation) -> Self {
        let (delivery_status, rejection_reason) = match &d.lifecycle {
            Lifecycle::Assigned { delivery_status } => {
                (Some(delivery_status.as_str().to_string()), None)
            }
            Lifecycle::Rejected { rejection_reason } => (None, Some(rejection_reason.clone())),
            _ => (None, None),
        };
        DonationRow {
            id: d.id,
            donor: d.donor,
            title: d.title.clone(),
            description: d.description.clone(),
            food_type: d.food_type.clone(),
            quantity_raw: d.quantity.raw.clone(),
            quantity_magnitude: d.quantity.magnitude,
            quantity_unit: d.quantity.unit.clone(),
            perishability: d.perishability.as_str().to_string(),
            food_category: d.food_category.as_str().to_string(),
            storage_req: d.storage_req.map(|s| s.as_str().to_string()),
            allergens: d.allergens.clone(),
            dietary_tags: d.dietary_tags.clone(),
            expiry_date: d.expiry_date,
            pickup_start: d.pickup_window.start,
            pickup_end: d.pickup_window.end,
            lng: d.coordinates.lng,
            lat: d.coordinates.lat,
            status: d.status().as_str().to_string(),
            delivery_status,
            rejection_reason,
            claimed_by: d.claimed_by,
            claimed_at: d.claimed_at,
            volunteer: d.volunteer,
            pickup_photo: d.pickup_photo.clone(),
            picked_up_at: d.picked_up_at,
            delivery_photo: d.delivery_photo.clone(),
            delivery_notes: d.delivery_notes.clone(),
            delivered_at: d.delivered_at,
            estimated_arrival_at: d.estimated_arrival_at,
            dispatched_to: d.dispatched_to.clone(),
            dispatched_at: d.dispatched_at,
            created_at: d.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    email: String,
    role: String,
    status: String,
    organization: Option<String>,
    address: Option<String>,
    lng: Option<f64>,
    lat: Option<f64>,
    trust_score: f64,
    total_ratings: i32,
    completed_donations: i32,
    cancelled_donations: i32,
    daily_capacity: Option<i32>,
    storage_facilities: Vec<String>,
    is_urgent_need: bool,
    tier: Option<String>,
    vehicle_type: Option<String>,
    max_weight: Option<f64>,
    current_lng: Option<f64>,
    current_lat: Option<f64>,
    last_location_update: Option<OffsetDateTime>,
    last_mission_date: Option<OffsetDateTime>,
    is_online: bool,
    active_tasks: i32,
    created_at: OffsetDateTime,
}

fn point(lng: Option<f64>, lat: Option<f64>) -> Option<GeoPoint> {
    Some(GeoPoint::new(lng?, lat?))
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        let profile = match r.role.parse::<Role>()? {
            Role::Donor => Profile::Donor,
            Role::Admin => Profile::Admin,
            Role::Ngo => Profile::Ngo(NgoProfile {
                daily_capacity: r.daily_capacity.unwrap_or(0).max(0) as u32,
                storage_facilities: r
                    .storage_facilities
                    .iter()
                    .map(|s| s.parse::<StorageReq>())
                    .collect::<Result<_, _>>()?,
                is_urgent_need: r.is_urgent_need,
            }),
            Role::Volunteer => Profile::Volunteer(VolunteerProfile {
                tier: VolunteerTier::parse_or_default(r.tier.as_deref()),
                vehicle_type: r.vehicle_type.as_deref().map(str::parse).transpose()?,
                max_weight: r.max_weight,
                current_location: point(r.current_lng, r.current_lat),
                last_location_update: r.last_location_update,
                last_mission_date: r.last_mission_date,
                is_online: r.is_online,
                active_tasks: r.active_tasks.max(0) as u32,
            }),
        };
        Ok(User {
            id: r.id,
            name: r.name,
            email: r.email,
            profile,
            status: r.status.parse::<AccountStatus>()?,
            organization: r.organization,
            address: r.address,
            coordinates: point(r.lng, r.lat),
            stats: UserStats {
                trust_score: r.trust_score,
                total_ratings: r.total_ratings.max(0) as u32,
                completed_donations: r.completed_donations.max(0) as u32,
                cancelled_donations: r.cancelled_donations.max(0) as u32,
            },
            created_at: r.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct NotificationRow {
    id: Uuid,
    recipient: Uuid,
    message: String,
    kind: String,
    related_donation: Option<Uuid>,
    is_read: bool,
    created_at: OffsetDateTime,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = anyhow::Error;

    fn try_from(r: NotificationRow) -> Result<Self, Self::Error> {
        Ok(Notification {
            id: r.id,
            recipient: r.recipient,
            message: r.message,
            kind: r.kind.parse()?,
            related_donation: r.related_donation,
            is_read: r.is_read,
            created_at: r.created_at,
        })
    }
}

fn status_strs<T, F: Fn(&T) -> &'static str>(items: &[T], f: F) -> Vec<String> {
    items.iter().map(|i| f(i).to_string()).collect()
}

fn push_guard(qb: &mut QueryBuilder<'_, Postgres>, guard: &Guard) {
    if !guard.statuses.is_empty() {
        qb.push(" AND status = ANY(")
            .push_bind(status_strs(&guard.statuses, |s| s.as_str()))
            .push(")");
    }
    if !guard.delivery.is_empty() {
        qb.push(" AND delivery_status = ANY(")
            .push_bind(status_strs(&guard.delivery, |s| s.as_str()))
            .push(")");
    }
    match guard.volunteer {
        VolunteerGuard::Any => {}
        VolunteerGuard::Unset => {
            qb.push(" AND volunteer IS NULL");
        }
        VolunteerGuard::Is(id) => {
            qb.push(" AND volunteer = ").push_bind(id);
        }
    }
    if let Some(donor) = guard.donor {
        qb.push(" AND donor = ").push_bind(donor);
    }
    if let Some(ngo) = guard.claimed_by {
        qb.push(" AND claimed_by = ").push_bind(ngo);
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, f: &DonationFilter) {
    if !f.statuses.is_empty() {
        qb.push(" AND status = ANY(")
            .push_bind(status_strs(&f.statuses, |s| s.as_str()))
            .push(")");
    }
    if !f.delivery.is_empty() {
        qb.push(" AND delivery_status = ANY(")
            .push_bind(status_strs(&f.delivery, |s| s.as_str()))
            .push(")");
    }
    if let Some(id) = f.donor {
        qb.push(" AND donor = ").push_bind(id);
    }
    if let Some(id) = f.volunteer {
        qb.push(" AND volunteer = ").push_bind(id);
    }
    if let Some(id) = f.claimed_by {
        qb.push(" AND claimed_by = ").push_bind(id);
    }
    if let Some(t) = f.claimed_since {
        qb.push(" AND claimed_at >= ").push_bind(t);
    }
    if let Some(t) = f.claimed_before {
        qb.push(" AND claimed_at < ").push_bind(t);
    }
    if let Some(t) = f.expiry_before {
        qb.push(" AND expiry_date < ").push_bind(t);
    }
    if let Some(t) = f.expiry_after {
        qb.push(" AND expiry_date > ").push_bind(t);
    }
    if let Some(set) = &f.storage_within {
        qb.push(" AND (storage_req IS NULL OR storage_req = ANY(")
            .push_bind(status_strs(set, |s| s.as_str()))
            .push("))");
    }
}

/// Push the SET list; returns false when the patch is empty.
fn push_patch(qb: &mut QueryBuilder<'_, Postgres>, patch: DonationPatch) -> bool {
    let mut sets = qb.separated(", ");
    let mut any = false;
    if let Some(l) = patch.lifecycle {
        let (delivery, reason) = match &l {
            Lifecycle::Assigned { delivery_status } => (Some(delivery_status.as_str()), None),
            Lifecycle::Rejected { rejection_reason } => (None, Some(rejection_reason.clone())),
            _ => (None, None),
        };
        sets.push("status = ").push_bind_unseparated(l.status().as_str());
        sets.push("delivery_status = ").push_bind_unseparated(delivery);
        sets.push("rejection_reason = ").push_bind_unseparated(reason);
        any = true;
    }
    macro_rules! set {
        ($field:ident) => {
            if let Some(v) = patch.$field {
                sets.push(concat!(stringify!($field), " = "))
                    .push_bind_unseparated(v);
                any = true;
            }
        };
    }
    set!(claimed_by);
    set!(claimed_at);
    set!(volunteer);
    set!(estimated_arrival_at);
    set!(pickup_photo);
    set!(picked_up_at);
    set!(delivery_photo);
    set!(delivery_notes);
    set!(delivered_at);
    set!(dispatched_to);
    set!(dispatched_at);
    any
}

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &PgPool {
        &self.db
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_donation(&self, d: &Donation) -> anyhow::Result<()> {
        let r = DonationRow::from(d);
        sqlx::query(&format!(
            r#"
            INSERT INTO donations ({DONATION_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                    $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31, $32, $33)
            "#
        ))
        .bind(r.id)
        .bind(r.donor)
        .bind(r.title)
        .bind(r.description)
        .bind(r.food_type)
        .bind(r.quantity_raw)
        .bind(r.quantity_magnitude)
        .bind(r.quantity_unit)
        .bind(r.perishability)
        .bind(r.food_category)
        .bind(r.storage_req)
        .bind(r.allergens)
        .bind(r.dietary_tags)
        .bind(r.expiry_date)
        .bind(r.pickup_start)
        .bind(r.pickup_end)
        .bind(r.lng)
        .bind(r.lat)
        .bind(r.status)
        .bind(r.delivery_status)
        .bind(r.rejection_reason)
        .bind(r.claimed_by)
        .bind(r.claimed_at)
        .bind(r.volunteer)
        .bind(r.pickup_photo)
        .bind(r.picked_up_at)
        .bind(r.delivery_photo)
        .bind(r.delivery_notes)
        .bind(r.delivered_at)
        .bind(r.estimated_arrival_at)
        .bind(r.dispatched_to)
        .bind(r.dispatched_at)
        .bind(r.created_at)
        .execute(&self.db)
        .await
        .context("insert donation")?;
        Ok(())
    }

    async fn donation(&self, id: Uuid) -> anyhow::Result<Option<Donation>> {
        let row = sqlx::query_as::<_, DonationRow>(&format!(
            "SELECT {DONATION_COLUMNS} FROM donations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("get donation")?;
        row.map(Donation::try_from).transpose()
    }

    async fn update_donation(
        &self,
        id: Uuid,
        guard: &Guard,
        patch: DonationPatch,
    ) -> anyhow::Result<Option<Donation>> {
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE donations SET ");
        if !push_patch(&mut qb, patch) {
            // Nothing to write; still honour the guard.
            let current = self.donation(id).await?;
            return Ok(current.filter(|d| guard.matches(d)));
        }
        qb.push(" WHERE id = ").push_bind(id);
        push_guard(&mut qb, guard);
        qb.push(" RETURNING ").push(DONATION_COLUMNS);

        let row = qb
            .build_query_as::<DonationRow>()
            .fetch_optional(&self.db)
            .await
            .context("conditional donation update")?;
        row.map(Donation::try_from).transpose()
    }

    async fn list_donations(&self, filter: &DonationFilter) -> anyhow::Result<Vec<Donation>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {DONATION_COLUMNS} FROM donations WHERE TRUE"
        ));
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY seq ASC");
        let rows = qb
            .build_query_as::<DonationRow>()
            .fetch_all(&self.db)
            .await
            .context("list donations")?;
        rows.into_iter().map(Donation::try_from).collect()
    }

    async fn count_donations(&self, filter: &DonationFilter) -> anyhow::Result<u64> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM donations WHERE TRUE");
        push_filter(&mut qb, filter);
        let (count,): (i64,) = qb
            .build_query_as()
            .fetch_one(&self.db)
            .await
            .context("count donations")?;
        Ok(count.max(0) as u64)
    }

    async fn donations_near(
        &self,
        near: Near,
        filter: &DonationFilter,
    ) -> anyhow::Result<Vec<(Donation, f64)>> {
        let bbox = near.center.bounding_box(near.radius_m);
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {DONATION_COLUMNS} FROM donations WHERE lat BETWEEN "
        ));
        qb.push_bind(bbox.min_lat)
            .push(" AND ")
            .push_bind(bbox.max_lat)
            .push(" AND lng BETWEEN ")
            .push_bind(bbox.min_lng)
            .push(" AND ")
            .push_bind(bbox.max_lng);
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY seq ASC");

        let rows = qb
            .build_query_as::<DonationRow>()
            .fetch_all(&self.db)
            .await
            .context("donations near")?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let d = Donation::try_from(row)?;
            if let Some(m) = near.distance_to(Some(d.coordinates)) {
                out.push((d, m));
            }
        }
        out.sort_by(|a, b| a.1.total_cmp(&b.1));
        Ok(out)
    }

    async fn insert_user(&self, u: &User) -> anyhow::Result<()> {
        let ngo = u.ngo();
        let vol = u.volunteer();
        sqlx::query(
            r#"
            INSERT INTO users (
                id, name, email, role, status, organization, address, lng, lat,
                trust_score, total_ratings, completed_donations, cancelled_donations,
                daily_capacity, storage_facilities, is_urgent_need,
                tier, vehicle_type, max_weight, current_lng, current_lat,
                last_location_update, last_mission_date, is_online, active_tasks, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22, $23, $24, $25, $26)
            "#,
        )
        .bind(u.id)
        .bind(&u.name)
        .bind(&u.email)
        .bind(u.role().as_str())
        .bind(u.status.as_str())
        .bind(&u.organization)
        .bind(&u.address)
        .bind(u.coordinates.map(|p| p.lng))
        .bind(u.coordinates.map(|p| p.lat))
        .bind(u.stats.trust_score)
        .bind(u.stats.total_ratings as i32)
        .bind(u.stats.completed_donations as i32)
        .bind(u.stats.cancelled_donations as i32)
        .bind(ngo.map(|n| n.daily_capacity as i32))
        .bind(
            ngo.map(|n| status_strs(&n.storage_facilities, |s| s.as_str()))
                .unwrap_or_default(),
        )
        .bind(ngo.is_some_and(|n| n.is_urgent_need))
        .bind(vol.map(|v| v.tier.as_str()))
        .bind(vol.and_then(|v| v.vehicle_type).map(|v| v.as_str()))
        .bind(vol.and_then(|v| v.max_weight))
        .bind(vol.and_then(|v| v.current_location).map(|p| p.lng))
        .bind(vol.and_then(|v| v.current_location).map(|p| p.lat))
        .bind(vol.and_then(|v| v.last_location_update))
        .bind(vol.and_then(|v| v.last_mission_date))
        .bind(vol.is_some_and(|v| v.is_online))
        .bind(vol.map_or(0, |v| v.active_tasks as i32))
        .bind(u.created_at)
        .execute(&self.db)
        .await
        .context("insert user")?;
        Ok(())
    }

    async fn user(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("get user")?;
        row.map(User::try_from).transpose()
    }

    async fn users_near(&self, near: Near, filter: &UserFilter) -> anyhow::Result<Vec<(User, f64)>> {
        let bbox = near.center.bounding_box(near.radius_m);
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {USER_COLUMNS} FROM users WHERE role = "
        ));
        qb.push_bind(filter.role.as_str());
        // Volunteers are located by heartbeat, everyone else by their address.
        qb.push(" AND COALESCE(current_lat, lat) BETWEEN ")
            .push_bind(bbox.min_lat)
            .push(" AND ")
            .push_bind(bbox.max_lat)
            .push(" AND COALESCE(current_lng, lng) BETWEEN ")
            .push_bind(bbox.min_lng)
            .push(" AND ")
            .push_bind(bbox.max_lng);
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(online) = filter.online {
            qb.push(" AND is_online = ").push_bind(online);
        }
        if let Some(req) = filter.storage {
            qb.push(" AND ")
                .push_bind(req.as_str())
                .push(" = ANY(storage_facilities)");
        }
        qb.push(" ORDER BY created_at ASC");

        let rows = qb
            .build_query_as::<UserRow>()
            .fetch_all(&self.db)
            .await
            .context("users near")?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let u = User::try_from(row)?;
            if let Some(m) = near.distance_to(u.position()) {
                out.push((u, m));
            }
        }
        out.sort_by(|a, b| a.1.total_cmp(&b.1));
        Ok(out)
    }

    async fn volunteers_on_mission(&self) -> anyhow::Result<HashSet<Uuid>> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT volunteer
              FROM donations
             WHERE volunteer IS NOT NULL
               AND status = 'assigned'
               AND delivery_status NOT IN ('idle', 'delivered')
            "#,
        )
        .fetch_all(&self.db)
        .await
        .context("volunteers on mission")?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn update_volunteer_location(
        &self,
        id: Uuid,
        location: GeoPoint,
        at: OffsetDateTime,
    ) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET current_lng = $2, current_lat = $3, last_location_update = $4, is_online = TRUE
             WHERE id = $1 AND role = 'volunteer'
            "#,
        )
        .bind(id)
        .bind(location.lng)
        .bind(location.lat)
        .bind(at)
        .execute(&self.db)
        .await
        .context("update volunteer location")?;
        Ok(res.rows_affected() == 1)
    }

    async fn set_volunteer_online(&self, id: Uuid, online: bool) -> anyhow::Result<bool> {
        let res = sqlx::query("UPDATE users SET is_online = $2 WHERE id = $1 AND role = 'volunteer'")
            .bind(id)
            .bind(online)
            .execute(&self.db)
            .await
            .context("set volunteer online")?;
        Ok(res.rows_affected() == 1)
    }

    async fn record_mission_start(&self, id: Uuid, at: OffsetDateTime) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users
               SET active_tasks = active_tasks + 1, last_mission_date = $2
             WHERE id = $1 AND role = 'volunteer'
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.db)
        .await
        .context("record mission start")?;
        Ok(())
    }

    async fn adjust_active_tasks(&self, id: Uuid, delta: i32) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE users SET active_tasks = GREATEST(0, active_tasks + $2) WHERE id = $1 AND role = 'volunteer'",
        )
        .bind(id)
        .bind(delta)
        .execute(&self.db)
        .await
        .context("adjust active tasks")?;
        Ok(())
    }

    async fn record_rating(&self, id: Uuid, rating: f64) -> anyhow::Result<Option<UserStats>> {
        let row: Option<(f64, i32, i32, i32)> = sqlx::query_as(
            r#"
            UPDATE users
               SET trust_score = (trust_score * total_ratings + $2) / (total_ratings + 1),
                   total_ratings = total_ratings + 1
             WHERE id = $1
            RETURNING trust_score, total_ratings, completed_donations, cancelled_donations
            "#,
        )
        .bind(id)
        .bind(rating)
        .fetch_optional(&self.db)
        .await
        .context("record rating")?;
        Ok(row.map(|(trust_score, total, completed, cancelled)| UserStats {
            trust_score,
            total_ratings: total.max(0) as u32,
            completed_donations: completed.max(0) as u32,
            cancelled_donations: cancelled.max(0) as u32,
        }))
    }

    async fn increment_completed(&self, id: Uuid) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET completed_donations = completed_donations + 1 WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("increment completed")?;
        Ok(())
    }

    async fn increment_cancelled(&self, id: Uuid) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET cancelled_donations = cancelled_donations + 1 WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("increment cancelled")?;
        Ok(())
    }

    async fn insert_notification(&self, n: &Notification) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, recipient, message, kind, related_donation, is_read, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(n.id)
        .bind(n.recipient)
        .bind(&n.message)
        .bind(n.kind.as_str())
        .bind(n.related_donation)
        .bind(n.is_read)
        .bind(n.created_at)
        .execute(&self.db)
        .await
        .context("insert notification")?;
        Ok(())
    }

    async fn notifications_for(
        &self,
        recipient: Uuid,
        limit: i64,
    ) -> anyhow::Result<Vec<Notification>> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT id, recipient, message, kind, related_donation, is_read, created_at
              FROM notifications
             WHERE recipient = $1
             ORDER BY created_at DESC
             LIMIT $2
            "#,
        )
        .bind(recipient)
        .bind(limit)
        .fetch_all(&self.db)
        .await
        .context("list notifications")?;
        rows.into_iter().map(Notification::try_from).collect()
    }

    async fn mark_notification_read(&self, id: Uuid, recipient: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query(
            "UPDATE notifications SET is_read = TRUE WHERE id = $1 AND recipient = $2",
        )
        .bind(id)
        .bind(recipient)
        .execute(&self.db)
        .await
        .context("mark notification read")?;
        Ok(res.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;
    use crate::{
        domain::{DeliveryStatus, StorageReq},
        testutil::{donation_at, Harness},
    };

    #[test]
    fn donation_row_carries_every_lifecycle_field() {
        let now = Harness::new().now();
        let mut d = donation_at(Uuid::new_v4(), 77.59, 12.97, now + Duration::hours(6), now);
        d.storage_req = Some(StorageReq::Cold);
        d.lifecycle = Lifecycle::Assigned {
            delivery_status: DeliveryStatus::PickedUp,
        };
        d.claimed_by = Some(Uuid::new_v4());
        d.claimed_at = Some(now);
        d.volunteer = Some(Uuid::new_v4());
        d.estimated_arrival_at = Some(now + Duration::minutes(20));
        d.pickup_photo = Some("pickups/a.jpg".into());
        d.picked_up_at = Some(now + Duration::minutes(25));
        d.dispatched_to = vec![Uuid::new_v4(), Uuid::new_v4()];
        d.dispatched_at = Some(now);

        let row = DonationRow::from(&d);
        assert_eq!(row.delivery_status.as_deref(), Some("picked_up"));
        assert_eq!(Donation::try_from(row).unwrap(), d);
    }

    #[test]
    fn donation_row_keeps_rejection_reason() {
        let now = Harness::new().now();
        let mut d = donation_at(Uuid::new_v4(), 77.59, 12.97, now + Duration::hours(6), now);
        d.lifecycle = Lifecycle::Rejected {
            rejection_reason: "packaging damaged".into(),
        };
        d.delivery_notes = Some("left at gate".into());

        let row = DonationRow::from(&d);
        assert_eq!(row.status, "rejected");
        assert_eq!(row.delivery_status, None);
        assert_eq!(Donation::try_from(row).unwrap(), d);
    }
}
