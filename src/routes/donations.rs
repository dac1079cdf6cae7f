use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    auth::AuthActor,
    domain::{
        Donation, FoodCategory, GeoPoint, NewDonation, Perishability, PickupWindow, Quantity,
        StorageReq,
    },
    matching::{NgoCandidate, VolunteerCandidate},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/donations", post(create_donation))
        .route("/donations/mine", get(my_donations))
        .route("/donations/:id", get(get_donation))
        .route("/donations/:id/cancel", post(cancel_donation))
        .route("/donations/:id/claim", post(claim_donation))
        .route("/donations/:id/reject", post(reject_donation))
        .route("/donations/:id/complete", post(complete_donation))
        .route("/donations/:id/ngos", get(best_ngos))
        .route("/donations/:id/volunteers", get(suitable_volunteers))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDonationRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub food_type: String,
    pub quantity: String,
    pub perishability: Perishability,
    pub food_category: FoodCategory,
    pub storage_req: Option<StorageReq>,
    #[serde(default)]
    pub allergens: Vec<String>,
    #[serde(default)]
    pub dietary_tags: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub expiry_date: OffsetDateTime,
    pub pickup_window: PickupWindow,
    pub coordinates: GeoPoint,
}

impl From<CreateDonationRequest> for NewDonation {
    fn from(r: CreateDonationRequest) -> Self {
        NewDonation {
            title: r.title,
            description: r.description,
            food_type: r.food_type,
            quantity: Quantity::parse(&r.quantity),
            perishability: r.perishability,
            food_category: r.food_category,
            storage_req: r.storage_req,
            allergens: r.allergens,
            dietary_tags: r.dietary_tags,
            expiry_date: r.expiry_date,
            pickup_window: r.pickup_window,
            coordinates: r.coordinates,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompleteRequest {
    pub rating: Option<u8>,
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Limit {
    pub limit: Option<usize>,
}

#[instrument(skip(state, body))]
pub async fn create_donation(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Json(body): Json<CreateDonationRequest>,
) -> Result<(StatusCode, Json<Donation>), (StatusCode, String)> {
    let donation = state.lifecycle.create_donation(&actor, body.into()).await?;
    Ok((StatusCode::CREATED, Json(donation)))
}

#[instrument(skip(state))]
pub async fn my_donations(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
) -> Result<Json<Vec<Donation>>, (StatusCode, String)> {
    Ok(Json(state.lifecycle.donations_of(&actor).await?))
}

#[instrument(skip(state))]
pub async fn get_donation(
    State(state): State<AppState>,
    AuthActor(_actor): AuthActor,
    Path(id): Path<Uuid>,
) -> Result<Json<Donation>, (StatusCode, String)> {
    Ok(Json(state.lifecycle.donation(id).await?))
}

#[instrument(skip(state))]
pub async fn cancel_donation(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<Uuid>,
) -> Result<Json<Donation>, (StatusCode, String)> {
    Ok(Json(state.lifecycle.cancel(&actor, id).await?))
}

#[instrument(skip(state))]
pub async fn claim_donation(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<Uuid>,
) -> Result<Json<Donation>, (StatusCode, String)> {
    Ok(Json(state.lifecycle.claim(&actor, id).await?))
}

#[instrument(skip(state, body))]
pub async fn reject_donation(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<Uuid>,
    Json(body): Json<RejectRequest>,
) -> Result<Json<Donation>, (StatusCode, String)> {
    Ok(Json(state.lifecycle.reject(&actor, id, &body.reason).await?))
}

#[instrument(skip(state, body))]
pub async fn complete_donation(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<Uuid>,
    body: Option<Json<CompleteRequest>>,
) -> Result<Json<Donation>, (StatusCode, String)> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let donation = state
        .lifecycle
        .complete(&actor, id, body.rating, body.comment.as_deref())
        .await?;
    Ok(Json(donation))
}

#[instrument(skip(state))]
pub async fn best_ngos(
    State(state): State<AppState>,
    AuthActor(_actor): AuthActor,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<NgoCandidate>>, (StatusCode, String)> {
    Ok(Json(state.dispatcher.best_ngos_for_donation(id).await?))
}

#[instrument(skip(state))]
pub async fn suitable_volunteers(
    State(state): State<AppState>,
    AuthActor(_actor): AuthActor,
    Path(id): Path<Uuid>,
    Query(q): Query<Limit>,
) -> Result<Json<Vec<VolunteerCandidate>>, (StatusCode, String)> {
    let donation = state.lifecycle.donation(id).await?;
    let mut ranked = state.dispatcher.suitable_volunteers(&donation, None).await?;
    if let Some(limit) = q.limit {
        ranked.truncate(limit);
    }
    Ok(Json(ranked))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth::Actor, domain::Role};

    fn request_json(expiry: &str, window: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "title": "Bakery surplus",
            "foodType": "bread",
            "quantity": "8 kg loaves",
            "perishability": "medium",
            "foodCategory": "packaged",
            "storageReq": "dry",
            "expiryDate": expiry,
            "pickupWindow": window,
            "coordinates": { "lng": 77.59, "lat": 12.97 }
        })
    }

    #[test]
    fn request_accepts_encoded_pickup_window() {
        let body: CreateDonationRequest = serde_json::from_value(request_json(
            "2026-10-18T20:00:00Z",
            serde_json::json!("{\"start\":\"2026-10-18T10:00:00Z\",\"end\":\"2026-10-18T12:00:00Z\"}"),
        ))
        .unwrap();
        let input: NewDonation = body.into();
        assert_eq!(input.quantity.magnitude, 8.0);
        assert_eq!(input.storage_req, Some(StorageReq::Dry));
        assert!(input.description.is_empty());
    }

    #[tokio::test]
    async fn create_reports_the_violated_rule() {
        let state = AppState::fake();
        let donor = Actor::new(Uuid::new_v4(), Role::Donor);
        let now = OffsetDateTime::now_utc();
        let fmt = |t: OffsetDateTime| {
            t.format(&time::format_description::well_known::Rfc3339)
                .unwrap()
        };
        let body: CreateDonationRequest = serde_json::from_value(request_json(
            &fmt(now + time::Duration::hours(5)),
            serde_json::json!({
                "start": fmt(now),
                "end": fmt(now + time::Duration::hours(6)),
            }),
        ))
        .unwrap();

        let (status, message) = create_donation(State(state), AuthActor(donor), Json(body))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(message.contains("before the food expires"));
    }

    #[tokio::test]
    async fn claim_of_missing_donation_is_not_found() {
        let state = AppState::fake();
        let ngo = Actor::new(Uuid::new_v4(), Role::Ngo);
        let (status, _) = claim_donation(State(state), AuthActor(ngo), Path(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
