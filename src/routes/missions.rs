use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::{
    auth::AuthActor,
    domain::{DeliveryStatus, Donation},
    error::AppError,
    state::AppState,
    storage::{photo_key, PhotoStore},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/missions/:id/accept", post(accept_mission))
        .route("/missions/:id/status", post(update_status))
        .route("/missions/:id/eta", post(set_eta))
        .route("/missions/:id/pickup", post(confirm_pickup))
        .route("/missions/:id/deliver", post(confirm_delivery))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtaRequest {
    #[serde(with = "time::serde::rfc3339")]
    pub estimated_arrival_at: OffsetDateTime,
}

/// Evidence upload: one `photo` file part and an optional `notes` text part.
#[derive(Debug, Default)]
pub struct Evidence {
    pub photo: Option<(Bytes, String)>,
    pub notes: Option<String>,
}

fn bad_multipart<E: std::fmt::Display>(e: E) -> (StatusCode, String) {
    warn!(error = %e, "multipart read failed");
    (StatusCode::BAD_REQUEST, "invalid multipart body".into())
}

async fn read_evidence(mut mp: Multipart) -> Result<Evidence, (StatusCode, String)> {
    let mut evidence = Evidence::default();
    while let Some(field) = mp.next_field().await.map_err(bad_multipart)? {
        match field.name() {
            Some("photo") => {
                let content_type = field
                    .content_type()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "application/octet-stream".into());
                let data = field.bytes().await.map_err(bad_multipart)?;
                evidence.photo = Some((data, content_type));
            }
            Some("notes") => evidence.notes = Some(field.text().await.map_err(bad_multipart)?),
            _ => {}
        }
    }
    Ok(evidence)
}

/// Store the photo for `donation` under `stage` and return its URL.
async fn store_photo(
    state: &AppState,
    donation: Uuid,
    stage: &str,
    photo: Option<(Bytes, String)>,
) -> Result<String, (StatusCode, String)> {
    let (body, content_type) = photo
        .filter(|(b, _)| !b.is_empty())
        .ok_or_else(|| (StatusCode::BAD_REQUEST, "photo is required".to_string()))?;
    let key = photo_key(donation, stage, &content_type);
    let url = state
        .photos
        .store(&key, body, &content_type)
        .await
        .map_err(AppError::from)?;
    Ok(url)
}

#[instrument(skip(state))]
pub async fn accept_mission(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<Uuid>,
) -> Result<Json<Donation>, (StatusCode, String)> {
    Ok(Json(state.lifecycle.accept_mission(&actor, id).await?))
}

#[instrument(skip(state, body))]
pub async fn update_status(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<Uuid>,
    Json(body): Json<StatusRequest>,
) -> Result<Json<Donation>, (StatusCode, String)> {
    let target: DeliveryStatus = body
        .status
        .parse()
        .map_err(|e: anyhow::Error| AppError::Validation(e.to_string()))?;
    Ok(Json(
        state
            .lifecycle
            .update_delivery_status(&actor, id, target)
            .await?,
    ))
}

#[instrument(skip(state, body))]
pub async fn set_eta(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<Uuid>,
    Json(body): Json<EtaRequest>,
) -> Result<Json<Donation>, (StatusCode, String)> {
    Ok(Json(
        state
            .lifecycle
            .set_eta(&actor, id, body.estimated_arrival_at)
            .await?,
    ))
}

#[instrument(skip(state, mp))]
pub async fn confirm_pickup(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<Uuid>,
    mp: Multipart,
) -> Result<Json<Donation>, (StatusCode, String)> {
    state.lifecycle.courier_mission(&actor, id).await?;
    let evidence = read_evidence(mp).await?;
    let url = store_photo(&state, id, "pickup", evidence.photo).await?;
    Ok(Json(state.lifecycle.confirm_pickup(&actor, id, url).await?))
}

#[instrument(skip(state, mp))]
pub async fn confirm_delivery(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<Uuid>,
    mp: Multipart,
) -> Result<Json<Donation>, (StatusCode, String)> {
    state.lifecycle.courier_mission(&actor, id).await?;
    let evidence = read_evidence(mp).await?;
    let url = store_photo(&state, id, "delivery", evidence.photo).await?;
    let donation = state
        .lifecycle
        .confirm_delivery(&actor, id, url, evidence.notes)
        .await?;
    Ok(Json(donation))
}
