use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::{
    auth::AuthActor,
    domain::{GeoPoint, Role},
    error::AppError,
    routing::Route,
    state::AppState,
    store::Store,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/volunteers/me/route", get(active_route))
        .route("/volunteers/me/location", put(update_location))
        .route("/volunteers/me/online", put(set_online))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineRequest {
    pub is_online: bool,
}

#[instrument(skip(state))]
pub async fn active_route(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
) -> Result<Json<Route>, (StatusCode, String)> {
    actor.require(Role::Volunteer)?;
    Ok(Json(state.routes.active_route(actor.id).await?))
}

/// Location heartbeat. Also marks the volunteer online.
#[instrument(skip(state))]
pub async fn update_location(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Json(point): Json<GeoPoint>,
) -> Result<StatusCode, (StatusCode, String)> {
    actor.require(Role::Volunteer)?;
    if point.is_unset() {
        return Err(AppError::Validation("a valid location is required".into()).into());
    }
    let updated = state
        .store
        .update_volunteer_location(actor.id, point, state.clock.now())
        .await
        .map_err(AppError::from)?;
    if !updated {
        return Err(AppError::NotFound("volunteer").into());
    }
    debug!(volunteer = %actor.id, "heartbeat");
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn set_online(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Json(body): Json<OnlineRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    actor.require(Role::Volunteer)?;
    let updated = state
        .store
        .set_volunteer_online(actor.id, body.is_online)
        .await
        .map_err(AppError::from)?;
    if !updated {
        return Err(AppError::NotFound("volunteer").into());
    }
    Ok(StatusCode::NO_CONTENT)
}
