use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use tracing::instrument;

use crate::{auth::AuthActor, domain::Role, matching::DonationCandidate, state::AppState};

pub fn router() -> Router<AppState> {
    Router::new().route("/ngo/donations", get(donations_to_claim))
}

/// Active donations around the calling NGO, best match first.
#[instrument(skip(state))]
pub async fn donations_to_claim(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
) -> Result<Json<Vec<DonationCandidate>>, (StatusCode, String)> {
    actor.require(Role::Ngo)?;
    Ok(Json(state.dispatcher.best_donations_for_ngo(actor.id).await?))
}
