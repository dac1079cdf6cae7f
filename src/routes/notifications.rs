use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    auth::AuthActor, domain::Notification, error::AppError, state::AppState, store::Store,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(list_notifications))
        .route("/notifications/:id/read", post(mark_read))
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

#[instrument(skip(state))]
pub async fn list_notifications(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Query(p): Query<Pagination>,
) -> Result<Json<Vec<Notification>>, (StatusCode, String)> {
    let limit = p.limit.clamp(1, 200);
    let items = state
        .store
        .notifications_for(actor.id, limit)
        .await
        .map_err(AppError::from)?;
    Ok(Json(items))
}

#[instrument(skip(state))]
pub async fn mark_read(
    State(state): State<AppState>,
    AuthActor(actor): AuthActor,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    let updated = state
        .store
        .mark_notification_read(id, actor.id)
        .await
        .map_err(AppError::from)?;
    if !updated {
        return Err(AppError::NotFound("notification").into());
    }
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::Actor,
        domain::{NotificationKind, Role},
        notify::Notifier,
        testutil::donor,
    };

    #[tokio::test]
    async fn only_the_recipient_can_mark_read() {
        let state = AppState::fake();
        let d = donor("bakery");
        state.store.insert_user(&d).await.unwrap();
        let n = state
            .notifier
            .notify(d.id, "claimed".into(), NotificationKind::DonationClaimed, None)
            .await
            .unwrap()
            .unwrap();

        let stranger = Actor::new(Uuid::new_v4(), Role::Donor);
        let (status, _) = mark_read(State(state.clone()), AuthActor(stranger), Path(n.id))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);

        let owner = Actor::new(d.id, Role::Donor);
        let status = mark_read(State(state.clone()), AuthActor(owner), Path(n.id))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        let Json(listed) = list_notifications(
            State(state),
            AuthActor(owner),
            Query(Pagination { limit: 10 }),
        )
        .await
        .unwrap();
        assert!(listed[0].is_read);
    }
}
