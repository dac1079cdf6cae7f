use axum::{routing::get, Router};

use crate::state::AppState;

pub mod donations;
pub mod missions;
pub mod ngo;
pub mod notifications;
pub mod volunteers;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(donations::router())
        .merge(ngo::router())
        .merge(missions::router())
        .merge(volunteers::router())
        .merge(notifications::router())
}
