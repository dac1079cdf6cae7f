use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;
use time::UtcOffset;
use tracing::info;

use crate::{
    clock::{Clock, SystemClock},
    config::{AppConfig, DispatchConfig, JwtConfig},
    lifecycle::LifecycleService,
    matching::Dispatcher,
    notify::{Notifier, StoreNotifier},
    routing::{provider, RoutePlanner, StraightLineProvider, TravelCostProvider},
    storage::{MemoryPhotoStore, PhotoStore, S3PhotoStore},
    store::{MemoryStore, PgStore, Store},
    supervisor::Jobs,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    /// Set when running on Postgres; used for migrations.
    pub db: Option<PgPool>,
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
    pub photos: Arc<dyn PhotoStore>,
    pub notifier: Arc<dyn Notifier>,
    pub dispatcher: Arc<Dispatcher>,
    pub lifecycle: Arc<LifecycleService>,
    pub routes: Arc<RoutePlanner>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let (db, store): (Option<PgPool>, Arc<dyn Store>) = match &config.database_url {
            Some(url) => {
                let db = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await
                    .context("connect to postgres")?;
                (Some(db.clone()), Arc::new(PgStore::new(db)))
            }
            None => {
                info!("DATABASE_URL not set; using the in-memory store");
                (None, Arc::new(MemoryStore::new()))
            }
        };

        let photos: Arc<dyn PhotoStore> = match &config.photos {
            Some(cfg) => Arc::new(S3PhotoStore::new(cfg).await?),
            None => {
                info!("MINIO_ENDPOINT not set; photos kept in memory");
                Arc::new(MemoryPhotoStore::new())
            }
        };

        let offset = UtcOffset::from_hms(config.utc_offset_hours, 0, 0)
            .context("LOCAL_UTC_OFFSET_HOURS out of range")?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(offset));

        Ok(Self::from_parts(
            config.clone(),
            db,
            store,
            clock,
            photos,
            provider::from_config(&config),
        ))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        db: Option<PgPool>,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        photos: Arc<dyn PhotoStore>,
        travel: Arc<dyn TravelCostProvider>,
    ) -> Self {
        let notifier: Arc<dyn Notifier> = Arc::new(StoreNotifier::new(store.clone(), clock.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            clock.clone(),
            config.dispatch.clone(),
        ));
        let lifecycle = Arc::new(LifecycleService::new(
            store.clone(),
            notifier.clone(),
            clock.clone(),
        ));
        let routes = Arc::new(RoutePlanner::new(
            store.clone(),
            travel,
            clock.clone(),
            config.dispatch.clone(),
        ));
        Self {
            config,
            db,
            store,
            clock,
            photos,
            notifier,
            dispatcher,
            lifecycle,
            routes,
        }
    }

    /// Dependencies for the background supervisor.
    pub fn supervisor_jobs(&self) -> Jobs {
        Jobs {
            store: self.store.clone(),
            lifecycle: self.lifecycle.clone(),
            dispatcher: self.dispatcher.clone(),
            clock: self.clock.clone(),
            config: self.config.dispatch.clone(),
            ping_url: self
                .config
                .public_url
                .as_ref()
                .map(|u| format!("{}/api/v1/health", u.trim_end_matches('/'))),
            http: reqwest::Client::new(),
        }
    }

    /// In-memory state for handler tests.
    pub fn fake() -> Self {
        let config = Arc::new(AppConfig {
            database_url: None,
            jwt: JwtConfig {
                secret: "test".into(),
                issuer: "test".into(),
                audience: "test".into(),
                ttl_minutes: 5,
            },
            photos: None,
            tomtom_api_key: None,
            provider_timeout_secs: 1,
            public_url: None,
            supervisor_enabled: false,
            utc_offset_hours: 0,
            dispatch: DispatchConfig::default(),
        });
        Self::from_parts(
            config,
            None,
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock::default()),
            Arc::new(MemoryPhotoStore::new()),
            Arc::new(StraightLineProvider),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_targets_the_health_route() {
        let mut state = AppState::fake();
        let mut cfg = (*state.config).clone();
        cfg.public_url = Some("https://foodbridge.example.org/".into());
        state.config = Arc::new(cfg);
        assert_eq!(
            state.supervisor_jobs().ping_url.as_deref(),
            Some("https://foodbridge.example.org/api/v1/health")
        );
        assert!(AppState::fake().supervisor_jobs().ping_url.is_none());
    }
}
