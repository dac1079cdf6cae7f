use serde::Deserialize;
use time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoStoreConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub url_ttl_secs: u64,
}

/// Radii, deadlines and fan-out used by matching and the supervisor.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub ngo_radius_m: f64,
    pub volunteer_radius_m: f64,
    pub escalation_radius_m: f64,
    pub diversion_radius_m: f64,
    pub volunteer_top_n: usize,
    pub escalation_fan_out: usize,
    pub heartbeat_timeout: Duration,
    pub eta_grace: Duration,
    pub escalation_delay: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            ngo_radius_m: 15_000.0,
            volunteer_radius_m: 10_000.0,
            escalation_radius_m: 20_000.0,
            diversion_radius_m: 5_000.0,
            volunteer_top_n: 10,
            escalation_fan_out: 3,
            heartbeat_timeout: Duration::minutes(15),
            eta_grace: Duration::minutes(20),
            escalation_delay: Duration::minutes(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Absent: run on the in-memory store.
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    /// Absent: photos are kept by the in-process store.
    pub photos: Option<PhotoStoreConfig>,
    /// Absent: travel costs fall back to straight-line estimates.
    pub tomtom_api_key: Option<String>,
    pub provider_timeout_secs: u64,
    /// Own public URL for the keep-alive ping; absent disables it.
    pub public_url: Option<String>,
    pub supervisor_enabled: bool,
    /// Local UTC offset in hours; decides where "today" starts.
    pub utc_offset_hours: i8,
    pub dispatch: DispatchConfig,
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_opt(key).and_then(|v| v.parse::<T>().ok()).unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: env_opt("JWT_ISSUER").unwrap_or_else(|| "foodbridge".into()),
            audience: env_opt("JWT_AUDIENCE").unwrap_or_else(|| "foodbridge-users".into()),
            ttl_minutes: env_parse("JWT_TTL_MINUTES", 60),
        };

        let photos = match env_opt("MINIO_ENDPOINT") {
            Some(endpoint) => Some(PhotoStoreConfig {
                endpoint,
                bucket: env_opt("MINIO_BUCKET").unwrap_or_else(|| "foodbridge".into()),
                access_key: std::env::var("MINIO_ACCESS_KEY")?,
                secret_key: std::env::var("MINIO_SECRET_KEY")?,
                region: env_opt("MINIO_REGION").unwrap_or_else(|| "us-east-1".into()),
                url_ttl_secs: env_parse("PHOTO_URL_TTL_SECS", 7 * 24 * 3600),
            }),
            None => None,
        };

        let defaults = DispatchConfig::default();
        let dispatch = DispatchConfig {
            ngo_radius_m: env_parse("NGO_RADIUS_M", defaults.ngo_radius_m),
            volunteer_radius_m: env_parse("VOLUNTEER_RADIUS_M", defaults.volunteer_radius_m),
            escalation_radius_m: env_parse("ESCALATION_RADIUS_M", defaults.escalation_radius_m),
            ..defaults
        };

        Ok(Self {
            database_url: env_opt("DATABASE_URL"),
            jwt,
            photos,
            tomtom_api_key: env_opt("TOMTOM_API_KEY"),
            provider_timeout_secs: env_parse("PROVIDER_TIMEOUT_SECS", 4),
            public_url: env_opt("PUBLIC_URL"),
            supervisor_enabled: env_parse("SUPERVISOR_ENABLED", true),
            utc_offset_hours: env_parse("LOCAL_UTC_OFFSET_HOURS", 0),
            dispatch,
        })
    }
}
