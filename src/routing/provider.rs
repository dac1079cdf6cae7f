use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error, info, instrument};

use crate::{config::AppConfig, domain::GeoPoint};

/// Average urban courier speed used when no routing service is configured.
pub const ASSUMED_SPEED_MPS: f64 = 13.0;

/// Weight of a second of traffic delay, in meters of detour.
const TRAFFIC_DELAY_WEIGHT: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TravelCost {
    pub distance_m: f64,
    pub duration_s: f64,
    pub cost: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("routing provider timed out")]
    Timeout,

    #[error("routing provider request failed: {0}")]
    Http(String),

    #[error("no route between the given points")]
    NoRoute,
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Http(e.to_string())
        }
    }
}

/// Travel cost between two points.
#[async_trait]
pub trait TravelCostProvider: Send + Sync {
    async fn cost(&self, origin: GeoPoint, destination: GeoPoint)
        -> Result<TravelCost, ProviderError>;
}

/// Haversine distance at a fixed speed. Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct StraightLineProvider;

#[async_trait]
impl TravelCostProvider for StraightLineProvider {
    async fn cost(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
    ) -> Result<TravelCost, ProviderError> {
        let distance_m = origin.distance_m(&destination);
        Ok(TravelCost {
            distance_m,
            duration_s: distance_m / ASSUMED_SPEED_MPS,
            cost: distance_m,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteSummary {
    length_in_meters: f64,
    travel_time_in_seconds: f64,
    #[serde(default)]
    traffic_delay_in_seconds: f64,
}

#[derive(Debug, Deserialize)]
struct CalculatedRoute {
    summary: RouteSummary,
}

#[derive(Debug, Deserialize)]
struct CalculateRouteResponse {
    #[serde(default)]
    routes: Vec<CalculatedRoute>,
}

/// TomTom Routing API, traffic-aware.
pub struct TomTomProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl TomTomProvider {
    pub fn new(api_key: String, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: "https://api.tomtom.com".into(),
            timeout,
        }
    }

    fn route_url(&self, origin: GeoPoint, destination: GeoPoint) -> String {
        format!(
            "{}/routing/1/calculateRoute/{},{}:{},{}/json",
            self.base_url, origin.lat, origin.lng, destination.lat, destination.lng
        )
    }
}

fn cost_of(summary: &RouteSummary) -> TravelCost {
    TravelCost {
        distance_m: summary.length_in_meters,
        duration_s: summary.travel_time_in_seconds,
        cost: summary.length_in_meters + TRAFFIC_DELAY_WEIGHT * summary.traffic_delay_in_seconds,
    }
}

#[async_trait]
impl TravelCostProvider for TomTomProvider {
    #[instrument(skip(self))]
    async fn cost(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
    ) -> Result<TravelCost, ProviderError> {
        let response = self
            .client
            .get(self.route_url(origin, destination))
            .query(&[("key", self.api_key.as_str()), ("traffic", "true")])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "routing request failed");
                ProviderError::from(e)
            })?;

        if !response.status().is_success() {
            return Err(ProviderError::Http(format!(
                "unexpected status {}",
                response.status()
            )));
        }
        let body: CalculateRouteResponse = response.json().await?;
        let route = body.routes.first().ok_or(ProviderError::NoRoute)?;
        let cost = cost_of(&route.summary);
        debug!(distance_m = cost.distance_m, duration_s = cost.duration_s, "route cost");
        Ok(cost)
    }
}

/// Networked provider when an API key is configured, straight-line otherwise.
pub fn from_config(cfg: &AppConfig) -> Arc<dyn TravelCostProvider> {
    match &cfg.tomtom_api_key {
        Some(key) => {
            info!("travel costs from TomTom routing");
            Arc::new(TomTomProvider::new(
                key.clone(),
                Duration::from_secs(cfg.provider_timeout_secs),
            ))
        }
        None => {
            info!("TOMTOM_API_KEY not set; using straight-line travel costs");
            Arc::new(StraightLineProvider)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn straight_line_uses_fixed_speed() {
        let a = GeoPoint::new(77.5946, 12.9716);
        let b = GeoPoint::new(77.6946, 12.9716);
        let c = StraightLineProvider.cost(a, b).await.unwrap();
        assert_eq!(c.cost, c.distance_m);
        assert!((c.duration_s - c.distance_m / 13.0).abs() < 1e-9);
        assert!((c.distance_m - 10_840.0).abs() < 100.0);
    }

    #[test]
    fn traffic_delay_is_weighted() {
        let body: CalculateRouteResponse = serde_json::from_value(serde_json::json!({
            "routes": [{
                "summary": {
                    "lengthInMeters": 4000,
                    "travelTimeInSeconds": 600,
                    "trafficDelayInSeconds": 120
                }
            }]
        }))
        .unwrap();
        let cost = cost_of(&body.routes[0].summary);
        assert_eq!(cost.distance_m, 4000.0);
        assert_eq!(cost.duration_s, 600.0);
        assert_eq!(cost.cost, 4180.0);
    }

    #[test]
    fn url_is_lat_lng_ordered() {
        let p = TomTomProvider::new("k".into(), Duration::from_secs(1));
        let url = p.route_url(GeoPoint::new(77.5, 12.9), GeoPoint::new(77.6, 13.0));
        assert!(url.ends_with("/calculateRoute/12.9,77.5:13,77.6/json"));
    }
}
