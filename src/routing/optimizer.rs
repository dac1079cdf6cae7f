//! Greedy nearest-next stop ordering with priority weighting.
//!
//! Not a shortest-path solver: a volunteer rarely carries more than two or
//! three stops, so each step just takes the cheapest weighted hop.

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use super::provider::TravelCostProvider;
use crate::domain::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StopKind {
    Pickup,
    Dropoff,
    Diversion,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stop {
    pub id: String,
    pub kind: StopKind,
    pub donation: Uuid,
    pub point: GeoPoint,
    /// 1 (lowest) to 10 (highest); unset is neutral.
    pub priority: Option<u8>,
    /// Stop that has to be visited first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub path: Vec<Stop>,
    /// Seconds.
    pub estimated_total_time: f64,
    pub diversion_suggested: bool,
}

pub fn priority_weight(priority: Option<u8>) -> f64 {
    match priority {
        Some(p) => f64::from(11 - p.clamp(1, 10)) * 0.1,
        None => 1.0,
    }
}

/// Order `stops` starting from `start`.
///
/// A stop whose cost lookup fails sits out that round. When every eligible
/// stop fails, the route ends with what was planned so far. A diversion is
/// only worth taking as the very first hop; otherwise it is dropped.
pub async fn optimize_route(
    provider: &dyn TravelCostProvider,
    start: GeoPoint,
    stops: Vec<Stop>,
) -> Route {
    let mut remaining = stops;
    let mut current = start;
    let mut route = Route::default();

    while !remaining.is_empty() {
        let eligible: Vec<usize> = (0..remaining.len())
            .filter(|&i| match &remaining[i].after {
                Some(dep) => !remaining.iter().any(|s| &s.id == dep),
                None => true,
            })
            .collect();

        let costs = join_all(
            eligible
                .iter()
                .map(|&i| provider.cost(current, remaining[i].point)),
        )
        .await;

        let best = eligible
            .iter()
            .zip(costs)
            .filter_map(|(&i, cost)| match cost {
                Ok(c) => Some((i, c, c.cost * priority_weight(remaining[i].priority))),
                Err(e) => {
                    debug!(stop = %remaining[i].id, error = %e, "stop skipped this round");
                    None
                }
            })
            .min_by(|a, b| a.2.total_cmp(&b.2));

        let Some((i, travel, _)) = best else {
            warn!(
                planned = route.path.len(),
                unplanned = remaining.len(),
                "no reachable stop left; route cut short"
            );
            break;
        };

        let stop = remaining.remove(i);
        if route.path.is_empty() {
            route.diversion_suggested = stop.kind == StopKind::Diversion;
            remaining.retain(|s| s.kind != StopKind::Diversion);
        }
        route.estimated_total_time += travel.duration_s;
        current = stop.point;
        route.path.push(stop);
    }

    route
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::provider::{ProviderError, StraightLineProvider, TravelCost};
    use async_trait::async_trait;

    const START: GeoPoint = GeoPoint::new(77.5946, 12.9716);

    /// East of START by roughly `km` kilometers.
    fn east(km: f64) -> GeoPoint {
        GeoPoint::new(START.lng + km / 108.4, START.lat)
    }

    fn stop(id: &str, kind: StopKind, point: GeoPoint, priority: Option<u8>) -> Stop {
        Stop {
            id: id.into(),
            kind,
            donation: Uuid::nil(),
            point,
            priority,
            after: None,
        }
    }

    fn ids(route: &Route) -> Vec<&str> {
        route.path.iter().map(|s| s.id.as_str()).collect()
    }

    /// Straight-line costs, except for destinations it refuses.
    struct Flaky {
        unreachable: Vec<GeoPoint>,
    }

    #[async_trait]
    impl TravelCostProvider for Flaky {
        async fn cost(&self, o: GeoPoint, d: GeoPoint) -> Result<TravelCost, ProviderError> {
            if self.unreachable.contains(&d) {
                return Err(ProviderError::Timeout);
            }
            StraightLineProvider.cost(o, d).await
        }
    }

    #[test]
    fn weights() {
        assert!((priority_weight(Some(10)) - 0.1).abs() < 1e-9);
        assert!((priority_weight(Some(1)) - 1.0).abs() < 1e-9);
        assert_eq!(priority_weight(None), 1.0);
    }

    #[tokio::test]
    async fn nearest_next_without_priorities() {
        let stops = vec![
            stop("far", StopKind::Pickup, east(3.0), None),
            stop("near", StopKind::Pickup, east(1.0), None),
        ];
        let route = optimize_route(&StraightLineProvider, START, stops).await;
        assert_eq!(ids(&route), vec!["near", "far"]);
        assert!(!route.diversion_suggested);
        assert!((route.estimated_total_time - 3000.0 / 13.0).abs() < 5.0);
    }

    #[tokio::test]
    async fn priority_outweighs_distance() {
        let stops = vec![
            stop("near-low", StopKind::Pickup, east(1.0), Some(1)),
            stop("far-high", StopKind::Pickup, GeoPoint::new(START.lng, START.lat + 0.045), Some(10)),
        ];
        let route = optimize_route(&StraightLineProvider, START, stops).await;
        assert_eq!(route.path[0].id, "far-high");
    }

    #[tokio::test]
    async fn dropoff_waits_for_its_pickup() {
        let pickup = stop("pickup", StopKind::Pickup, east(4.0), Some(3));
        let mut dropoff = stop("dropoff", StopKind::Dropoff, east(1.0), Some(5));
        dropoff.after = Some("pickup".into());
        let route = optimize_route(&StraightLineProvider, START, vec![dropoff, pickup]).await;
        assert_eq!(ids(&route), vec!["pickup", "dropoff"]);
    }

    #[tokio::test]
    async fn diversion_taken_first_is_flagged() {
        let stops = vec![
            stop("committed", StopKind::Pickup, east(3.0), Some(6)),
            stop("divert", StopKind::Diversion, east(0.5), Some(10)),
        ];
        let route = optimize_route(&StraightLineProvider, START, stops).await;
        assert_eq!(ids(&route), vec!["divert", "committed"]);
        assert!(route.diversion_suggested);
    }

    #[tokio::test]
    async fn diversion_not_taken_first_is_dropped() {
        let stops = vec![
            stop("committed", StopKind::Pickup, east(0.2), Some(9)),
            stop("divert", StopKind::Diversion, east(4.5), Some(10)),
        ];
        let route = optimize_route(&StraightLineProvider, START, stops).await;
        assert_eq!(ids(&route), vec!["committed"]);
        assert!(!route.diversion_suggested);
    }

    #[tokio::test]
    async fn failing_stop_sits_out_and_route_ends_early() {
        let bad = east(1.0);
        let provider = Flaky {
            unreachable: vec![bad],
        };
        let stops = vec![
            stop("bad", StopKind::Pickup, bad, None),
            stop("good", StopKind::Pickup, east(2.0), None),
        ];
        let route = optimize_route(&provider, START, stops).await;
        assert_eq!(ids(&route), vec!["good"]);
    }

    #[tokio::test]
    async fn all_failing_yields_empty_route() {
        let provider = Flaky {
            unreachable: vec![east(1.0), east(2.0)],
        };
        let stops = vec![
            stop("a", StopKind::Pickup, east(1.0), None),
            stop("b", StopKind::Dropoff, east(2.0), None),
        ];
        let route = optimize_route(&provider, START, stops).await;
        assert!(route.path.is_empty());
        assert_eq!(route.estimated_total_time, 0.0);
    }
}
