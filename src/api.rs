//! HTTP query surface.
//!
//! Handlers only read published state (the latest snapshot, the static
//! catalog, the scheduler status). None of them waits on a scheduled refresh.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::error::FailureKind;
use crate::model::{RouteSchedule, Stop, VehiclePosition, VehicleStatus};
use crate::scheduler::{RefreshOutcome, RefreshScheduler};
use crate::snapshot::Snapshot;
use crate::static_data::{IndexSource, StaticCatalog};
use crate::swap::Published;

#[derive(Clone)]
pub struct AppState {
    scheduler: Arc<RefreshScheduler>,
    catalog: Arc<Published<StaticCatalog>>,
    static_dir: Option<PathBuf>,
    ttl: Duration,
}

impl AppState {
    pub fn new(
        scheduler: Arc<RefreshScheduler>,
        catalog: Arc<Published<StaticCatalog>>,
        static_dir: Option<PathBuf>,
        ttl: Duration,
    ) -> Self {
        Self {
            scheduler,
            catalog,
            static_dir,
            ttl,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/realtime/positions/", get(positions))
        .route("/realtime/status", get(status))
        .route("/realtime/refresh", post(refresh))
        .route("/stops.json", get(stops))
        .route("/routes.geojson", get(routes_geojson))
        .route("/static/reload", post(reload_static))
        .layer(cors)
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct RouteFilter {
    route_id: Option<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    let body = ErrorResponse {
        error: error.into(),
    };
    (status, Json(body)).into_response()
}

/// Body of `GET /realtime/positions/`, also printed by the `fetch` command.
#[derive(Serialize)]
pub struct PositionsResponse<'a> {
    vehicles: Vec<VehicleDto<'a>>,
    expires: DateTime<Utc>,
}

impl<'a> PositionsResponse<'a> {
    pub fn new(snapshot: &'a Snapshot, ttl: Duration, route_id: Option<&'a str>) -> Self {
        let vehicles = match route_id {
            Some(route_id) => snapshot.on_route(route_id).map(VehicleDto::from).collect(),
            None => snapshot.positions.iter().map(VehicleDto::from).collect(),
        };
        Self {
            vehicles,
            expires: snapshot.expires(ttl),
        }
    }
}

#[derive(Serialize)]
struct VehicleDto<'a> {
    vehicle_id: &'a str,
    license_plate: Option<&'a str>,
    lat: f64,
    lon: f64,
    bearing: Option<f64>,
    /// km/h
    speed: Option<f64>,
    route: Option<&'a str>,
    trip: Option<&'a str>,
    current_stop_sequence: Option<u32>,
    current_status: Option<VehicleStatus>,
    updated: DateTime<Utc>,
    updated_approximate: bool,
}

impl<'a> From<&'a VehiclePosition> for VehicleDto<'a> {
    fn from(p: &'a VehiclePosition) -> Self {
        Self {
            vehicle_id: &p.vehicle_id,
            license_plate: p.license_plate.as_deref(),
            lat: p.latitude,
            lon: p.longitude,
            bearing: p.bearing,
            speed: p.speed_kmh(),
            route: p.route_id.as_deref(),
            trip: p.trip_id.as_deref(),
            current_stop_sequence: p.current_stop_sequence,
            current_status: p.current_status,
            updated: p.timestamp,
            updated_approximate: p.timestamp_approximate,
        }
    }
}

async fn positions(State(state): State<AppState>, Query(filter): Query<RouteFilter>) -> Response {
    let Some(snapshot) = state.scheduler.store().read() else {
        let message = match state.scheduler.status().last_error {
            Some(last) => format!("no vehicle positions available yet: {last}"),
            None => "no vehicle positions available yet".to_string(),
        };
        return error_response(StatusCode::SERVICE_UNAVAILABLE, message);
    };

    if let (Some(route_id), Some(catalog)) = (filter.route_id.as_deref(), state.catalog.load()) {
        if !catalog.index.route_exists(route_id) {
            return error_response(StatusCode::NOT_FOUND, format!("unknown route {route_id}"));
        }
    }

    let body = PositionsResponse::new(&snapshot, state.ttl, filter.route_id.as_deref());
    Json(body).into_response()
}

async fn status(State(state): State<AppState>) -> Response {
    Json(state.scheduler.status()).into_response()
}

#[derive(Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum RefreshResponse {
    Coalesced,
    Success {
        generation: u64,
        vehicles: usize,
    },
    Failed {
        kind: FailureKind,
        error: String,
    },
}

async fn refresh(State(state): State<AppState>) -> Response {
    match state.scheduler.refresh().await {
        RefreshOutcome::Coalesced => {
            (StatusCode::ACCEPTED, Json(RefreshResponse::Coalesced)).into_response()
        }
        RefreshOutcome::Success(snapshot) => Json(RefreshResponse::Success {
            generation: snapshot.generation,
            vehicles: snapshot.positions.len(),
        })
        .into_response(),
        RefreshOutcome::Failed(failure) => (
            StatusCode::BAD_GATEWAY,
            Json(RefreshResponse::Failed {
                kind: failure.kind(),
                error: failure.to_string(),
            }),
        )
            .into_response(),
    }
}

#[derive(Serialize)]
struct StopsResponse<'a> {
    stops: Vec<StopDto<'a>>,
}

#[derive(Serialize)]
struct StopDto<'a> {
    code: &'a str,
    description: &'a str,
    description_en: &'a str,
    description_el: &'a str,
    lat: f64,
    lon: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence: Option<u32>,
}

impl<'a> StopDto<'a> {
    fn new(stop: &'a Stop, sequence: Option<u32>) -> Self {
        Self {
            code: &stop.code,
            description: &stop.description,
            description_en: &stop.description_en,
            description_el: &stop.description_el,
            lat: stop.lat,
            lon: stop.lon,
            sequence,
        }
    }
}

fn catalog_unavailable() -> Response {
    error_response(StatusCode::SERVICE_UNAVAILABLE, "static data not loaded")
}

async fn stops(State(state): State<AppState>, Query(filter): Query<RouteFilter>) -> Response {
    let Some(catalog) = state.catalog.load() else {
        return catalog_unavailable();
    };

    let stops = match filter.route_id.as_deref() {
        Some(route_id) => catalog
            .index
            .stops_for_route(route_id)
            .iter()
            .map(|indexed| StopDto::new(&indexed.stop, Some(indexed.sequence)))
            .collect(),
        None => catalog
            .stops
            .values()
            .map(|stop| StopDto::new(stop, None))
            .collect(),
    };
    Json(StopsResponse { stops }).into_response()
}

#[derive(Serialize)]
struct FeatureCollection<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    features: Vec<Feature<'a>>,
}

#[derive(Serialize)]
struct Feature<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    geometry: Option<LineString<'a>>,
    properties: RouteProperties<'a>,
}

#[derive(Serialize)]
struct LineString<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    coordinates: &'a [[f64; 2]],
}

#[derive(Serialize)]
struct RouteProperties<'a> {
    route_id: &'a str,
    line_name: Option<&'a str>,
    route_name: Option<&'a str>,
    description: Option<&'a str>,
    direction: Option<&'a str>,
    length_km: Option<f64>,
    first_stop: Option<&'a str>,
    last_stop: Option<&'a str>,
    color: &'a str,
    schedule: &'a RouteSchedule,
    stops: Vec<RouteStopDto<'a>>,
}

#[derive(Serialize)]
struct RouteStopDto<'a> {
    code: &'a str,
    description: &'a str,
    description_en: &'a str,
    description_el: &'a str,
    sequence: u32,
    /// `[lon, lat]`
    location: [f64; 2],
}

async fn routes_geojson(State(state): State<AppState>) -> Response {
    let Some(catalog) = state.catalog.load() else {
        return catalog_unavailable();
    };

    let features = catalog
        .routes
        .values()
        .map(|route| {
            let stops = catalog
                .index
                .stops_for_route(&route.route_id)
                .iter()
                .map(|indexed| RouteStopDto {
                    code: &indexed.stop.code,
                    description: &indexed.stop.description,
                    description_en: &indexed.stop.description_en,
                    description_el: &indexed.stop.description_el,
                    sequence: indexed.sequence,
                    location: [indexed.stop.lon, indexed.stop.lat],
                })
                .collect();

            Feature {
                kind: "Feature",
                geometry: (!route.geometry.is_empty()).then(|| LineString {
                    kind: "LineString",
                    coordinates: &route.geometry,
                }),
                properties: RouteProperties {
                    route_id: &route.route_id,
                    line_name: route.line_name.as_deref(),
                    route_name: route.route_name.as_deref(),
                    description: route.description.as_deref(),
                    direction: route.direction.as_deref(),
                    length_km: route.length_km,
                    first_stop: route.first_stop.as_deref(),
                    last_stop: route.last_stop.as_deref(),
                    color: &route.color,
                    schedule: &route.schedule,
                    stops,
                },
            }
        })
        .collect();

    let body = FeatureCollection {
        kind: "FeatureCollection",
        features,
    };
    (
        [(axum::http::header::CONTENT_TYPE, "application/geo+json")],
        Json(body),
    )
        .into_response()
}

#[derive(Serialize)]
struct ReloadResponse {
    stops: usize,
    routes: usize,
    route_stops: usize,
    index_source: IndexSource,
}

/// Re-reads the static directory and swaps the catalog in one step. The
/// previous catalog keeps serving if loading fails.
async fn reload_static(State(state): State<AppState>) -> Response {
    let Some(dir) = state.static_dir.clone() else {
        return error_response(StatusCode::CONFLICT, "no static data directory configured");
    };

    let loaded = tokio::task::spawn_blocking(move || StaticCatalog::load(&dir)).await;
    match loaded {
        Ok(Ok(catalog)) => {
            let body = ReloadResponse {
                stops: catalog.stops.len(),
                routes: catalog.routes.len(),
                route_stops: catalog.index.len(),
                index_source: catalog.index_source,
            };
            state.catalog.publish(catalog);
            info!(
                stops = body.stops,
                routes = body.routes,
                route_stops = body.route_stops,
                "Static catalog reloaded"
            );
            Json(body).into_response()
        }
        Ok(Err(e)) => {
            error!(error = %format!("{e:#}"), "Static reload failed, keeping previous catalog");
            error_response(StatusCode::UNPROCESSABLE_ENTITY, format!("{e:#}"))
        }
        Err(e) => {
            error!(error = %e, "Static reload task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::fetch::FeedSource;
    use crate::gtfs_rt::{
        FeedEntity, FeedHeader, FeedMessage, Position, TripDescriptor, VehicleDescriptor,
    };
    use crate::model::Route;
    use crate::snapshot::SnapshotStore;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::BTreeMap;

    struct FixedFeed(Option<FeedMessage>);

    #[async_trait]
    impl FeedSource for FixedFeed {
        async fn fetch(&self) -> Result<FeedMessage, FetchError> {
            self.0
                .clone()
                .ok_or(FetchError::Timeout(Duration::from_secs(10)))
        }
    }

    fn bus(id: &str, route: &str, speed: f32) -> FeedEntity {
        FeedEntity {
            id: id.to_string(),
            vehicle: Some(crate::gtfs_rt::VehiclePosition {
                trip: Some(TripDescriptor {
                    route_id: Some(route.to_string()),
                    ..Default::default()
                }),
                vehicle: Some(VehicleDescriptor {
                    id: Some(id.to_string()),
                    ..Default::default()
                }),
                position: Some(Position {
                    latitude: 35.17,
                    longitude: 33.36,
                    speed: Some(speed),
                    ..Default::default()
                }),
                timestamp: Some(1_700_000_000),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn state_with(feed: Option<FeedMessage>, catalog: Option<StaticCatalog>) -> AppState {
        let scheduler = Arc::new(RefreshScheduler::new(
            Arc::new(FixedFeed(feed)),
            SnapshotStore::new(),
        ));
        let catalog = match catalog {
            Some(c) => Published::new(c),
            None => Published::empty(),
        };
        AppState::new(scheduler, Arc::new(catalog), None, Duration::from_secs(15))
    }

    fn stop(code: &str, lat: f64) -> Stop {
        Stop {
            code: code.to_string(),
            description: format!("Stop {code}"),
            description_el: String::new(),
            description_en: format!("Stop {code}"),
            lat,
            lon: 33.3,
        }
    }

    fn catalog() -> StaticCatalog {
        let stops: BTreeMap<_, _> = [stop("10", 35.1), stop("20", 35.2), stop("30", 35.3)]
            .into_iter()
            .map(|s| (s.code.clone(), s))
            .collect();
        let route = Route {
            route_id: "R1".to_string(),
            line_name: Some("1".to_string()),
            route_name: None,
            description: None,
            direction: None,
            length_km: None,
            first_stop: None,
            last_stop: None,
            stops_list: Some("20, 10".to_string()),
            geometry: vec![[33.3, 35.1], [33.3, 35.2]],
            color: "#ff0000".to_string(),
            schedule: RouteSchedule::default(),
        };
        let routes = BTreeMap::from([(route.route_id.clone(), route)]);
        StaticCatalog::from_parts(stops, routes, None)
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn feed(entity: Vec<FeedEntity>) -> FeedMessage {
        FeedMessage {
            header: FeedHeader {
                gtfs_realtime_version: "2.0".to_string(),
                ..Default::default()
            },
            entity,
        }
    }

    #[tokio::test]
    async fn test_positions_cold_start_is_unavailable() {
        let state = state_with(None, None);
        state.scheduler.refresh().await;

        let response = positions(State(state), Query(RouteFilter::default())).await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = body_json(response).await;
        let error = json["error"].as_str().unwrap();
        assert!(error.contains("did not respond"), "{error}");
        assert!(json.get("vehicles").is_none());
    }

    #[tokio::test]
    async fn test_positions_report_kmh_on_every_read() {
        let state = state_with(Some(feed(vec![bus("bus-1", "R1", 5.0)])), None);
        state.scheduler.refresh().await;

        for _ in 0..2 {
            let response = positions(State(state.clone()), Query(RouteFilter::default())).await;
            assert_eq!(response.status(), StatusCode::OK);
            let json = body_json(response).await;
            let vehicle = &json["vehicles"][0];
            assert!((vehicle["speed"].as_f64().unwrap() - 18.0).abs() < 1e-4);
            assert_eq!(vehicle["route"], "R1");
            assert_eq!(vehicle["current_status"], Value::Null);
            assert_eq!(vehicle["updated_approximate"], false);
        }
    }

    #[tokio::test]
    async fn test_positions_route_filter_and_expiry() {
        let state = state_with(
            Some(feed(vec![bus("a", "R1", 1.0), bus("b", "R2", 1.0)])),
            None,
        );
        let RefreshOutcome::Success(snapshot) = state.scheduler.refresh().await else {
            panic!("expected success");
        };

        let filter = RouteFilter {
            route_id: Some("R2".to_string()),
        };
        let json = body_json(positions(State(state), Query(filter)).await).await;

        let vehicles = json["vehicles"].as_array().unwrap();
        assert_eq!(vehicles.len(), 1);
        assert_eq!(vehicles[0]["vehicle_id"], "b");

        let expires: DateTime<Utc> = json["expires"].as_str().unwrap().parse().unwrap();
        assert_eq!((expires - snapshot.fetched_at).num_seconds(), 15);
    }

    #[tokio::test]
    async fn test_stops_sequence_only_when_filtered() {
        let state = state_with(None, Some(catalog()));

        let all = body_json(stops(State(state.clone()), Query(RouteFilter::default())).await).await;
        let all = all["stops"].as_array().unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|s| s.get("sequence").is_none()));

        let filter = RouteFilter {
            route_id: Some("R1".to_string()),
        };
        let on_route = body_json(stops(State(state), Query(filter)).await).await;
        let on_route = on_route["stops"].as_array().unwrap();
        assert_eq!(on_route.len(), 2);
        assert_eq!(on_route[0]["code"], "20");
        assert_eq!(on_route[0]["sequence"], 1);
        assert_eq!(on_route[1]["code"], "10");
    }

    #[tokio::test]
    async fn test_stops_for_unknown_route_is_empty() {
        let state = state_with(None, Some(catalog()));
        let filter = RouteFilter {
            route_id: Some("nope".to_string()),
        };
        let json = body_json(stops(State(state), Query(filter)).await).await;
        assert!(json["stops"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_routes_geojson_shape() {
        let state = state_with(None, Some(catalog()));

        let json = body_json(routes_geojson(State(state)).await).await;

        assert_eq!(json["type"], "FeatureCollection");
        let feature = &json["features"][0];
        assert_eq!(feature["geometry"]["type"], "LineString");
        assert_eq!(feature["geometry"]["coordinates"][1][1], 35.2);
        assert_eq!(feature["properties"]["color"], "#ff0000");
        let stop = &feature["properties"]["stops"][0];
        assert_eq!(stop["code"], "20");
        assert_eq!(stop["location"][0], 33.3);
        assert_eq!(stop["location"][1], 35.2);
    }

    #[tokio::test]
    async fn test_positions_for_route_missing_from_catalog() {
        let state = state_with(
            Some(feed(vec![bus("a", "R1", 1.0), bus("b", "R7", 1.0)])),
            Some(catalog()),
        );
        state.scheduler.refresh().await;

        let unknown = RouteFilter {
            route_id: Some("R7".to_string()),
        };
        let response = positions(State(state.clone()), Query(unknown)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "unknown route R7");

        let known = RouteFilter {
            route_id: Some("R1".to_string()),
        };
        let json = body_json(positions(State(state), Query(known)).await).await;
        assert_eq!(json["vehicles"][0]["vehicle_id"], "a");
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_previous_catalog() {
        let dir = std::env::temp_dir().join(format!(
            "gtfs_rt_map_api_empty_static_{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let state = AppState {
            static_dir: Some(dir.clone()),
            ..state_with(None, Some(catalog()))
        };

        let response = reload_static(State(state.clone())).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let error = body_json(response).await["error"].as_str().unwrap().to_string();
        assert!(error.contains("stops.csv"), "{error}");

        let response = stops(State(state), Query(RouteFilter::default())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let codes: Vec<_> = json["stops"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["code"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(codes, ["10", "20", "30"]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_static_endpoints_without_catalog() {
        let state = state_with(None, None);
        let response = routes_geojson(State(state)).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_reload_without_directory_is_conflict() {
        let state = state_with(None, Some(catalog()));
        let response = reload_static(State(state)).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_manual_refresh_reports_outcome() {
        let state = state_with(Some(feed(vec![bus("a", "R1", 1.0)])), None);

        let json = body_json(refresh(State(state.clone())).await).await;
        assert_eq!(json["outcome"], "success");
        assert_eq!(json["generation"], 1);
        assert_eq!(json["vehicles"], 1);

        let status = body_json(super::status(State(state)).await).await;
        assert_eq!(status["successful_refreshes"], 1);
        assert_eq!(status["state"], "idle");
    }

    #[tokio::test]
    async fn test_manual_refresh_failure() {
        let state = state_with(None, None);
        let response = refresh(State(state)).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let json = body_json(response).await;
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["kind"], "timeout");
    }
}
