//! OneMap backend wire tests
//!
//! A local axum server imitates the token and search endpoints so the
//! request shape and status handling can be checked without the network.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use sgre_common::config::GeocodingConfig;
use sgre_geocode::services::{GeocodeOutcome, OneMapBackend};
use sgre_geocode::{GeocodeBackend, GeocodeError, GeocodingClient};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

const EMAIL: &str = "analyst@example.com";
const PASSWORD: &str = "correct-horse";
const TOKEN: &str = "eyJ0eXAi.test.token";

#[derive(Default)]
struct ServerState {
    searches: AtomicUsize,
    flaky_remaining: AtomicUsize,
}

async fn get_token(Json(body): Json<Value>) -> Response {
    if body["email"] == EMAIL && body["password"] == PASSWORD {
        Json(json!({ "access_token": TOKEN, "expiry_timestamp": "1999999999" })).into_response()
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Invalid credentials" }))).into_response()
    }
}

async fn search(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.searches.fetch_add(1, Ordering::SeqCst);

    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {TOKEN}"))
        .unwrap_or(false);
    if !authorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    if params.get("returnGeom").map(String::as_str) != Some("Y")
        || params.get("getAddrDetails").map(String::as_str) != Some("Y")
    {
        return StatusCode::BAD_REQUEST.into_response();
    }

    let query = params.get("searchVal").cloned().unwrap_or_default();
    match query.as_str() {
        "RATE LIMITED" => return StatusCode::TOO_MANY_REQUESTS.into_response(),
        "SERVER DOWN" => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        "FLAKY" if state.flaky_remaining.load(Ordering::SeqCst) > 0 => {
            state.flaky_remaining.fetch_sub(1, Ordering::SeqCst);
            return StatusCode::BAD_GATEWAY.into_response();
        }
        "NOTHING" => {
            return Json(json!({ "found": 0, "totalNumPages": 0, "pageNum": 1, "results": [] }))
                .into_response()
        }
        _ => {}
    }

    Json(json!({
        "found": 2,
        "totalNumPages": 1,
        "pageNum": 1,
        "results": [
            {
                "SEARCHVAL": format!("{query} BEST"),
                "BLK_NO": "406",
                "ROAD_NAME": "ANG MO KIO AVENUE 10",
                "BUILDING": "NIL",
                "ADDRESS": "406 ANG MO KIO AVENUE 10 SINGAPORE 560406",
                "POSTAL": "560406",
                "X": "30314.7",
                "Y": "39084.2",
                "LATITUDE": "1.36213",
                "LONGITUDE": "103.85384"
            },
            {
                "SEARCHVAL": format!("{query} OTHER"),
                "BLK_NO": "406A",
                "ROAD_NAME": "ANG MO KIO AVENUE 10",
                "BUILDING": "NIL",
                "ADDRESS": "406A ANG MO KIO AVENUE 10 SINGAPORE 561406",
                "POSTAL": "561406",
                "X": "30320.0",
                "Y": "39090.0",
                "LATITUDE": "1.36220",
                "LONGITUDE": "103.85390"
            }
        ]
    }))
    .into_response()
}

/// Start the fake service and return its base URL
async fn spawn_server(state: Arc<ServerState>) -> String {
    let app = Router::new()
        .route("/api/auth/post/getToken", post(get_token))
        .route("/api/common/elastic/search", get(search))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn config(base_url: &str, password: &str) -> GeocodingConfig {
    GeocodingConfig {
        base_url: base_url.to_string(),
        email: Some(EMAIL.to_string()),
        password: Some(password.to_string()),
        request_delay_ms: 0,
        requests_per_minute: 60_000,
        base_delay_ms: 1,
        max_attempts: 3,
        timeout_secs: 5,
        ..GeocodingConfig::default()
    }
}

#[tokio::test]
async fn test_token_and_search_round_trip() {
    let base = spawn_server(Arc::new(ServerState::default())).await;
    let backend = OneMapBackend::new(&config(&base, PASSWORD)).unwrap();

    let token = backend.authenticate().await.unwrap();
    assert_eq!(token, TOKEN);

    let hits = backend.search(&token, "406 ANG MO KIO AVE 10").await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].postal, "560406");
    assert_eq!(hits[0].latitude, "1.36213");
    assert_eq!(hits[1].blk_no, "406A");
}

#[tokio::test]
async fn test_wrong_password_is_auth_failure() {
    let base = spawn_server(Arc::new(ServerState::default())).await;
    let backend = OneMapBackend::new(&config(&base, "wrong")).unwrap();

    let err = backend.authenticate().await.unwrap_err();

    assert!(matches!(err, GeocodeError::AuthFailed(_)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_bad_token_is_rejected() {
    let base = spawn_server(Arc::new(ServerState::default())).await;
    let backend = OneMapBackend::new(&config(&base, PASSWORD)).unwrap();

    let err = backend.search("stale-token", "1 A ST").await.unwrap_err();
    assert!(matches!(err, GeocodeError::AuthFailed(_)));
}

#[tokio::test]
async fn test_status_codes_map_to_transient_errors() {
    let base = spawn_server(Arc::new(ServerState::default())).await;
    let backend = OneMapBackend::new(&config(&base, PASSWORD)).unwrap();

    let limited = backend.search(TOKEN, "RATE LIMITED").await.unwrap_err();
    assert_eq!(limited, GeocodeError::RateLimitExceeded);
    assert!(limited.is_transient());

    let down = backend.search(TOKEN, "SERVER DOWN").await.unwrap_err();
    assert!(matches!(down, GeocodeError::ApiError(500, _)));
    assert!(down.is_transient());
}

#[tokio::test]
async fn test_unreachable_server_is_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let backend = OneMapBackend::new(&config(&format!("http://{addr}"), PASSWORD)).unwrap();

    let err = backend.authenticate().await.unwrap_err();
    assert!(err.is_transient(), "got {err:?}");
}

#[tokio::test]
async fn test_client_retries_through_flaky_gateway() {
    let state = Arc::new(ServerState::default());
    state.flaky_remaining.store(2, Ordering::SeqCst);
    let base = spawn_server(state.clone()).await;
    let cfg = config(&base, PASSWORD);
    let client = GeocodingClient::new(Arc::new(OneMapBackend::new(&cfg).unwrap()), &cfg, None);
    client.authenticate().await.unwrap();

    let outcome = client.geocode_one("FLAKY").await;

    let rows = match outcome {
        GeocodeOutcome::Found(rows) => rows,
        other => panic!("expected candidates, got {other:?}"),
    };
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].search_result, 0);
    assert_eq!(rows[0].latitude, 1.36213);
    assert_eq!(rows[0].x, Some(30314.7));
    assert_eq!(state.searches.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_client_reports_empty_results_as_no_matches() {
    let base = spawn_server(Arc::new(ServerState::default())).await;
    let cfg = config(&base, PASSWORD);
    let client = GeocodingClient::new(Arc::new(OneMapBackend::new(&cfg).unwrap()), &cfg, None);
    client.authenticate().await.unwrap();

    let outcome = client.geocode_one("NOTHING").await;
    assert_eq!(
        outcome,
        GeocodeOutcome::Failed(GeocodeError::NoMatches("NOTHING".to_string()))
    );
}
