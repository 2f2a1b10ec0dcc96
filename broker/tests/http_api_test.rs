//! HTTP API surface: routing, defaults, error mapping, response shapes.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{config_with, def, ScriptedFactory, STARTING_FEN};
use engine_broker::engine::AdapterFactory;
use engine_broker::http::router;
use engine_broker::Broker;

fn test_router() -> Router {
    let factory = ScriptedFactory::instant("stockfish", "e2e4", 30);
    let factories: Vec<Arc<dyn AdapterFactory>> = vec![factory];
    let mut config = config_with(vec![def("stockfish", 0.8, 2)]);
    config.ensemble.default_engine = Some("stockfish".to_string());
    router(Broker::with_factories(config, factories))
}

async fn post(app: &Router, path: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

async fn get(app: &Router, path: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("GET")
        .uri(path)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn missing_fen_is_a_400_with_stable_code() {
    let app = test_router();
    for path in ["/best-move", "/evaluation", "/ensemble"] {
        let (status, body) = post(&app, path, json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "path {path}");
        assert_eq!(body["code"], "invalid_input");
        assert!(body["error"].as_str().unwrap().contains("fen"));
        assert!(body["timestamp"].is_string());
    }
}

#[tokio::test]
async fn malformed_fen_is_rejected() {
    let app = test_router();
    let (status, body) = post(&app, "/best-move", json!({"fen": "not a position"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_input");
}

#[tokio::test]
async fn best_move_happy_path_with_defaults() {
    let app = test_router();
    let (status, body) = post(&app, "/best-move", json!({"fen": STARTING_FEN})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["best_move"], "e2e4");
    assert_eq!(body["engine_used"], "stockfish");
    assert_eq!(body["evaluation"]["cp"], 30);
    assert!(body["evaluation"]["mate"].is_null());
    assert_eq!(body["depth_reached"], 15); // default depth
    assert_eq!(body["best_line"][0], "e2e4");
    assert!(body["analysis_time"].is_number());
}

#[tokio::test]
async fn best_move_rejects_nonpositive_time_limit() {
    let app = test_router();
    let (status, body) = post(
        &app,
        "/best-move",
        json!({"fen": STARTING_FEN, "time_limit": -1.0}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_input");
}

#[tokio::test]
async fn unknown_engine_maps_to_500_engine_unavailable() {
    let app = test_router();
    let (status, body) = post(
        &app,
        "/best-move",
        json!({"fen": STARTING_FEN, "engine": "ghost"}),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "engine_unavailable");
}

#[tokio::test]
async fn evaluation_normalizes_to_the_requested_perspective() {
    let app = test_router();

    // White to move, +30 for the side to move.
    let (status, body) = post(&app, "/evaluation", json!({"fen": STARTING_FEN})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["evaluation"]["cp"], 30);
    assert_eq!(body["evaluation"]["winning_chances"], 53.0);
    assert_eq!(body["evaluation"]["position_type"], "opening");
    assert_eq!(body["move_quality"]["last_move"], "e2e4");
    assert_eq!(body["move_quality"]["classification"], "balanced");
    assert_eq!(body["move_quality"]["accuracy"], 95.0);

    let (status, body) = post(
        &app,
        "/evaluation",
        json!({"fen": STARTING_FEN, "perspective": "black"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["evaluation"]["cp"], -30);
    assert_eq!(body["evaluation"]["winning_chances"], 47.0);
}

#[tokio::test]
async fn evaluation_rejects_unknown_perspective() {
    let app = test_router();
    let (status, body) = post(
        &app,
        "/evaluation",
        json!({"fen": STARTING_FEN, "perspective": "sideways"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_input");
}

#[tokio::test]
async fn ensemble_reports_votes_with_weights() {
    let app = test_router();
    let (status, body) = post(&app, "/ensemble", json!({"fen": STARTING_FEN})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["consensus_move"], "e2e4");
    // One voter at weight 0.8: 100 * 0.8 / 1.
    assert_eq!(body["confidence"], 80.0);
    let results = body["engine_results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["engine"], "stockfish");
    assert_eq!(results[0]["weight"], 0.8);
    assert_eq!(results[0]["evaluation"]["cp"], 30);
}

#[tokio::test]
async fn engines_status_lists_configured_kinds() {
    let app = test_router();
    let (status, body) = get(&app, "/engines/status").await;
    assert_eq!(status, StatusCode::OK);
    let stockfish = &body["engines"]["stockfish"];
    assert_eq!(stockfish["available"], true);
    assert_eq!(stockfish["degraded"], false);
    assert_eq!(stockfish["status"], "ready");
    assert_eq!(stockfish["slots"], 2);
    assert_eq!(stockfish["strength"], "scripted");
}

#[tokio::test]
async fn health_reports_available_engines() {
    let app = test_router();
    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["engines_available"], json!(["stockfish"]));
    assert!(body["timestamp"].is_string());
}
