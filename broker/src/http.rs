//! HTTP boundary: axum router, request/response DTOs, error mapping.
//!
//! Thin by intent: handlers validate input, build an [`AnalysisRequest`],
//! call the broker, and shape the response. No analysis logic lives here.
//! Malformed input maps to 400 with a stable machine-readable `code`;
//! engine-side failures map to 500 with the same error shape.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::broker::SharedBroker;
use crate::error::BrokerError;
use crate::pool::EngineStatus;
use crate::types::{
    AnalysisRequest, Color, EngineId, EngineSelector, Evaluation, Position,
};

#[derive(Clone)]
struct AppState {
    broker: SharedBroker,
}

/// Build the API router over a running broker.
pub fn router(broker: SharedBroker) -> Router {
    Router::new()
        .route("/best-move", post(best_move))
        .route("/evaluation", post(evaluation))
        .route("/ensemble", post(ensemble))
        .route("/engines/status", get(engines_status))
        .route("/health", get(health))
        .with_state(AppState { broker })
}

/// Bind and serve until the listener fails or the task is cancelled.
pub async fn serve(broker: SharedBroker, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP API listening");
    axum::serve(listener, router(broker)).await?;
    Ok(())
}

struct ApiError(BrokerError);

impl From<BrokerError> for ApiError {
    fn from(e: BrokerError) -> Self {
        Self(e)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
    timestamp: DateTime<Utc>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BrokerError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.0.to_string(),
            code: self.0.code(),
            timestamp: Utc::now(),
        };
        (status, Json(body)).into_response()
    }
}

fn require_fen(fen: Option<&str>) -> Result<Position, ApiError> {
    let fen = fen
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .ok_or_else(|| ApiError(BrokerError::InvalidInput("missing required field 'fen'".to_string())))?;
    Position::parse(fen).map_err(ApiError)
}

fn time_budget(seconds: Option<f64>, fallback: f64) -> Result<Duration, ApiError> {
    let seconds = seconds.unwrap_or(fallback);
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(ApiError(BrokerError::InvalidInput(format!(
            "time_limit must be a positive number of seconds, got {seconds}"
        ))));
    }
    Ok(Duration::from_secs_f64(seconds))
}

fn round3(seconds: f64) -> f64 {
    (seconds * 1000.0).round() / 1000.0
}

fn default_depth() -> u32 {
    15
}

fn default_engine() -> String {
    "stockfish".to_string()
}

fn default_elo() -> u32 {
    crate::config::FULL_STRENGTH_ELO
}

fn default_perspective() -> String {
    "white".to_string()
}

fn default_ensemble_depth() -> u32 {
    12
}

#[derive(Deserialize)]
struct BestMoveRequest {
    fen: Option<String>,
    #[serde(default = "default_depth")]
    depth: u32,
    #[serde(default = "default_engine")]
    engine: String,
    #[serde(default = "default_elo")]
    elo_limit: u32,
    /// Seconds of engine search time.
    time_limit: Option<f64>,
}

#[derive(Serialize)]
struct BestMoveResponse {
    best_move: String,
    evaluation: Evaluation,
    engine_used: EngineId,
    depth_reached: u32,
    best_line: Vec<String>,
    /// Wall-clock seconds the winning engine spent, 3 decimals.
    analysis_time: f64,
}

async fn best_move(
    State(state): State<AppState>,
    Json(req): Json<BestMoveRequest>,
) -> Result<Json<BestMoveResponse>, ApiError> {
    let position = require_fen(req.fen.as_deref())?;
    let budget = time_budget(req.time_limit, 1.0)?;
    let request = AnalysisRequest::new(
        position,
        req.depth,
        budget,
        req.elo_limit,
        EngineSelector::parse(&req.engine),
    );

    let outcome = state.broker.best_move(request).await?;
    let result = &outcome.result;
    Ok(Json(BestMoveResponse {
        best_move: result.best_move.clone(),
        evaluation: result.evaluation,
        engine_used: result.engine_id.clone(),
        depth_reached: result.depth_reached,
        best_line: result.principal_variation.clone(),
        analysis_time: round3(result.elapsed.as_secs_f64()),
    }))
}

#[derive(Deserialize)]
struct EvaluationRequest {
    fen: Option<String>,
    #[serde(default = "default_perspective")]
    perspective: String,
}

#[derive(Serialize)]
struct EvaluationBody {
    cp: Option<i32>,
    mate: Option<i32>,
    winning_chances: f64,
    position_type: &'static str,
}

#[derive(Serialize)]
struct MoveQualityBody {
    /// The engine's best continuation from here; clients echoing a played
    /// move read this as the move just assessed.
    last_move: String,
    classification: &'static str,
    accuracy: f64,
}

#[derive(Serialize)]
struct EvaluationResponse {
    evaluation: EvaluationBody,
    move_quality: MoveQualityBody,
    engine_used: EngineId,
}

async fn evaluation(
    State(state): State<AppState>,
    Json(req): Json<EvaluationRequest>,
) -> Result<Json<EvaluationResponse>, ApiError> {
    let position = require_fen(req.fen.as_deref())?;
    let perspective = Color::parse(&req.perspective).map_err(ApiError)?;

    let assessment = state.broker.evaluate(position, perspective).await?;
    Ok(Json(EvaluationResponse {
        evaluation: EvaluationBody {
            cp: assessment.evaluation.cp(),
            mate: assessment.evaluation.mate(),
            winning_chances: assessment.winning_chances,
            position_type: assessment.position_type,
        },
        move_quality: MoveQualityBody {
            last_move: assessment.best_move,
            classification: assessment.classification,
            accuracy: assessment.accuracy,
        },
        engine_used: assessment.engine_id,
    }))
}

#[derive(Deserialize)]
struct EnsembleRequest {
    fen: Option<String>,
    /// Engine kinds to consult; omitted means every configured kind.
    engines: Option<Vec<EngineId>>,
    #[serde(default = "default_ensemble_depth")]
    depth: u32,
    time_limit: Option<f64>,
}

#[derive(Serialize)]
struct EngineVoteBody {
    engine: EngineId,
    best_move: String,
    evaluation: Evaluation,
    weight: f64,
}

#[derive(Serialize)]
struct EnsembleResponse {
    consensus_move: String,
    /// Consensus confidence in [0, 100].
    confidence: f64,
    engine_results: Vec<EngineVoteBody>,
}

async fn ensemble(
    State(state): State<AppState>,
    Json(req): Json<EnsembleRequest>,
) -> Result<Json<EnsembleResponse>, ApiError> {
    let position = require_fen(req.fen.as_deref())?;
    let budget = time_budget(req.time_limit, 1.0)?;
    let request = AnalysisRequest::new(
        position,
        req.depth,
        budget,
        crate::config::FULL_STRENGTH_ELO,
        EngineSelector::ensemble_of(req.engines.unwrap_or_default()),
    );

    let outcome = state.broker.best_move(request).await?;
    Ok(Json(EnsembleResponse {
        consensus_move: outcome.result.best_move.clone(),
        confidence: outcome.confidence.unwrap_or(100.0),
        engine_results: outcome
            .votes
            .iter()
            .map(|v| EngineVoteBody {
                engine: v.engine_id.clone(),
                best_move: v.best_move.clone(),
                evaluation: v.evaluation,
                weight: v.weight,
            })
            .collect(),
    }))
}

#[derive(Serialize)]
struct EnginesStatusResponse {
    engines: BTreeMap<EngineId, EngineStatus>,
}

async fn engines_status(State(state): State<AppState>) -> Json<EnginesStatusResponse> {
    let engines = state
        .broker
        .engine_status()
        .into_iter()
        .map(|s| (s.engine.clone(), s))
        .collect();
    Json(EnginesStatusResponse { engines })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: DateTime<Utc>,
    /// Names of the engine kinds currently accepting work.
    engines_available: Vec<EngineId>,
    inflight_requests: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let engines_available = state.broker.engines_available();
    Json(HealthResponse {
        status: if engines_available.is_empty() {
            "degraded"
        } else {
            "healthy"
        },
        timestamp: Utc::now(),
        engines_available,
        inflight_requests: state.broker.inflight_count(),
    })
}
