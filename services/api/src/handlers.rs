//! Axum Handlers for the REST API
//!
//! This module contains the logic for handling HTTP requests for revision
//! sessions and topic content. It uses `utoipa` doc comments to generate
//! OpenAPI documentation.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use revision_core::{StoreError, TutorError};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};
use utoipa::IntoParams;
use uuid::Uuid;

use crate::{
    models::{
        ContinueRevisionPayload, ErrorResponse, HealthResponse, RevisionResponse, SessionOverview,
        StartRevisionPayload, TopicInfo, TopicStatsResponse,
    },
    state::AppState,
};

const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    InternalServerError(anyhow::Error),
}

impl ApiError {
    /// Maps tutor failures: unknown content is a 404, everything else a 500.
    pub fn from_tutor(err: TutorError) -> Self {
        match err {
            TutorError::Store(StoreError::NotFound(what)) => {
                ApiError::NotFound(format!("{what} not found"))
            }
            other => ApiError::InternalServerError(other.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

fn require(value: &str, field: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{field} is required")));
    }
    Ok(())
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model: state.config.chat_model.clone(),
    })
}

/// List the topics available for revision.
#[utoipa::path(
    get,
    path = "/topics",
    responses(
        (status = 200, description = "Available topics", body = [TopicInfo]),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn list_topics(State(state): State<Arc<AppState>>) -> Result<Json<Vec<TopicInfo>>, ApiError> {
    let topics = state.store.list_topics().await?;
    Ok(Json(topics.into_iter().map(TopicInfo::from).collect()))
}

/// Completion statistics across all sessions of a topic.
#[utoipa::path(
    get,
    path = "/topics/{topic}/stats",
    responses(
        (status = 200, description = "Topic statistics", body = TopicStatsResponse),
        (status = 404, description = "Topic not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("topic" = String, Path, description = "Topic name")
    )
)]
pub async fn topic_stats(
    State(state): State<Arc<AppState>>,
    Path(topic): Path<String>,
) -> Result<Json<TopicStatsResponse>, ApiError> {
    let stats = state
        .store
        .topic_stats(&topic)
        .await
        .map_err(|e| ApiError::from_tutor(e.into()))?;
    Ok(Json(stats.into()))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct HistoryParams {
    /// Maximum number of sessions to return.
    pub limit: Option<usize>,
}

/// Revision history of one student, newest first.
#[utoipa::path(
    get,
    path = "/students/{student_id}/sessions",
    responses(
        (status = 200, description = "Sessions of the student", body = [SessionOverview]),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("student_id" = String, Path, description = "Student ID"),
        HistoryParams
    )
)]
pub async fn student_sessions(
    State(state): State<Arc<AppState>>,
    Path(student_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<SessionOverview>>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let sessions = state.store.student_sessions(&student_id, limit).await?;
    Ok(Json(sessions.iter().map(SessionOverview::from).collect()))
}

/// Start a revision session, or resume the one named by `session_id`.
#[utoipa::path(
    post,
    path = "/revision/start",
    request_body = StartRevisionPayload,
    responses(
        (status = 200, description = "Session introduction", body = RevisionResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 404, description = "Topic not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn start_revision(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<StartRevisionPayload>,
) -> Result<Json<RevisionResponse>, ApiError> {
    require(&payload.topic, "topic")?;
    require(&payload.student_id, "student_id")?;

    let session_id = payload
        .session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    info!(%session_id, topic = %payload.topic, "Starting revision session");

    let result = state
        .tutor
        .start(&payload.topic, &payload.student_id, &session_id)
        .await
        .map_err(ApiError::from_tutor)?;
    Ok(Json(RevisionResponse::from_start(result, Utc::now())))
}

/// Send one student message to a running session.
#[utoipa::path(
    post,
    path = "/revision/continue",
    request_body = ContinueRevisionPayload,
    responses(
        (status = 200, description = "Tutor reply", body = RevisionResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn continue_revision(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ContinueRevisionPayload>,
) -> Result<Json<RevisionResponse>, ApiError> {
    require(&payload.session_id, "session_id")?;

    let mut result = state
        .tutor
        .handle_input(&payload.session_id, &payload.query)
        .await
        .map_err(ApiError::from_tutor)?;
    if result.topic.is_empty() {
        result.topic = payload.topic.unwrap_or_default();
    }
    Ok(Json(RevisionResponse::from_turn(
        payload.session_id,
        result,
        Utc::now(),
    )))
}
