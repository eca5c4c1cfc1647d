//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API, WebSocket endpoint, and OpenAPI documentation.

use crate::{
    handlers,
    models::{
        ContinueRevisionPayload, ErrorResponse, HealthResponse, RevisionResponse, SessionOverview,
        StartRevisionPayload, TopicInfo, TopicStatsResponse,
    },
    state::AppState,
    ws::ws_handler,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::list_topics,
        handlers::topic_stats,
        handlers::start_revision,
        handlers::continue_revision,
        handlers::student_sessions,
    ),
    components(
        schemas(
            StartRevisionPayload,
            ContinueRevisionPayload,
            RevisionResponse,
            TopicInfo,
            TopicStatsResponse,
            SessionOverview,
            HealthResponse,
            ErrorResponse
        )
    ),
    tags(
        (name = "Revision API", description = "Guided topic revision with an AI tutor")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/health", get(handlers::health))
        .route("/topics", get(handlers::list_topics))
        .route("/topics/{topic}/stats", get(handlers::topic_stats))
        .route("/revision/start", post(handlers::start_revision))
        .route("/revision/continue", post(handlers::continue_revision))
        .route(
            "/students/{student_id}/sessions",
            get(handlers::student_sessions),
        )
        .route("/ws/revision/{session_id}", get(ws_handler))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
        .layer(CorsLayer::permissive())
}
