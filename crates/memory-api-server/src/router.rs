use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    // Public routes
    let health_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check));

    let memory_routes = Router::new()
        .route(
            "/api/memory/messages",
            post(handlers::memory::save_message_handler),
        )
        .route(
            "/api/memory/sessions/{session_id}",
            delete(handlers::memory::clear_session_handler),
        )
        .route(
            "/api/memory/sessions/{session_id}/history",
            get(handlers::memory::history_handler),
        )
        .route(
            "/api/memory/sessions/{session_id}/context",
            get(handlers::memory::context_handler),
        )
        .route(
            "/api/memory/sessions/{session_id}/prompt",
            post(handlers::memory::prompt_handler),
        )
        .route(
            "/api/memory/sessions/{session_id}/summary",
            get(handlers::memory::summary_handler),
        )
        .route(
            "/api/memory/sessions/{session_id}/search",
            get(handlers::memory::search_handler),
        )
        .route(
            "/api/memory/sessions/{session_id}/stats",
            get(handlers::memory::stats_handler),
        )
        .route(
            "/api/memory/maintenance/cleanup",
            post(handlers::memory::cleanup_handler),
        );

    Router::new()
        .merge(health_routes)
        .merge(memory_routes)
        // CORS
        .layer(CorsLayer::permissive())
        // Tracing
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false)),
        )
        .with_state(state)
}
