use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::debug;

use crate::models::api::{
    BuildPromptRequest, CleanupQuery, CleanupResponse, ClearSessionResponse, ContextQuery,
    ContextResponse, HistoryQuery, PromptResponse, SaveMessageRequest, SaveMessageResponse,
    SearchQuery, SummaryResponse,
};
use crate::models::{SessionStats, StoredMessage};
use crate::services::ConversationMemory;
use crate::utils::ApiError;

pub async fn save_message_handler(
    State(memory): State<Arc<ConversationMemory>>,
    Json(req): Json<SaveMessageRequest>,
) -> Result<(StatusCode, Json<SaveMessageResponse>), ApiError> {
    debug!("Save request for session {} ({})", req.session_id, req.role);

    let outcome = memory
        .save_message(&req.session_id, req.role, &req.content, req.metadata)
        .await?;

    let status = if outcome.succeeded() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    Ok((
        status,
        Json(SaveMessageResponse {
            success: outcome.succeeded(),
            status: outcome.status(),
            message_id: outcome.message_id().map(str::to_string),
        }),
    ))
}

pub async fn history_handler(
    State(memory): State<Arc<ConversationMemory>>,
    Path(session_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<StoredMessage>>, ApiError> {
    let messages = memory
        .get_conversation_history(&session_id, query.limit)
        .await?;
    Ok(Json(messages))
}

pub async fn context_handler(
    State(memory): State<Arc<ConversationMemory>>,
    Path(session_id): Path<String>,
    Query(query): Query<ContextQuery>,
) -> Result<Json<ContextResponse>, ApiError> {
    let context = memory
        .get_context_for_ai(&session_id, query.max_chars)
        .await?;
    Ok(Json(ContextResponse { session_id, context }))
}

pub async fn prompt_handler(
    State(memory): State<Arc<ConversationMemory>>,
    Path(session_id): Path<String>,
    Json(req): Json<BuildPromptRequest>,
) -> Result<Json<PromptResponse>, ApiError> {
    let prompt = memory
        .build_prompt(&session_id, &req.message, req.limit)
        .await?;
    Ok(Json(PromptResponse { session_id, prompt }))
}

pub async fn summary_handler(
    State(memory): State<Arc<ConversationMemory>>,
    Path(session_id): Path<String>,
) -> Result<Json<SummaryResponse>, ApiError> {
    let summary = memory.get_session_summary(&session_id).await?;
    Ok(Json(SummaryResponse {
        session_id,
        summary,
    }))
}

pub async fn search_handler(
    State(memory): State<Arc<ConversationMemory>>,
    Path(session_id): Path<String>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<StoredMessage>>, ApiError> {
    let results = memory.search(&session_id, &query.q, query.limit).await?;
    Ok(Json(results))
}

pub async fn stats_handler(
    State(memory): State<Arc<ConversationMemory>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStats>, ApiError> {
    Ok(Json(memory.get_stats(&session_id).await?))
}

pub async fn clear_session_handler(
    State(memory): State<Arc<ConversationMemory>>,
    Path(session_id): Path<String>,
) -> Result<Json<ClearSessionResponse>, ApiError> {
    let deleted = memory.clear_session(&session_id).await?;
    Ok(Json(ClearSessionResponse { session_id, deleted }))
}

pub async fn cleanup_handler(
    State(memory): State<Arc<ConversationMemory>>,
    Query(query): Query<CleanupQuery>,
) -> Result<Json<CleanupResponse>, ApiError> {
    let deleted = memory.cleanup_old_sessions(query.days).await?;
    Ok(Json(CleanupResponse {
        days: query.days,
        deleted,
    }))
}
